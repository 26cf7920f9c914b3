//! Asynchronous batch deletion.
//!
//! Callers hand deletion requests to a [`DeletionPipeline`] and return
//! immediately; a single background worker applies them to the storage
//! backend in submission order.

pub mod error;
pub mod pipeline;

pub use error::PipelineError;
pub use pipeline::{DeleteTask, DeletionPipeline};
