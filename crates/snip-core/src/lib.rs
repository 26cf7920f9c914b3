//! Core types and traits for the snip link store.
//!
//! This crate provides the identifier scheme, the record model and the
//! storage contract shared by every backend, the deletion pipeline and
//! the shortener service.

pub mod error;
pub mod model;
pub mod repository;
pub mod short_id;

pub use error::{CoreError, Result, StorageError};
pub use model::{BatchEntry, BatchItem, LinkRecord, Stats, UserId, UserRecord};
pub use repository::Repository;
pub use short_id::{ShortId, ShortIdGenerator};
