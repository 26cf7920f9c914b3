//! Link shortener service.
//!
//! This crate wires a storage backend and its deletion pipeline together
//! behind [`ShortenerService`], and signs the user tokens that identify
//! callers. Core types are re-exported from `snip_core`.

pub mod error;
pub mod factory;
pub mod service;
pub mod session;

pub use error::ShortenerError;
pub use factory::{BackendKind, Storage, StorageConfig, StorageFactory};
pub use service::{BatchLink, Identity, ShortLink, ShortenerService, UserLink};
pub use session::UserTokenSigner;
pub use snip_core::{BatchItem, ShortId, UserId};
