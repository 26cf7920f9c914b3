pub mod list;
pub mod memory;
pub mod postgres;

#[cfg(test)]
mod contract;

pub use list::LinkedListRepository;
pub use memory::InMemoryRepository;
pub use postgres::{PostgresConfig, PostgresRepository};
pub use snip_core::{Repository, Result, StorageError};
