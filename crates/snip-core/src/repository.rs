use crate::error::Result;
use crate::model::{BatchEntry, BatchItem, LinkRecord, Stats, UserId};
use crate::short_id::ShortId;
use async_trait::async_trait;

/// The operation set every storage backend provides.
///
/// Backends own their storage exclusively; everything crossing this trait
/// is returned by value.
#[async_trait]
pub trait Repository: Send + Sync + 'static {
    /// Stores `original_url` under its content-derived id and returns the id.
    ///
    /// Storing a URL that is already present returns its id without creating
    /// a second record; the original owner is kept. If the id is taken by a
    /// different URL, returns `Err(Conflict(id))` and leaves the stored URL
    /// untouched.
    async fn add(&self, original_url: &str, owner: UserId) -> Result<ShortId>;

    /// Applies [`Repository::add`] to every item.
    ///
    /// Conflicting items are left out of the response; they never fail the
    /// batch. Returns `Err(EmptyRequest)` when `items` is empty.
    async fn add_batch(&self, items: &[BatchItem], owner: UserId) -> Result<Vec<BatchEntry>>;

    /// Resolves an id to its original URL.
    ///
    /// Returns `Err(NotFound)` for unknown ids and `Err(Deleted)` for
    /// tombstoned ones.
    async fn get(&self, id: &ShortId) -> Result<String>;

    /// Returns every non-deleted record owned by `owner`.
    async fn user_links(&self, owner: UserId) -> Result<Vec<LinkRecord>>;

    /// Allocates a fresh user id.
    async fn new_user(&self) -> Result<UserId>;

    /// Tombstones the given ids that are owned by `owner`.
    ///
    /// Ids that are unknown or owned by someone else are ignored.
    async fn delete_batch(&self, owner: UserId, ids: &[ShortId]) -> Result<()>;

    /// Liveness check.
    async fn ping(&self) -> Result<()>;

    async fn stats(&self) -> Result<Stats>;
}
