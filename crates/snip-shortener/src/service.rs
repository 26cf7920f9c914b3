use crate::error::{storage_to_shortener_error, ShortenerError};
use crate::factory::Storage;
use crate::session::UserTokenSigner;
use snip_core::{BatchItem, Repository, ShortId, Stats, StorageError, UserId};
use snip_pipeline::DeletionPipeline;
use std::sync::Arc;
use tracing::{debug, warn};

/// A shortened link as handed back to callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShortLink {
    pub short_id: ShortId,
    pub short_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchLink {
    pub correlation_id: String,
    pub short_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserLink {
    pub short_url: String,
    pub original_url: String,
}

/// The caller a request is made on behalf of.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user: UserId,
    /// Signed token to hand back to the caller.
    pub token: String,
    /// Whether the user was allocated by this call.
    pub created: bool,
}

/// Front door to the link store.
///
/// This service wraps a `Repository` and its `DeletionPipeline` to handle:
/// - URL validation
/// - Turning short ids into short URLs under `base_url`
/// - Queueing deletions instead of applying them inline
pub struct ShortenerService {
    repository: Arc<dyn Repository>,
    deletions: DeletionPipeline,
    base_url: String,
}

impl ShortenerService {
    pub fn new(storage: Storage, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            repository: storage.repository,
            deletions: storage.deletions,
            base_url,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Validates that the URL has a valid format (has a scheme and host).
    fn validate_url(url: &str) -> Result<(), ShortenerError> {
        if url.is_empty() {
            return Err(ShortenerError::InvalidUrl(
                "URL cannot be empty".to_string(),
            ));
        }

        let Some((scheme, rest)) = url.split_once("://") else {
            return Err(ShortenerError::InvalidUrl(format!(
                "URL must have a valid scheme and host: {}",
                url
            )));
        };
        if scheme.is_empty() || rest.is_empty() || rest.starts_with('/') {
            return Err(ShortenerError::InvalidUrl(format!(
                "URL must have a valid scheme and host: {}",
                url
            )));
        }

        let scheme = scheme.to_lowercase();
        if scheme != "http" && scheme != "https" {
            return Err(ShortenerError::InvalidUrl(format!(
                "URL scheme must be http or https: {}",
                scheme
            )));
        }

        Ok(())
    }

    fn link(&self, short_id: ShortId) -> ShortLink {
        let short_url = short_id.to_url(&self.base_url);
        ShortLink {
            short_id,
            short_url,
        }
    }

    fn map_err(&self, e: StorageError) -> ShortenerError {
        storage_to_shortener_error(e, &self.base_url)
    }

    pub async fn shorten(&self, url: &str, owner: UserId) -> Result<ShortLink, ShortenerError> {
        Self::validate_url(url)?;

        let id = self
            .repository
            .add(url, owner)
            .await
            .map_err(|e| self.map_err(e))?;
        Ok(self.link(id))
    }

    /// Shortens every item; items whose id is taken by another URL are left
    /// out of the result. One invalid URL rejects the whole batch.
    pub async fn shorten_batch(
        &self,
        items: &[BatchItem],
        owner: UserId,
    ) -> Result<Vec<BatchLink>, ShortenerError> {
        for item in items {
            Self::validate_url(&item.original_url)?;
        }

        let entries = self
            .repository
            .add_batch(items, owner)
            .await
            .map_err(|e| self.map_err(e))?;
        Ok(entries
            .into_iter()
            .map(|entry| BatchLink {
                correlation_id: entry.correlation_id,
                short_url: entry.short_id.to_url(&self.base_url),
            })
            .collect())
    }

    pub async fn resolve(&self, id: &ShortId) -> Result<String, ShortenerError> {
        self.repository.get(id).await.map_err(|e| self.map_err(e))
    }

    pub async fn user_links(&self, owner: UserId) -> Result<Vec<UserLink>, ShortenerError> {
        let records = self
            .repository
            .user_links(owner)
            .await
            .map_err(|e| self.map_err(e))?;
        Ok(records
            .into_iter()
            .map(|record| UserLink {
                short_url: record.short_id.to_url(&self.base_url),
                original_url: record.original_url,
            })
            .collect())
    }

    pub async fn new_user(&self) -> Result<UserId, ShortenerError> {
        self.repository.new_user().await.map_err(|e| self.map_err(e))
    }

    /// Resolves the caller behind `token`, allocating a new user when the
    /// token is missing or fails verification.
    pub async fn identify(
        &self,
        signer: &UserTokenSigner,
        token: Option<&str>,
    ) -> Result<Identity, ShortenerError> {
        if let Some(token) = token {
            match signer.verify(token) {
                Some(user) => {
                    return Ok(Identity {
                        user,
                        token: token.to_string(),
                        created: false,
                    })
                }
                None => warn!("rejecting user token with a bad signature"),
            }
        }

        let user = self.new_user().await?;
        debug!(user_id = user, "issued user token");
        Ok(Identity {
            user,
            token: signer.sign(user),
            created: true,
        })
    }

    /// Queues the ids for deletion and returns once the request is accepted.
    ///
    /// The deletion itself is applied later by the pipeline worker.
    pub async fn delete_user_links(
        &self,
        owner: UserId,
        ids: Vec<ShortId>,
    ) -> Result<(), ShortenerError> {
        let count = ids.len();
        self.deletions.enqueue(owner, ids).await?;
        debug!(owner, ids = count, "queued deletion");
        Ok(())
    }

    pub async fn ping(&self) -> Result<(), ShortenerError> {
        self.repository.ping().await.map_err(|e| self.map_err(e))
    }

    pub async fn stats(&self) -> Result<Stats, ShortenerError> {
        self.repository.stats().await.map_err(|e| self.map_err(e))
    }

    /// Drains pending deletions and stops the pipeline worker.
    pub async fn shutdown(self) {
        self.deletions.shutdown().await;
    }
}
