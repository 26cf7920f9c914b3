use snip_core::{Repository, Result, ShortIdGenerator, StorageError};
use snip_pipeline::DeletionPipeline;
use snip_storage::{InMemoryRepository, LinkedListRepository, PostgresConfig, PostgresRepository};
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use typed_builder::TypedBuilder;

pub const DEFAULT_DELETION_QUEUE_CAPACITY: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Memory,
    List,
    Postgres,
}

impl Display for BackendKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Memory => write!(f, "memory"),
            BackendKind::List => write!(f, "list"),
            BackendKind::Postgres => write!(f, "postgres"),
        }
    }
}

#[derive(Debug, Clone, TypedBuilder)]
pub struct StorageConfig {
    /// Inferred when unset: Postgres if a DSN is configured, Memory otherwise.
    #[builder(default)]
    pub backend: Option<BackendKind>,
    /// Append-only log for the memory backend.
    #[builder(default)]
    pub file_storage_path: Option<PathBuf>,
    #[builder(default)]
    pub database_dsn: Option<String>,
    #[builder(default = ShortIdGenerator::DEFAULT_LENGTH)]
    pub id_length: usize,
    #[builder(default = 5)]
    pub max_connections: u32,
    #[builder(default = DEFAULT_DELETION_QUEUE_CAPACITY)]
    pub deletion_queue_capacity: usize,
}

impl StorageConfig {
    pub fn backend_kind(&self) -> BackendKind {
        match (self.backend, &self.database_dsn) {
            (Some(kind), _) => kind,
            (None, Some(_)) => BackendKind::Postgres,
            (None, None) => BackendKind::Memory,
        }
    }
}

/// A backend together with the pipeline that applies deletions to it.
pub struct Storage {
    pub repository: Arc<dyn Repository>,
    pub deletions: DeletionPipeline,
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("deletions", &self.deletions)
            .finish_non_exhaustive()
    }
}

pub struct StorageFactory;

impl StorageFactory {
    /// Builds the configured backend and starts its deletion worker.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn build(config: &StorageConfig) -> Result<Storage> {
        let generator = ShortIdGenerator::new(config.id_length)?;
        let kind = config.backend_kind();

        let repository: Arc<dyn Repository> = match kind {
            BackendKind::Memory => match &config.file_storage_path {
                Some(path) => Arc::new(InMemoryRepository::open(path, generator)?),
                None => Arc::new(InMemoryRepository::new(generator)),
            },
            BackendKind::List => Arc::new(LinkedListRepository::new(generator)),
            BackendKind::Postgres => {
                let dsn = config.database_dsn.clone().ok_or_else(|| {
                    StorageError::Configuration(
                        "database dsn is required for the postgres backend".to_string(),
                    )
                })?;
                let postgres = PostgresConfig::builder()
                    .dsn(dsn)
                    .max_connections(config.max_connections)
                    .generator(generator)
                    .build();
                Arc::new(PostgresRepository::connect(&postgres).await?)
            }
        };

        info!(
            backend = %kind,
            id_length = config.id_length,
            file_storage_path = ?config.file_storage_path,
            deletion_queue_capacity = config.deletion_queue_capacity,
            "storage ready"
        );

        let deletions =
            DeletionPipeline::spawn(Arc::clone(&repository), config.deletion_queue_capacity);
        Ok(Storage {
            repository,
            deletions,
        })
    }
}
