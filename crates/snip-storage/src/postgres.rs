use async_trait::async_trait;
use snip_core::{
    BatchEntry, BatchItem, LinkRecord, Repository, Result, ShortId, ShortIdGenerator, Stats,
    StorageError, UserId,
};
use sqlx::migrate::Migrator;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgConnection, PgPool, Row};
use tracing::{debug, info, trace};
use typed_builder::TypedBuilder;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Inserts the link unless its id is taken, and reports which happened in
/// the same round trip. `ON CONFLICT DO NOTHING` covers a concurrent insert
/// that `extant` could not see; that case returns no row at all.
const INSERT_LINK: &str = r#"
    WITH extant AS (
        SELECT url FROM links WHERE id = $1
    ),
    inserted AS (
        INSERT INTO links (id, url, owner)
        SELECT $1, $2, $3
        WHERE NOT EXISTS (SELECT NULL FROM extant)
        ON CONFLICT (id) DO NOTHING
        RETURNING url
    )
    SELECT url, 'success' AS status FROM inserted
    UNION ALL
    SELECT url, 'conflict' AS status FROM extant
"#;

/// Connection settings for [`PostgresRepository::connect`].
#[derive(Debug, Clone, TypedBuilder)]
pub struct PostgresConfig {
    #[builder(setter(into))]
    pub dsn: String,
    #[builder(default = 5)]
    pub max_connections: u32,
    /// Apply pending migrations before returning the repository.
    #[builder(default = true)]
    pub run_migrations: bool,
    #[builder(default)]
    pub generator: ShortIdGenerator,
}

/// PostgreSQL implementation of the repository contract.
///
/// Deletion is a soft delete through the `deleted` column. A deleted id is
/// never reused, so re-adding its URL keeps reporting it as deleted.
#[derive(Debug, Clone)]
pub struct PostgresRepository {
    pool: PgPool,
    generator: ShortIdGenerator,
}

enum InsertOutcome {
    Inserted,
    Existing(String),
}

impl PostgresRepository {
    /// Creates a repository from an existing connection pool.
    pub fn new(pool: PgPool, generator: ShortIdGenerator) -> Self {
        Self { pool, generator }
    }

    /// Opens a connection pool and applies migrations if configured to.
    pub async fn connect(config: &PostgresConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.dsn)
            .await
            .map_err(map_sqlx_error)?;

        if config.run_migrations {
            migrate(&pool).await?;
        }

        info!(
            max_connections = config.max_connections,
            "connected to postgres"
        );
        Ok(Self::new(pool, config.generator))
    }

    /// Returns a reference to the underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Applies every pending migration. Nothing pending is not an error.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    MIGRATOR
        .run(pool)
        .await
        .map_err(|e| StorageError::Migration(e.to_string()))?;
    info!("database schema is up to date");
    Ok(())
}

fn owner_param(owner: UserId) -> Result<i64> {
    i64::try_from(owner)
        .map_err(|_| StorageError::InvalidData(format!("user id {owner} does not fit in BIGINT")))
}

fn user_id_from_row(value: i64) -> Result<UserId> {
    UserId::try_from(value)
        .map_err(|_| StorageError::InvalidData(format!("negative user id {value}")))
}

fn map_sqlx_error(err: sqlx::Error) -> StorageError {
    let message = err.to_string();

    match err {
        sqlx::Error::PoolTimedOut => StorageError::Timeout(message),
        sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_) => StorageError::Unavailable(message),
        sqlx::Error::ColumnIndexOutOfBounds { .. }
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::TypeNotFound { .. }
        | sqlx::Error::Decode(_)
        | sqlx::Error::RowNotFound => StorageError::InvalidData(message),
        sqlx::Error::Migrate(_) => StorageError::Migration(message),
        _ => StorageError::Query(message),
    }
}

async fn insert_link(
    conn: &mut PgConnection,
    id: &ShortId,
    original_url: &str,
    owner: i64,
) -> Result<InsertOutcome> {
    let row = sqlx::query(INSERT_LINK)
        .bind(id.as_str())
        .bind(original_url)
        .bind(owner)
        .fetch_optional(&mut *conn)
        .await
        .map_err(map_sqlx_error)?;

    if let Some(row) = row {
        let status: String = row.try_get("status").map_err(map_sqlx_error)?;
        let url: String = row.try_get("url").map_err(map_sqlx_error)?;
        return Ok(match status.as_str() {
            "success" => InsertOutcome::Inserted,
            _ => InsertOutcome::Existing(url),
        });
    }

    // Lost a race against a concurrent insert of the same id; read the winner.
    trace!(short_id = %id, "insert raced, reading stored url");
    let url: String = sqlx::query_scalar("SELECT url FROM links WHERE id = $1")
        .bind(id.as_str())
        .fetch_one(&mut *conn)
        .await
        .map_err(map_sqlx_error)?;
    Ok(InsertOutcome::Existing(url))
}

fn resolve_outcome(id: &ShortId, original_url: &str, outcome: InsertOutcome) -> Result<()> {
    match outcome {
        InsertOutcome::Inserted => {
            debug!(short_id = %id, "stored link");
            Ok(())
        }
        InsertOutcome::Existing(url) if url == original_url => {
            trace!(short_id = %id, "url already stored");
            Ok(())
        }
        InsertOutcome::Existing(_) => {
            debug!(short_id = %id, "short id taken by a different url");
            Err(StorageError::Conflict(id.clone()))
        }
    }
}

#[async_trait]
impl Repository for PostgresRepository {
    async fn add(&self, original_url: &str, owner: UserId) -> Result<ShortId> {
        let owner = owner_param(owner)?;
        let id = self.generator.generate(original_url);

        let mut conn = self.pool.acquire().await.map_err(map_sqlx_error)?;
        let outcome = insert_link(&mut conn, &id, original_url, owner).await?;
        resolve_outcome(&id, original_url, outcome)?;
        Ok(id)
    }

    async fn add_batch(&self, items: &[BatchItem], owner: UserId) -> Result<Vec<BatchEntry>> {
        if items.is_empty() {
            return Err(StorageError::EmptyRequest);
        }
        let owner = owner_param(owner)?;

        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        let mut entries = Vec::with_capacity(items.len());
        for item in items {
            let id = self.generator.generate(&item.original_url);
            let outcome = insert_link(&mut tx, &id, &item.original_url, owner).await?;
            match resolve_outcome(&id, &item.original_url, outcome) {
                Ok(()) => entries.push(BatchEntry {
                    correlation_id: item.correlation_id.clone(),
                    short_id: id,
                }),
                Err(StorageError::Conflict(_)) => {
                    debug!(correlation_id = %item.correlation_id, short_id = %id, "skipping conflicting batch item");
                }
                Err(e) => return Err(e),
            }
        }
        tx.commit().await.map_err(map_sqlx_error)?;

        Ok(entries)
    }

    async fn get(&self, id: &ShortId) -> Result<String> {
        let row = sqlx::query("SELECT url, deleted FROM links WHERE id = $1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        let Some(row) = row else {
            return Err(StorageError::NotFound(id.clone()));
        };

        let deleted: bool = row.try_get("deleted").map_err(map_sqlx_error)?;
        if deleted {
            return Err(StorageError::Deleted(id.clone()));
        }
        row.try_get("url").map_err(map_sqlx_error)
    }

    async fn user_links(&self, owner: UserId) -> Result<Vec<LinkRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, url
            FROM links
            WHERE owner = $1
              AND NOT deleted
            ORDER BY id
            "#,
        )
        .bind(owner_param(owner)?)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter()
            .map(|row| -> Result<LinkRecord> {
                let id: String = row.try_get("id").map_err(map_sqlx_error)?;
                let url: String = row.try_get("url").map_err(map_sqlx_error)?;
                Ok(LinkRecord {
                    short_id: ShortId::new(id),
                    original_url: url,
                    owner,
                    deleted: false,
                })
            })
            .collect()
    }

    async fn new_user(&self) -> Result<UserId> {
        let id: i64 = sqlx::query_scalar("INSERT INTO users DEFAULT VALUES RETURNING id")
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        debug!(user_id = id, "allocated user");
        user_id_from_row(id)
    }

    async fn delete_batch(&self, owner: UserId, ids: &[ShortId]) -> Result<()> {
        if ids.is_empty() {
            return Err(StorageError::EmptyRequest);
        }
        let ids: Vec<String> = ids.iter().map(|id| id.as_str().to_owned()).collect();

        let result = sqlx::query(
            r#"
            UPDATE links
            SET deleted = TRUE
            WHERE owner = $1
              AND id = ANY($2)
              AND NOT deleted
            "#,
        )
        .bind(owner_param(owner)?)
        .bind(ids.as_slice())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        debug!(
            owner,
            requested = ids.len(),
            deleted = result.rows_affected(),
            "tombstoned links"
        );
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn stats(&self) -> Result<Stats> {
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM links WHERE NOT deleted) AS urls,
                (SELECT COUNT(*) FROM users) AS users
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let urls: i64 = row.try_get("urls").map_err(map_sqlx_error)?;
        let users: i64 = row.try_get("users").map_err(map_sqlx_error)?;
        Ok(Stats {
            urls: urls.max(0) as u64,
            users: users.max(0) as u64,
        })
    }
}
