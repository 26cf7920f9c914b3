use clap::{Parser, Subcommand, ValueEnum};
use snip_shortener::factory::DEFAULT_DELETION_QUEUE_CAPACITY;
use snip_shortener::{BackendKind, StorageConfig};
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

pub const STORAGE_BACKEND_ENV: &str = "SNIP_STORAGE_BACKEND";
pub const FILE_STORAGE_PATH_ENV: &str = "SNIP_FILE_STORAGE_PATH";
pub const DATABASE_DSN_ENV: &str = "SNIP_DATABASE_DSN";
pub const ID_LENGTH_ENV: &str = "SNIP_ID_LENGTH";
pub const BASE_URL_ENV: &str = "SNIP_BASE_URL";
pub const SECRET_KEY_ENV: &str = "SNIP_SECRET_KEY";
pub const DELETE_QUEUE_CAPACITY_ENV: &str = "SNIP_DELETE_QUEUE_CAPACITY";

pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";
pub const DEFAULT_ID_LENGTH: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StorageBackendArg {
    #[value(name = "memory")]
    Memory,
    #[value(name = "list")]
    List,
    #[value(name = "postgres")]
    Postgres,
}

impl Display for StorageBackendArg {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageBackendArg::Memory => write!(f, "memory"),
            StorageBackendArg::List => write!(f, "list"),
            StorageBackendArg::Postgres => write!(f, "postgres"),
        }
    }
}

impl From<StorageBackendArg> for BackendKind {
    fn from(value: StorageBackendArg) -> Self {
        match value {
            StorageBackendArg::Memory => BackendKind::Memory,
            StorageBackendArg::List => BackendKind::List,
            StorageBackendArg::Postgres => BackendKind::Postgres,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "snip", about = "Shorten, resolve and delete links")]
pub struct CLI {
    /// Storage backend; inferred from the DSN when omitted.
    #[arg(long, global = true, env = STORAGE_BACKEND_ENV, value_enum)]
    pub storage: Option<StorageBackendArg>,

    #[arg(long, global = true, env = FILE_STORAGE_PATH_ENV)]
    pub file_storage_path: Option<PathBuf>,

    #[arg(long, global = true, env = DATABASE_DSN_ENV)]
    pub database_dsn: Option<String>,

    #[arg(long, global = true, env = ID_LENGTH_ENV, default_value_t = DEFAULT_ID_LENGTH)]
    pub id_length: usize,

    #[arg(long, global = true, env = BASE_URL_ENV, default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    /// Secret used to sign user tokens.
    #[arg(long, global = true, env = SECRET_KEY_ENV)]
    pub secret_key: Option<String>,

    #[arg(
        long,
        global = true,
        env = DELETE_QUEUE_CAPACITY_ENV,
        default_value_t = DEFAULT_DELETION_QUEUE_CAPACITY
    )]
    pub delete_queue_capacity: usize,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Store a URL and print its short URL. User 0 is the unknown owner,
    /// so `--user` must name a real user.
    Shorten {
        url: String,
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        user: u64,
    },
    /// Print the URL behind a short id.
    Resolve { id: String },
    /// List a user's links.
    Links {
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        user: u64,
    },
    /// Delete a user's links.
    Delete {
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        user: u64,
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Allocate a user id, printing a signed token when a secret is set.
    NewUser,
    Ping,
    Stats,
}

impl CLI {
    pub fn storage_config(&self) -> StorageConfig {
        StorageConfig::builder()
            .backend(self.storage.map(BackendKind::from))
            .file_storage_path(self.file_storage_path.clone())
            .database_dsn(self.database_dsn.clone())
            .id_length(self.id_length)
            .deletion_queue_capacity(self.delete_queue_capacity)
            .build()
    }
}
