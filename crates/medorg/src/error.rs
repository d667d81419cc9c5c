use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MedorgError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Rename error: {0}")]
    Rename(#[from] RenameError),

    #[error("Media server error: {0}")]
    Emby(#[from] EmbyError),

    #[error("Watch error: {0}")]
    Watch(#[from] WatchError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    #[error("Invalid value '{value}' for {name}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Invalid status '{0}'")]
    InvalidStatus(String),
}

#[derive(Error, Debug)]
pub enum RenameError {
    #[error("Failed to read destination directory '{path}': {source}")]
    ReadDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Carries the untouched source path so the queue row stays addressable
    /// after a failed move.
    #[error("Failed to move '{from}' to '{to}': {source}")]
    Move {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl RenameError {
    /// The original source path of a failed move, when the variant has one.
    pub fn source_path(&self) -> Option<&PathBuf> {
        match self {
            RenameError::Move { from, .. } => Some(from),
            _ => None,
        }
    }
}

#[derive(Error, Debug)]
pub enum EmbyError {
    #[error("Request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected status {status} from {endpoint}")]
    Status {
        status: reqwest::StatusCode,
        endpoint: String,
    },

    #[error("Item {0} not found")]
    ItemNotFound(String),

    #[error("No usable image at {url} (content-type '{content_type}', {len} bytes)")]
    NotAnImage {
        url: String,
        content_type: String,
        len: usize,
    },

    #[error("Metadata verification failed for item {item_id}: {mismatches}")]
    VerificationFailed { item_id: String, mismatches: String },
}

#[derive(Error, Debug)]
pub enum WatchError {
    #[error("Watch error: {0}")]
    Notify(String),

    #[error("Directory scan failed for '{path}': {source}")]
    ScanFailed {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
}

pub type Result<T> = std::result::Result<T, MedorgError>;
