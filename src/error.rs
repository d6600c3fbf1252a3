use thiserror::Error;

#[derive(Error, Debug)]
pub enum SymbolTreeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Bad image format: {0}")]
    BadImageFormat(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Watcher error: {0}")]
    Watcher(String),

    #[error("Work queue error: {0}")]
    WorkQueue(String),

    #[error("Background task failed: {0}")]
    Task(String),

    #[error("Operation was cancelled")]
    Cancelled,
}

impl SymbolTreeError {
    pub fn bad_image(message: impl Into<String>) -> Self {
        SymbolTreeError::BadImageFormat(message.into())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, SymbolTreeError::Cancelled)
    }
}

impl From<tokio::task::JoinError> for SymbolTreeError {
    fn from(e: tokio::task::JoinError) -> Self {
        if e.is_cancelled() {
            SymbolTreeError::Cancelled
        } else {
            SymbolTreeError::Task(e.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, SymbolTreeError>;
