use std::path::PathBuf;

/// Core error type for the hosting bot.
///
/// Adapter crates map their specific errors into this type so handlers can
/// turn any failure into a user-facing message.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("security violation: {0}")]
    Security(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid target {id:?}: {reason}")]
    InvalidTarget { id: String, reason: String },

    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("external error: {0}")]
    External(String),
}

pub type Result<T> = std::result::Result<T, Error>;
