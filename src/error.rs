//! Error types for daisybook operations.

use thiserror::Error;

/// Errors that abort an export.
///
/// Data-quality problems in the source tree (duplicate ids, dangling
/// references, unparseable page numbers) are logged and never surface here.
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Audio publishing failed: {0}")]
    AudioPublish(String),

    #[error("Invalid output location: {0}")]
    InvalidOutput(String),

    #[cfg(feature = "cli")]
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
