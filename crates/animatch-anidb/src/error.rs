use animatch_core::MatchError;
use thiserror::Error;

/// Errors from downloading the AniDB title dump.
#[derive(Debug, Error)]
pub enum AniDbError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("download failed (status {status}): {url}")]
    Status { status: u16, url: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("decompress error: {0}")]
    Decompress(String),
}

impl From<AniDbError> for MatchError {
    fn from(e: AniDbError) -> Self {
        MatchError::Source(e.to_string())
    }
}
