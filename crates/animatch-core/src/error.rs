use thiserror::Error;

#[derive(Debug, Error)]
pub enum MatchError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("title feed error: {0}")]
    Feed(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("title source failed: {0}")]
    Source(String),

    #[error("operation cancelled")]
    Cancelled,
}

/// Error surfaced to resolver callers. Only cancellation is expected in
/// practice; load failures are absorbed and reported as "not found".
pub type ResolveError = MatchError;

impl From<quick_xml::Error> for MatchError {
    fn from(e: quick_xml::Error) -> Self {
        Self::Feed(e.to_string())
    }
}
