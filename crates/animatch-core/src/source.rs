//! Title feed sources.
//!
//! The resolver never downloads anything itself. It asks a [`TitleSource`]
//! for a local copy of the feed that is no older than a given age.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::MatchError;

/// File name of a cached title feed inside its provider directory.
pub const FEED_FILE_NAME: &str = "titles.xml";

/// Provides a local, reasonably fresh copy of a title feed.
///
/// Implementations must be safe to call concurrently.
pub trait TitleSource: Send + Sync {
    /// Return the path of the cached feed, refreshing it first when it is
    /// missing or its modification time is more than `max_age` ago.
    fn ensure_fresh(
        &self,
        max_age: Duration,
    ) -> impl Future<Output = Result<PathBuf, MatchError>> + Send;
}

/// `<cache-root>/<provider>/titles.xml`.
pub fn feed_cache_path(cache_root: &Path, provider: &str) -> PathBuf {
    cache_root.join(provider).join(FEED_FILE_NAME)
}

/// A feed that already sits on disk and is never refreshed.
#[derive(Debug, Clone)]
pub struct LocalTitleFile {
    path: PathBuf,
}

impl LocalTitleFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl TitleSource for LocalTitleFile {
    async fn ensure_fresh(&self, _max_age: Duration) -> Result<PathBuf, MatchError> {
        if tokio::fs::try_exists(&self.path).await? {
            Ok(self.path.clone())
        } else {
            Err(MatchError::Source(format!(
                "title feed not found at {}",
                self.path.display()
            )))
        }
    }
}
