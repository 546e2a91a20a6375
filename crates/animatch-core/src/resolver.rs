//! Title → external id resolution.
//!
//! [`TitleResolver`] owns the published [`TitleIndex`] and the gate that
//! serializes loading it. Readers take an `Arc` snapshot of the index and
//! never lock; only the load path, which holds the gate, publishes a new one.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use tokio::sync::MutexGuard;
use tokio_util::sync::CancellationToken;

use crate::config::MatcherConfig;
use crate::error::{MatchError, ResolveError};
use crate::feed_scan::{search_feed_text, FeedSearch};
use crate::index::{load_index, TitleIndex};
use crate::normalize::normalize;
use crate::source::TitleSource;
use crate::stats::{ResolverStats, StatCounters};

/// Resolver tuning, usually taken from [`MatcherConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverOptions {
    /// Age after which the source is asked for a newer feed.
    pub max_age: Duration,
    /// Refresh the feed once and retry when the feed scan misses.
    pub retry_on_miss: bool,
    /// Minimum time between two freshness checks of a stale index.
    pub recheck_interval: Duration,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self {
            max_age: Duration::from_secs(7 * 24 * 60 * 60),
            retry_on_miss: true,
            recheck_interval: Duration::from_secs(60 * 60),
        }
    }
}

impl ResolverOptions {
    pub fn from_config(config: &MatcherConfig) -> Self {
        Self {
            max_age: config.max_age(),
            retry_on_miss: config.search.retry_on_miss,
            ..Self::default()
        }
    }
}

/// Resolves free-text series names to external ids.
///
/// Construct one per process and share it by reference; all methods take
/// `&self` and are safe to call concurrently.
pub struct TitleResolver<S> {
    source: S,
    options: ResolverOptions,
    index: ArcSwapOption<TitleIndex>,
    load_gate: tokio::sync::Mutex<()>,
    /// Completed load attempts, successful or not. Lets gate waiters tell
    /// that someone else already tried while they were queued.
    attempts: AtomicU64,
    last_checked: Mutex<Option<Instant>>,
    stats: StatCounters,
}

impl<S: TitleSource> TitleResolver<S> {
    pub fn new(source: S) -> Self {
        Self::with_options(source, ResolverOptions::default())
    }

    pub fn with_options(source: S, options: ResolverOptions) -> Self {
        Self {
            source,
            options,
            index: ArcSwapOption::empty(),
            load_gate: tokio::sync::Mutex::new(()),
            attempts: AtomicU64::new(0),
            last_checked: Mutex::new(None),
            stats: StatCounters::default(),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn options(&self) -> &ResolverOptions {
        &self.options
    }

    /// The currently published index, if any load has succeeded.
    pub fn current_index(&self) -> Option<Arc<TitleIndex>> {
        self.index.load_full()
    }

    pub fn stats(&self) -> ResolverStats {
        let mut stats = self.stats.snapshot();
        stats.loaded_at = self.index.load_full().map(|index| index.loaded_at());
        stats
    }

    /// Look `title` up in the title dictionary.
    ///
    /// Flow: load index (single-flight) → direct key → normalized key.
    /// Returns `Ok(None)` on a miss or when no index could be loaded. The
    /// only error is [`MatchError::Cancelled`], raised while waiting for a
    /// load or for the feed download.
    #[tracing::instrument(name = "find_series", skip(self, cancel), fields(title = %title))]
    pub async fn find_series(
        &self,
        title: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<String>, ResolveError> {
        let Some(index) = self.ensure_loaded(cancel).await? else {
            tracing::debug!("No title index available");
            StatCounters::bump(&self.stats.misses);
            return Ok(None);
        };

        if let Some(entry) = index.lookup(title) {
            tracing::debug!(method = "direct", id = %entry.external_id, "Title hit");
            StatCounters::bump(&self.stats.hits_direct);
            return Ok(Some(entry.external_id.clone()));
        }

        let normalized = normalize(title);
        if !normalized.is_empty() {
            if let Some(entry) = index.lookup(&normalized) {
                tracing::debug!(
                    method = "normalized",
                    key = %normalized,
                    id = %entry.external_id,
                    "Title hit"
                );
                StatCounters::bump(&self.stats.hits_normalized);
                return Ok(Some(entry.external_id.clone()));
            }
        }

        tracing::debug!("Title miss");
        StatCounters::bump(&self.stats.misses);
        Ok(None)
    }

    /// Full-text search of the raw feed for a block naming `a` / `b`.
    ///
    /// On a miss the feed is refreshed once and, if that produced a new
    /// feed, searched again. Unreadable or ambiguous feeds yield `Ok(None)`.
    #[tracing::instrument(name = "search_feed", skip(self, cancel), fields(a = %a, b = %b))]
    pub async fn search_feed(
        &self,
        a: &str,
        b: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<String>, ResolveError> {
        let max_attempts = if self.options.retry_on_miss { 2 } else { 1 };

        for attempt in 1..=max_attempts {
            let outcome = match self.scan_feed(a, b, cancel).await {
                Ok(outcome) => outcome,
                Err(MatchError::Cancelled) => return Err(MatchError::Cancelled),
                Err(e) => {
                    tracing::warn!(error = %e, "Feed scan failed");
                    return Ok(None);
                }
            };

            match outcome {
                FeedSearch::Found(id) => {
                    tracing::debug!(method = "feed", attempt, id = %id, "Title hit");
                    StatCounters::bump(&self.stats.hits_feed);
                    return Ok(Some(id));
                }
                FeedSearch::Ambiguous(candidates) => {
                    tracing::debug!(candidates, "Ambiguous feed match, not guessing");
                    return Ok(None);
                }
                FeedSearch::NotFound => {}
            }

            if attempt < max_attempts && !self.refresh(cancel).await? {
                tracing::debug!("Feed unchanged after refresh, not retrying");
                break;
            }
        }
        Ok(None)
    }

    /// Dictionary lookup, falling back to the feed scan.
    pub async fn resolve(
        &self,
        title: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<String>, ResolveError> {
        if let Some(id) = self.find_series(title, cancel).await? {
            return Ok(Some(id));
        }
        self.search_feed(title, title, cancel).await
    }

    /// Ask the source for a fresh feed and rebuild the index if the feed
    /// changed. Returns whether a new index was published.
    pub async fn refresh(&self, cancel: &CancellationToken) -> Result<bool, ResolveError> {
        let _gate = self.lock_gate(cancel).await?;
        self.reload(cancel).await
    }

    async fn ensure_loaded(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Option<Arc<TitleIndex>>, ResolveError> {
        if let Some(index) = self.index.load_full() {
            if !self.check_due(&index) {
                return Ok(Some(index));
            }
            // One caller re-checks the feed; everyone else keeps reading the
            // published index instead of queueing behind the download.
            let Ok(_gate) = self.load_gate.try_lock() else {
                return Ok(Some(index));
            };
            if self.check_due(&index) {
                self.reload(cancel).await?;
            }
            return Ok(self.index.load_full());
        }

        let seen = self.attempts.load(Ordering::Acquire);
        let _gate = self.lock_gate(cancel).await?;

        // Whoever held the gate before us already tried; share its outcome.
        if self.attempts.load(Ordering::Acquire) != seen {
            return Ok(self.index.load_full());
        }
        if let Some(index) = self.index.load_full() {
            return Ok(Some(index));
        }

        self.reload(cancel).await?;
        Ok(self.index.load_full())
    }

    async fn lock_gate(
        &self,
        cancel: &CancellationToken,
    ) -> Result<MutexGuard<'_, ()>, ResolveError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(MatchError::Cancelled),
            guard = self.load_gate.lock() => Ok(guard),
        }
    }

    /// Must be called with the load gate held.
    async fn reload(&self, cancel: &CancellationToken) -> Result<bool, ResolveError> {
        let published = match self.load(cancel).await {
            Ok(Some(index)) => {
                tracing::info!(
                    entries = index.len(),
                    literal = index.literal_len(),
                    "Title index loaded"
                );
                self.stats
                    .entries_indexed
                    .store(index.len(), Ordering::Relaxed);
                StatCounters::bump(&self.stats.loads);
                self.index.store(Some(Arc::new(index)));
                true
            }
            Ok(None) => false,
            Err(MatchError::Cancelled) => return Err(MatchError::Cancelled),
            Err(e) => {
                tracing::error!(error = %e, "Failed to load title index");
                StatCounters::bump(&self.stats.load_failures);
                false
            }
        };

        *self
            .last_checked
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
        self.attempts.fetch_add(1, Ordering::Release);
        Ok(published)
    }

    /// Build a new index, or `None` when the feed on disk is the one the
    /// current index was built from.
    async fn load(&self, cancel: &CancellationToken) -> Result<Option<TitleIndex>, MatchError> {
        let path = self.fetch(cancel).await?;

        if let Some(current) = self.index.load_full() {
            let modified = tokio::fs::metadata(&path).await?.modified().ok();
            if modified.is_some() && modified == current.source_modified() {
                tracing::debug!(path = %path.display(), "Title feed unchanged");
                return Ok(None);
            }
        }

        // Construction is not raced against cancellation: once started it
        // runs to completion or failure.
        let index = tokio::task::spawn_blocking(move || load_index(&path))
            .await
            .map_err(|e| MatchError::Source(format!("index build task failed: {e}")))??;
        Ok(Some(index))
    }

    async fn fetch(&self, cancel: &CancellationToken) -> Result<PathBuf, MatchError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(MatchError::Cancelled),
            path = self.source.ensure_fresh(self.options.max_age) => path,
        }
    }

    async fn scan_feed(
        &self,
        a: &str,
        b: &str,
        cancel: &CancellationToken,
    ) -> Result<FeedSearch, MatchError> {
        let path = self.fetch(cancel).await?;
        let xml = tokio::fs::read_to_string(&path).await?;
        let (a, b) = (a.to_string(), b.to_string());
        tokio::task::spawn_blocking(move || search_feed_text(&xml, &a, &b))
            .await
            .map_err(|e| MatchError::Source(format!("feed scan task failed: {e}")))
    }

    /// A stale index is re-checked at most once per `recheck_interval`.
    fn check_due(&self, index: &TitleIndex) -> bool {
        if !index.is_stale(self.options.max_age) {
            return false;
        }
        let last_checked = *self
            .last_checked
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        last_checked.map_or(true, |at| at.elapsed() >= self.options.recheck_interval)
    }
}
