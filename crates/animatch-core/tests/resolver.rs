//! End-to-end resolver behaviour against on-disk feeds and mock sources.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use animatch_core::resolver::{ResolverOptions, TitleResolver};
use animatch_core::source::LocalTitleFile;
use animatch_core::{MatchError, TitleSource};
use tokio_util::sync::CancellationToken;

const BEBOP: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<animetitles>
<anime aid="42"><title xml:lang="x-jat" type="main">Cowboy Bebop</title></anime>
</animetitles>"#;

const KILL_LA_KILL: &str = r#"<animetitles>
<anime aid="7"><title xml:lang="x-jat" type="main">Kill la Kill</title></anime>
</animetitles>"#;

const KILL_LA_KILL_WITH_SEQUEL: &str = r#"<animetitles>
<anime aid="7"><title xml:lang="x-jat" type="main">Kill la Kill</title></anime>
<anime aid="99"><title xml:lang="x-jat" type="main">Kill la Kill 2</title></anime>
</animetitles>"#;

const SWORD_ART_ONLINE: &str = r#"<animetitles>
<anime aid="8"><title xml:lang="x-jat" type="main">Sword Art Online</title></anime>
<anime aid="9">
<title xml:lang="x-jat" type="main">Sword Art Online II</title>
<title xml:lang="en" type="short">SAO II</title>
</anime>
</animetitles>"#;

fn write_feed(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    path
}

/// Pin a file's mtime so "feed changed" checks do not depend on clock
/// granularity.
fn set_mtime(path: &Path, unix_secs: u64) {
    std::fs::File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(unix_secs))
        .unwrap();
}

/// Serves a fixed path after a delay and counts every call.
struct CountingSource {
    path: PathBuf,
    fetches: Arc<AtomicUsize>,
    delay: Duration,
    fail: bool,
}

impl CountingSource {
    fn new(path: PathBuf, delay: Duration) -> (Self, Arc<AtomicUsize>) {
        let fetches = Arc::new(AtomicUsize::new(0));
        let source = Self {
            path,
            fetches: fetches.clone(),
            delay,
            fail: false,
        };
        (source, fetches)
    }

    fn failing(delay: Duration) -> (Self, Arc<AtomicUsize>) {
        let (mut source, fetches) = Self::new(PathBuf::from("/nonexistent"), delay);
        source.fail = true;
        (source, fetches)
    }
}

impl TitleSource for CountingSource {
    async fn ensure_fresh(&self, _max_age: Duration) -> Result<PathBuf, MatchError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        if self.fail {
            Err(MatchError::Source("download failed".into()))
        } else {
            Ok(self.path.clone())
        }
    }
}

/// Serves `paths` in order, repeating the last one.
struct SequenceSource {
    paths: Vec<PathBuf>,
    calls: Arc<AtomicUsize>,
}

impl TitleSource for SequenceSource {
    async fn ensure_fresh(&self, _max_age: Duration) -> Result<PathBuf, MatchError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.paths[call.min(self.paths.len() - 1)].clone())
    }
}

/// Answers the first call at once and stalls on every later one.
struct SlowRecheckSource {
    path: PathBuf,
    calls: Arc<AtomicUsize>,
}

impl TitleSource for SlowRecheckSource {
    async fn ensure_fresh(&self, _max_age: Duration) -> Result<PathBuf, MatchError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) > 0 {
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        Ok(self.path.clone())
    }
}

// ── Dictionary lookups ────────────────────────────────────────────────

#[tokio::test]
async fn direct_and_normalized_lookup() {
    let dir = tempfile::tempdir().unwrap();
    let resolver = TitleResolver::new(LocalTitleFile::new(write_feed(
        dir.path(),
        "titles.xml",
        BEBOP,
    )));
    let cancel = CancellationToken::new();

    let direct = resolver.find_series("Cowboy Bebop", &cancel).await.unwrap();
    assert_eq!(direct.as_deref(), Some("42"));

    let spaced = resolver.find_series("cowboy   bebop", &cancel).await.unwrap();
    assert_eq!(spaced.as_deref(), Some("42"));

    let stats = resolver.stats();
    assert_eq!(stats.loads, 1);
    assert_eq!(stats.hits_direct, 1);
    assert_eq!(stats.hits_normalized, 1);
    assert_eq!(stats.misses, 0);
    assert_eq!(stats.entries_indexed, 1);
    assert!(stats.loaded_at.is_some());
}

#[tokio::test]
async fn sequel_without_entry_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let resolver = TitleResolver::new(LocalTitleFile::new(write_feed(
        dir.path(),
        "titles.xml",
        KILL_LA_KILL,
    )));
    let cancel = CancellationToken::new();

    assert_eq!(
        resolver.find_series("Kill la Kill", &cancel).await.unwrap().as_deref(),
        Some("7")
    );
    assert_eq!(resolver.find_series("Kill la Kill 2", &cancel).await.unwrap(), None);
    assert_eq!(resolver.resolve("Kill la Kill 2", &cancel).await.unwrap(), None);
    assert_eq!(resolver.stats().hits_feed, 0);
}

#[tokio::test]
async fn roman_numeral_sequel_found_by_feed_scan() {
    let dir = tempfile::tempdir().unwrap();
    let resolver = TitleResolver::new(LocalTitleFile::new(write_feed(
        dir.path(),
        "titles.xml",
        SWORD_ART_ONLINE,
    )));
    let cancel = CancellationToken::new();

    assert_eq!(
        resolver.find_series("Sword Art Online 2", &cancel).await.unwrap(),
        None
    );
    assert_eq!(
        resolver.resolve("Sword Art Online 2", &cancel).await.unwrap().as_deref(),
        Some("9")
    );

    let stats = resolver.stats();
    assert_eq!(stats.hits_feed, 1);
    assert_eq!(stats.misses, 2);
}

// ── Single-flight loading ─────────────────────────────────────────────

#[tokio::test]
async fn concurrent_cold_lookups_fetch_once() {
    let dir = tempfile::tempdir().unwrap();
    let (source, fetches) =
        CountingSource::new(write_feed(dir.path(), "titles.xml", BEBOP), Duration::from_millis(50));
    let resolver = TitleResolver::new(source);
    let cancel = CancellationToken::new();

    let (a, b) = futures::join!(
        resolver.find_series("Cowboy Bebop", &cancel),
        resolver.find_series("cowboy bebop", &cancel),
    );
    assert_eq!(a.unwrap().as_deref(), Some("42"));
    assert_eq!(b.unwrap().as_deref(), Some("42"));
    assert_eq!(fetches.load(Ordering::SeqCst), 1);
    assert_eq!(resolver.stats().loads, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn many_concurrent_lookups_fetch_once() {
    let dir = tempfile::tempdir().unwrap();
    let (source, fetches) =
        CountingSource::new(write_feed(dir.path(), "titles.xml", BEBOP), Duration::from_millis(20));
    let resolver = Arc::new(TitleResolver::new(source));

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let resolver = resolver.clone();
            tokio::spawn(async move {
                resolver
                    .find_series("Cowboy Bebop", &CancellationToken::new())
                    .await
            })
        })
        .collect();

    for result in futures::future::join_all(handles).await {
        assert_eq!(result.unwrap().unwrap().as_deref(), Some("42"));
    }
    assert_eq!(fetches.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn stale_recheck_does_not_block_readers() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_feed(dir.path(), "titles.xml", BEBOP);
    set_mtime(&path, 1_700_000_000);
    let calls = Arc::new(AtomicUsize::new(0));
    let resolver = TitleResolver::with_options(
        SlowRecheckSource {
            path,
            calls: calls.clone(),
        },
        ResolverOptions {
            recheck_interval: Duration::ZERO,
            ..ResolverOptions::default()
        },
    );
    let cancel = CancellationToken::new();
    resolver.find_series("Cowboy Bebop", &cancel).await.unwrap();

    // The first caller takes the gate and waits on the source; the second
    // answers from the published index.
    let (checker, (reader, waited)) = futures::join!(
        resolver.find_series("Cowboy Bebop", &cancel),
        async {
            let started = tokio::time::Instant::now();
            let id = resolver.find_series("Cowboy Bebop", &cancel).await;
            (id, started.elapsed())
        },
    );
    assert_eq!(checker.unwrap().as_deref(), Some("42"));
    assert_eq!(reader.unwrap().as_deref(), Some("42"));
    assert!(waited < Duration::from_millis(250), "reader waited {waited:?}");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn failed_load_is_shared_then_retried() {
    let (source, fetches) = CountingSource::failing(Duration::from_millis(20));
    let resolver = TitleResolver::new(source);
    let cancel = CancellationToken::new();

    let (a, b) = futures::join!(
        resolver.find_series("Cowboy Bebop", &cancel),
        resolver.find_series("Cowboy Bebop", &cancel),
    );
    assert_eq!(a.unwrap(), None);
    assert_eq!(b.unwrap(), None);
    assert_eq!(fetches.load(Ordering::SeqCst), 1);
    assert!(resolver.current_index().is_none());

    // The next call tries again.
    assert_eq!(resolver.find_series("Cowboy Bebop", &cancel).await.unwrap(), None);
    assert_eq!(fetches.load(Ordering::SeqCst), 2);
    assert_eq!(resolver.stats().load_failures, 2);
}

#[tokio::test]
async fn missing_or_malformed_feed_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let cancel = CancellationToken::new();

    let missing = TitleResolver::new(LocalTitleFile::new(dir.path().join("absent.xml")));
    assert_eq!(missing.find_series("Cowboy Bebop", &cancel).await.unwrap(), None);
    assert_eq!(missing.search_feed("Cowboy Bebop", "Cowboy Bebop", &cancel).await.unwrap(), None);
    assert!(missing.stats().load_failures >= 1);

    let broken = write_feed(dir.path(), "broken.xml", "<animetitles><anime aid=\"1\"><title>X</anime>");
    let malformed = TitleResolver::new(LocalTitleFile::new(broken));
    assert_eq!(malformed.find_series("X", &cancel).await.unwrap(), None);
    assert!(malformed.current_index().is_none());
}

// ── Cancellation ──────────────────────────────────────────────────────

#[tokio::test]
async fn cancelled_before_load() {
    let dir = tempfile::tempdir().unwrap();
    let (source, fetches) =
        CountingSource::new(write_feed(dir.path(), "titles.xml", BEBOP), Duration::ZERO);
    let resolver = TitleResolver::new(source);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = resolver.find_series("Cowboy Bebop", &cancel).await;
    assert!(matches!(result, Err(MatchError::Cancelled)));
    assert_eq!(fetches.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn cancelled_during_fetch() {
    let dir = tempfile::tempdir().unwrap();
    let (source, fetches) =
        CountingSource::new(write_feed(dir.path(), "titles.xml", BEBOP), Duration::from_secs(10));
    let resolver = TitleResolver::new(source);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        trigger.cancel();
    });

    let result = resolver.find_series("Cowboy Bebop", &cancel).await;
    assert!(matches!(result, Err(MatchError::Cancelled)));
    assert_eq!(fetches.load(Ordering::SeqCst), 1);
    assert!(resolver.current_index().is_none());
    assert_eq!(resolver.stats().load_failures, 0);

    // A later caller with a live token performs the load itself.
    let result = resolver
        .find_series("Cowboy Bebop", &CancellationToken::new())
        .await;
    assert_eq!(result.unwrap().as_deref(), Some("42"));
    assert_eq!(fetches.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn loaded_index_answers_cancelled_callers() {
    let dir = tempfile::tempdir().unwrap();
    let resolver = TitleResolver::new(LocalTitleFile::new(write_feed(
        dir.path(),
        "titles.xml",
        BEBOP,
    )));
    resolver
        .find_series("Cowboy Bebop", &CancellationToken::new())
        .await
        .unwrap();

    // Cancellation is only observed while waiting for a load.
    let cancel = CancellationToken::new();
    cancel.cancel();
    let result = resolver.find_series("Cowboy Bebop", &cancel).await;
    assert_eq!(result.unwrap().as_deref(), Some("42"));
}

// ── Refresh ───────────────────────────────────────────────────────────

#[tokio::test]
async fn refresh_rebuilds_only_when_feed_changes() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_feed(dir.path(), "titles.xml", BEBOP);
    set_mtime(&path, 1_700_000_000);
    let resolver = TitleResolver::new(LocalTitleFile::new(&path));
    let cancel = CancellationToken::new();

    resolver.find_series("Cowboy Bebop", &cancel).await.unwrap();
    assert!(!resolver.refresh(&cancel).await.unwrap());
    assert_eq!(resolver.stats().loads, 1);

    std::fs::write(&path, KILL_LA_KILL).unwrap();
    set_mtime(&path, 1_700_100_000);
    assert!(resolver.refresh(&cancel).await.unwrap());
    assert_eq!(resolver.stats().loads, 2);

    assert_eq!(
        resolver.find_series("Kill la Kill", &cancel).await.unwrap().as_deref(),
        Some("7")
    );
    assert_eq!(resolver.find_series("Cowboy Bebop", &cancel).await.unwrap(), None);
}

#[tokio::test]
async fn failed_refresh_keeps_previous_index() {
    let dir = tempfile::tempdir().unwrap();
    let good = write_feed(dir.path(), "good.xml", BEBOP);
    let broken = write_feed(
        dir.path(),
        "broken.xml",
        "<animetitles><anime aid=\"1\"><title>X</anime></animetitles>",
    );
    set_mtime(&good, 1_700_000_000);
    set_mtime(&broken, 1_700_100_000);

    let resolver = TitleResolver::new(SequenceSource {
        paths: vec![good, broken],
        calls: Arc::new(AtomicUsize::new(0)),
    });
    let cancel = CancellationToken::new();

    resolver.find_series("Cowboy Bebop", &cancel).await.unwrap();
    assert!(!resolver.refresh(&cancel).await.unwrap());
    assert_eq!(resolver.stats().load_failures, 1);
    assert_eq!(
        resolver.find_series("Cowboy Bebop", &cancel).await.unwrap().as_deref(),
        Some("42")
    );
}

#[tokio::test]
async fn feed_miss_refreshes_and_retries_once() {
    let dir = tempfile::tempdir().unwrap();
    let old = write_feed(dir.path(), "old.xml", KILL_LA_KILL);
    let new = write_feed(dir.path(), "new.xml", KILL_LA_KILL_WITH_SEQUEL);
    let calls = Arc::new(AtomicUsize::new(0));
    let resolver = TitleResolver::new(SequenceSource {
        paths: vec![old, new],
        calls: calls.clone(),
    });
    let cancel = CancellationToken::new();

    // scan old → refresh (new) → scan new
    let result = resolver.search_feed("Kill la Kill 2", "Kill la Kill 2", &cancel).await;
    assert_eq!(result.unwrap().as_deref(), Some("99"));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(resolver.stats().hits_feed, 1);
}

#[tokio::test]
async fn feed_miss_without_retry() {
    let dir = tempfile::tempdir().unwrap();
    let old = write_feed(dir.path(), "old.xml", KILL_LA_KILL);
    let new = write_feed(dir.path(), "new.xml", KILL_LA_KILL_WITH_SEQUEL);
    let calls = Arc::new(AtomicUsize::new(0));
    let resolver = TitleResolver::with_options(
        SequenceSource {
            paths: vec![old, new],
            calls: calls.clone(),
        },
        ResolverOptions {
            retry_on_miss: false,
            ..ResolverOptions::default()
        },
    );
    let cancel = CancellationToken::new();

    let result = resolver.search_feed("Kill la Kill 2", "Kill la Kill 2", &cancel).await;
    assert_eq!(result.unwrap(), None);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unchanged_feed_is_not_rescanned() {
    let dir = tempfile::tempdir().unwrap();
    let (source, fetches) =
        CountingSource::new(write_feed(dir.path(), "titles.xml", KILL_LA_KILL), Duration::ZERO);
    let resolver = TitleResolver::new(source);
    let cancel = CancellationToken::new();

    // load, scan, refresh (unchanged): no second scan.
    assert_eq!(resolver.resolve("Kill la Kill 2", &cancel).await.unwrap(), None);
    assert_eq!(fetches.load(Ordering::SeqCst), 3);
}
