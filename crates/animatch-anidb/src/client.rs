use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use animatch_core::config::MatcherConfig;
use animatch_core::source::{feed_cache_path, TitleSource};
use animatch_core::MatchError;
use flate2::read::GzDecoder;
use reqwest::Client;
use tokio::sync::Mutex;

use crate::error::AniDbError;
use crate::PROVIDER;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Keeps `<cache-root>/anidb/titles.xml` no older than the requested age.
pub struct AniDbTitleSource {
    http: Client,
    url: String,
    path: PathBuf,
    /// Serializes downloads; concurrent callers wait and reuse the result.
    download_lock: Mutex<()>,
}

impl AniDbTitleSource {
    pub fn new(
        cache_root: &Path,
        url: impl Into<String>,
        user_agent: &str,
        timeout: Duration,
    ) -> Result<Self, AniDbError> {
        let http = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            url: url.into(),
            path: feed_cache_path(cache_root, PROVIDER),
            download_lock: Mutex::new(()),
        })
    }

    pub fn from_config(config: &MatcherConfig) -> Result<Self, AniDbError> {
        Self::new(
            &config.cache_root(),
            config.titles.url.clone(),
            &config.titles.user_agent,
            config.timeout(),
        )
    }

    /// Path of the cached feed, whether or not it exists yet.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Download the dump and replace the cached copy.
    pub async fn download(&self) -> Result<(), AniDbError> {
        tracing::info!(url = %self.url, "Downloading AniDB title dump");

        let resp = self.http.get(&self.url).send().await?;
        if !resp.status().is_success() {
            return Err(AniDbError::Status {
                status: resp.status().as_u16(),
                url: self.url.clone(),
            });
        }
        let body = resp.bytes().await?;

        let xml = tokio::task::spawn_blocking(move || decode_body(&body))
            .await
            .map_err(|e| AniDbError::Decompress(e.to_string()))??;
        write_atomic(&self.path, &xml).await?;

        tracing::info!(bytes = xml.len(), path = %self.path.display(), "AniDB title dump cached");
        Ok(())
    }
}

impl TitleSource for AniDbTitleSource {
    async fn ensure_fresh(&self, max_age: Duration) -> Result<PathBuf, MatchError> {
        if is_fresh(&self.path, max_age).await {
            return Ok(self.path.clone());
        }

        let _guard = self.download_lock.lock().await;
        // Someone else may have downloaded it while we waited.
        if is_fresh(&self.path, max_age).await {
            return Ok(self.path.clone());
        }

        match self.download().await {
            Ok(()) => Ok(self.path.clone()),
            Err(e) if tokio::fs::try_exists(&self.path).await.unwrap_or(false) => {
                tracing::warn!(error = %e, "Title dump download failed, using stale copy");
                Ok(self.path.clone())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Whether `path` exists and was modified within `max_age`. Timestamps in
/// the future count as fresh.
async fn is_fresh(path: &Path, max_age: Duration) -> bool {
    let Ok(metadata) = tokio::fs::metadata(path).await else {
        return false;
    };
    match metadata.modified() {
        Ok(modified) => SystemTime::now()
            .duration_since(modified)
            .map_or(true, |age| age <= max_age),
        Err(_) => false,
    }
}

/// Gunzip `body` if it carries the gzip magic bytes, else pass it through.
pub fn decode_body(body: &[u8]) -> Result<Vec<u8>, AniDbError> {
    if !body.starts_with(&GZIP_MAGIC) {
        return Ok(body.to_vec());
    }
    let mut xml = Vec::new();
    GzDecoder::new(body)
        .read_to_end(&mut xml)
        .map_err(|e| AniDbError::Decompress(e.to_string()))?;
    Ok(xml)
}

/// Write to `<path>.tmp` and rename over `path`, so readers never see a
/// half-written feed.
async fn write_atomic(path: &Path, data: &[u8]) -> Result<(), AniDbError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("xml.tmp");
    tokio::fs::write(&tmp, data).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}
