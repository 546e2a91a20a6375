use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::MatchError;

const DEFAULT_CONFIG: &str = include_str!("../../../config/default.toml");

/// Top-level matcher configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatcherConfig {
    pub cache: CacheConfig,
    pub titles: TitlesConfig,
    pub search: SearchConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TitlesConfig {
    pub url: String,
    pub max_age_days: u64,
    pub user_agent: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    pub retry_on_miss: bool,
}

impl MatcherConfig {
    /// Load config: user file (if it exists) layered over built-in defaults.
    pub fn load() -> Result<Self, MatchError> {
        let user_path = Self::config_path();
        if user_path.exists() {
            Self::load_from(&user_path)
        } else {
            Self::from_toml_str("")
        }
    }

    /// Load an explicit config file layered over built-in defaults.
    pub fn load_from(path: &Path) -> Result<Self, MatchError> {
        let user_str = std::fs::read_to_string(path)
            .map_err(|e| MatchError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&user_str)
    }

    /// Parse a (possibly partial) TOML document layered over the defaults.
    pub fn from_toml_str(user: &str) -> Result<Self, MatchError> {
        let mut merged: toml::Table =
            toml::from_str(DEFAULT_CONFIG).map_err(|e| MatchError::Config(e.to_string()))?;
        let overlay: toml::Table =
            toml::from_str(user).map_err(|e| MatchError::Config(e.to_string()))?;
        merge_tables(&mut merged, overlay);

        toml::Value::Table(merged)
            .try_into()
            .map_err(|e: toml::de::Error| MatchError::Config(e.to_string()))
    }

    /// Path to the user config file (XDG on Linux, AppData on Windows).
    pub fn config_path() -> PathBuf {
        Self::project_dirs()
            .map(|d| d.config_dir().join("config.toml"))
            .unwrap_or_else(|| PathBuf::from("animatch.toml"))
    }

    /// Directory that holds one `<provider>/titles.xml` per provider.
    pub fn cache_root(&self) -> PathBuf {
        self.cache.root.clone().unwrap_or_else(|| {
            Self::project_dirs()
                .map(|d| d.cache_dir().to_path_buf())
                .unwrap_or_else(|| PathBuf::from("cache"))
        })
    }

    /// Age after which the cached title feed is downloaded again.
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.titles.max_age_days * 24 * 60 * 60)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.titles.timeout_secs)
    }

    fn project_dirs() -> Option<ProjectDirs> {
        ProjectDirs::from("", "", "animatch")
    }
}

impl Default for MatcherConfig {
    fn default() -> Self {
        toml::from_str(DEFAULT_CONFIG).expect("built-in default config is valid TOML")
    }
}

fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match base.get_mut(&key) {
            Some(toml::Value::Table(existing)) if value.is_table() => {
                if let toml::Value::Table(nested) = value {
                    merge_tables(existing, nested);
                }
            }
            _ => {
                base.insert(key, value);
            }
        }
    }
}
