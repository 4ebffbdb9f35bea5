use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::warn;

pub const CONFIG_FILENAME: &str = "config.json";

fn default_log_level() -> String {
    "info".to_string()
}

/// Persisted settings. Missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Favorites cache directory used when none is given
    #[serde(default)]
    pub cache_path: Option<PathBuf>,
    /// Parent of the dated output folders
    #[serde(default)]
    pub output_path: Option<PathBuf>,
    /// Delete cached media after a successful save
    #[serde(default)]
    pub auto_clean: bool,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// JSON file with extra store query templates
    #[serde(default)]
    pub store_queries: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            cache_path: None,
            output_path: None,
            auto_clean: false,
            log_level: default_log_level(),
            store_queries: None,
        }
    }
}

impl AppConfig {
    /// `<config dir>/wxfav/config.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("wxfav").join(CONFIG_FILENAME))
    }

    /// Load from `path`; a missing or unreadable file yields the defaults.
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        let parsed: anyhow::Result<AppConfig> = File::open(path)
            .map_err(anyhow::Error::from)
            .and_then(|f| Ok(serde_json::from_reader(BufReader::new(f))?));
        match parsed {
            Ok(config) => config,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring unreadable config");
                Self::default()
            }
        }
    }

    /// Write as pretty JSON, through a temp file renamed into place.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create config directory {}", parent.display()))?;
        }
        let temp_path = path.with_extension("json.tmp");
        let file = File::create(&temp_path)
            .with_context(|| format!("create {}", temp_path.display()))?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)?;
        fs::rename(&temp_path, path).with_context(|| format!("write {}", path.display()))?;
        Ok(())
    }
}
