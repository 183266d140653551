//! TOML configuration file loading
//!
//! Supports `~/.config/duckling/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct DucklingConfigFile {
    /// Backend endpoints
    #[serde(default)]
    pub backend: BackendFileConfig,

    /// Image generation request parameters
    #[serde(default)]
    pub image: ImageFileConfig,

    /// Request routing
    #[serde(default)]
    pub router: RouterFileConfig,

    /// Audio playback
    #[serde(default)]
    pub audio: AudioFileConfig,

    /// Remote sync
    #[serde(default)]
    pub sync: SyncFileConfig,

    /// Directory holding the local database
    #[serde(default)]
    pub data_dir: Option<String>,
}

/// Backend endpoints
#[derive(Debug, Default, Deserialize)]
pub struct BackendFileConfig {
    /// HTTP base URL (image endpoint lives under it)
    pub http_url: Option<String>,

    /// WebSocket chat endpoint
    pub ws_url: Option<String>,

    /// Base URL that audio fragment paths are resolved against
    pub audio_base_url: Option<String>,

    /// Seconds before any single backend HTTP request is abandoned
    pub request_timeout_secs: Option<u64>,
}

/// Image generation parameters
#[derive(Debug, Default, Deserialize)]
pub struct ImageFileConfig {
    pub model: Option<String>,
    pub size: Option<String>,
    pub quality: Option<String>,
    pub n: Option<u32>,
}

/// Router allow-list
#[derive(Debug, Default, Deserialize)]
pub struct RouterFileConfig {
    /// Terms that route an utterance to image generation
    pub image_triggers: Option<Vec<String>>,
}

/// Audio playback configuration
#[derive(Debug, Default, Deserialize)]
pub struct AudioFileConfig {
    /// Enable speaker output
    pub enabled: Option<bool>,

    /// Readiness probe attempts per fragment
    pub ready_attempts: Option<u32>,

    /// Milliseconds between readiness probes
    pub ready_interval_ms: Option<u64>,

    /// Milliseconds before one readiness probe counts as not ready
    pub probe_timeout_ms: Option<u64>,
}

/// Remote sync configuration
#[derive(Debug, Default, Deserialize)]
pub struct SyncFileConfig {
    /// Remote REST base URL
    pub url: Option<String>,

    /// Remote API key
    pub api_key: Option<String>,

    /// User the local records belong to
    pub user_id: Option<String>,

    /// Seconds between reconciler ticks
    pub interval_secs: Option<u64>,

    /// Attempts per remote write within one tick
    pub write_attempts: Option<u32>,
}

/// Load the TOML config file from `path`, or the standard path when `None`
///
/// Returns `DucklingConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file(path: Option<&Path>) -> DucklingConfigFile {
    let Some(path) = path.map(Path::to_path_buf).or_else(config_file_path) else {
        return DucklingConfigFile::default();
    };

    if !path.exists() {
        return DucklingConfigFile::default();
    }

    match std::fs::read_to_string(&path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                DucklingConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            DucklingConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/duckling/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("chat", "duckling", "duckling")
        .map(|d| d.config_dir().join("config.toml"))
}
