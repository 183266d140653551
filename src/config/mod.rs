//! Configuration management for the chat pipeline
//!
//! Values are layered: built-in defaults, then the TOML file, then
//! environment variables.

pub mod file;

use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::SecretString;
use url::Url;

use crate::retry::RetryPolicy;
use crate::{Error, Result};

use file::DucklingConfigFile;

/// Default backend HTTP base URL
const DEFAULT_HTTP_URL: &str = "http://localhost:8000";

/// WebSocket chat path appended to the HTTP base when no explicit URL is set
const DEFAULT_WS_PATH: &str = "/api/chat/ws/chat";

/// Default per-request HTTP timeout; image generation is the slowest call
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

/// Default bound on a single audio readiness probe
const DEFAULT_PROBE_TIMEOUT_MS: u64 = 2_000;

/// Default seconds between reconciler ticks
const DEFAULT_SYNC_INTERVAL_SECS: u64 = 30;

/// Default image triggers (English and Chinese)
const DEFAULT_IMAGE_TRIGGERS: &[&str] = &[
    "画",
    "生成图片",
    "draw",
    "generate image",
    "picture of",
    "create a scene",
];

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Backend endpoints
    pub backend: BackendConfig,

    /// Image generation parameters
    pub image: ImageConfig,

    /// Request routing
    pub router: RouterConfig,

    /// Audio playback
    pub audio: AudioConfig,

    /// Remote sync
    pub sync: SyncConfig,

    /// Directory holding the local database
    pub data_dir: PathBuf,
}

/// Backend endpoints
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// HTTP base URL
    pub http_url: Url,

    /// WebSocket chat endpoint
    pub ws_url: Url,

    /// Base URL that audio fragment paths are resolved against
    pub audio_base_url: Url,

    /// Upper bound on any single HTTP request to the backend
    pub request_timeout: Duration,
}

/// Parameters sent with every image generation request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageConfig {
    pub model: String,
    pub size: String,
    pub quality: String,
    pub n: u32,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            model: "dall-e-3".to_string(),
            size: "1024x1024".to_string(),
            quality: "standard".to_string(),
            n: 1,
        }
    }
}

/// Request router configuration
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Terms that route an utterance to image generation
    pub image_triggers: Vec<String>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            image_triggers: DEFAULT_IMAGE_TRIGGERS.iter().map(ToString::to_string).collect(),
        }
    }
}

/// Audio playback configuration
#[derive(Debug, Clone)]
pub struct AudioConfig {
    /// Enable speaker output
    pub enabled: bool,

    /// Readiness probing policy for each fragment
    pub readiness: RetryPolicy,

    /// Upper bound on one readiness probe; a probe that runs over counts as not ready
    pub probe_timeout: Duration,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            readiness: RetryPolicy::default(),
            probe_timeout: Duration::from_millis(DEFAULT_PROBE_TIMEOUT_MS),
        }
    }
}

/// Remote sync configuration
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Remote REST base URL; sync is disabled when absent
    pub remote_url: Option<Url>,

    /// Remote API key
    pub api_key: Option<SecretString>,

    /// User the local records belong to
    pub user_id: Option<String>,

    /// Time between reconciler ticks
    pub interval: Duration,

    /// Retry policy for a single remote write within one tick
    pub write_policy: RetryPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            remote_url: None,
            api_key: None,
            user_id: None,
            interval: Duration::from_secs(DEFAULT_SYNC_INTERVAL_SECS),
            write_policy: RetryPolicy::once(),
        }
    }
}

impl SyncConfig {
    /// Whether the reconciler has everything it needs to run
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.remote_url.is_some() && self.user_id.is_some()
    }
}

impl Config {
    /// Load configuration from the standard file location and environment
    ///
    /// # Errors
    ///
    /// Returns error if a configured URL is invalid
    pub fn load(config_path: Option<&Path>, disable_audio: bool) -> Result<Self> {
        let env_path = std::env::var("DUCKLING_CONFIG").ok().map(PathBuf::from);
        let path = config_path.map(Path::to_path_buf).or(env_path);
        let file = file::load_config_file(path.as_deref());

        let mut config = Self::resolve(file, |key| std::env::var(key).ok())?;

        if disable_audio {
            tracing::info!("audio explicitly disabled via --no-audio");
            config.audio.enabled = false;
        }

        ensure_data_dir(&config.data_dir);
        Ok(config)
    }

    /// Build a configuration from a parsed file and an environment lookup
    ///
    /// Environment values take precedence over file values.
    ///
    /// # Errors
    ///
    /// Returns error if a configured URL is invalid
    pub fn resolve<F>(file: DucklingConfigFile, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let http_url = parse_url(
            "backend.http_url",
            &env("DUCKLING_HTTP_URL")
                .or(file.backend.http_url)
                .unwrap_or_else(|| DEFAULT_HTTP_URL.to_string()),
        )?;

        let ws_url = match env("DUCKLING_WS_URL").or(file.backend.ws_url) {
            Some(raw) => parse_url("backend.ws_url", &raw)?,
            None => derive_ws_url(&http_url)?,
        };

        let audio_base_url = match env("DUCKLING_AUDIO_BASE_URL").or(file.backend.audio_base_url) {
            Some(raw) => parse_url("backend.audio_base_url", &raw)?,
            None => http_url.clone(),
        };

        let request_timeout = env("DUCKLING_REQUEST_TIMEOUT_SECS")
            .and_then(|s| s.parse().ok())
            .or(file.backend.request_timeout_secs)
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS);

        let defaults = ImageConfig::default();
        let image = ImageConfig {
            model: file.image.model.unwrap_or(defaults.model),
            size: file.image.size.unwrap_or(defaults.size),
            quality: file.image.quality.unwrap_or(defaults.quality),
            n: file.image.n.unwrap_or(defaults.n),
        };

        let router = file
            .router
            .image_triggers
            .map_or_else(RouterConfig::default, |image_triggers| RouterConfig {
                image_triggers,
            });

        let audio_disabled = env("DUCKLING_DISABLE_AUDIO")
            .is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("true"));
        let readiness_default = RetryPolicy::default();
        let audio = AudioConfig {
            enabled: !audio_disabled && file.audio.enabled.unwrap_or(true),
            readiness: RetryPolicy::fixed(
                file.audio
                    .ready_attempts
                    .unwrap_or(readiness_default.max_attempts),
                file.audio
                    .ready_interval_ms
                    .map_or(readiness_default.interval, Duration::from_millis),
            ),
            probe_timeout: Duration::from_millis(
                file.audio
                    .probe_timeout_ms
                    .unwrap_or(DEFAULT_PROBE_TIMEOUT_MS)
                    .max(1),
            ),
        };

        let remote_url = env("DUCKLING_SYNC_URL")
            .or(file.sync.url)
            .map(|raw| parse_url("sync.url", &raw))
            .transpose()?;
        let interval_secs = env("DUCKLING_SYNC_INTERVAL_SECS")
            .and_then(|s| s.parse().ok())
            .or(file.sync.interval_secs)
            .unwrap_or(DEFAULT_SYNC_INTERVAL_SECS);
        let sync = SyncConfig {
            remote_url,
            api_key: env("DUCKLING_SYNC_KEY")
                .or(file.sync.api_key)
                .map(SecretString::from),
            user_id: env("DUCKLING_USER_ID").or(file.sync.user_id),
            interval: Duration::from_secs(interval_secs.max(1)),
            write_policy: RetryPolicy::with_backoff(
                file.sync.write_attempts.unwrap_or(1),
                Duration::from_millis(500),
                2.0,
                Duration::from_secs(5),
            ),
        };

        let data_dir = env("DUCKLING_DATA_DIR")
            .or(file.data_dir)
            .map_or_else(default_data_dir, PathBuf::from);

        Ok(Self {
            backend: BackendConfig {
                http_url,
                ws_url,
                audio_base_url,
                request_timeout: Duration::from_secs(request_timeout.max(1)),
            },
            image,
            router,
            audio,
            sync,
            data_dir,
        })
    }

    /// Path of the local interaction database
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("duckling.db")
    }
}

/// Create `dir` if needed; failure is logged and left for the database open to report
fn ensure_data_dir(dir: &Path) -> bool {
    match std::fs::create_dir_all(dir) {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(
                path = %dir.display(),
                error = %e,
                "failed to create data directory"
            );
            false
        }
    }
}

/// Build an HTTP client whose requests give up after `timeout`
///
/// # Errors
///
/// Returns error if the HTTP client cannot be constructed
pub fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| Error::Config(format!("failed to create HTTP client: {e}")))
}

/// Data directory (`~/.local/share/duckling` on Linux)
fn default_data_dir() -> PathBuf {
    directories::ProjectDirs::from("chat", "duckling", "duckling")
        .map_or_else(|| PathBuf::from(".duckling"), |d| d.data_dir().to_path_buf())
}

fn parse_url(field: &str, raw: &str) -> Result<Url> {
    Url::parse(raw).map_err(|e| Error::Config(format!("invalid {field} {raw:?}: {e}")))
}

/// Swap the HTTP scheme for its WebSocket counterpart and append the chat path
fn derive_ws_url(http_url: &Url) -> Result<Url> {
    let scheme = if http_url.scheme() == "https" { "wss" } else { "ws" };
    let base = http_url.as_str().trim_end_matches('/');
    let rest = base
        .split_once("://")
        .map_or(base, |(_, rest)| rest);

    parse_url("backend.ws_url", &format!("{scheme}://{rest}{DEFAULT_WS_PATH}"))
}
