//! Error types for the chat pipeline

use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the chat pipeline
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Send attempted while the socket is not open
    #[error("socket is not open")]
    SocketUnavailable,

    /// Inbound frame could not be decoded
    #[error("malformed frame: {0}")]
    Frame(String),

    /// Audio asset never became retrievable
    #[error("audio asset not ready after {attempts} attempts: {url}")]
    AssetTimeout {
        /// Probed URL
        url: String,
        /// Number of probes issued
        attempts: u32,
    },

    /// Playback could not load or play a fragment
    #[error("playback error: {0}")]
    Playback(String),

    /// Audio device error
    #[error("audio error: {0}")]
    Audio(String),

    /// Image generation request failed
    #[error("image generation error: {0}")]
    ImageGeneration(String),

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// Remote sync error
    #[error("sync error: {0}")]
    Sync(String),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// URL parsing error
    #[error("url error: {0}")]
    Url(#[from] url::ParseError),

    /// `SQLite` error
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}
