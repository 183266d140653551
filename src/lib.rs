//! Duckling Chat - realtime streaming chat client with local-first sync
//!
//! This library provides the client side of a streamed, multi-modal chat:
//! - A WebSocket session carrying utterances out and text/audio frames in
//! - Incremental assembly of streamed text into an observable message list
//! - Strictly ordered audio playback that waits out backend synthesis latency
//! - Routing between conversational turns and one-shot image generation
//! - A local `SQLite` interaction store reconciled to a remote REST store
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                    ChatSession                       │
//! │   submit → RequestRouter → ImageClient | Socket      │
//! └──────────┬──────────────────────────┬───────────────┘
//!            │ frames                   │ completed turns
//! ┌──────────▼──────────┐    ┌──────────▼───────────────┐
//! │  StreamAssembler    │    │  Local interaction store │
//! │  PlaybackSequencer  │    │  (SQLite, append-only)   │
//! │   └ AssetWaiter     │    └──────────┬───────────────┘
//! └─────────────────────┘               │ timer
//!                             ┌─────────▼────────────────┐
//!                             │  Reconciler → RemoteStore │
//!                             └──────────────────────────┘
//! ```

pub mod chat;
pub mod config;
pub mod db;
pub mod error;
pub mod retry;
pub mod sync;
pub mod voice;

pub use chat::{ChatSession, Message, RequestRouter, Route, SessionState};
pub use config::Config;
pub use db::{DbConn, DbPool};
pub use error::{Error, Result};
pub use retry::RetryPolicy;
pub use sync::{Reconciler, SyncReport};
