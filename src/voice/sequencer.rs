//! Playback sequencer
//!
//! Plays audio fragments strictly in arrival order, one at a time. Each
//! fragment moves `Idle -> Loading -> Playing -> Idle`; the transition out of
//! `Idle` is a check-and-set under one lock, so two fragments can never be in
//! flight together. A fragment that times out or fails to play is logged and
//! skipped so the rest of the queue keeps moving.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use url::Url;

use super::playback::AudioSink;
use super::waiter::AssetWaiter;
use crate::Result;

/// A queued audio fragment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFragmentRef {
    /// Path announced by the backend, relative to the audio base URL
    pub path: String,
    /// Readiness probes issued so far
    pub attempts: u32,
}

impl AudioFragmentRef {
    /// A fragment that has not been probed yet
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            attempts: 0,
        }
    }
}

/// Where the sequencer is in its per-fragment cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackState {
    /// Nothing in flight; the next enqueue starts draining
    Idle,
    /// Waiting for the fragment to become retrievable
    Loading(AudioFragmentRef),
    /// Fragment is audible
    Playing(AudioFragmentRef),
    /// Torn down; enqueues are ignored
    Closed,
}

struct Inner {
    queue: VecDeque<AudioFragmentRef>,
    state: PlaybackState,
    current: Option<JoinHandle<()>>,
}

struct Shared {
    inner: Mutex<Inner>,
    base_url: Url,
    waiter: AssetWaiter,
    sink: Arc<dyn AudioSink>,
    speaking: watch::Sender<bool>,
    idle: Notify,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Single-flight FIFO audio queue
#[derive(Clone)]
pub struct PlaybackSequencer {
    shared: Arc<Shared>,
}

impl PlaybackSequencer {
    /// Create a sequencer resolving fragment paths against `base_url`
    #[must_use]
    pub fn new(base_url: Url, waiter: AssetWaiter, sink: Arc<dyn AudioSink>) -> Self {
        let (speaking, _) = watch::channel(false);

        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    queue: VecDeque::new(),
                    state: PlaybackState::Idle,
                    current: None,
                }),
                base_url,
                waiter,
                sink,
                speaking,
                idle: Notify::new(),
            }),
        }
    }

    /// Append a fragment and start draining if idle
    ///
    /// Returns `false` if the sequencer has been closed.
    pub fn enqueue(&self, path: &str) -> bool {
        {
            let mut inner = self.shared.lock();
            if inner.state == PlaybackState::Closed {
                tracing::debug!(path, "sequencer closed, dropping fragment");
                return false;
            }
            inner.queue.push_back(AudioFragmentRef::new(path));
            tracing::debug!(path, queued = inner.queue.len(), "audio fragment queued");
        }

        self.play_next();
        true
    }

    /// Start the next queued fragment unless one is already in flight
    ///
    /// Returns `true` if a fragment was started.
    pub fn play_next(&self) -> bool {
        let mut inner = self.shared.lock();
        if inner.state != PlaybackState::Idle {
            return false;
        }

        let Some(fragment) = inner.queue.pop_front() else {
            drop(inner);
            self.shared.idle.notify_waiters();
            return false;
        };

        inner.state = PlaybackState::Loading(fragment.clone());
        let shared = Arc::clone(&self.shared);
        inner.current = Some(tokio::spawn(run_fragment(shared, fragment)));
        true
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> PlaybackState {
        self.shared.lock().state.clone()
    }

    /// Fragments waiting behind the one in flight
    #[must_use]
    pub fn queued(&self) -> usize {
        self.shared.lock().queue.len()
    }

    /// Whether a fragment is audible right now
    #[must_use]
    pub fn is_playing(&self) -> bool {
        matches!(self.shared.lock().state, PlaybackState::Playing(_))
    }

    /// Whether the next fragment would start a fresh drain
    #[must_use]
    pub fn is_first_audio(&self) -> bool {
        let inner = self.shared.lock();
        inner.state == PlaybackState::Idle && inner.queue.is_empty()
    }

    /// Observe the "assistant is speaking" indicator
    #[must_use]
    pub fn speaking(&self) -> watch::Receiver<bool> {
        self.shared.speaking.subscribe()
    }

    /// Resolve once nothing is queued or in flight
    pub async fn drained(&self) {
        loop {
            let notified = self.shared.idle.notified();
            {
                let inner = self.shared.lock();
                let settled = matches!(inner.state, PlaybackState::Idle | PlaybackState::Closed)
                    && inner.queue.is_empty();
                if settled {
                    return;
                }
            }
            notified.await;
        }
    }

    /// Stop playback, drop queued fragments and refuse new ones
    pub fn close(&self) {
        let current = {
            let mut inner = self.shared.lock();
            if inner.state == PlaybackState::Closed {
                return;
            }
            inner.state = PlaybackState::Closed;
            inner.queue.clear();
            inner.current.take()
        };

        if let Some(task) = current {
            task.abort();
        }
        self.shared.sink.stop();
        self.shared.speaking.send_replace(false);
        self.shared.idle.notify_waiters();

        tracing::debug!("playback sequencer closed");
    }
}

/// Load and play one fragment, then hand over to the next
async fn run_fragment(shared: Arc<Shared>, mut fragment: AudioFragmentRef) {
    let path = fragment.path.clone();

    match play_fragment(&shared, &mut fragment).await {
        Ok(()) => tracing::debug!(path = %path, attempts = fragment.attempts, "fragment played"),
        Err(e) => tracing::warn!(path = %path, error = %e, "audio playback failed, skipping fragment"),
    }

    shared.speaking.send_replace(false);

    {
        let mut inner = shared.lock();
        if inner.state == PlaybackState::Closed {
            return;
        }
        inner.state = PlaybackState::Idle;
        inner.current = None;
    }

    PlaybackSequencer { shared }.play_next();
}

async fn play_fragment(shared: &Shared, fragment: &mut AudioFragmentRef) -> Result<()> {
    let url = resolve_asset_url(&shared.base_url, &fragment.path)?;
    fragment.attempts = shared.waiter.wait_until_ready(&url).await?;

    {
        let mut inner = shared.lock();
        if !matches!(inner.state, PlaybackState::Loading(_)) {
            return Ok(());
        }
        inner.state = PlaybackState::Playing(fragment.clone());
    }

    shared.speaking.send_replace(true);
    shared.sink.play(&url).await
}

/// Resolve a fragment path against the audio base URL
///
/// Absolute URLs are used as-is; anything else is appended to the base.
///
/// # Errors
///
/// Returns error if the combined URL is invalid
pub fn resolve_asset_url(base: &Url, path: &str) -> Result<Url> {
    if let Ok(absolute) = Url::parse(path) {
        return Ok(absolute);
    }

    let joined = format!(
        "{}/{}",
        base.as_str().trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    Ok(Url::parse(&joined)?)
}
