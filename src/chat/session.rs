//! Chat session
//!
//! Wires the socket, assembler, router, image client, playback sequencer and
//! reconciler together for one mounted conversation. [`ChatSession::close`]
//! is the only teardown path: it closes the socket, stops playback and
//! cancels the sync timer.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;

use super::assembler::{Reply, StreamAssembler};
use super::image::ImageClient;
use super::message::Message;
use super::router::{RequestRouter, Route};
use super::socket::{Disconnect, Frame, FrameSink, SocketSession, SocketState};
use crate::Result;
use crate::config::Config;
use crate::db::{DbPool, InteractionRepo, NewInteraction};
use crate::sync::{Reconciler, ReconcilerHandle};
use crate::voice::{AssetProbe, AssetWaiter, AudioSink, HttpProbe, PlaybackSequencer, SpeakerSink};

/// Shown in place of a reply when the socket cannot carry the turn
pub const CONNECTION_ERROR_MESSAGE: &str = "Connection error, AI temporarily unresponsive.";

/// Shown in place of an image when generation fails
pub const IMAGE_FAILED_MESSAGE: &str = "Image generation failed, please try again later.";

/// Point-in-time view of the session for the UI
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionState {
    pub socket: SocketState,
    /// A fragment is audible
    pub is_playing: bool,
    /// No fragment is queued or in flight
    pub is_first_audio: bool,
}

/// Frame consumer shared with the socket task
struct Pipeline {
    assembler: StreamAssembler,
    sequencer: Option<PlaybackSequencer>,
    interactions: InteractionRepo,
    /// Utterance whose streamed reply is still open
    pending: Mutex<Option<String>>,
}

impl Pipeline {
    fn pending(&self) -> MutexGuard<'_, Option<String>> {
        self.pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Close the open reply and record it against its utterance
    fn finish_turn(&self) {
        let utterance = self.pending().take();
        let finished = self.assembler.finish_open();

        if let (Some(utterance), Some(message)) = (utterance, finished)
            && !message.content.is_empty()
        {
            self.record(&NewInteraction::chat(utterance, message.content));
        }
    }

    fn record(&self, interaction: &NewInteraction) {
        match self.interactions.insert(interaction) {
            Ok(record) => tracing::debug!(id = record.id, chat_type = ?record.chat_type, "interaction recorded"),
            Err(e) => tracing::warn!(error = %e, "failed to record interaction"),
        }
    }
}

impl FrameSink for Pipeline {
    fn on_frame(&self, frame: Frame) {
        if let Some(delta) = frame.text_delta() {
            self.assembler.append_delta(delta);
        }

        if let Some(path) = frame.audio_path() {
            match &self.sequencer {
                Some(sequencer) => {
                    sequencer.enqueue(path);
                }
                None => tracing::trace!(path, "audio disabled, ignoring fragment"),
            }
        }

        if frame.done {
            self.finish_turn();
        }
    }

    fn on_disconnect(&self, reason: Disconnect) {
        tracing::warn!(?reason, "chat socket disconnected");

        match self.assembler.open_content() {
            Some(content) if content.is_empty() => {
                self.pending().take();
                self.assembler.replace_last(CONNECTION_ERROR_MESSAGE);
            }
            Some(_) => self.finish_turn(),
            None => {}
        }
    }
}

/// Builder for [`ChatSession`] with injectable audio and sync seams
pub struct SessionBuilder {
    config: Config,
    pool: DbPool,
    audio_sink: Option<Arc<dyn AudioSink>>,
    probe: Option<Arc<dyn AssetProbe>>,
    reconciler: Option<Reconciler>,
}

impl SessionBuilder {
    /// Play fragments through `sink` instead of the speakers
    #[must_use]
    pub fn audio_sink(mut self, sink: Arc<dyn AudioSink>) -> Self {
        self.audio_sink = Some(sink);
        self
    }

    /// Probe fragment readiness with `probe` instead of HTTP `HEAD`
    #[must_use]
    pub fn probe(mut self, probe: Arc<dyn AssetProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Run `reconciler` instead of one built from the sync configuration
    #[must_use]
    pub fn reconciler(mut self, reconciler: Reconciler) -> Self {
        self.reconciler = Some(reconciler);
        self
    }

    /// Connect the socket and start background work
    ///
    /// A socket that fails to connect does not fail the session; it starts
    /// in [`SocketState::Error`] and can be retried with
    /// [`ChatSession::reconnect`].
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built or the image endpoint
    /// cannot be derived from the backend URL
    pub async fn open(self) -> Result<ChatSession> {
        let Self {
            config,
            pool,
            audio_sink,
            probe,
            reconciler,
        } = self;

        let client = crate::config::http_client(config.backend.request_timeout)?;

        let sequencer = if config.audio.enabled {
            let probe: Arc<dyn AssetProbe> = match probe {
                Some(probe) => probe,
                None => Arc::new(HttpProbe::new(client.clone())),
            };
            let sink: Arc<dyn AudioSink> = match audio_sink {
                Some(sink) => sink,
                None => Arc::new(SpeakerSink::new(client.clone())),
            };
            Some(PlaybackSequencer::new(
                config.backend.audio_base_url.clone(),
                AssetWaiter::new(probe, config.audio.readiness)
                    .with_probe_timeout(config.audio.probe_timeout),
                sink,
            ))
        } else {
            tracing::info!("audio playback disabled");
            None
        };

        let images = ImageClient::with_client(&config.backend.http_url, config.image.clone(), client)?;

        let pipeline = Arc::new(Pipeline {
            assembler: StreamAssembler::new(),
            sequencer,
            interactions: InteractionRepo::new(pool.clone()),
            pending: Mutex::new(None),
        });

        let socket = SocketSession::open(&config.backend.ws_url, pipeline.clone()).await;

        let reconciler = reconciler
            .or_else(|| Reconciler::from_config(pool, &config.sync))
            .map(|r| r.spawn(config.sync.interval));
        if reconciler.is_none() {
            tracing::info!("remote sync not configured");
        }

        let (idle_speaking, _) = watch::channel(false);

        Ok(ChatSession {
            router: RequestRouter::from(&config.router),
            config,
            images,
            pipeline,
            socket,
            reconciler,
            idle_speaking,
            closed: false,
        })
    }
}

/// One mounted conversation
pub struct ChatSession {
    config: Config,
    router: RequestRouter,
    images: ImageClient,
    pipeline: Arc<Pipeline>,
    socket: SocketSession,
    reconciler: Option<ReconcilerHandle>,
    /// Backs [`ChatSession::speaking`] when audio is disabled
    idle_speaking: watch::Sender<bool>,
    closed: bool,
}

impl ChatSession {
    /// Start building a session
    #[must_use]
    pub fn builder(config: Config, pool: DbPool) -> SessionBuilder {
        SessionBuilder {
            config,
            pool,
            audio_sink: None,
            probe: None,
            reconciler: None,
        }
    }

    /// Open a session with speaker output and configured sync
    ///
    /// # Errors
    ///
    /// Returns error if the image endpoint cannot be derived from the backend URL
    pub async fn open(config: Config, pool: DbPool) -> Result<Self> {
        Self::builder(config, pool).open().await
    }

    /// Submit one user utterance
    ///
    /// Blank input is ignored and returns `None`. Failures never surface as
    /// errors; they are rendered into the assistant message instead.
    pub async fn submit(&self, text: &str) -> Option<Route> {
        if text.trim().is_empty() {
            return None;
        }

        self.pipeline.finish_turn();

        let assembler = &self.pipeline.assembler;
        assembler.push_user(text);
        let index = assembler.begin_assistant();

        let route = self.router.classify(text);
        tracing::debug!(?route, "utterance routed");

        match route {
            Route::ImageRequest => self.generate_image(text, index).await,
            Route::ConversationalTurn => {
                *self.pipeline.pending() = Some(text.to_string());

                if let Err(e) = self.socket.send(text) {
                    tracing::warn!(error = %e, state = %self.socket.state(), "utterance not sent");
                    self.pipeline.pending().take();
                    assembler.replace(index, Reply::Text(CONNECTION_ERROR_MESSAGE.to_string()));
                }
            }
        }

        Some(route)
    }

    async fn generate_image(&self, prompt: &str, index: usize) {
        let (reply, response) = match self.images.generate(prompt).await {
            Ok(url) => (Reply::Image(url.clone()), url),
            Err(e) => {
                tracing::warn!(error = %e, "image generation failed");
                (
                    Reply::Text(IMAGE_FAILED_MESSAGE.to_string()),
                    IMAGE_FAILED_MESSAGE.to_string(),
                )
            }
        };

        self.pipeline.assembler.replace(index, reply);
        self.pipeline.record(&NewInteraction::image(prompt, response));
    }

    /// Copy of the rendered message list
    #[must_use]
    pub fn messages(&self) -> Vec<Message> {
        self.pipeline.assembler.snapshot()
    }

    /// Observe the rendered message list
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Vec<Message>> {
        self.pipeline.assembler.subscribe()
    }

    /// Current socket and playback state
    #[must_use]
    pub fn state(&self) -> SessionState {
        let (is_playing, is_first_audio) = self
            .pipeline
            .sequencer
            .as_ref()
            .map_or((false, true), |s| (s.is_playing(), s.is_first_audio()));

        SessionState {
            socket: self.socket.state(),
            is_playing,
            is_first_audio,
        }
    }

    /// Observe the "assistant is speaking" indicator
    #[must_use]
    pub fn speaking(&self) -> watch::Receiver<bool> {
        self.pipeline
            .sequencer
            .as_ref()
            .map_or_else(|| self.idle_speaking.subscribe(), PlaybackSequencer::speaking)
    }

    /// Playback sequencer, when audio is enabled
    #[must_use]
    pub fn sequencer(&self) -> Option<&PlaybackSequencer> {
        self.pipeline.sequencer.as_ref()
    }

    /// Re-open the socket after it closed or failed
    ///
    /// Only ever runs on request; an open socket is left alone and a closed
    /// session stays closed.
    pub async fn reconnect(&mut self) -> SocketState {
        let current = self.socket.state();
        if self.closed || matches!(current, SocketState::Open | SocketState::Connecting) {
            return current;
        }

        tracing::info!(url = %self.config.backend.ws_url, previous = %current, "reconnecting chat socket");
        let fresh = SocketSession::open(&self.config.backend.ws_url, self.pipeline.clone()).await;
        let stale = std::mem::replace(&mut self.socket, fresh);
        stale.shutdown().await;

        self.socket.state()
    }

    /// Tear everything down; safe to call more than once
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        self.socket.close();
        if let Some(sequencer) = &self.pipeline.sequencer {
            sequencer.close();
        }
        if let Some(mut reconciler) = self.reconciler.take() {
            reconciler.stop();
        }
        self.pipeline.finish_turn();

        tracing::info!("chat session closed");
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn pipeline() -> (Pipeline, InteractionRepo) {
        let pool = db::init_memory().unwrap();
        let repo = InteractionRepo::new(pool.clone());
        let pipeline = Pipeline {
            assembler: StreamAssembler::new(),
            sequencer: None,
            interactions: InteractionRepo::new(pool),
            pending: Mutex::new(None),
        };
        (pipeline, repo)
    }

    fn frame(raw: &str) -> Frame {
        Frame::parse(raw).unwrap()
    }

    #[test]
    fn done_frame_closes_and_records_turn() {
        let (pipeline, repo) = pipeline();
        pipeline.assembler.push_user("hi");
        pipeline.assembler.begin_assistant();
        *pipeline.pending() = Some("hi".to_string());

        pipeline.on_frame(frame(r#"{"text":"Hel"}"#));
        pipeline.on_frame(frame(r#"{"text":"lo","audio":"/a/1.mp3"}"#));
        pipeline.on_frame(frame(r#"{"done":true}"#));

        let messages = pipeline.assembler.snapshot();
        assert_eq!(messages[1].content, "Hello");
        assert!(!messages[1].open);

        let recorded = repo.recent(10).unwrap();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].message, "hi");
        assert_eq!(recorded[0].response.as_deref(), Some("Hello"));
        assert_eq!(recorded[0].chat_type.as_deref(), Some("chat"));
    }

    #[test]
    fn disconnect_before_reply_shows_error() {
        let (pipeline, repo) = pipeline();
        pipeline.assembler.push_user("hi");
        pipeline.assembler.begin_assistant();
        *pipeline.pending() = Some("hi".to_string());

        pipeline.on_disconnect(Disconnect::Error("reset".to_string()));

        let last = pipeline.assembler.snapshot().pop().unwrap();
        assert_eq!(last.content, CONNECTION_ERROR_MESSAGE);
        assert!(!last.open);
        assert_eq!(repo.count_unsynced().unwrap(), 0);
    }

    #[test]
    fn disconnect_mid_reply_keeps_partial_text() {
        let (pipeline, repo) = pipeline();
        pipeline.assembler.push_user("hi");
        pipeline.assembler.begin_assistant();
        *pipeline.pending() = Some("hi".to_string());

        pipeline.on_frame(frame(r#"{"text":"partial"}"#));
        pipeline.on_disconnect(Disconnect::Closed);

        let last = pipeline.assembler.snapshot().pop().unwrap();
        assert_eq!(last.content, "partial");
        assert_eq!(repo.count_unsynced().unwrap(), 1);
    }

    #[test]
    fn turn_is_recorded_once() {
        let (pipeline, repo) = pipeline();
        pipeline.assembler.begin_assistant();
        *pipeline.pending() = Some("q".to_string());

        pipeline.on_frame(frame(r#"{"text":"a","done":true}"#));
        pipeline.finish_turn();
        pipeline.on_disconnect(Disconnect::Closed);

        assert_eq!(repo.count_unsynced().unwrap(), 1);
    }
}
