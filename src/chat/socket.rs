//! Socket session manager
//!
//! Owns one duplex WebSocket connection. Outbound frames are raw utterance
//! strings; inbound frames are JSON objects carrying an optional text delta
//! and/or audio reference, handed to a [`FrameSink`] in receipt order.
//! There is no automatic reconnect.

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message as WsMessage,
};
use url::Url;

use crate::{Error, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    /// Handshake in progress
    Connecting,
    /// Frames can be sent
    Open,
    /// Closed locally or by the server
    Closed,
    /// Transport failure
    Error,
}

impl std::fmt::Display for SocketState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::Open => write!(f, "open"),
            Self::Closed => write!(f, "closed"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// One inbound frame
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Frame {
    /// Text delta for the open assistant message
    #[serde(default)]
    pub text: Option<String>,

    /// Audio fragment path
    #[serde(default)]
    pub audio: Option<String>,

    /// Marks the end of the current response
    #[serde(default)]
    pub done: bool,
}

impl Frame {
    /// Decode a frame from its JSON text
    ///
    /// # Errors
    ///
    /// Returns error if the text is not a JSON object of the expected shape
    pub fn parse(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| Error::Frame(e.to_string()))
    }

    /// Non-empty text delta
    #[must_use]
    pub fn text_delta(&self) -> Option<&str> {
        self.text.as_deref().filter(|t| !t.is_empty())
    }

    /// Non-empty audio path
    #[must_use]
    pub fn audio_path(&self) -> Option<&str> {
        self.audio.as_deref().filter(|a| !a.is_empty())
    }
}

/// Why the server side of a connection went away
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disconnect {
    /// The server closed the connection
    Closed,
    /// The transport failed
    Error(String),
}

/// Receives decoded frames from a socket session
///
/// Called from the session's reader task, one frame at a time.
pub trait FrameSink: Send + Sync + 'static {
    /// Handle one decoded frame
    fn on_frame(&self, frame: Frame);

    /// The connection ended without a local `close`
    fn on_disconnect(&self, reason: Disconnect);
}

/// Commands for the connection task
#[derive(Debug)]
enum Outbound {
    Text(String),
    Close,
}

/// A single WebSocket connection and its reader task
pub struct SocketSession {
    url: Url,
    state: Arc<watch::Sender<SocketState>>,
    outbound: Option<mpsc::UnboundedSender<Outbound>>,
    task: Option<JoinHandle<()>>,
}

impl SocketSession {
    /// Connect to `url` and start dispatching frames to `sink`
    ///
    /// A failed handshake does not return an error: the session is created
    /// in [`SocketState::Error`] and every later `send` is rejected.
    pub async fn open(url: &Url, sink: Arc<dyn FrameSink>) -> Self {
        let (state, _) = watch::channel(SocketState::Connecting);
        let state = Arc::new(state);

        let ws = match connect_async(url.as_str()).await {
            Ok((ws, _)) => ws,
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "WebSocket connect failed");
                state.send_replace(SocketState::Error);
                return Self {
                    url: url.clone(),
                    state,
                    outbound: None,
                    task: None,
                };
            }
        };

        tracing::info!(url = %url, "WebSocket connected");
        state.send_replace(SocketState::Open);

        let (tx, rx) = mpsc::unbounded_channel();
        let task_state = Arc::clone(&state);
        let task = tokio::spawn(async move {
            run_connection(ws, rx, task_state, sink).await;
        });

        Self {
            url: url.clone(),
            state,
            outbound: Some(tx),
            task: Some(task),
        }
    }

    /// Current connection state
    #[must_use]
    pub fn state(&self) -> SocketState {
        *self.state.borrow()
    }

    /// Transmit an utterance
    ///
    /// # Errors
    ///
    /// Returns [`Error::SocketUnavailable`] unless the socket is open
    pub fn send(&self, text: &str) -> Result<()> {
        if self.state() != SocketState::Open {
            return Err(Error::SocketUnavailable);
        }

        self.outbound
            .as_ref()
            .ok_or(Error::SocketUnavailable)?
            .send(Outbound::Text(text.to_string()))
            .map_err(|_| Error::SocketUnavailable)
    }

    /// Close the connection; safe to call any number of times
    pub fn close(&self) {
        let previous = self.state.send_replace(SocketState::Closed);
        if previous == SocketState::Closed {
            return;
        }

        if let Some(tx) = &self.outbound {
            // The task may already be gone after a transport error
            let _ = tx.send(Outbound::Close);
        }

        tracing::debug!(url = %self.url, %previous, "WebSocket close requested");
    }

    /// Close and wait for the connection task to finish
    pub async fn shutdown(mut self) {
        self.close();
        if let Some(task) = self.task.take()
            && let Err(e) = task.await
        {
            tracing::debug!(error = %e, "WebSocket task ended abnormally");
        }
    }
}

impl Drop for SocketSession {
    fn drop(&mut self) {
        self.close();
    }
}

/// Pump frames in both directions until either side closes
async fn run_connection(
    ws: WsStream,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    state: Arc<watch::Sender<SocketState>>,
    sink: Arc<dyn FrameSink>,
) {
    let (mut write, mut read) = ws.split();

    loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(WsMessage::Text(text))) => dispatch(&text, sink.as_ref()),
                    Some(Ok(WsMessage::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                        Ok(text) => dispatch(text, sink.as_ref()),
                        Err(e) => tracing::warn!(error = %e, "dropping non-UTF-8 binary frame"),
                    },
                    Some(Ok(WsMessage::Close(_))) | None => {
                        tracing::info!("WebSocket closed");
                        if state.send_replace(SocketState::Closed) != SocketState::Closed {
                            sink.on_disconnect(Disconnect::Closed);
                        }
                        return;
                    }
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "WebSocket error");
                        fail(&state, sink.as_ref(), e.to_string());
                        return;
                    }
                    // Ping/pong handled by tungstenite
                    Some(Ok(_)) => {}
                }
            }
            cmd = outbound.recv() => {
                match cmd {
                    Some(Outbound::Text(text)) => {
                        if let Err(e) = write.send(WsMessage::Text(text)).await {
                            tracing::warn!(error = %e, "WebSocket send failed");
                            fail(&state, sink.as_ref(), e.to_string());
                            return;
                        }
                    }
                    Some(Outbound::Close) | None => {
                        if let Err(e) = write.send(WsMessage::Close(None)).await {
                            tracing::debug!(error = %e, "WebSocket close frame not delivered");
                        }
                        return;
                    }
                }
            }
        }
    }
}

/// Record a transport failure unless the session was already closed locally
fn fail(state: &watch::Sender<SocketState>, sink: &dyn FrameSink, reason: String) {
    let changed = state.send_if_modified(|current| {
        if *current == SocketState::Closed {
            false
        } else {
            *current = SocketState::Error;
            true
        }
    });

    if changed {
        sink.on_disconnect(Disconnect::Error(reason));
    }
}

/// Decode and hand off one text frame; malformed frames are dropped
fn dispatch(raw: &str, sink: &dyn FrameSink) {
    match Frame::parse(raw) {
        Ok(frame) => sink.on_frame(frame),
        Err(e) => tracing::warn!(error = %e, "dropping malformed frame"),
    }
}
