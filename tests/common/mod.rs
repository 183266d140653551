//! Shared test utilities

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{any, get, post};
use axum::{Json, Router};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use duckling_chat::chat::Message;
use duckling_chat::config::file::DucklingConfigFile;
use duckling_chat::{Config, DbPool, RetryPolicy, db};

/// Set up an in-memory test database
#[must_use]
pub fn setup_test_db() -> DbPool {
    db::init_memory().expect("failed to init test db")
}

/// Configuration pointing at `http_url` with audio off and sync unconfigured
pub fn test_config(http_url: &str) -> Config {
    let http_url = http_url.to_string();
    let mut config = Config::resolve(DucklingConfigFile::default(), |key| match key {
        "DUCKLING_HTTP_URL" => Some(http_url.clone()),
        "DUCKLING_DATA_DIR" => Some(std::env::temp_dir().display().to_string()),
        _ => None,
    })
    .expect("valid test config");

    config.audio.enabled = false;
    config.audio.readiness = RetryPolicy::fixed(20, Duration::from_millis(20));
    config
}

/// Behavior of the fake backend
#[derive(Default)]
pub struct BackendState {
    /// Frames sent back for every utterance received
    pub reply: Mutex<Vec<String>>,
    /// Close the socket right after replying
    pub close_after_reply: Mutex<bool>,
    /// Utterances received over the socket
    pub received: Mutex<Vec<String>>,
    /// Image returned by the image endpoint; `None` answers 500
    pub image: Mutex<Option<String>>,
    /// Bodies posted to the image endpoint
    pub image_requests: Mutex<Vec<serde_json::Value>>,
    /// Audio assets and when they become retrievable
    pub audio_ready_at: Mutex<HashMap<String, Instant>>,
    /// Audio probes and fetches received
    pub audio_hits: Mutex<Vec<String>>,
}

impl BackendState {
    pub fn set_reply(&self, frames: &[&str]) {
        *self.reply.lock().unwrap() = frames.iter().map(ToString::to_string).collect();
    }

    pub fn audio_ready_in(&self, name: &str, delay: Duration) {
        self.audio_ready_at
            .lock()
            .unwrap()
            .insert(name.to_string(), Instant::now() + delay);
    }
}

/// Fake chat backend on an ephemeral port
pub struct FakeBackend {
    pub addr: SocketAddr,
    pub state: Arc<BackendState>,
    task: JoinHandle<()>,
}

impl FakeBackend {
    pub async fn start() -> Self {
        let state = Arc::new(BackendState::default());

        let app = Router::new()
            .route("/api/chat/ws/chat", any(ws_handler))
            .route("/api/chat/generate_image", post(image_handler))
            .route("/audio/{name}", get(audio_handler))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, state, task }
    }

    pub fn http_url(&self) -> String {
        format!("http://{}", self.addr)
    }
}

impl Drop for FakeBackend {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// An address nothing is listening on
pub async fn dead_http_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<BackendState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: Arc<BackendState>) {
    while let Some(Ok(msg)) = socket.recv().await {
        let WsMessage::Text(text) = msg else {
            continue;
        };
        state.received.lock().unwrap().push(text.as_str().to_string());

        let frames = state.reply.lock().unwrap().clone();
        for frame in frames {
            if socket.send(WsMessage::Text(frame.into())).await.is_err() {
                return;
            }
        }

        if *state.close_after_reply.lock().unwrap() {
            let _ = socket.send(WsMessage::Close(None)).await;
            return;
        }
    }
}

async fn image_handler(
    State(state): State<Arc<BackendState>>,
    Json(body): Json<serde_json::Value>,
) -> impl IntoResponse {
    state.image_requests.lock().unwrap().push(body);

    match state.image.lock().unwrap().clone() {
        Some(url) => (StatusCode::OK, Json(serde_json::json!({ "images": [url] }))),
        None => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": "model overloaded" })),
        ),
    }
}

async fn audio_handler(Path(name): Path<String>, State(state): State<Arc<BackendState>>) -> StatusCode {
    state.audio_hits.lock().unwrap().push(name.clone());

    match state.audio_ready_at.lock().unwrap().get(&name) {
        Some(ready_at) if Instant::now() >= *ready_at => StatusCode::OK,
        _ => StatusCode::NOT_FOUND,
    }
}

/// Wait until the message list satisfies `predicate`
pub async fn wait_for_messages<F>(rx: &mut watch::Receiver<Vec<Message>>, predicate: F) -> Vec<Message>
where
    F: FnMut(&Vec<Message>) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(predicate))
        .await
        .expect("timed out waiting for messages")
        .expect("message channel closed")
        .clone()
}
