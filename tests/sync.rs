//! Reconciler integration tests against a fake REST store

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use secrecy::SecretString;
use tokio::net::TcpListener;
use url::Url;

use duckling_chat::db::{AnalyzedChatRepo, InteractionRepo, NewInteraction};
use duckling_chat::sync::{Reconciler, RestRemoteStore};
use duckling_chat::RetryPolicy;

mod common;
use common::setup_test_db;

/// One upsert as seen by the remote side
#[derive(Debug, Clone)]
struct Upsert {
    table: String,
    query: HashMap<String, String>,
    headers: HeaderMap,
    body: serde_json::Value,
}

#[derive(Default)]
struct RemoteState {
    upserts: Mutex<Vec<Upsert>>,
    /// Remote rows keyed by (table, user_id, local_key)
    rows: Mutex<HashMap<(String, String, String), serde_json::Value>>,
    /// Messages the remote rejects
    reject: Mutex<Vec<String>>,
}

async fn upsert_handler(
    Path(table): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    State(state): State<Arc<RemoteState>>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> StatusCode {
    state.upserts.lock().unwrap().push(Upsert {
        table: table.clone(),
        query,
        headers,
        body: body.clone(),
    });

    let message = body["message"].as_str().unwrap_or_default().to_string();
    if state.reject.lock().unwrap().contains(&message) {
        return StatusCode::SERVICE_UNAVAILABLE;
    }

    let key = (
        table,
        body["user_id"].as_str().unwrap_or_default().to_string(),
        body["local_key"].as_str().unwrap_or_default().to_string(),
    );
    state.rows.lock().unwrap().insert(key, body);
    StatusCode::CREATED
}

async fn start_remote() -> (Url, Arc<RemoteState>) {
    let state = Arc::new(RemoteState::default());
    let app = Router::new()
        .route("/rest/v1/{table}", post(upsert_handler))
        .with_state(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (Url::parse(&format!("http://{addr}")).unwrap(), state)
}

fn reconciler(pool: duckling_chat::DbPool, url: Url) -> Reconciler {
    let store = RestRemoteStore::new(url).with_api_key(SecretString::from("test-key".to_string()));
    Reconciler::new(pool, Arc::new(store), "user-42")
}

#[tokio::test]
async fn ten_records_sync_once() {
    let (url, remote) = start_remote().await;
    let pool = setup_test_db();
    let repo = InteractionRepo::new(pool.clone());
    for i in 0..10 {
        repo.insert(&NewInteraction::chat(format!("q{i}"), format!("a{i}")))
            .unwrap();
    }

    let reconciler = reconciler(pool, url);

    let first = reconciler.tick().await.unwrap();
    assert_eq!(first.interactions_synced, 10);
    assert_eq!(first.failed, 0);
    assert_eq!(repo.count_unsynced().unwrap(), 0);
    assert_eq!(remote.upserts.lock().unwrap().len(), 10);

    let second = reconciler.tick().await.unwrap();
    assert!(second.is_empty());
    assert_eq!(remote.upserts.lock().unwrap().len(), 10);
}

#[tokio::test]
async fn upserts_carry_idempotency_key_and_auth() {
    let (url, remote) = start_remote().await;
    let pool = setup_test_db();
    let record = InteractionRepo::new(pool.clone())
        .insert(&NewInteraction::chat("hello", "hi!").with_tags("greeting"))
        .unwrap();

    reconciler(pool, url).tick().await.unwrap();

    let upserts = remote.upserts.lock().unwrap();
    let upsert = &upserts[0];
    assert_eq!(upsert.table, "ai_interactions");
    assert_eq!(upsert.query.get("on_conflict").map(String::as_str), Some("user_id,local_key"));
    assert_eq!(upsert.headers["apikey"], "test-key");
    assert_eq!(upsert.headers["authorization"], "Bearer test-key");
    assert!(
        upsert.headers["prefer"]
            .to_str()
            .unwrap()
            .contains("resolution=merge-duplicates")
    );

    assert_eq!(upsert.body["user_id"], "user-42");
    assert_eq!(upsert.body["local_key"], record.sync_key.as_str());
    assert_eq!(upsert.body["message"], "hello");
    assert_eq!(upsert.body["response"], "hi!");
    assert_eq!(upsert.body["chat_type"], "chat");
    assert_eq!(upsert.body["tags"], "greeting");
    assert!(upsert.body["time"].is_string());
}

#[tokio::test]
async fn rejected_rows_retry_on_next_tick_without_duplicates() {
    let (url, remote) = start_remote().await;
    let pool = setup_test_db();
    let repo = InteractionRepo::new(pool.clone());
    for message in ["a", "b", "c"] {
        repo.insert(&NewInteraction::chat(message, "ok")).unwrap();
    }
    remote.reject.lock().unwrap().push("b".to_string());

    let reconciler = reconciler(pool, url);

    let first = reconciler.tick().await.unwrap();
    assert_eq!(first.interactions_synced, 2);
    assert_eq!(first.failed, 1);
    assert_eq!(repo.unsynced().unwrap()[0].message, "b");

    remote.reject.lock().unwrap().clear();
    let second = reconciler.tick().await.unwrap();
    assert_eq!(second.interactions_synced, 1);
    assert_eq!(repo.count_unsynced().unwrap(), 0);

    // Four writes for three rows, collapsed to three remote rows
    assert_eq!(remote.upserts.lock().unwrap().len(), 4);
    assert_eq!(remote.rows.lock().unwrap().len(), 3);
}

#[tokio::test]
async fn write_policy_retries_transient_failures() {
    let (url, remote) = start_remote().await;
    let pool = setup_test_db();
    let repo = InteractionRepo::new(pool.clone());
    repo.insert(&NewInteraction::chat("flaky", "ok")).unwrap();
    remote.reject.lock().unwrap().push("flaky".to_string());

    let unblock = remote.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        unblock.reject.lock().unwrap().clear();
    });

    let report = reconciler(pool, url)
        .with_write_policy(RetryPolicy::fixed(20, Duration::from_millis(25)))
        .tick()
        .await
        .unwrap();

    assert_eq!(report.interactions_synced, 1);
    assert!(remote.upserts.lock().unwrap().len() > 1);
}

#[tokio::test]
async fn analyzed_chats_go_to_their_own_table() {
    let (url, remote) = start_remote().await;
    let pool = setup_test_db();
    AnalyzedChatRepo::new(pool.clone())
        .insert("Trip", "Planned a trip to the coast")
        .unwrap();

    let report = reconciler(pool, url).tick().await.unwrap();
    assert_eq!(report.chats_synced, 1);

    let upserts = remote.upserts.lock().unwrap();
    assert_eq!(upserts[0].table, "analyzed_chats");
    assert_eq!(upserts[0].body["title"], "Trip");
    assert_eq!(upserts[0].body["summary"], "Planned a trip to the coast");
    assert!(upserts[0].body["created_at"].is_string());
}

#[tokio::test]
async fn unreachable_remote_leaves_rows_unsynced() {
    let pool = setup_test_db();
    let repo = InteractionRepo::new(pool.clone());
    repo.insert(&NewInteraction::chat("offline", "still saved")).unwrap();

    let dead = Url::parse(&common::dead_http_url().await).unwrap();
    let report = reconciler(pool, dead).tick().await.unwrap();

    assert_eq!(report.failed, 1);
    assert_eq!(repo.count_unsynced().unwrap(), 1);
}
