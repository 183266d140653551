//! Remote store seam and its REST implementation

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use url::Url;

use crate::db::{AnalyzedChatRecord, LocalInteractionRecord};
use crate::{Error, Result};

/// Remote table receiving interactions
pub const INTERACTIONS_TABLE: &str = "ai_interactions";

/// Remote table receiving analyzed chats
pub const ANALYZED_CHATS_TABLE: &str = "analyzed_chats";

/// Columns the remote side deduplicates on
const CONFLICT_TARGET: &str = "user_id,local_key";

/// Bound on one remote write
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Destination of reconciled records
///
/// Writes must be idempotent on the record's `sync_key`: a record may be sent
/// again when a previous success was not observed locally.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Upsert one interaction for `user_id`
    async fn upsert_interaction(&self, user_id: &str, record: &LocalInteractionRecord) -> Result<()>;

    /// Upsert one analyzed chat for `user_id`
    async fn upsert_analyzed_chat(&self, user_id: &str, record: &AnalyzedChatRecord) -> Result<()>;
}

/// Row shape of the remote `ai_interactions` table
#[derive(Debug, Serialize)]
struct InteractionRow<'a> {
    user_id: &'a str,
    local_key: &'a str,
    message: &'a str,
    response: Option<&'a str>,
    time: String,
    chat_type: Option<&'a str>,
    tags: Option<&'a str>,
}

impl<'a> InteractionRow<'a> {
    fn new(user_id: &'a str, record: &'a LocalInteractionRecord) -> Self {
        Self {
            user_id,
            local_key: &record.sync_key,
            message: &record.message,
            response: record.response.as_deref(),
            time: record.timestamp.to_rfc3339(),
            chat_type: record.chat_type.as_deref(),
            tags: record.tags.as_deref(),
        }
    }
}

/// Row shape of the remote `analyzed_chats` table
#[derive(Debug, Serialize)]
struct AnalyzedChatRow<'a> {
    user_id: &'a str,
    local_key: &'a str,
    title: Option<&'a str>,
    summary: Option<&'a str>,
    created_at: String,
}

impl<'a> AnalyzedChatRow<'a> {
    fn new(user_id: &'a str, record: &'a AnalyzedChatRecord) -> Self {
        Self {
            user_id,
            local_key: &record.sync_key,
            title: record.title.as_deref(),
            summary: record.summary.as_deref(),
            created_at: record.created_at.to_rfc3339(),
        }
    }
}

/// PostgREST-style client (`{base}/rest/v1/{table}`)
#[derive(Clone)]
pub struct RestRemoteStore {
    base_url: Url,
    api_key: Option<SecretString>,
    client: reqwest::Client,
}

impl RestRemoteStore {
    /// Create a client for the REST service at `base_url`
    #[must_use]
    pub fn new(base_url: Url) -> Self {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            base_url,
            api_key: None,
            client,
        }
    }

    /// Send requests through `client` instead of the default one
    #[must_use]
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    /// Authenticate requests with `api_key`
    #[must_use]
    pub fn with_api_key(mut self, api_key: SecretString) -> Self {
        self.api_key = Some(api_key);
        self
    }

    /// Upsert endpoint for `table`
    ///
    /// # Errors
    ///
    /// Returns error if the base URL cannot be extended
    pub fn table_url(&self, table: &str) -> Result<Url> {
        let mut url = Url::parse(&format!(
            "{}/rest/v1/{table}",
            self.base_url.as_str().trim_end_matches('/')
        ))?;
        url.query_pairs_mut().append_pair("on_conflict", CONFLICT_TARGET);
        Ok(url)
    }

    async fn upsert<T: Serialize + Sync>(&self, table: &str, row: &T) -> Result<()> {
        let mut request = self
            .client
            .post(self.table_url(table)?)
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(row);

        if let Some(key) = &self.api_key {
            request = request
                .header("apikey", key.expose_secret())
                .bearer_auth(key.expose_secret());
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Sync(format!("{table} upsert returned {status}: {body}")));
        }

        Ok(())
    }
}

#[async_trait]
impl RemoteStore for RestRemoteStore {
    async fn upsert_interaction(&self, user_id: &str, record: &LocalInteractionRecord) -> Result<()> {
        self.upsert(INTERACTIONS_TABLE, &InteractionRow::new(user_id, record))
            .await
    }

    async fn upsert_analyzed_chat(&self, user_id: &str, record: &AnalyzedChatRecord) -> Result<()> {
        self.upsert(ANALYZED_CHATS_TABLE, &AnalyzedChatRow::new(user_id, record))
            .await
    }
}
