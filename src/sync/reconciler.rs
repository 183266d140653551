//! Sync reconciler
//!
//! Drains unsynced local rows to the remote store. A row is marked synced only
//! after its own remote write succeeded; anything that fails stays unsynced
//! and is picked up again on the next tick.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::remote::{RemoteStore, RestRemoteStore};
use crate::Result;
use crate::config::SyncConfig;
use crate::db::{AnalyzedChatRepo, DbPool, InteractionRepo};
use crate::retry::RetryPolicy;

/// Outcome of one reconciler tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Interactions accepted by the remote store and marked synced
    pub interactions_synced: usize,
    /// Analyzed chats accepted by the remote store and marked synced
    pub chats_synced: usize,
    /// Rows left unsynced for the next tick
    pub failed: usize,
}

impl SyncReport {
    /// Rows marked synced in this tick
    #[must_use]
    pub const fn synced(&self) -> usize {
        self.interactions_synced + self.chats_synced
    }

    /// Whether the tick touched nothing
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.synced() == 0 && self.failed == 0
    }
}

/// Moves unsynced local records to a [`RemoteStore`]
#[derive(Clone)]
pub struct Reconciler {
    interactions: InteractionRepo,
    chats: AnalyzedChatRepo,
    store: Arc<dyn RemoteStore>,
    user_id: String,
    write_policy: RetryPolicy,
}

impl Reconciler {
    /// Create a reconciler writing rows for `user_id`
    #[must_use]
    pub fn new(pool: DbPool, store: Arc<dyn RemoteStore>, user_id: impl Into<String>) -> Self {
        Self {
            interactions: InteractionRepo::new(pool.clone()),
            chats: AnalyzedChatRepo::new(pool),
            store,
            user_id: user_id.into(),
            write_policy: RetryPolicy::once(),
        }
    }

    /// Build a REST-backed reconciler from configuration
    ///
    /// Returns `None` when no remote URL or user id is configured.
    #[must_use]
    pub fn from_config(pool: DbPool, config: &SyncConfig) -> Option<Self> {
        let (Some(url), Some(user_id)) = (&config.remote_url, &config.user_id) else {
            return None;
        };

        let mut store = RestRemoteStore::new(url.clone());
        if let Some(key) = &config.api_key {
            store = store.with_api_key(key.clone());
        }

        Some(Self::new(pool, Arc::new(store), user_id.clone()).with_write_policy(config.write_policy))
    }

    /// Retry each remote write according to `policy` within a tick
    #[must_use]
    pub fn with_write_policy(mut self, policy: RetryPolicy) -> Self {
        self.write_policy = policy;
        self
    }

    /// Run one reconciliation pass
    ///
    /// Remote failures are logged and counted in [`SyncReport::failed`].
    ///
    /// # Errors
    ///
    /// Returns error only if the local store cannot be read
    pub async fn tick(&self) -> Result<SyncReport> {
        let mut report = SyncReport::default();

        for record in self.interactions.unsynced()? {
            let written = self
                .write_policy
                .retry(|_| self.store.upsert_interaction(&self.user_id, &record))
                .await;

            match written {
                Ok(()) => match self.interactions.mark_synced(record.id) {
                    Ok(_) => report.interactions_synced += 1,
                    Err(e) => {
                        tracing::warn!(id = record.id, error = %e, "failed to mark interaction synced");
                        report.failed += 1;
                    }
                },
                Err(e) => {
                    tracing::warn!(id = record.id, error = %e, "failed to sync interaction");
                    report.failed += 1;
                }
            }
        }

        for record in self.chats.unsynced()? {
            let written = self
                .write_policy
                .retry(|_| self.store.upsert_analyzed_chat(&self.user_id, &record))
                .await;

            match written {
                Ok(()) => match self.chats.mark_synced(record.id) {
                    Ok(_) => report.chats_synced += 1,
                    Err(e) => {
                        tracing::warn!(id = record.id, error = %e, "failed to mark analyzed chat synced");
                        report.failed += 1;
                    }
                },
                Err(e) => {
                    tracing::warn!(id = record.id, error = %e, "failed to sync analyzed chat");
                    report.failed += 1;
                }
            }
        }

        if report.is_empty() {
            tracing::debug!("nothing to sync");
        } else {
            tracing::info!(
                interactions = report.interactions_synced,
                chats = report.chats_synced,
                failed = report.failed,
                "sync tick complete"
            );
        }

        Ok(report)
    }

    /// Tick once now and then every `interval` until the handle is shut down
    ///
    /// A zero `interval` is raised to one millisecond.
    #[must_use]
    pub fn spawn(self, interval: Duration) -> ReconcilerHandle {
        let interval = interval.max(Duration::from_millis(1));
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        tracing::info!(interval_secs = interval.as_secs(), "sync reconciler started");

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.tick().await {
                            tracing::warn!(error = %e, "sync tick failed");
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        tracing::debug!("sync reconciler stopped");
                        return;
                    }
                }
            }
        });

        ReconcilerHandle {
            shutdown: Some(shutdown_tx),
            task: Some(task),
        }
    }
}

/// Running reconciler timer
pub struct ReconcilerHandle {
    shutdown: Option<mpsc::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl ReconcilerHandle {
    /// Stop scheduling ticks; an in-progress tick runs to completion
    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            // Full channel means a stop is already pending
            let _ = tx.try_send(());
        }
    }

    /// Stop and wait for the timer task to exit
    pub async fn shutdown(mut self) {
        self.stop();
        if let Some(task) = self.task.take()
            && let Err(e) = task.await
        {
            tracing::debug!(error = %e, "sync reconciler task ended abnormally");
        }
    }
}

impl Drop for ReconcilerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
