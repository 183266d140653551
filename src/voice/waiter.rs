//! Audio asset waiter
//!
//! Audio synthesis on the backend finishes after the frame announcing the
//! fragment, so a fragment URL may 404 for a while. The waiter probes it on
//! a bounded schedule instead of fetching it blindly.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use crate::retry::RetryPolicy;
use crate::{Error, Result};

/// Bound on one probe unless configured otherwise
const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Cheap existence check for a remote asset
#[async_trait]
pub trait AssetProbe: Send + Sync {
    /// Whether the asset at `url` can be fetched now
    async fn is_ready(&self, url: &Url) -> bool;
}

/// Probes with `HEAD` requests; any 2xx means ready
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
}

impl Default for HttpProbe {
    fn default() -> Self {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_PROBE_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client }
    }
}

impl HttpProbe {
    /// Create a probe sharing an existing HTTP client
    #[must_use]
    pub const fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AssetProbe for HttpProbe {
    async fn is_ready(&self, url: &Url) -> bool {
        match self.client.head(url.clone()).send().await {
            Ok(response) => {
                tracing::trace!(url = %url, status = %response.status(), "asset probe");
                response.status().is_success()
            }
            Err(e) => {
                tracing::trace!(url = %url, error = %e, "asset probe failed");
                false
            }
        }
    }
}

/// Polls an [`AssetProbe`] until the asset is ready or the policy runs out
#[derive(Clone)]
pub struct AssetWaiter {
    probe: Arc<dyn AssetProbe>,
    policy: RetryPolicy,
    probe_timeout: Duration,
}

impl AssetWaiter {
    /// Create a waiter
    #[must_use]
    pub fn new(probe: Arc<dyn AssetProbe>, policy: RetryPolicy) -> Self {
        Self {
            probe,
            policy,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    /// Give up on a single probe after `timeout`; it then counts as not ready
    #[must_use]
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Wait until `url` is retrievable
    ///
    /// Returns the number of probes issued. Each failed probe is followed by
    /// the policy's delay, so a never-ready asset costs at most
    /// [`RetryPolicy::total_budget`] plus one probe timeout per attempt.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AssetTimeout`] once every attempt has failed
    pub async fn wait_until_ready(&self, url: &Url) -> Result<u32> {
        let attempts = self.policy.attempts();

        for attempt in 0..attempts {
            match tokio::time::timeout(self.probe_timeout, self.probe.is_ready(url)).await {
                Ok(true) => {
                    tracing::debug!(url = %url, attempts = attempt + 1, "audio asset ready");
                    return Ok(attempt + 1);
                }
                Ok(false) => {}
                Err(_) => {
                    tracing::debug!(url = %url, attempt = attempt + 1, "audio asset probe timed out");
                }
            }
            tokio::time::sleep(self.policy.delay_for_attempt(attempt)).await;
        }

        Err(Error::AssetTimeout {
            url: url.to_string(),
            attempts,
        })
    }
}
