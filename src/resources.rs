//! Shared HTTP clients and cached tracker metadata.
//!
//! Both the collector and the summarizer go through this manager: one pooled
//! client per endpoint, created once and reused, plus a TTL cache for the
//! tracker's bucket ids so discovery does not run on every cycle.

use crate::config::Config;
use crate::error::EngineError;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Which external service a request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// The activity tracker (window/AFK event source).
    Tracker,
    /// The language-model endpoint.
    Model,
}

/// Discovered tracker bucket ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketIds {
    /// Window-watcher bucket (foreground app events).
    pub window: String,
    /// AFK-watcher bucket (idle status events).
    pub afk: String,
}

struct CachedBuckets {
    ids: BucketIds,
    fetched_at: DateTime<Utc>,
}

/// Wire shape of one bucket in the tracker's listing. Only the id matters;
/// ids encode the watcher type as a prefix.
#[derive(Debug, Deserialize)]
struct BucketInfo {
    id: String,
}

/// Pooled HTTP clients and cached service metadata.
pub struct ResourceManager {
    tracker_client: reqwest::Client,
    model_client: reqwest::Client,
    tracker_base: String,
    model_base: String,
    buckets: RwLock<Option<CachedBuckets>>,
    bucket_ttl: Duration,
}

impl ResourceManager {
    pub fn new(config: &Config) -> Self {
        // Both endpoints are local services; proxies only get in the way.
        let tracker_client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .pool_max_idle_per_host(2)
            .no_proxy()
            .build()
            .expect("Failed to create tracker HTTP client");

        let model_client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.full_timeout_secs + 5))
            .pool_max_idle_per_host(1)
            .no_proxy()
            .build()
            .expect("Failed to create model HTTP client");

        Self {
            tracker_client,
            model_client,
            tracker_base: config.tracker_url(),
            model_base: config.model_url(),
            buckets: RwLock::new(None),
            bucket_ttl: Duration::seconds(config.bucket_ttl_secs),
        }
    }

    /// The pooled client for an endpoint. Created once, shared by all calls.
    pub fn client(&self, endpoint: Endpoint) -> &reqwest::Client {
        match endpoint {
            Endpoint::Tracker => &self.tracker_client,
            Endpoint::Model => &self.model_client,
        }
    }

    /// Full tracker URL for an API path.
    pub fn tracker_url(&self, path: &str) -> String {
        format!("{}{}", self.tracker_base, path)
    }

    /// Full model-endpoint URL for an API path.
    pub fn model_url(&self, path: &str) -> String {
        format!("{}{}", self.model_base, path)
    }

    /// Discovered bucket ids, served from cache while the TTL holds.
    ///
    /// A cache miss triggers exactly one discovery call; discovery failure
    /// propagates as [`EngineError::Discovery`] so the caller can apply its
    /// own fallback policy.
    pub async fn buckets(&self) -> Result<BucketIds, EngineError> {
        {
            let cached = self.buckets.read().await;
            if let Some(entry) = cached.as_ref() {
                if Utc::now() - entry.fetched_at < self.bucket_ttl {
                    return Ok(entry.ids.clone());
                }
            }
        }

        let ids = self.discover_buckets().await?;
        let mut cached = self.buckets.write().await;
        *cached = Some(CachedBuckets {
            ids: ids.clone(),
            fetched_at: Utc::now(),
        });
        Ok(ids)
    }

    /// Drop the cached bucket ids so the next lookup re-discovers.
    pub async fn invalidate_buckets(&self) {
        let mut cached = self.buckets.write().await;
        *cached = None;
    }

    async fn discover_buckets(&self) -> Result<BucketIds, EngineError> {
        let url = self.tracker_url("/api/0/buckets/");
        let response = self
            .get_with_retry(Endpoint::Tracker, &url)
            .await
            .map_err(|e| EngineError::Discovery(format!("bucket listing: {e}")))?;

        if !response.status().is_success() {
            return Err(EngineError::Discovery(format!(
                "bucket listing returned {}",
                response.status()
            )));
        }

        let buckets: HashMap<String, BucketInfo> = response
            .json()
            .await
            .map_err(|e| EngineError::Discovery(format!("bucket listing parse: {e}")))?;

        let find = |prefix: &str| {
            buckets
                .values()
                .map(|b| b.id.as_str())
                .find(|id| id.starts_with(prefix))
                .map(|id| id.to_string())
        };

        let window = find("aw-watcher-window_")
            .ok_or_else(|| EngineError::Discovery("no window-watcher bucket found".into()))?;
        let afk = find("aw-watcher-afk_")
            .ok_or_else(|| EngineError::Discovery("no afk-watcher bucket found".into()))?;

        Ok(BucketIds { window, afk })
    }

    /// GET with one bounded retry for transient transport errors.
    ///
    /// Retries apply only to idempotent queries; the model call never goes
    /// through this path.
    pub async fn get_with_retry(
        &self,
        endpoint: Endpoint,
        url: &str,
    ) -> Result<reqwest::Response, reqwest::Error> {
        let client = self.client(endpoint);
        match client.get(url).send().await {
            Ok(response) => Ok(response),
            Err(first) if first.is_connect() || first.is_timeout() => {
                tokio::time::sleep(std::time::Duration::from_millis(250)).await;
                match client.get(url).send().await {
                    Ok(response) => Ok(response),
                    Err(_) => Err(first),
                }
            }
            Err(e) => Err(e),
        }
    }
}
