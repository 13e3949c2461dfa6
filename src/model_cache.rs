use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use serde::Serialize;
use tracing::{debug, warn};

use crate::providers::openai;

/// A model advertised by an OpenAI-compatible `/models` endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteModel {
    pub id: String,
    pub name: String,
    pub description: String,
    pub cost_tier: u8,
}

/// Time-boxed cache of `/models` responses, keyed by endpoint base URL.
///
/// A failed fetch yields an empty list and is not cached, so an empty result
/// means "unknown" as often as "no models".
pub struct ModelCache {
    http: reqwest::Client,
    entries: Cache<String, Arc<Vec<RemoteModel>>>,
}

impl ModelCache {
    #[cfg(test)]
    pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

    pub fn new(http: reqwest::Client, ttl: Duration) -> Self {
        Self {
            http,
            entries: Cache::builder().max_capacity(64).time_to_live(ttl).build(),
        }
    }

    pub async fn get_models(&self, base_url: &str, api_key: &str, custom: bool) -> Arc<Vec<RemoteModel>> {
        let key = base_url.trim_end_matches('/').to_string();
        if let Some(models) = self.entries.get(&key).await {
            debug!(endpoint = %key, count = models.len(), "model list served from cache");
            return models;
        }

        match openai::fetch_models(&self.http, &key, api_key, custom).await {
            Ok(models) => {
                let models = Arc::new(models);
                self.entries.insert(key.clone(), models.clone()).await;
                debug!(endpoint = %key, count = models.len(), "model list cached");
                models
            }
            Err(e) => {
                warn!(endpoint = %key, error = %e, "failed to fetch model list");
                Arc::new(Vec::new())
            }
        }
    }

    /// Drop every cached list, e.g. after the custom endpoint changed.
    pub fn invalidate(&self) {
        self.entries.invalidate_all();
        debug!("model cache invalidated");
    }
}
