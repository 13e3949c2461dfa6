use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::{Value, json};
use tracing::info;

use super::{ImageGenerator, ImageRequest, logged, read_json};
use crate::cms::ImageSource;
use crate::error::ProviderError;
use crate::media::MediaStorage;

pub const DEFAULT_BASE_URL: &str = "https://api.stability.ai";

const PROVIDER: &str = "Stability";
const ENGINE: &str = "stable-diffusion-xl-1024-v1-0";

/// Text-to-image client. The API returns images inline, so results are
/// written to local media storage before being handed on.
pub struct StabilityClient {
    http: reqwest::Client,
    base_url: String,
    storage: MediaStorage,
}

impl StabilityClient {
    pub fn new(http: reqwest::Client, base_url: &str, storage: MediaStorage) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            storage,
        }
    }

    async fn text_to_image(&self, request: &ImageRequest<'_>) -> Result<Vec<ImageSource>, ProviderError> {
        let body = json!({
            "text_prompts": [{"text": request.prompt, "weight": 1}],
            "cfg_scale": 7,
            "steps": 30,
            "samples": request.count.max(1),
            "height": 1024,
            "width": 1024,
            "style_preset": "photographic",
        });

        let response = self
            .http
            .post(format!("{}/v1/generation/{ENGINE}/text-to-image", self.base_url))
            .bearer_auth(request.api_key)
            .header("Accept", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::transport(PROVIDER, e))?;
        let reply = read_json(PROVIDER, response).await?;

        let encoded = reply
            .pointer("/artifacts/0/base64")
            .and_then(Value::as_str)
            .ok_or_else(|| ProviderError::response(PROVIDER, "missing artifacts[0].base64"))?;
        let bytes = BASE64
            .decode(encoded)
            .map_err(|e| ProviderError::response(PROVIDER, format!("invalid image payload: {e}")))?;

        let (path, url) = self.storage.store("stability", "png", &bytes).await?;
        info!(path = %path.display(), "stability image saved");
        Ok(vec![ImageSource::Stored { path, url }])
    }
}

#[async_trait]
impl ImageGenerator for StabilityClient {
    async fn generate(&self, request: &ImageRequest<'_>) -> Result<Vec<ImageSource>, ProviderError> {
        self.text_to_image(request).await.map_err(logged)
    }
}
