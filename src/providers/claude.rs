use async_trait::async_trait;
use serde_json::{Value, json};

use super::{TextGenerator, TextRequest, logged, read_json, split_lines};
use crate::error::ProviderError;
use crate::registry::Provider;

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";

const PROVIDER: &str = "Claude";
const API_VERSION: &str = "2023-06-01";
const DEFAULT_MODEL: &str = "claude-3-sonnet-20240229";

const MODEL_ALIASES: &[(&str, &str)] = &[
    ("claude-3-haiku", "claude-3-haiku-20240307"),
    ("claude-3-sonnet", "claude-3-sonnet-20240229"),
    ("claude-3-opus", "claude-3-opus-20240229"),
    ("claude-3-5-sonnet", "claude-3-5-sonnet-20240620"),
];

/// Short selector values map to dated model versions; other `claude-` ids
/// pass through and anything else falls back to the default model.
pub fn resolve_model(model_id: &str) -> String {
    let id = model_id.trim();
    if let Some((_, model)) = MODEL_ALIASES.iter().find(|(alias, _)| *alias == id) {
        return model.to_string();
    }
    if id.starts_with("claude-") {
        id.to_string()
    } else {
        DEFAULT_MODEL.to_string()
    }
}

pub struct ClaudeClient {
    http: reqwest::Client,
    base_url: String,
}

impl ClaudeClient {
    pub fn new(http: reqwest::Client, base_url: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn create_message(&self, request: &TextRequest<'_>) -> Result<Vec<String>, ProviderError> {
        let body = json!({
            "model": resolve_model(request.model_id),
            "max_tokens": request.token_limit,
            "messages": [{"role": "user", "content": request.prompt}],
        });

        let response = self
            .http
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", request.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::transport(PROVIDER, e))?;
        let reply = read_json(PROVIDER, response).await?;

        let text = reply
            .pointer("/content/0/text")
            .and_then(Value::as_str)
            .ok_or_else(|| ProviderError::response(PROVIDER, "missing content[0].text"))?;
        Ok(split_lines(text))
    }
}

#[async_trait]
impl TextGenerator for ClaudeClient {
    fn provider(&self) -> Provider {
        Provider::Claude
    }

    async fn generate(&self, request: &TextRequest<'_>) -> Result<Vec<String>, ProviderError> {
        self.create_message(request).await.map_err(logged)
    }
}
