//! HTTP clients for the text and image providers.
//!
//! Each client implements [`TextGenerator`] and/or [`ImageGenerator`]; the
//! orchestrator picks implementations out of [`TextClients`] and
//! [`crate::images::ImageClients`] instead of switching on provider names.

pub mod claude;
pub mod gemini;
pub mod openai;
pub mod stability;
#[cfg(test)]
pub mod stub;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use crate::cms::ImageSource;
use crate::error::ProviderError;
use crate::registry::Provider;

/// One text-generation call.
#[derive(Debug, Clone)]
pub struct TextRequest<'a> {
    pub api_key: &'a str,
    pub prompt: &'a str,
    pub token_limit: u32,
    pub model_id: &'a str,
    /// OpenAI-compatible endpoint replacing the official one, if configured.
    pub custom_endpoint: Option<&'a str>,
}

/// One image-generation call.
#[derive(Debug, Clone)]
pub struct ImageRequest<'a> {
    pub api_key: &'a str,
    pub prompt: &'a str,
    pub count: u32,
    pub size: &'a str,
    pub custom_endpoint: Option<&'a str>,
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    fn provider(&self) -> Provider;

    /// Returns the generated text split into lines.
    async fn generate(&self, request: &TextRequest<'_>) -> Result<Vec<String>, ProviderError>;
}

#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate(&self, request: &ImageRequest<'_>) -> Result<Vec<ImageSource>, ProviderError>;
}

/// Text clients keyed by provider.
#[derive(Clone, Default)]
pub struct TextClients {
    clients: HashMap<Provider, Arc<dyn TextGenerator>>,
}

impl TextClients {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, client: Arc<dyn TextGenerator>) -> Self {
        self.clients.insert(client.provider(), client);
        self
    }

    pub fn get(&self, provider: Provider) -> Option<&Arc<dyn TextGenerator>> {
        self.clients.get(&provider)
    }
}

pub fn http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("autoinsight/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_else(|e| {
            warn!(error = %e, "failed to build configured HTTP client, using defaults");
            reqwest::Client::new()
        })
}

/// Split provider output at every line break, keeping empty lines.
pub fn split_lines(text: &str) -> Vec<String> {
    text.split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line).to_string())
        .collect()
}

/// Read a provider response as JSON, turning non-2xx replies into
/// [`ProviderError::Status`] with a condensed message.
pub(crate) async fn read_json(provider: &'static str, response: reqwest::Response) -> Result<Value, ProviderError> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| ProviderError::transport(provider, e))?;

    if !status.is_success() {
        let message = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| {
                v.pointer("/error/message")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .unwrap_or_else(|| truncate(&body, 300));
        return Err(ProviderError::Status {
            provider,
            status: status.as_u16(),
            message,
        });
    }

    serde_json::from_str(&body)
        .map_err(|e| ProviderError::response(provider, format!("invalid JSON ({e}): {}", truncate(&body, 300))))
}

/// Log a provider failure before handing it back to the caller.
pub(crate) fn logged(error: ProviderError) -> ProviderError {
    warn!(error = %error, "provider call failed");
    error
}

pub(crate) fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    text.chars().take(max_chars).collect::<String>() + "…"
}
