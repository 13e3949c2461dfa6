use std::sync::Arc;

use async_trait::async_trait;
use reqwest::RequestBuilder;
use serde_json::{Value, json};
use tracing::{debug, info};

use super::{ImageGenerator, ImageRequest, TextGenerator, TextRequest, logged, read_json, split_lines};
use crate::cms::ImageSource;
use crate::error::ProviderError;
use crate::model_cache::{ModelCache, RemoteModel};
use crate::registry::Provider;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

const PROVIDER: &str = "OpenAI";
const DEFAULT_MODEL: &str = "gpt-3.5-turbo";
const IMAGE_MODEL: &str = "dall-e-3";

/// Selector values that differ from the model string the API expects.
const MODEL_ALIASES: &[(&str, &str)] = &[("openai", "gpt-3.5-turbo"), ("gpt-4", "gpt-4-turbo-preview")];

pub fn resolve_model(model_id: &str) -> String {
    let id = model_id.trim();
    if id.is_empty() {
        return DEFAULT_MODEL.to_string();
    }
    MODEL_ALIASES
        .iter()
        .find(|(alias, _)| *alias == id)
        .map(|(_, model)| model.to_string())
        .unwrap_or_else(|| id.to_string())
}

/// Official endpoints take a bearer token; custom compatible endpoints
/// take the key in `X-API-Key`.
fn with_auth(builder: RequestBuilder, api_key: &str, custom: bool) -> RequestBuilder {
    if custom {
        builder.header("X-API-Key", api_key)
    } else {
        builder.bearer_auth(api_key)
    }
}

/// List the models an OpenAI-compatible endpoint advertises.
pub async fn fetch_models(
    http: &reqwest::Client,
    base_url: &str,
    api_key: &str,
    custom: bool,
) -> Result<Vec<RemoteModel>, ProviderError> {
    let url = format!("{}/models", base_url.trim_end_matches('/'));
    debug!(url = %url, "listing models");
    let response = with_auth(http.get(&url), api_key, custom)
        .send()
        .await
        .map_err(|e| ProviderError::transport(PROVIDER, e))?;
    let body = read_json(PROVIDER, response).await?;

    let data = body
        .get("data")
        .and_then(Value::as_array)
        .filter(|data| !data.is_empty())
        .ok_or_else(|| ProviderError::response(PROVIDER, "no models found in response"))?;

    Ok(data
        .iter()
        .filter_map(|model| {
            let id = model.get("id").and_then(Value::as_str)?;
            Some(RemoteModel {
                id: id.to_string(),
                name: id.to_string(),
                description: model
                    .get("description")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                cost_tier: 1,
            })
        })
        .collect())
}

/// Client for the official OpenAI API or any compatible endpoint.
pub struct OpenAiClient {
    http: reqwest::Client,
    base_url: String,
    models: Arc<ModelCache>,
}

impl OpenAiClient {
    pub fn new(http: reqwest::Client, base_url: &str, models: Arc<ModelCache>) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            models,
        }
    }

    /// Base URL and whether it is a custom endpoint.
    fn endpoint<'a>(&'a self, custom_endpoint: Option<&'a str>) -> (&'a str, bool) {
        match custom_endpoint.map(|e| e.trim().trim_end_matches('/')) {
            Some(custom) if !custom.is_empty() => (custom, true),
            _ => (self.base_url.as_str(), false),
        }
    }

    async fn post(&self, base: &str, custom: bool, api_key: &str, path: &str, body: &Value) -> Result<Value, ProviderError> {
        let url = format!("{base}/{path}");
        let response = with_auth(self.http.post(&url), api_key, custom)
            .json(body)
            .send()
            .await
            .map_err(|e| ProviderError::transport(PROVIDER, e))?;
        read_json(PROVIDER, response).await
    }

    async fn chat_completion(&self, request: &TextRequest<'_>) -> Result<Vec<String>, ProviderError> {
        let (base, custom) = self.endpoint(request.custom_endpoint);
        let model = resolve_model(request.model_id);

        if custom {
            let available = self.models.get_models(base, request.api_key, true).await;
            let found = available.iter().any(|m| m.id == model);
            info!(model = %model, endpoint = %base, available = found, "verified model availability");
            if !found {
                return Err(ProviderError::ModelUnavailable { model });
            }
        }

        let body = json!({
            "model": model,
            "messages": [{"role": "user", "content": request.prompt}],
            "max_tokens": request.token_limit,
            "temperature": 0.8,
            "top_p": 1,
            "frequency_penalty": 0,
            "presence_penalty": 0,
        });
        let response = self
            .post(base, custom, request.api_key, "chat/completions", &body)
            .await?;

        let content = response
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .ok_or_else(|| ProviderError::response(PROVIDER, "missing choices[0].message.content"))?;
        Ok(split_lines(content))
    }

    async fn create_images(&self, request: &ImageRequest<'_>) -> Result<Vec<ImageSource>, ProviderError> {
        let (base, custom) = self.endpoint(request.custom_endpoint);
        let body = json!({
            "model": IMAGE_MODEL,
            "prompt": request.prompt,
            "n": request.count.max(1),
            "size": request.size,
            "quality": "standard",
            "response_format": "url",
        });
        let response = self
            .post(base, custom, request.api_key, "images/generations", &body)
            .await?;

        let urls: Vec<ImageSource> = response
            .get("data")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item.get("url").and_then(Value::as_str))
                    .map(|url| ImageSource::Remote { url: url.to_string() })
                    .collect()
            })
            .unwrap_or_default();

        if urls.is_empty() {
            return Err(ProviderError::response(PROVIDER, "missing data[].url in image response"));
        }
        Ok(urls)
    }
}

#[async_trait]
impl TextGenerator for OpenAiClient {
    fn provider(&self) -> Provider {
        Provider::OpenAi
    }

    async fn generate(&self, request: &TextRequest<'_>) -> Result<Vec<String>, ProviderError> {
        self.chat_completion(request).await.map_err(logged)
    }
}

#[async_trait]
impl ImageGenerator for OpenAiClient {
    async fn generate(&self, request: &ImageRequest<'_>) -> Result<Vec<ImageSource>, ProviderError> {
        self.create_images(request).await.map_err(logged)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn client(base: &str) -> OpenAiClient {
        let cache = Arc::new(ModelCache::new(reqwest::Client::new(), Duration::from_secs(60)));
        OpenAiClient::new(reqwest::Client::new(), base, cache)
    }

    fn text_request<'a>(model: &'a str, custom: Option<&'a str>) -> TextRequest<'a> {
        TextRequest {
            api_key: "sk-test",
            prompt: "Write about bees",
            token_limit: 150,
            model_id: model,
            custom_endpoint: custom,
        }
    }

    fn chat_reply(content: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"index": 0, "message": {"role": "assistant", "content": content}}]
        }))
    }

    #[test]
    fn aliases_map_selector_values() {
        assert_eq!(resolve_model("openai"), "gpt-3.5-turbo");
        assert_eq!(resolve_model("gpt-4"), "gpt-4-turbo-preview");
        assert_eq!(resolve_model("gpt-4o"), "gpt-4o");
        assert_eq!(resolve_model(""), "gpt-3.5-turbo");
    }

    #[tokio::test]
    async fn official_endpoint_uses_bearer_auth_and_splits_lines() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("Authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({
                "model": "gpt-4-turbo-preview",
                "max_tokens": 150,
                "messages": [{"role": "user", "content": "Write about bees"}]
            })))
            .respond_with(chat_reply("<h1>Bees</h1>\nThey buzz.\n\nA lot."))
            .expect(1)
            .mount(&server)
            .await;

        let client = client(&format!("{}/v1", server.uri()));
        let lines = TextGenerator::generate(&client, &text_request("gpt-4", None)).await.unwrap();
        assert_eq!(lines, vec!["<h1>Bees</h1>", "They buzz.", "", "A lot."]);
    }

    #[tokio::test]
    async fn custom_endpoint_uses_api_key_header_after_verifying_model() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/models"))
            .and(header("X-API-Key", "sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": [{"id": "gpt-3.5-turbo"}]})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v1/chat/completions"))
            .and(header("X-API-Key", "sk-test"))
            .respond_with(chat_reply("<h1>Hi</h1>"))
            .expect(1)
            .mount(&server)
            .await;

        let custom = format!("{}/api/v1/", server.uri());
        let client = client("https://api.openai.invalid/v1");
        let lines = TextGenerator::generate(&client, &text_request("openai", Some(&custom)))
            .await
            .unwrap();
        assert_eq!(lines, vec!["<h1>Hi</h1>"]);
    }

    #[tokio::test]
    async fn custom_endpoint_without_model_fails_fast() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/models"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": [{"id": "llama-3"}]})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(chat_reply("never"))
            .expect(0)
            .mount(&server)
            .await;

        let custom = format!("{}/v1", server.uri());
        let client = client("https://api.openai.invalid/v1");
        let err = TextGenerator::generate(&client, &text_request("gpt-4o", Some(&custom)))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::ModelUnavailable { ref model } if model == "gpt-4o"));
    }

    #[tokio::test]
    async fn non_2xx_surfaces_api_error_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({"error": {"message": "Incorrect API key"}})))
            .mount(&server)
            .await;

        let client = client(&format!("{}/v1", server.uri()));
        let err = TextGenerator::generate(&client, &text_request("openai", None))
            .await
            .unwrap_err();
        match err {
            ProviderError::Status { status, message, .. } => {
                assert_eq!(status, 401);
                assert_eq!(message, "Incorrect API key");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn malformed_reply_is_a_response_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
            .mount(&server)
            .await;

        let client = client(&format!("{}/v1", server.uri()));
        let err = TextGenerator::generate(&client, &text_request("openai", None))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Response { .. }));
    }

    #[tokio::test]
    async fn image_generation_returns_urls() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/images/generations"))
            .and(body_partial_json(json!({
                "model": "dall-e-3",
                "n": 1,
                "size": "1792x1024",
                "response_format": "url"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"url": "https://img.example/a.png"}, {"revised_prompt": "no url"}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client(&format!("{}/v1", server.uri()));
        let request = ImageRequest {
            api_key: "sk-test",
            prompt: "bees",
            count: 1,
            size: "1792x1024",
            custom_endpoint: None,
        };
        let images = ImageGenerator::generate(&client, &request).await.unwrap();
        assert_eq!(
            images,
            vec![ImageSource::Remote {
                url: "https://img.example/a.png".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_a_transport_error() {
        let client = client("http://127.0.0.1:1/v1");
        let err = TextGenerator::generate(&client, &text_request("gpt-4", None)).await.unwrap_err();
        assert!(matches!(err, ProviderError::Transport { provider: "OpenAI", .. }));
    }
}
