use async_trait::async_trait;
use serde_json::{Value, json};

use super::{TextGenerator, TextRequest, logged, read_json, split_lines};
use crate::error::ProviderError;
use crate::registry::Provider;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

const PROVIDER: &str = "Gemini";
const DEFAULT_MODEL: &str = "gemini-pro";

pub fn resolve_model(model_id: &str) -> String {
    match model_id.trim() {
        "gemini" => DEFAULT_MODEL.to_string(),
        id if id.starts_with("gemini-") => id.to_string(),
        _ => DEFAULT_MODEL.to_string(),
    }
}

pub struct GeminiClient {
    http: reqwest::Client,
    base_url: String,
}

impl GeminiClient {
    pub fn new(http: reqwest::Client, base_url: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Opens a fresh chat and sends the prompt as its only user turn.
    async fn send_chat(&self, request: &TextRequest<'_>) -> Result<Vec<String>, ProviderError> {
        let model = resolve_model(request.model_id);
        let body = json!({
            "contents": [{"role": "user", "parts": [{"text": request.prompt}]}],
            "generationConfig": {"maxOutputTokens": request.token_limit},
        });

        let response = self
            .http
            .post(format!("{}/models/{model}:generateContent", self.base_url))
            .header("x-goog-api-key", request.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::transport(PROVIDER, e))?;
        let reply = read_json(PROVIDER, response).await?;

        let parts = reply
            .pointer("/candidates/0/content/parts")
            .and_then(Value::as_array)
            .ok_or_else(|| ProviderError::response(PROVIDER, "missing candidates[0].content.parts"))?;
        let text: String = parts
            .iter()
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .collect();
        Ok(split_lines(&text))
    }
}

#[async_trait]
impl TextGenerator for GeminiClient {
    fn provider(&self) -> Provider {
        Provider::Gemini
    }

    async fn generate(&self, request: &TextRequest<'_>) -> Result<Vec<String>, ProviderError> {
        self.send_chat(request).await.map_err(logged)
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn request(model: &str) -> TextRequest<'_> {
        TextRequest {
            api_key: "gm-key",
            prompt: "Write about rain",
            token_limit: 64,
            model_id: model,
            custom_endpoint: None,
        }
    }

    #[test]
    fn model_resolution() {
        assert_eq!(resolve_model("gemini"), "gemini-pro");
        assert_eq!(resolve_model("gemini-1.5-flash"), "gemini-1.5-flash");
        assert_eq!(resolve_model("palm"), "gemini-pro");
    }

    #[tokio::test]
    async fn joins_candidate_parts_and_splits_lines() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-1.5-pro:generateContent"))
            .and(header("x-goog-api-key", "gm-key"))
            .and(body_partial_json(json!({
                "contents": [{"role": "user", "parts": [{"text": "Write about rain"}]}],
                "generationConfig": {"maxOutputTokens": 64}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{"content": {"role": "model", "parts": [
                    {"text": "<h1>Rain</h1>\nIt "},
                    {"text": "falls."}
                ]}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = GeminiClient::new(reqwest::Client::new(), &format!("{}/v1beta", server.uri()));
        let lines = client.generate(&request("gemini-1.5-pro")).await.unwrap();
        assert_eq!(lines, vec!["<h1>Rain</h1>", "It falls."]);
    }

    #[tokio::test]
    async fn blocked_prompt_without_candidates_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-pro:generateContent"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "promptFeedback": {"blockReason": "SAFETY"}
            })))
            .mount(&server)
            .await;

        let client = GeminiClient::new(reqwest::Client::new(), &format!("{}/v1beta", server.uri()));
        let err = client.generate(&request("gemini")).await.unwrap_err();
        assert!(matches!(err, ProviderError::Response { provider: "Gemini", .. }));
    }
}
