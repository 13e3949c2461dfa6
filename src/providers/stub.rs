//! Canned provider clients for workflow tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;

use super::{ImageGenerator, ImageRequest, TextGenerator, TextRequest};
use crate::cms::ImageSource;
use crate::error::ProviderError;
use crate::images::ImageService;
use crate::registry::Provider;

/// Replies with fixed lines (or a fixed HTTP status) and records prompts.
pub struct StubText {
    pub provider: Provider,
    pub reply: Result<Vec<String>, u16>,
    pub prompts: Mutex<Vec<String>>,
    /// When set, each call waits for a notification before replying.
    pub gate: Option<Arc<Notify>>,
}

impl StubText {
    pub fn replying(lines: &[&str]) -> Self {
        Self {
            provider: Provider::OpenAi,
            reply: Ok(lines.iter().map(|s| s.to_string()).collect()),
            prompts: Mutex::new(Vec::new()),
            gate: None,
        }
    }

    pub fn failing(status: u16) -> Self {
        Self {
            reply: Err(status),
            ..Self::replying(&[])
        }
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl TextGenerator for StubText {
    fn provider(&self) -> Provider {
        self.provider
    }

    async fn generate(&self, request: &TextRequest<'_>) -> Result<Vec<String>, ProviderError> {
        self.prompts.lock().unwrap().push(request.prompt.to_string());
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        self.reply.clone().map_err(|status| ProviderError::Status {
            provider: "stub",
            status,
            message: "stubbed failure".to_string(),
        })
    }
}

/// Returns fixed images; fails when there are none.
pub struct StubImages {
    pub service: ImageService,
    pub sources: Vec<ImageSource>,
    pub calls: AtomicUsize,
}

impl StubImages {
    /// Remote images at `urls`.
    pub fn new(service: ImageService, urls: &[&str]) -> Arc<Self> {
        let sources = urls
            .iter()
            .map(|url| ImageSource::Remote { url: url.to_string() })
            .collect();
        Self::with_sources(service, sources)
    }

    pub fn with_sources(service: ImageService, sources: Vec<ImageSource>) -> Arc<Self> {
        Arc::new(Self {
            service,
            sources,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageGenerator for StubImages {
    async fn generate(&self, _request: &ImageRequest<'_>) -> Result<Vec<ImageSource>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.sources.is_empty() {
            return Err(ProviderError::response("stub", format!("no {} images", self.service)));
        }
        Ok(self.sources.clone())
    }
}
