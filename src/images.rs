//! Featured-image service selection and fallback.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::cms::ImageSource;
use crate::credentials::{CredentialSet, Vendor};
use crate::providers::{ImageGenerator, ImageRequest};
use crate::registry::Provider;

/// Operator preference for the image service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImagePreference {
    #[default]
    Auto,
    #[serde(rename = "openai")]
    OpenAi,
    Stability,
}

impl ImagePreference {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" | "" => Some(ImagePreference::Auto),
            "openai" => Some(ImagePreference::OpenAi),
            "stability" => Some(ImagePreference::Stability),
            _ => None,
        }
    }

    fn service(self) -> Option<ImageService> {
        match self {
            ImagePreference::Auto => None,
            ImagePreference::OpenAi => Some(ImageService::OpenAi),
            ImagePreference::Stability => Some(ImageService::Stability),
        }
    }
}

impl fmt::Display for ImagePreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ImagePreference::Auto => "auto",
            ImagePreference::OpenAi => "openai",
            ImagePreference::Stability => "stability",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageService {
    OpenAi,
    Stability,
}

impl ImageService {
    pub fn vendor(self) -> Vendor {
        match self {
            ImageService::OpenAi => Vendor::OpenAi,
            ImageService::Stability => Vendor::Stability,
        }
    }

    /// Image service offered by the same vendor as a text provider.
    fn linked_to(provider: Provider) -> Option<Self> {
        match provider {
            Provider::OpenAi => Some(ImageService::OpenAi),
            Provider::Claude | Provider::Gemini => None,
        }
    }
}

impl fmt::Display for ImageService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.vendor(), f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSelection {
    pub service: ImageService,
    pub api_key: String,
}

/// Pick the image service for a run.
///
/// An explicit preference wins when its key is configured. Otherwise the
/// service linked to the text model's family is used, then Stability.
pub fn select_service(text_model: &str, preference: ImagePreference, credentials: &CredentialSet) -> Option<ImageSelection> {
    let usable = |service: ImageService| {
        credentials.has(service.vendor()).then(|| ImageSelection {
            service,
            api_key: credentials.key(service.vendor()).to_string(),
        })
    };

    if let Some(selection) = preference.service().and_then(usable) {
        return Some(selection);
    }

    if let Some(selection) = Provider::infer_from_model_id(text_model)
        .and_then(ImageService::linked_to)
        .and_then(usable)
    {
        return Some(selection);
    }

    usable(ImageService::Stability)
}

/// Services to try, in order: the selected one, then Stability as the
/// fallback when it is a different service with a configured key.
pub fn candidates(selection: &ImageSelection, credentials: &CredentialSet) -> Vec<ImageSelection> {
    let mut list = vec![selection.clone()];
    if selection.service != ImageService::Stability && credentials.has(Vendor::Stability) {
        list.push(ImageSelection {
            service: ImageService::Stability,
            api_key: credentials.key(Vendor::Stability).to_string(),
        });
    }
    list
}

/// Image clients keyed by service.
#[derive(Clone)]
pub struct ImageClients {
    openai: Arc<dyn ImageGenerator>,
    stability: Arc<dyn ImageGenerator>,
}

impl ImageClients {
    pub fn new(openai: Arc<dyn ImageGenerator>, stability: Arc<dyn ImageGenerator>) -> Self {
        Self { openai, stability }
    }

    pub fn get(&self, service: ImageService) -> &Arc<dyn ImageGenerator> {
        match service {
            ImageService::OpenAi => &self.openai,
            ImageService::Stability => &self.stability,
        }
    }
}

/// Parameters shared by every attempt of one run.
#[derive(Debug, Clone, Copy)]
pub struct ImageJob<'a> {
    pub prompt: &'a str,
    pub count: u32,
    pub size: &'a str,
    pub custom_endpoint: Option<&'a str>,
}

/// Generate images with the selected service, falling back once to
/// Stability. Returns `None` when every candidate failed.
pub async fn generate_with_fallback(
    clients: &ImageClients,
    selection: &ImageSelection,
    credentials: &CredentialSet,
    job: ImageJob<'_>,
) -> Option<Vec<ImageSource>> {
    for candidate in candidates(selection, credentials) {
        let request = ImageRequest {
            api_key: &candidate.api_key,
            prompt: job.prompt,
            count: job.count,
            size: job.size,
            // A custom endpoint only ever replaces the OpenAI API.
            custom_endpoint: match candidate.service {
                ImageService::OpenAi => job.custom_endpoint,
                ImageService::Stability => None,
            },
        };
        match clients.get(candidate.service).generate(&request).await {
            Ok(images) if !images.is_empty() => {
                info!(service = %candidate.service, count = images.len(), "featured image generated");
                return Some(images);
            }
            Ok(_) => warn!(service = %candidate.service, "image service returned no images"),
            Err(e) => warn!(service = %candidate.service, error = %e, "image generation failed"),
        }
    }
    None
}
