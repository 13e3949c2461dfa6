//! Operator-controlled generation settings, stored as one JSON option.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;
use url::Url;

use crate::cms::Cms;
use crate::error::{EndpointError, SettingsError};
use crate::images::ImagePreference;
use crate::prompt::Tone;
use crate::schedule::Cadence;

/// Option key holding the serialized [`GenerationConfig`].
pub const CONFIG_OPTION: &str = "generation_config";

pub const MAX_TOKEN_LIMIT: u32 = 4096;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub keywords: Vec<String>,
    pub tone: Tone,
    pub custom_tone: String,
    pub category_ids: Vec<i64>,
    pub text_model: String,
    pub images_enabled: bool,
    pub image_service: ImagePreference,
    pub token_limit: u32,
    pub cadence: Cadence,
    pub email_notifications: bool,
    pub custom_endpoint: Option<String>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            keywords: Vec::new(),
            tone: Tone::Default,
            custom_tone: String::new(),
            category_ids: Vec::new(),
            text_model: "gpt-3.5-turbo".to_string(),
            images_enabled: true,
            image_service: ImagePreference::Auto,
            token_limit: 200,
            cadence: Cadence::None,
            email_notifications: false,
            custom_endpoint: None,
        }
    }
}

/// What a save changed that other components react to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfigChanges {
    pub cadence_changed: bool,
    pub endpoint_changed: bool,
}

impl GenerationConfig {
    /// Validate and canonicalize: trimmed non-empty keywords, sorted unique
    /// category ids, bounded token limit and a checked custom endpoint.
    pub fn normalized(mut self) -> Result<Self, SettingsError> {
        self.keywords = self
            .keywords
            .iter()
            .map(|k| k.trim())
            .filter(|k| !k.is_empty())
            .map(str::to_string)
            .collect();
        self.category_ids.sort_unstable();
        self.category_ids.dedup();
        self.custom_tone = self.custom_tone.trim().to_string();
        self.text_model = self.text_model.trim().to_string();
        if self.text_model.is_empty() {
            self.text_model = GenerationConfig::default().text_model;
        }
        if !(1..=MAX_TOKEN_LIMIT).contains(&self.token_limit) {
            return Err(SettingsError::TokenLimit(self.token_limit));
        }
        self.custom_endpoint = match self.custom_endpoint.as_deref() {
            Some(raw) => validate_custom_endpoint(raw)?,
            None => None,
        };
        Ok(self)
    }

    /// Update one field from its textual form, as given on the command line.
    pub fn apply_field(&mut self, field: &str, value: &str) -> Result<(), SettingsError> {
        let invalid = |field: &'static str| SettingsError::InvalidValue {
            field,
            value: value.to_string(),
        };
        match field {
            "keywords" => self.keywords = split_list(value).map(str::to_string).collect(),
            "tone" => self.tone = Tone::parse(value),
            "custom_tone" => self.custom_tone = value.to_string(),
            "categories" | "category_ids" => {
                self.category_ids = split_list(value)
                    .map(|id| id.parse::<i64>().map_err(|_| invalid("category_ids")))
                    .collect::<Result<_, _>>()?;
            }
            "text_model" | "model" => self.text_model = value.to_string(),
            "images_enabled" => self.images_enabled = parse_bool(value).ok_or_else(|| invalid("images_enabled"))?,
            "image_service" => {
                self.image_service = ImagePreference::parse(value).ok_or_else(|| invalid("image_service"))?
            }
            "token_limit" => self.token_limit = value.trim().parse().map_err(|_| invalid("token_limit"))?,
            "cadence" => self.cadence = Cadence::parse(value).ok_or_else(|| invalid("cadence"))?,
            "email_notifications" => {
                self.email_notifications = parse_bool(value).ok_or_else(|| invalid("email_notifications"))?
            }
            "custom_endpoint" => {
                self.custom_endpoint = Some(value.to_string()).filter(|v| !v.trim().is_empty())
            }
            other => return Err(SettingsError::UnknownField(other.to_string())),
        }
        Ok(())
    }
}

fn split_list(value: &str) -> impl Iterator<Item = &str> {
    value.split([',', '\n']).map(str::trim).filter(|s| !s.is_empty())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Some(true),
        "false" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}

/// Check a custom OpenAI-compatible endpoint. An empty value means "use the
/// official endpoint".
pub fn validate_custom_endpoint(raw: &str) -> Result<Option<String>, EndpointError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }

    let url = Url::parse(raw).map_err(|_| EndpointError::Malformed)?;
    if url.host_str().is_none_or(str::is_empty) {
        return Err(EndpointError::Malformed);
    }
    if url.scheme() != "https" {
        return Err(EndpointError::Insecure);
    }

    let path = url.path().trim_end_matches('/');
    if !(path.ends_with("/v1") || path.ends_with("/v1/images")) {
        return Err(EndpointError::UnrecognizedPath(url.path().to_string()));
    }

    Ok(Some(raw.trim_end_matches('/').to_string()))
}

/// Snapshot of the stored settings, or defaults when nothing is stored yet.
pub async fn load(cms: &dyn Cms) -> Result<GenerationConfig> {
    match cms.get_option(CONFIG_OPTION).await? {
        Some(raw) => serde_json::from_str(&raw).context("stored generation config is not valid JSON"),
        None => Ok(GenerationConfig::default()),
    }
}

/// Validate and persist `config`, reporting what changed against the
/// previous snapshot.
pub async fn save(cms: &dyn Cms, config: GenerationConfig) -> Result<(GenerationConfig, ConfigChanges)> {
    let config = config.normalized()?;
    let previous = load(cms).await?;

    let raw = serde_json::to_string(&config).context("serializing generation config")?;
    cms.store_option(CONFIG_OPTION, &raw).await?;

    let changes = ConfigChanges {
        cadence_changed: previous.cadence != config.cadence,
        endpoint_changed: previous.custom_endpoint != config.custom_endpoint,
    };
    info!(
        model = %config.text_model,
        cadence = %config.cadence,
        keywords = config.keywords.len(),
        "generation config saved"
    );
    Ok((config, changes))
}
