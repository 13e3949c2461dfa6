use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono_tz::Tz;
use serde::Deserialize;

use crate::error::ConfigError;
use crate::providers::{claude, gemini, openai, stability};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub autoinsight: AutoinsightConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub mail: Option<MailConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AutoinsightConfig {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Token for the HTTP trigger API. Generated and stored when absent.
    #[serde(default)]
    pub trigger_token: Option<String>,
}

fn default_version() -> u32 {
    1
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn default_timezone() -> String {
    "UTC".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_listen() -> String {
    "127.0.0.1:8080".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> String {
    "autoinsight.db".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub tagline: String,
    #[serde(default = "default_author_id")]
    pub author_id: i64,
    /// Public base URL under which `data_dir/uploads` is served.
    #[serde(default = "default_uploads_url")]
    pub uploads_url: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            tagline: String::new(),
            author_id: default_author_id(),
            uploads_url: default_uploads_url(),
        }
    }
}

fn default_author_id() -> i64 {
    1
}
fn default_uploads_url() -> String {
    "/uploads".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default = "default_timeout")]
    pub timeout: String,
    #[serde(default = "default_models_timeout")]
    pub models_timeout: String,
    #[serde(default = "default_model_cache_ttl")]
    pub model_cache_ttl: String,
    #[serde(default = "default_openai_base_url")]
    pub openai_base_url: String,
    #[serde(default = "default_claude_base_url")]
    pub claude_base_url: String,
    #[serde(default = "default_gemini_base_url")]
    pub gemini_base_url: String,
    #[serde(default = "default_stability_base_url")]
    pub stability_base_url: String,
    #[serde(default = "default_image_size")]
    pub image_size: String,
    #[serde(default = "default_image_count")]
    pub image_count: u32,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            models_timeout: default_models_timeout(),
            model_cache_ttl: default_model_cache_ttl(),
            openai_base_url: default_openai_base_url(),
            claude_base_url: default_claude_base_url(),
            gemini_base_url: default_gemini_base_url(),
            stability_base_url: default_stability_base_url(),
            image_size: default_image_size(),
            image_count: default_image_count(),
        }
    }
}

fn default_timeout() -> String {
    "60s".to_string()
}
fn default_models_timeout() -> String {
    "15s".to_string()
}
fn default_model_cache_ttl() -> String {
    "1h".to_string()
}
fn default_openai_base_url() -> String {
    openai::DEFAULT_BASE_URL.to_string()
}
fn default_claude_base_url() -> String {
    claude::DEFAULT_BASE_URL.to_string()
}
fn default_gemini_base_url() -> String {
    gemini::DEFAULT_BASE_URL.to_string()
}
fn default_stability_base_url() -> String {
    stability::DEFAULT_BASE_URL.to_string()
}
fn default_image_size() -> String {
    "1792x1024".to_string()
}
fn default_image_count() -> u32 {
    1
}

/// Outgoing mail for post and failure notifications.
#[derive(Debug, Clone, Deserialize)]
pub struct MailConfig {
    pub admin_email: String,
    #[serde(default = "default_from_email")]
    pub from_email: String,
    #[serde(default = "default_from_name")]
    pub from_name: String,
    pub transport: MailTransportConfig,
}

fn default_from_email() -> String {
    "autoinsight@localhost".to_string()
}
fn default_from_name() -> String {
    "AutoInsight".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MailTransportConfig {
    Smtp {
        host: String,
        #[serde(default = "default_smtp_port")]
        port: u16,
        #[serde(default)]
        username: String,
        #[serde(default)]
        password: String,
        #[serde(default = "default_use_tls")]
        use_tls: bool,
    },
    /// Write each message to a file in `path` instead of sending it.
    File { path: PathBuf },
}

fn default_smtp_port() -> u16 {
    587
}
fn default_use_tls() -> bool {
    true
}

impl Config {
    /// Resolve the database path (relative to data_dir if not absolute).
    pub fn db_path(&self) -> PathBuf {
        let db_path = Path::new(&self.database.path);
        if db_path.is_absolute() {
            db_path.to_path_buf()
        } else {
            self.autoinsight.data_dir.join(db_path)
        }
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.autoinsight.data_dir.join("uploads")
    }

    pub fn timezone(&self) -> Tz {
        self.autoinsight.timezone.parse().unwrap_or(Tz::UTC)
    }

    pub fn provider_timeout(&self) -> Duration {
        parse_duration_or(&self.providers.timeout, Duration::from_secs(60))
    }

    pub fn models_timeout(&self) -> Duration {
        parse_duration_or(&self.providers.models_timeout, Duration::from_secs(15))
    }

    pub fn model_cache_ttl(&self) -> Duration {
        parse_duration_or(&self.providers.model_cache_ttl, Duration::from_secs(3600))
    }

    pub fn admin_email(&self) -> Option<String> {
        self.mail.as_ref().map(|m| m.admin_email.clone())
    }
}

/// Durations are checked by [`validate_config`]; this only guards callers
/// that skipped validation.
fn parse_duration_or(value: &str, fallback: Duration) -> Duration {
    humantime::parse_duration(value).unwrap_or(fallback)
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .map_err(ConfigError::ReadFile)
        .context("reading config file")?;
    let config: Config = toml::from_str(&content).map_err(ConfigError::Parse)?;
    Ok(config)
}

pub fn validate_config(config: &Config) -> Result<()> {
    if config.autoinsight.version != 1 {
        return Err(ConfigError::Validation(format!(
            "unsupported config version {} (this binary supports version 1)",
            config.autoinsight.version
        ))
        .into());
    }

    config
        .autoinsight
        .timezone
        .parse::<Tz>()
        .map_err(|_| ConfigError::Validation(format!("unknown timezone '{}'", config.autoinsight.timezone)))?;

    config
        .autoinsight
        .listen
        .parse::<std::net::SocketAddr>()
        .map_err(|e| ConfigError::Validation(format!("listen address '{}': {e}", config.autoinsight.listen)))?;

    if config.autoinsight.trigger_token.as_deref().is_some_and(|t| t.trim().is_empty()) {
        return Err(ConfigError::Validation("trigger_token must not be empty when set".to_string()).into());
    }

    if config.site.author_id < 1 {
        return Err(ConfigError::Validation(format!("site author_id must be positive, got {}", config.site.author_id)).into());
    }

    let providers = &config.providers;
    for (name, value) in [
        ("timeout", &providers.timeout),
        ("models_timeout", &providers.models_timeout),
        ("model_cache_ttl", &providers.model_cache_ttl),
    ] {
        humantime::parse_duration(value)
            .map_err(|e| ConfigError::Validation(format!("providers {name} '{value}': {e}")))?;
    }

    for (name, value) in [
        ("openai_base_url", &providers.openai_base_url),
        ("claude_base_url", &providers.claude_base_url),
        ("gemini_base_url", &providers.gemini_base_url),
        ("stability_base_url", &providers.stability_base_url),
    ] {
        url::Url::parse(value).map_err(|e| ConfigError::Validation(format!("providers {name} '{value}': {e}")))?;
    }

    let valid_size = providers
        .image_size
        .split_once('x')
        .is_some_and(|(w, h)| w.parse::<u32>().is_ok() && h.parse::<u32>().is_ok());
    if !valid_size {
        return Err(ConfigError::Validation(format!(
            "providers image_size '{}': expected WIDTHxHEIGHT",
            providers.image_size
        ))
        .into());
    }

    if !(1..=10).contains(&providers.image_count) {
        return Err(ConfigError::Validation(format!(
            "providers image_count must be between 1 and 10, got {}",
            providers.image_count
        ))
        .into());
    }

    if let Some(mail) = &config.mail {
        if !mail.admin_email.contains('@') {
            return Err(ConfigError::Validation(format!("mail admin_email '{}' is not an address", mail.admin_email)).into());
        }
        if matches!(&mail.transport, MailTransportConfig::Smtp { host, .. } if host.trim().is_empty()) {
            return Err(ConfigError::Validation("mail smtp transport requires 'host'".to_string()).into());
        }
    }

    Ok(())
}
