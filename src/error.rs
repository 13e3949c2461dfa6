use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadFile(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("validation error: {0}")]
    Validation(String),
}

/// Failure talking to a text or image provider.
///
/// `Transport` and `Status` are transport-level failures; `Response` covers a
/// 2xx reply whose JSON does not have the expected shape. Callers treat both
/// kinds the same way.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{provider} request failed: {source}")]
    Transport {
        provider: &'static str,
        source: reqwest::Error,
    },
    #[error("{provider} request failed ({status}): {message}")]
    Status {
        provider: &'static str,
        status: u16,
        message: String,
    },
    #[error("unexpected {provider} response: {message}")]
    Response { provider: &'static str, message: String },
    #[error("model \"{model}\" is not available on this endpoint")]
    ModelUnavailable { model: String },
    #[error("failed to store generated image: {0}")]
    Storage(#[from] std::io::Error),
}

impl ProviderError {
    pub fn transport(provider: &'static str, source: reqwest::Error) -> Self {
        Self::Transport { provider, source }
    }

    pub fn response(provider: &'static str, message: impl Into<String>) -> Self {
        Self::Response {
            provider,
            message: message.into(),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AssemblyError {
    #[error("no title found in generated content")]
    NoTitle,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EndpointError {
    #[error("invalid endpoint URL format: must be a complete https:// URL")]
    Malformed,
    #[error("endpoint URL must use HTTPS")]
    Insecure,
    #[error("endpoint URL path '{0}' is not a recognized API path (expected /v1/, /v1/images, /api/v1/ or /api/v1/images)")]
    UnrecognizedPath(String),
}

/// Why a generation run stopped before a post was persisted.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Assembly(#[from] AssemblyError),
    #[error("failed to store post: {0}")]
    Persistence(String),
    #[error("a generation run is already in progress")]
    Busy,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("token limit must be between 1 and 4096, got {0}")]
    TokenLimit(u32),
    #[error(transparent)]
    Endpoint(#[from] EndpointError),
    #[error("unknown setting '{0}'")]
    UnknownField(String),
    #[error("invalid value '{value}' for {field}")]
    InvalidValue { field: &'static str, value: String },
}
