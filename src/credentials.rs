use std::collections::HashMap;
use std::fmt;

use anyhow::{Context, Result};

use crate::cms::Cms;
use crate::registry::Provider;

/// Anyone we hold an API key for: the text providers plus the image-only vendor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Vendor {
    OpenAi,
    Claude,
    Gemini,
    Stability,
}

impl Vendor {
    pub const ALL: [Vendor; 4] = [Vendor::OpenAi, Vendor::Claude, Vendor::Gemini, Vendor::Stability];

    /// Environment variable that overrides the stored key.
    pub fn env_var(self) -> &'static str {
        match self {
            Vendor::OpenAi => "OPENAI_API",
            Vendor::Claude => "CLAUDE_API",
            Vendor::Gemini => "GEMINI_API",
            Vendor::Stability => "STABILITY_API",
        }
    }

    /// Option-store key of the stored key.
    pub fn option_key(self) -> &'static str {
        match self {
            Vendor::OpenAi => "openai_api_key",
            Vendor::Claude => "claude_api_key",
            Vendor::Gemini => "gemini_api_key",
            Vendor::Stability => "stability_api_key",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "openai" => Some(Vendor::OpenAi),
            "claude" | "anthropic" => Some(Vendor::Claude),
            "gemini" | "google" => Some(Vendor::Gemini),
            "stability" => Some(Vendor::Stability),
            _ => None,
        }
    }
}

impl From<Provider> for Vendor {
    fn from(provider: Provider) -> Self {
        match provider {
            Provider::OpenAi => Vendor::OpenAi,
            Provider::Claude => Vendor::Claude,
            Provider::Gemini => Vendor::Gemini,
        }
    }
}

impl fmt::Display for Vendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Vendor::OpenAi => "OpenAI",
            Vendor::Claude => "Claude",
            Vendor::Gemini => "Gemini",
            Vendor::Stability => "Stability",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySource {
    Environment,
    Stored,
    Missing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedKey {
    pub value: String,
    pub source: KeySource,
}

/// The effective key of every vendor, resolved once at the start of a run.
#[derive(Debug, Clone, Default)]
pub struct CredentialSet {
    keys: HashMap<Vendor, ResolvedKey>,
}

impl CredentialSet {
    pub fn key(&self, vendor: Vendor) -> &str {
        self.keys.get(&vendor).map(|k| k.value.as_str()).unwrap_or("")
    }

    /// A key counts as configured only when it is non-empty.
    pub fn has(&self, vendor: Vendor) -> bool {
        !self.key(vendor).is_empty()
    }

    pub fn source(&self, vendor: Vendor) -> KeySource {
        self.keys.get(&vendor).map(|k| k.source).unwrap_or(KeySource::Missing)
    }

    #[cfg(test)]
    pub fn from_pairs(pairs: &[(Vendor, &str)]) -> Self {
        let keys = pairs
            .iter()
            .map(|(vendor, value)| {
                (
                    *vendor,
                    ResolvedKey {
                        value: value.to_string(),
                        source: KeySource::Stored,
                    },
                )
            })
            .collect();
        Self { keys }
    }
}

/// Resolves API keys, letting a declared environment variable win over storage.
#[derive(Debug, Clone, Default)]
pub struct CredentialResolver {
    env: HashMap<String, String>,
}

impl CredentialResolver {
    /// Captures the override variables from the process environment.
    pub fn from_process_env() -> Self {
        let env = Vendor::ALL
            .iter()
            .filter_map(|vendor| {
                std::env::var(vendor.env_var())
                    .ok()
                    .map(|value| (vendor.env_var().to_string(), value))
            })
            .collect();
        Self { env }
    }

    #[cfg(test)]
    pub fn with_env(env: HashMap<String, String>) -> Self {
        Self { env }
    }

    /// A declared environment variable always wins, even when it is empty.
    pub fn resolve_with(&self, vendor: Vendor, stored: Option<&str>) -> ResolvedKey {
        if let Some(value) = self.env.get(vendor.env_var()) {
            return ResolvedKey {
                value: value.clone(),
                source: KeySource::Environment,
            };
        }
        match stored {
            Some(value) if !value.is_empty() => ResolvedKey {
                value: value.to_string(),
                source: KeySource::Stored,
            },
            _ => ResolvedKey {
                value: String::new(),
                source: KeySource::Missing,
            },
        }
    }

    pub async fn resolve_key(&self, cms: &dyn Cms, vendor: Vendor) -> Result<ResolvedKey> {
        if self.env.contains_key(vendor.env_var()) {
            return Ok(self.resolve_with(vendor, None));
        }
        let stored = cms
            .get_option(vendor.option_key())
            .await
            .with_context(|| format!("reading stored {vendor} key"))?;
        Ok(self.resolve_with(vendor, stored.as_deref()))
    }

    pub async fn resolve_all(&self, cms: &dyn Cms) -> Result<CredentialSet> {
        let mut keys = HashMap::new();
        for vendor in Vendor::ALL {
            keys.insert(vendor, self.resolve_key(cms, vendor).await?);
        }
        Ok(CredentialSet { keys })
    }
}
