use std::fmt;

use serde::Serialize;

/// Text-generation vendor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenAi,
    Claude,
    Gemini,
}

impl Provider {
    pub fn name(self) -> &'static str {
        match self {
            Provider::OpenAi => "OpenAI",
            Provider::Claude => "Claude",
            Provider::Gemini => "Gemini",
        }
    }

    /// Guess the provider family from a model id by substring match.
    pub fn infer_from_model_id(model_id: &str) -> Option<Self> {
        let id = model_id.to_ascii_lowercase();
        if id.contains("gpt") || id.contains("openai") || id.contains("dall-e") {
            Some(Provider::OpenAi)
        } else if id.contains("claude") {
            Some(Provider::Claude)
        } else if id.contains("gemini") {
            Some(Provider::Gemini)
        } else {
            None
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ModelDescriptor {
    pub id: &'static str,
    pub provider: Provider,
    pub display_name: &'static str,
    pub description: &'static str,
    pub cost_tier: u8,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ProviderGroup {
    pub provider: Provider,
    pub models: &'static [ModelDescriptor],
}

const OPENAI_MODELS: &[ModelDescriptor] = &[
    ModelDescriptor {
        id: "gpt-3.5-turbo",
        provider: Provider::OpenAi,
        display_name: "GPT-3.5 Turbo",
        description: "Fast and inexpensive, good for short articles",
        cost_tier: 1,
    },
    ModelDescriptor {
        id: "gpt-4o-mini",
        provider: Provider::OpenAi,
        display_name: "GPT-4o mini",
        description: "Small GPT-4o variant with a good quality/price balance",
        cost_tier: 1,
    },
    ModelDescriptor {
        id: "gpt-4o",
        provider: Provider::OpenAi,
        display_name: "GPT-4o",
        description: "High quality multimodal flagship",
        cost_tier: 2,
    },
    ModelDescriptor {
        id: "gpt-4",
        provider: Provider::OpenAi,
        display_name: "GPT-4 Turbo",
        description: "Long-form, carefully reasoned articles",
        cost_tier: 3,
    },
];

const CLAUDE_MODELS: &[ModelDescriptor] = &[
    ModelDescriptor {
        id: "claude-3-haiku",
        provider: Provider::Claude,
        display_name: "Claude 3 Haiku",
        description: "Fastest Claude model, suited to short posts",
        cost_tier: 1,
    },
    ModelDescriptor {
        id: "claude-3-sonnet",
        provider: Provider::Claude,
        display_name: "Claude 3 Sonnet",
        description: "Balanced quality and speed",
        cost_tier: 2,
    },
    ModelDescriptor {
        id: "claude-3-5-sonnet",
        provider: Provider::Claude,
        display_name: "Claude 3.5 Sonnet",
        description: "Strong writing quality at mid-range cost",
        cost_tier: 2,
    },
    ModelDescriptor {
        id: "claude-3-opus",
        provider: Provider::Claude,
        display_name: "Claude 3 Opus",
        description: "Most capable Claude 3 model for in-depth articles",
        cost_tier: 3,
    },
];

const GEMINI_MODELS: &[ModelDescriptor] = &[
    ModelDescriptor {
        id: "gemini-pro",
        provider: Provider::Gemini,
        display_name: "Gemini Pro",
        description: "General purpose Gemini model (no image generation)",
        cost_tier: 1,
    },
    ModelDescriptor {
        id: "gemini-1.5-flash",
        provider: Provider::Gemini,
        display_name: "Gemini 1.5 Flash",
        description: "Low latency Gemini model",
        cost_tier: 1,
    },
    ModelDescriptor {
        id: "gemini-1.5-pro",
        provider: Provider::Gemini,
        display_name: "Gemini 1.5 Pro",
        description: "Higher quality Gemini model with a large context window",
        cost_tier: 2,
    },
];

const CATALOG: &[ProviderGroup] = &[
    ProviderGroup {
        provider: Provider::OpenAi,
        models: OPENAI_MODELS,
    },
    ProviderGroup {
        provider: Provider::Claude,
        models: CLAUDE_MODELS,
    },
    ProviderGroup {
        provider: Provider::Gemini,
        models: GEMINI_MODELS,
    },
];

/// The known text models, grouped by provider.
pub fn list_models() -> &'static [ProviderGroup] {
    CATALOG
}

pub fn find_model(model_id: &str) -> Option<&'static ModelDescriptor> {
    CATALOG
        .iter()
        .flat_map(|group| group.models.iter())
        .find(|model| model.id == model_id)
}

pub fn find_provider_for_model(model_id: &str) -> Option<Provider> {
    find_model(model_id).map(|model| model.provider)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_catalog_entry_sits_in_its_provider_group() {
        for group in list_models() {
            assert!(!group.models.is_empty());
            for model in group.models {
                assert_eq!(model.provider, group.provider, "{} is misfiled", model.id);
            }
        }
    }

    #[test]
    fn finds_provider_by_linear_scan() {
        assert_eq!(find_provider_for_model("gpt-3.5-turbo"), Some(Provider::OpenAi));
        assert_eq!(find_provider_for_model("claude-3-opus"), Some(Provider::Claude));
        assert_eq!(find_provider_for_model("gemini-pro"), Some(Provider::Gemini));
        assert_eq!(find_provider_for_model("llama-3"), None);
    }

    #[test]
    fn infers_family_from_model_tokens() {
        assert_eq!(Provider::infer_from_model_id("my-gpt-proxy"), Some(Provider::OpenAi));
        assert_eq!(Provider::infer_from_model_id("Claude-Next"), Some(Provider::Claude));
        assert_eq!(Provider::infer_from_model_id("gemini-2.0"), Some(Provider::Gemini));
        assert_eq!(Provider::infer_from_model_id("mistral-large"), None);
    }
}
