use std::fmt;

use serde::{Deserialize, Serialize};

/// Writing tone of the generated article.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum Tone {
    #[default]
    Default,
    Business,
    Academic,
    Funny,
    Epic,
    Personal,
    Custom,
}

impl From<String> for Tone {
    fn from(value: String) -> Self {
        Tone::parse(&value)
    }
}

impl Tone {
    /// Unknown values map to `Default`.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "business" => Tone::Business,
            "academic" => Tone::Academic,
            "funny" => Tone::Funny,
            "epic" => Tone::Epic,
            "personal" => Tone::Personal,
            "custom" => Tone::Custom,
            _ => Tone::Default,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Tone::Default => "default",
            Tone::Business => "business",
            Tone::Academic => "academic",
            Tone::Funny => "funny",
            Tone::Epic => "epic",
            Tone::Personal => "personal",
            Tone::Custom => "custom",
        }
    }
}

impl fmt::Display for Tone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Instruction text per tone. `custom` has no fixed entry.
const TONE_INSTRUCTIONS: &[(Tone, &str)] = &[
    (
        Tone::Default,
        "Write in a clear, neutral and informative tone suitable for a general audience.",
    ),
    (
        Tone::Business,
        "Write in a professional business tone, focusing on practical value and actionable insights for decision makers.",
    ),
    (
        Tone::Academic,
        "Write in an academic tone, with precise language, well-structured arguments and references to established concepts.",
    ),
    (
        Tone::Funny,
        "Write in a light-hearted and humorous tone, using wit and playful examples while staying on topic.",
    ),
    (
        Tone::Epic,
        "Write in an epic, dramatic tone, as if narrating a grand saga, with vivid and powerful language.",
    ),
    (
        Tone::Personal,
        "Write in a warm, personal tone, as if sharing your own experiences and opinions with a friend.",
    ),
];

const STRUCTURE_INSTRUCTIONS: &str = "Format the article as HTML. The first line must be the title wrapped in a single <h1> tag. \
After the title, write the body using <p> paragraphs and <h2> subheadings, with each block on its own line. \
Use HTML only, no Markdown, and do not wrap the output in an <article> tag.";

const IMAGE_STYLE: &str = "Style: photorealistic, high quality, natural lighting, suitable as a blog featured image, \
with no text, letters or watermarks.";

/// Identity of the site the article is written for.
#[derive(Debug, Clone, Default)]
pub struct SiteIdentity {
    pub name: String,
    pub tagline: String,
}

/// The two prompts of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptPair {
    pub content_prompt: String,
    pub image_prompt: String,
}

pub fn tone_instruction(tone: Tone, custom_tone: &str) -> String {
    let custom = custom_tone.trim();
    if tone == Tone::Custom && !custom.is_empty() {
        return format!("Write in the following tone: {custom}.");
    }
    let lookup = |wanted: Tone| {
        TONE_INSTRUCTIONS
            .iter()
            .find(|(t, _)| *t == wanted)
            .map(|(_, text)| *text)
    };
    lookup(tone)
        .or_else(|| lookup(Tone::Default))
        .unwrap_or_default()
        .to_string()
}

pub fn build_content_prompt(
    keywords: &[String],
    tone: Tone,
    custom_tone: &str,
    category_names: &[String],
    site: &SiteIdentity,
    token_limit: u32,
) -> String {
    let mut parts = Vec::with_capacity(6);

    let site_name = if site.name.trim().is_empty() {
        "a blog"
    } else {
        site.name.trim()
    };
    let mut role = format!("You are an experienced writer creating an article for the website \"{site_name}\"");
    if !site.tagline.trim().is_empty() {
        role.push_str(&format!(" ({})", site.tagline.trim()));
    }
    role.push('.');
    parts.push(role);

    parts.push(tone_instruction(tone, custom_tone));
    parts.push(STRUCTURE_INSTRUCTIONS.to_string());

    if !keywords.is_empty() {
        parts.push(format!(
            "Focus the article on the following keywords: {}.",
            keywords.join(", ")
        ));
    }

    if !category_names.is_empty() {
        parts.push(format!(
            "The article will be published in these categories: {}.",
            category_names.join(", ")
        ));
    }

    parts.push(format!(
        "Keep the complete response within {token_limit} tokens."
    ));

    parts.join("\n\n")
}

pub fn build_image_prompt(keywords: &[String], category_names: &[String]) -> String {
    let mut prompt = format!(
        "Create a featured image for a blog article about {}",
        keywords.join(", ")
    );
    if !category_names.is_empty() {
        prompt.push_str(&format!(", related to: {}", category_names.join(", ")));
    }
    prompt.push_str(". ");
    prompt.push_str(IMAGE_STYLE);
    prompt
}

pub fn build_prompts(
    keywords: &[String],
    tone: Tone,
    custom_tone: &str,
    category_names: &[String],
    site: &SiteIdentity,
    token_limit: u32,
) -> PromptPair {
    PromptPair {
        content_prompt: build_content_prompt(keywords, tone, custom_tone, category_names, site, token_limit),
        image_prompt: build_image_prompt(keywords, category_names),
    }
}
