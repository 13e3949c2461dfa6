use serde_json::{Map, Value};

use crate::error::AssemblyError;

/// One editor block, serialized as `<!-- wp:{kind} {attrs} -->content<!-- /wp:{kind} -->`.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentBlock {
    pub kind: &'static str,
    pub attributes: Map<String, Value>,
    pub content: String,
}

impl ContentBlock {
    pub fn paragraph(content: &str) -> Self {
        let mut attributes = Map::new();
        attributes.insert("align".to_string(), Value::from("left"));
        Self {
            kind: "paragraph",
            attributes,
            content: content.to_string(),
        }
    }

    pub fn to_markup(&self) -> String {
        let open = if self.attributes.is_empty() {
            format!("<!-- wp:{} -->", self.kind)
        } else {
            format!("<!-- wp:{} {} -->", self.kind, Value::Object(self.attributes.clone()))
        };
        format!("{open}{}<!-- /wp:{} -->", self.content, self.kind)
    }
}

/// A post assembled from provider output.
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledPost {
    pub title: String,
    pub blocks: Vec<ContentBlock>,
}

impl AssembledPost {
    pub fn body_markup(&self) -> String {
        self.blocks.iter().map(ContentBlock::to_markup).collect()
    }
}

/// Inner text of the first `<h1 ...>...</h1>` on the line, if any.
fn h1_text(line: &str) -> Option<&str> {
    let lower = line.to_ascii_lowercase();
    let open = lower.find("<h1")?;
    let content_start = open + lower[open..].find('>')? + 1;
    let content_end = content_start + lower[content_start..].find("</h1>")?;
    Some(line[content_start..content_end].trim())
}

/// Split provider output into a title and body blocks.
///
/// The title is the first line carrying a non-empty `<h1>`; that line is not
/// part of the body. Every other non-blank line becomes one paragraph block,
/// in order.
pub fn assemble(lines: &[String]) -> Result<AssembledPost, AssemblyError> {
    let (title_index, title) = lines
        .iter()
        .enumerate()
        .find_map(|(i, line)| h1_text(line).filter(|t| !t.is_empty()).map(|t| (i, t.to_string())))
        .ok_or(AssemblyError::NoTitle)?;

    let blocks = lines
        .iter()
        .enumerate()
        .filter(|(i, line)| *i != title_index && !line.trim().is_empty())
        .map(|(_, line)| ContentBlock::paragraph(line))
        .collect();

    Ok(AssembledPost { title, blocks })
}
