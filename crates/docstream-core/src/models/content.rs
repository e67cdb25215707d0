use serde::{Deserialize, Deserializer, Serialize};

/// Transient text shown in the assistant slot until the first delta arrives.
pub const PLACEHOLDER_TEXT: &str = "Generating…";

/// Shown in place of a final response that carried no usable content.
pub const EMPTY_RESPONSE_FALLBACK: &str = "Could not generate a response. Please try again.";

/// One unit of message content exchanged with the model provider.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    Image { source: ImageSource },
}

/// Inline image payload. Always base64 encoded.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSource {
    #[serde(rename = "type", default = "default_source_type")]
    pub source_type: String,
    pub media_type: String,
    pub data: String,
}

fn default_source_type() -> String {
    "base64".to_string()
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }

    pub fn image(media_type: impl Into<String>, data: impl Into<String>) -> Self {
        ContentBlock::Image {
            source: ImageSource {
                source_type: default_source_type(),
                media_type: media_type.into(),
                data: data.into(),
            },
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentBlock::Text { text } => Some(text),
            ContentBlock::Image { .. } => None,
        }
    }

    /// Whether the block carries something worth showing: non-blank text or image data.
    pub fn has_content(&self) -> bool {
        match self {
            ContentBlock::Text { text } => !text.trim().is_empty(),
            ContentBlock::Image { source } => !source.data.is_empty(),
        }
    }
}

/// Author of a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Content as it appears on the wire: either a bare string or a list of typed blocks.
///
/// This is the single place where the loose payload shape is folded into
/// `Vec<ContentBlock>`.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum RawContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl RawContent {
    pub fn into_blocks(self) -> Vec<ContentBlock> {
        match self {
            RawContent::Text(text) => vec![ContentBlock::text(text)],
            RawContent::Blocks(blocks) if blocks.is_empty() => vec![ContentBlock::text("")],
            RawContent::Blocks(blocks) => blocks,
        }
    }
}

fn deserialize_content<'de, D>(deserializer: D) -> Result<Vec<ContentBlock>, D::Error>
where
    D: Deserializer<'de>,
{
    RawContent::deserialize(deserializer).map(RawContent::into_blocks)
}

/// A single conversation turn.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(deserialize_with = "deserialize_content")]
    pub content: Vec<ContentBlock>,
    /// Set while the message is the live target of a stream.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub streaming: bool,
}

impl Message {
    pub fn new(role: Role, content: Vec<ContentBlock>) -> Self {
        let content = if content.is_empty() {
            vec![ContentBlock::text("")]
        } else {
            content
        };
        Self {
            role,
            content,
            streaming: false,
        }
    }

    pub fn user(content: Vec<ContentBlock>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn user_text(text: impl Into<String>) -> Self {
        Self::user(vec![ContentBlock::text(text)])
    }

    pub fn assistant(content: Vec<ContentBlock>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self::assistant(vec![ContentBlock::text(text)])
    }

    /// The in-progress assistant slot appended when a stream starts.
    pub fn placeholder() -> Self {
        Self {
            role: Role::Assistant,
            content: vec![ContentBlock::text(PLACEHOLDER_TEXT)],
            streaming: true,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.role == Role::Assistant
            && self.content.len() == 1
            && self.content[0].as_text() == Some(PLACEHOLDER_TEXT)
    }

    /// Whether this is the assistant message a stream is currently writing into.
    pub fn is_in_progress(&self) -> bool {
        self.role == Role::Assistant && self.streaming
    }

    /// At least one block with non-blank text or image data.
    pub fn has_content(&self) -> bool {
        self.content.iter().any(ContentBlock::has_content)
    }

    /// All text blocks joined with newlines.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(ContentBlock::as_text)
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn text_len(&self) -> usize {
        self.content
            .iter()
            .filter_map(ContentBlock::as_text)
            .map(|t| t.chars().count())
            .sum()
    }
}
