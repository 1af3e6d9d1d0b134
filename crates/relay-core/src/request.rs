//! Client-facing request types.
//!
//! These mirror the OpenAI wire format: the hub accepts them verbatim and
//! adapters translate them per provider. Fields the hub does not interpret
//! are preserved through the `extra` map so upstreams still see them.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RelayError;

/// Chat completion request in the OpenAI wire shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Public model name; channel selection and mapping key off this
    pub model: String,

    /// Conversation messages
    pub messages: Vec<ChatMessage>,

    /// Sampling temperature
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Nucleus sampling parameter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Frequency penalty (-2.0 to 2.0)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,

    /// Presence penalty (-2.0 to 2.0)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,

    /// Stop sequences
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<Value>,

    /// Enable streaming response
    #[serde(default)]
    pub stream: bool,

    /// Streaming options (usage reporting)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_options: Option<StreamOptions>,

    /// Tool definitions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDefinition>>,

    /// Tool choice directive (string or object, passed through)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<Value>,

    /// End-user identifier for abuse tracking
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    /// Provider-specific fields the hub does not model
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl ChatRequest {
    /// Create a minimal request; the remaining fields default to `None`.
    #[must_use]
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: None,
            top_p: None,
            max_tokens: None,
            frequency_penalty: None,
            presence_penalty: None,
            stop: None,
            stream: false,
            stream_options: None,
            tools: None,
            tool_choice: None,
            user: None,
            extra: serde_json::Map::new(),
        }
    }

    /// Enable or disable streaming.
    #[must_use]
    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    /// Request a trailing usage chunk on streams.
    #[must_use]
    pub fn with_include_usage(mut self) -> Self {
        self.stream_options = Some(StreamOptions {
            include_usage: true,
        });
        self
    }

    /// Whether the client asked for the trailing usage chunk.
    #[must_use]
    pub fn include_usage(&self) -> bool {
        self.stream_options
            .as_ref()
            .is_some_and(|opts| opts.include_usage)
    }

    /// Validate the request before any upstream work.
    pub fn validate(&self) -> Result<(), RelayError> {
        if self.model.trim().is_empty() {
            return Err(RelayError::invalid("model is required"));
        }
        if self.messages.is_empty() {
            return Err(RelayError::invalid("messages cannot be empty"));
        }
        if let Some(t) = self.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(RelayError::invalid(format!(
                    "temperature must be between 0.0 and 2.0, got {t}"
                )));
            }
        }
        if let Some(p) = self.top_p {
            if !(0.0..=1.0).contains(&p) {
                return Err(RelayError::invalid(format!(
                    "top_p must be between 0.0 and 1.0, got {p}"
                )));
            }
        }
        Ok(())
    }
}

/// Streaming options accepted on chat requests.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct StreamOptions {
    /// Emit a final usage-only chunk before the stream terminator
    #[serde(default)]
    pub include_usage: bool,
}

/// Chat message with role and content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Role of the message author
    pub role: MessageRole,

    /// Content of the message; assistants may send `null` alongside tool calls
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<MessageContent>,

    /// Optional name of the author
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Tool calls made by the assistant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,

    /// Tool call ID for tool response messages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    /// Create a system message.
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::text(MessageRole::System, content)
    }

    /// Create a user message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::text(MessageRole::User, content)
    }

    /// Create an assistant message.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::text(MessageRole::Assistant, content)
    }

    fn text(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(MessageContent::Text(content.into())),
            name: None,
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// Flattened text of the message, joining multimodal text parts.
    #[must_use]
    pub fn text_content(&self) -> String {
        self.content.as_ref().map(MessageContent::flattened_text).unwrap_or_default()
    }
}

/// Message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// System message
    System,
    /// User message
    User,
    /// Assistant message
    Assistant,
    /// Tool response message
    Tool,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::System => write!(f, "system"),
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
            Self::Tool => write!(f, "tool"),
        }
    }
}

/// Message content (text or multimodal parts).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    /// Simple text content
    Text(String),
    /// Multimodal content parts
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    /// Get as text if this is plain text content.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            Self::Parts(_) => None,
        }
    }

    /// Text of the content with multimodal text parts concatenated.
    #[must_use]
    pub fn flattened_text(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Parts(parts) => parts
                .iter()
                .filter_map(|part| match part {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::ImageUrl { .. } => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// Content part for multimodal messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// Text content part
    Text {
        /// The text content
        text: String,
    },
    /// Image content part; URL and detail level pass through untouched
    ImageUrl {
        /// Image URL object as the client sent it
        image_url: Value,
    },
}

/// Tool call emitted by an assistant message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Provider-assigned call identifier
    pub id: String,
    /// Call type, currently always `function`
    #[serde(rename = "type")]
    pub call_type: String,
    /// Invoked function with serialized arguments
    pub function: FunctionCall,
}

/// Function invocation carried by a tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    /// Function name
    pub name: String,
    /// JSON-encoded arguments
    pub arguments: String,
}

/// Tool definition supplied by the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool type, currently always `function`
    #[serde(rename = "type")]
    pub tool_type: String,
    /// Function declaration (name, description, JSON schema parameters)
    pub function: Value,
}

/// Embeddings request in the OpenAI wire shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingsRequest {
    /// Public model name
    pub model: String,

    /// Input text: a string or an array of strings
    pub input: Value,

    /// Requested encoding for the vectors
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding_format: Option<String>,

    /// Requested output dimensionality
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<u32>,

    /// End-user identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

impl EmbeddingsRequest {
    /// Validate the request before any upstream work.
    pub fn validate(&self) -> Result<(), RelayError> {
        if self.model.trim().is_empty() {
            return Err(RelayError::invalid("model is required"));
        }
        let empty = match &self.input {
            Value::String(s) => s.is_empty(),
            Value::Array(items) => items.is_empty(),
            _ => true,
        };
        if empty {
            return Err(RelayError::invalid(
                "input must be a non-empty string or array",
            ));
        }
        Ok(())
    }
}
