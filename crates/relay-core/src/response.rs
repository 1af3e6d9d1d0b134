//! Canonical batch response types.
//!
//! Adapters decode provider bodies into these; the server returns them to
//! clients verbatim. Shapes follow the OpenAI wire format.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::request::{MessageRole, ToolCall};
use crate::usage::Usage;

/// Chat completion response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    /// Completion identifier (`chatcmpl-...`)
    pub id: String,

    /// Always `chat.completion`
    pub object: String,

    /// Unix timestamp of creation
    pub created: i64,

    /// Model name; the hub stamps the resolved upstream name here
    pub model: String,

    /// Generated choices
    pub choices: Vec<ChatChoice>,

    /// Token usage, normalized by the adapter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,

    /// Backend configuration fingerprint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_fingerprint: Option<String>,
}

/// One generated choice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatChoice {
    /// Choice index
    pub index: u32,

    /// The generated message
    pub message: ResponseMessage,

    /// Why generation stopped (`stop`, `length`, `tool_calls`, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

/// Assistant message inside a batch choice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseMessage {
    /// Always `assistant` in practice
    pub role: MessageRole,

    /// Generated text; `null` when the model only called tools
    #[serde(default)]
    pub content: Option<String>,

    /// Tool calls requested by the model
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

impl ResponseMessage {
    /// Plain assistant text message.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: Some(content.into()),
            tool_calls: None,
        }
    }
}

/// Embeddings response in the OpenAI wire shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingsResponse {
    /// Always `list`
    pub object: String,

    /// One entry per input
    pub data: Vec<EmbeddingData>,

    /// Model name; the hub stamps the resolved upstream name here
    pub model: String,

    /// Token usage for the embedding call
    pub usage: Usage,
}

/// One embedding vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingData {
    /// Always `embedding`
    pub object: String,

    /// Position of the corresponding input
    pub index: u32,

    /// The vector
    pub embedding: Vec<f32>,
}

impl EmbeddingData {
    /// Wrap a vector at the given input position.
    #[must_use]
    pub fn new(index: u32, embedding: Vec<f32>) -> Self {
        Self {
            object: "embedding".to_string(),
            index,
            embedding,
        }
    }
}

/// `/v1/models` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsResponse {
    /// Always `list`
    pub object: String,

    /// Models visible to the caller's group
    pub data: Vec<ModelObject>,
}

impl ModelsResponse {
    /// Build the response from public model names.
    #[must_use]
    pub fn from_ids<I>(ids: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        Self {
            object: "list".to_string(),
            data: ids.into_iter().map(ModelObject::new).collect(),
        }
    }
}

/// One entry of the `/v1/models` listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelObject {
    /// Public model name
    pub id: String,

    /// Always `model`
    pub object: String,

    /// Unix timestamp the entry was generated at
    pub created: i64,

    /// Owner label
    pub owned_by: String,
}

impl ModelObject {
    /// Build a listing entry for a public model name.
    #[must_use]
    pub fn new(id: String) -> Self {
        Self {
            id,
            object: "model".to_string(),
            created: Utc::now().timestamp(),
            owned_by: "llm-relay-hub".to_string(),
        }
    }
}
