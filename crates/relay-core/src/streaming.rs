//! Canonical streaming chunk types.
//!
//! The stream relay forwards exactly these chunks to clients, one SSE
//! `data:` line each. Identity fields (`id`, `created`) are assigned once
//! per stream and stamped on every chunk.

use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::RelayError;
use crate::request::MessageRole;
use crate::usage::Usage;

/// Stream of canonical chunks produced by an adapter-backed relay.
pub type ChunkStream = BoxStream<'static, Result<ChatChunk, RelayError>>;

/// Allocate a fresh stream identifier in the OpenAI `chatcmpl-` format.
#[must_use]
pub fn new_stream_id() -> String {
    format!("chatcmpl-{}", uuid::Uuid::new_v4().simple())
}

/// One streaming chunk in the OpenAI wire shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatChunk {
    /// Stream identifier, identical across all chunks of one stream
    pub id: String,

    /// Always `chat.completion.chunk`
    pub object: String,

    /// Unix timestamp, identical across all chunks of one stream
    pub created: i64,

    /// Public model name
    pub model: String,

    /// Incremental choices; empty on the trailing usage chunk
    pub choices: Vec<ChunkChoice>,

    /// Usage, present only on the trailing usage chunk
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl ChatChunk {
    /// Chunk carrying a single content delta.
    #[must_use]
    pub fn content(id: impl Into<String>, created: i64, model: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            object: "chat.completion.chunk".to_string(),
            created,
            model: model.into(),
            choices: vec![ChunkChoice {
                index: 0,
                delta: ChunkDelta {
                    content: Some(text.into()),
                    ..ChunkDelta::default()
                },
                finish_reason: None,
            }],
            usage: None,
        }
    }

    /// Trailing usage-only chunk (empty `choices`).
    #[must_use]
    pub fn usage_only(id: impl Into<String>, created: i64, model: impl Into<String>, usage: Usage) -> Self {
        Self {
            id: id.into(),
            object: "chat.completion.chunk".to_string(),
            created,
            model: model.into(),
            choices: Vec::new(),
            usage: Some(usage),
        }
    }

    /// Concatenated content deltas of this chunk.
    #[must_use]
    pub fn content_text(&self) -> String {
        self.choices
            .iter()
            .filter_map(|choice| choice.delta.content.as_deref())
            .collect()
    }

    /// Finish reason, if any choice carries one.
    #[must_use]
    pub fn finish_reason(&self) -> Option<&str> {
        self.choices
            .iter()
            .find_map(|choice| choice.finish_reason.as_deref())
    }
}

/// One choice inside a streaming chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkChoice {
    /// Choice index
    pub index: u32,

    /// The incremental delta
    pub delta: ChunkDelta,

    /// Why generation stopped, on the final content chunk
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

/// Incremental message delta.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkDelta {
    /// Role, sent on the first chunk of a stream
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<MessageRole>,

    /// Appended content text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    /// Tool call fragments
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallDelta>>,
}

/// Incremental tool call fragment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallDelta {
    /// Which tool call this fragment extends
    pub index: u32,

    /// Call identifier, sent on the first fragment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Call type, sent on the first fragment
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub call_type: Option<String>,

    /// Function name/argument fragment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<FunctionDelta>,
}

/// Function fragment inside a tool call delta.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FunctionDelta {
    /// Function name, sent on the first fragment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Appended piece of the JSON-encoded arguments
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}
