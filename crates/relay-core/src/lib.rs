//! # Relay Core
//!
//! Core types, relay context, and error handling for the LLM Relay Hub.
//!
//! This crate provides the foundational types used throughout the hub:
//! - Canonical OpenAI-shaped request, response, and chunk types
//! - Usage accounting with cache-hit discounting
//! - The relay error taxonomy shared by every crate
//! - The per-attempt relay context handed to adapters

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod request;
pub mod response;
pub mod streaming;
pub mod types;
pub mod usage;

// Re-export commonly used types
pub use error::{RelayError, RelayResult};
pub use request::{
    ChatMessage, ChatRequest, ContentPart, EmbeddingsRequest, FunctionCall, MessageContent,
    MessageRole, StreamOptions, ToolCall, ToolDefinition,
};
pub use response::{
    ChatChoice, ChatResponse, EmbeddingData, EmbeddingsResponse, ModelObject, ModelsResponse,
    ResponseMessage,
};
pub use streaming::{
    new_stream_id, ChatChunk, ChunkChoice, ChunkDelta, ChunkStream, FunctionDelta, ToolCallDelta,
};
pub use types::{ChannelKind, RelayContext, RelayMode};
pub use usage::Usage;
