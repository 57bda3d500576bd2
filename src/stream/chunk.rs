//! Event Decoder
//!
//! Structural decode of frame payloads into completion chunks.

use crate::api::chat::Usage;
use crate::error::{DeepSeekError, Result};
use crate::stream::frame::Frame;
use serde::{Deserialize, Serialize};

/// A decoded frame
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// A content or usage chunk
    Chunk(CompletionChunk),

    /// The `[DONE]` sentinel
    Done,
}

/// A streaming chunk from the API
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionChunk {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<u64>,

    /// Choices with deltas
    #[serde(default)]
    pub choices: Vec<ChoiceDelta>,

    /// Usage info (only in the final chunk when requested)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl CompletionChunk {
    /// The trailing chunk that carries only token usage
    pub fn is_usage_only(&self) -> bool {
        self.choices.is_empty() && self.usage.is_some()
    }
}

/// A choice in a streaming chunk
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChoiceDelta {
    /// Choice index
    #[serde(default)]
    pub index: u32,

    /// The delta (partial message)
    #[serde(default)]
    pub delta: Delta,

    /// Finish reason (set in the last chunk for this choice)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
}

/// Delta content in a streaming chunk
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Delta {
    /// Role (usually only in the first chunk)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    /// Content delta
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    /// Reasoning delta (reasoner model)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,

    /// Tool call fragments
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallFragment>>,
}

impl Delta {
    /// Whether this delta would change an accumulated message
    pub fn has_payload(&self) -> bool {
        self.content.as_deref().is_some_and(|s| !s.is_empty())
            || self.reasoning_content.as_deref().is_some_and(|s| !s.is_empty())
            || self.tool_calls.as_ref().is_some_and(|calls| !calls.is_empty())
    }
}

/// Partial tool call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolCallFragment {
    /// Index in the tool_calls array
    #[serde(default)]
    pub index: u32,

    /// Tool call ID (only in the first fragment for this call)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub call_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<FunctionFragment>,
}

/// Partial function call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FunctionFragment {
    /// Function name (only once)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Piece of the argument JSON text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

/// Why a choice stopped generating
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    InsufficientSystemResource,
    #[serde(other)]
    Unknown,
}

/// Decode one frame
pub fn decode_frame(frame: &Frame) -> Result<StreamEvent> {
    match frame {
        Frame::Done => Ok(StreamEvent::Done),
        Frame::Data(payload) => decode_payload(payload).map(StreamEvent::Chunk),
    }
}

/// Decode a `data:` payload into a chunk
pub fn decode_payload(payload: &str) -> Result<CompletionChunk> {
    let value: serde_json::Value = serde_json::from_str(payload).map_err(|e| {
        DeepSeekError::MalformedChunk(format!("{}. Data: {}", e, excerpt(payload)))
    })?;

    let object = value.as_object().ok_or_else(|| {
        DeepSeekError::MalformedChunk(format!("expected a JSON object. Data: {}", excerpt(payload)))
    })?;

    if let Some(error) = object.get("error") {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return Err(DeepSeekError::Service(message));
    }

    if !object.contains_key("choices") && !object.contains_key("usage") {
        return Err(DeepSeekError::MalformedChunk(format!(
            "chunk has neither choices nor usage. Data: {}",
            excerpt(payload)
        )));
    }

    serde_json::from_value(value).map_err(|e| {
        DeepSeekError::MalformedChunk(format!("{}. Data: {}", e, excerpt(payload)))
    })
}

fn excerpt(payload: &str) -> &str {
    match payload.char_indices().nth(200) {
        Some((end, _)) => &payload[..end],
        None => payload,
    }
}
