//! Delta Accumulator
//!
//! Rebuilds the full assistant message for every choice index out of the
//! deltas of one stream. Text is append-only; a call's id and name are set
//! once; nothing is accepted for a choice after its finish reason.

use crate::api::chat::{FunctionCall, Message, ToolCall, Usage};
use crate::error::{DeepSeekError, Result};
use crate::stream::chunk::{ChoiceDelta, CompletionChunk, FinishReason, ToolCallFragment};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use tracing::warn;

/// Running reconstruction of one choice
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccumulatedMessage {
    /// Choice index
    pub index: u32,

    /// Role from first chunk
    pub role: Option<String>,

    /// Accumulated content
    pub content: String,

    /// Accumulated reasoning
    pub reasoning: String,

    /// In-progress tool calls keyed by call index
    pub tool_calls: BTreeMap<u32, ToolCallAccumulator>,

    /// Set once the choice is finalized
    pub finish_reason: Option<FinishReason>,
}

impl AccumulatedMessage {
    fn new(index: u32) -> Self {
        Self {
            index,
            ..Self::default()
        }
    }

    /// Whether a finish reason has arrived
    pub fn is_finalized(&self) -> bool {
        self.finish_reason.is_some()
    }

    /// Tool call at a call index
    pub fn tool_call(&self, index: u32) -> Option<&ToolCallAccumulator> {
        self.tool_calls.get(&index)
    }

    /// Convert to an assistant message that can be sent back in a follow-up
    /// request
    pub fn to_message(&self) -> Message {
        let tool_calls = if self.tool_calls.is_empty() {
            None
        } else {
            Some(
                self.tool_calls
                    .values()
                    .map(ToolCallAccumulator::to_tool_call)
                    .collect(),
            )
        };

        Message {
            role: self.role.clone().unwrap_or_else(|| "assistant".to_string()),
            content: self.content.clone(),
            name: None,
            prefix: None,
            reasoning_content: (!self.reasoning.is_empty()).then(|| self.reasoning.clone()),
            tool_calls,
            tool_call_id: None,
        }
    }
}

/// Accumulator for a single tool call
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ToolCallAccumulator {
    pub id: Option<String>,
    pub call_type: Option<String>,
    pub name: Option<String>,
    pub arguments: String,
}

impl ToolCallAccumulator {
    /// Deserialize the accumulated argument JSON
    pub fn parse_arguments<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_str(&self.arguments).map_err(|e| {
            DeepSeekError::MalformedChunk(format!(
                "tool call arguments are not valid JSON: {}",
                e
            ))
        })
    }

    pub fn to_tool_call(&self) -> ToolCall {
        ToolCall {
            id: self.id.clone().unwrap_or_default(),
            call_type: self
                .call_type
                .clone()
                .unwrap_or_else(|| "function".to_string()),
            function: FunctionCall {
                name: self.name.clone().unwrap_or_default(),
                arguments: self.arguments.clone(),
            },
        }
    }
}

/// A recoverable server mistake that was logged and ignored
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolViolation {
    pub choice: u32,
    pub call: u32,
    /// "id" or "name"
    pub field: &'static str,
    pub kept: String,
    pub rejected: String,
}

/// Per-stream accumulator for all choices
#[derive(Debug, Default)]
pub struct DeltaAccumulator {
    messages: BTreeMap<u32, AccumulatedMessage>,
    id: Option<String>,
    model: Option<String>,
    usage: Option<Usage>,
    violations: Vec<ProtocolViolation>,
}

impl DeltaAccumulator {
    /// Create a new accumulator
    pub fn new() -> Self {
        Self::default()
    }

    /// Record chunk-level metadata (response id, model, usage)
    pub fn observe_chunk(&mut self, chunk: &CompletionChunk) {
        if self.id.is_none() {
            self.id = chunk.id.clone();
        }
        if self.model.is_none() {
            self.model = chunk.model.clone();
        }
        if chunk.usage.is_some() {
            self.usage = chunk.usage.clone();
        }
    }

    /// Merge one choice delta and return the updated message
    pub fn apply(&mut self, choice: &ChoiceDelta) -> Result<&AccumulatedMessage> {
        let message = self
            .messages
            .entry(choice.index)
            .or_insert_with(|| AccumulatedMessage::new(choice.index));

        let delta = &choice.delta;

        if let Some(reason) = message.finish_reason {
            let changes_reason = choice.finish_reason.is_some_and(|r| r != reason);
            if delta.has_payload() || changes_reason {
                return Err(DeepSeekError::StreamProtocol(format!(
                    "delta for choice {} after it finished with {:?}",
                    choice.index, reason
                )));
            }
            return Ok(&*message);
        }

        if message.role.is_none() {
            message.role = delta.role.clone();
        }

        if let Some(content) = &delta.content {
            message.content.push_str(content);
        }

        if let Some(reasoning) = &delta.reasoning_content {
            message.reasoning.push_str(reasoning);
        }

        for fragment in delta.tool_calls.iter().flatten() {
            merge_fragment(message, fragment, &mut self.violations);
        }

        if choice.finish_reason.is_some() {
            message.finish_reason = choice.finish_reason;
        }

        Ok(&*message)
    }

    /// Message for a choice index
    pub fn message(&self, index: u32) -> Option<&AccumulatedMessage> {
        self.messages.get(&index)
    }

    /// All messages ordered by choice index
    pub fn messages(&self) -> impl Iterator<Item = &AccumulatedMessage> {
        self.messages.values()
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    pub fn usage(&self) -> Option<&Usage> {
        self.usage.as_ref()
    }

    /// Non-fatal protocol violations seen so far
    pub fn violations(&self) -> &[ProtocolViolation] {
        &self.violations
    }
}

fn merge_fragment(
    message: &mut AccumulatedMessage,
    fragment: &ToolCallFragment,
    violations: &mut Vec<ProtocolViolation>,
) {
    let call = message.tool_calls.entry(fragment.index).or_default();
    let function = fragment.function.as_ref();

    let mut set_once = |field: &'static str, slot: &mut Option<String>, value: Option<&str>| {
        let Some(value) = value.filter(|v| !v.is_empty()) else {
            return;
        };
        match slot.as_deref() {
            None => *slot = Some(value.to_string()),
            Some(kept) if kept != value => {
                warn!(
                    choice = message.index,
                    call = fragment.index,
                    field,
                    kept,
                    rejected = value,
                    "conflicting tool call {} ignored",
                    field
                );
                violations.push(ProtocolViolation {
                    choice: message.index,
                    call: fragment.index,
                    field,
                    kept: kept.to_string(),
                    rejected: value.to_string(),
                });
            }
            Some(_) => {}
        }
    };

    set_once("id", &mut call.id, fragment.id.as_deref());
    set_once(
        "name",
        &mut call.name,
        function.and_then(|f| f.name.as_deref()),
    );

    if call.call_type.is_none() {
        call.call_type = fragment.call_type.clone();
    }

    if let Some(arguments) = function.and_then(|f| f.arguments.as_ref()) {
        call.arguments.push_str(arguments);
    }
}
