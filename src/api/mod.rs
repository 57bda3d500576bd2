//! API Module
//!
//! Chat request and message types.

pub mod chat;

pub use chat::{
    ChatRequest, CompletionTokensDetails, FunctionCall, Message, StreamOptions, ToolCall, Usage,
    CHAT_MODEL, REASONER_MODEL,
};
