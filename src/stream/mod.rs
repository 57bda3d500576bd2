//! Streaming Module
//!
//! Incremental consumer for Server-Sent Events chat completions:
//! frames, decoded chunks, per-choice accumulation and the cancellable
//! stream handed to callers.

pub mod accumulator;
pub mod chunk;
pub mod controller;
pub mod frame;

pub use accumulator::{AccumulatedMessage, DeltaAccumulator, ProtocolViolation, ToolCallAccumulator};
pub use chunk::{
    decode_frame, decode_payload, ChoiceDelta, CompletionChunk, Delta, FinishReason,
    FunctionFragment, StreamEvent, ToolCallFragment,
};
pub use controller::{ByteStream, ChatStream, StreamState};
pub use frame::{Frame, FrameReader, DONE_SENTINEL};
