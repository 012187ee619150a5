//! Agent module: core bot logic.
//!
//! This module contains:
//! - Message types (InboundMessage, Message, OutgoingMessage)
//! - LLM client trait and the OpenAI implementation
//! - Prompt builder for the persona preamble and user turn
//! - Completion handler with bounded retries and quota debits
//! - Message pipeline tying quota gate, completion and delivery together

mod completion;
mod message;
mod pipeline;
pub mod prompt;
pub mod retry;

// LLM providers in submodule
pub mod llm;

// Re-exports for convenience
pub use completion::{
    Completion, CompletionHandler, CompletionRequest, CONNECTION_APOLOGY, UNKNOWN_ERROR,
};
pub use llm::{LlmClient, LlmResponse, OpenAiClient, Sampling, Usage};
pub use message::{
    Environment, InboundMessage, Mention, Message, OutgoingMessage, QuotedReply, Role,
    ToolCallRequest,
};
pub use pipeline::{Handled, MessagePipeline, GREETING, IMAGE_FAILURE_NOTICE, TOO_LONG};
