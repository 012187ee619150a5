//! LLM client abstraction layer.
//!
//! This module provides:
//! - [`LlmClient`] trait for the completion service
//! - [`OpenAiClient`], the HTTP implementation
//!
//! Two request shapes are supported: chat transcripts with optional function
//! definitions, and plain prompt completion for the legacy model.

mod types;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::tools::ToolDefinition;
use crate::Result;

pub use types::*;

pub mod openai;

pub use openai::OpenAiClient;

use super::message::{Message, ToolCallRequest};

/// Response from the completion service.
#[derive(Debug, Clone)]
pub struct LlmResponse {
    /// Text content of the response.
    pub content: Option<String>,

    /// Function call requested by the model.
    pub tool_call: Option<ToolCallRequest>,

    /// Token usage, when the service reported it.
    pub usage: Option<Usage>,
}

impl LlmResponse {
    /// Create a simple text response.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            tool_call: None,
            usage: None,
        }
    }

    /// Attach a usage report.
    pub fn with_usage(mut self, total_tokens: usize) -> Self {
        self.usage = Some(Usage { total_tokens });
        self
    }

    /// Tokens billed for this call, if reported.
    pub fn total_tokens(&self) -> Option<usize> {
        self.usage.as_ref().map(|u| u.total_tokens)
    }
}

/// Token usage information.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub total_tokens: usize,
}

/// Sampling parameters for plain prompt completion.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sampling {
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
    pub frequency_penalty: f32,
    pub presence_penalty: f32,
}

impl Default for Sampling {
    /// Parameters the legacy model is always called with.
    fn default() -> Self {
        Self {
            temperature: 0.9,
            max_tokens: 425,
            top_p: 1.0,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
        }
    }
}

/// LLM client trait: completion service abstraction.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send a chat transcript, optionally offering functions.
    async fn chat(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<LlmResponse>;

    /// Complete a raw prompt on the legacy model.
    async fn complete(&self, prompt: &str, sampling: &Sampling) -> Result<LlmResponse>;

    /// Get the default model for this provider.
    fn default_model(&self) -> &str;
}

/// Fake LLM client for testing.
///
/// Replays scripted results in order and records every request.
#[cfg(test)]
pub struct FakeLlmClient {
    responses: std::sync::Mutex<std::collections::VecDeque<Result<LlmResponse>>>,
    requests: std::sync::Mutex<Vec<FakeRequest>>,
}

/// A request seen by [`FakeLlmClient`].
#[cfg(test)]
#[derive(Debug, Clone)]
pub enum FakeRequest {
    Chat { messages: Vec<Message>, tools: Vec<ToolDefinition> },
    Complete { prompt: String, sampling: Sampling },
}

#[cfg(test)]
impl FakeLlmClient {
    /// Create with scripted results.
    pub fn scripted(responses: Vec<Result<LlmResponse>>) -> Self {
        Self {
            responses: std::sync::Mutex::new(responses.into()),
            requests: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Create with predefined text responses.
    pub fn new(responses: Vec<&str>) -> Self {
        Self::scripted(responses.iter().map(|s| Ok(LlmResponse::text(*s))).collect())
    }

    /// Number of requests made so far.
    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<FakeRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn next(&self, request: FakeRequest) -> Result<LlmResponse> {
        self.requests.lock().unwrap().push(request);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(crate::error::Error::Llm("No more fake responses".to_string())))
    }
}

#[cfg(test)]
#[async_trait]
impl LlmClient for FakeLlmClient {
    async fn chat(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<LlmResponse> {
        self.next(FakeRequest::Chat {
            messages: messages.to_vec(),
            tools: tools.to_vec(),
        })
    }

    async fn complete(&self, prompt: &str, sampling: &Sampling) -> Result<LlmResponse> {
        self.next(FakeRequest::Complete {
            prompt: prompt.to_string(),
            sampling: sampling.clone(),
        })
    }

    fn default_model(&self) -> &str {
        "fake-model"
    }
}
