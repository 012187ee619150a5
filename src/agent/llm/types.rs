//! Wire types for the OpenAI completion endpoints.

use serde::{Deserialize, Serialize};

/// `/chat/completions` response.
#[derive(Debug, Deserialize)]
pub struct ChatCompletionResponse {
    pub choices: Vec<ChatChoice>,
    pub usage: Option<UsageBlock>,
}

/// A single chat response choice.
#[derive(Debug, Deserialize)]
pub struct ChatChoice {
    pub message: ChatChoiceMessage,
}

/// Assistant message inside a choice.
#[derive(Debug, Deserialize)]
pub struct ChatChoiceMessage {
    pub content: Option<String>,
    pub function_call: Option<FunctionCall>,
}

/// Function call requested by the model; `arguments` is JSON text.
#[derive(Debug, Deserialize, Serialize)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: String,
}

/// `/completions` response.
#[derive(Debug, Deserialize)]
pub struct TextCompletionResponse {
    pub choices: Vec<TextChoice>,
    pub usage: Option<UsageBlock>,
}

#[derive(Debug, Deserialize)]
pub struct TextChoice {
    pub text: String,
}

/// Token usage block.
#[derive(Debug, Deserialize)]
pub struct UsageBlock {
    #[serde(default)]
    pub total_tokens: usize,
}

/// Error envelope returned with non-2xx statuses.
#[derive(Debug, Deserialize)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
}

#[derive(Debug, Deserialize)]
pub struct ErrorBody {
    pub message: String,
}
