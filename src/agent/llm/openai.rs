//! OpenAI completion client.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tracing::debug;

use crate::config::OpenAiConfig;
use crate::error::Error;
use crate::tools::ToolDefinition;
use crate::Result;

use super::super::message::{Message, Role, ToolCallRequest};
use super::{
    ChatCompletionResponse, ErrorEnvelope, LlmClient, LlmResponse, Sampling,
    TextCompletionResponse, Usage, UsageBlock,
};

/// OpenAI API client for chat and legacy prompt completion.
#[derive(Clone)]
pub struct OpenAiClient {
    api_key: String,
    base_url: String,
    chat_model: String,
    legacy_model: String,
    client: Client,
}

impl OpenAiClient {
    pub fn new(config: &OpenAiConfig) -> Self {
        Self {
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            chat_model: config.chat_model.clone(),
            legacy_model: config.legacy_model.clone(),
            client: Client::new(),
        }
    }

    fn convert_messages(&self, messages: &[Message]) -> Vec<Value> {
        messages
            .iter()
            .map(|m| match m.role {
                Role::Function => json!({
                    "role": "function",
                    "name": m.name.as_deref().unwrap_or("unknown"),
                    "content": m.content
                }),
                Role::Assistant if m.tool_call.is_some() => {
                    let call = m.tool_call.as_ref().map(|tc| {
                        json!({
                            "name": tc.name,
                            "arguments": tc.arguments.to_string()
                        })
                    });
                    let content = if m.content.is_empty() {
                        Value::Null
                    } else {
                        Value::String(m.content.clone())
                    };
                    json!({
                        "role": "assistant",
                        "content": content,
                        "function_call": call
                    })
                }
                _ => json!({
                    "role": m.role,
                    "content": m.content
                }),
            })
            .collect()
    }

    fn convert_tools(&self, tools: &[ToolDefinition]) -> Option<Value> {
        if tools.is_empty() {
            return None;
        }

        Some(Value::Array(
            tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters
                    })
                })
                .collect(),
        ))
    }

    async fn post(&self, path: &str, body: &Value) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        Err(classify_failure(status, &text))
    }
}

/// Map a failed HTTP exchange onto the error taxonomy.
pub(crate) fn classify_failure(status: StatusCode, body: &str) -> Error {
    let message = serde_json::from_str::<ErrorEnvelope>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| body.to_string());

    match status {
        StatusCode::TOO_MANY_REQUESTS => Error::RateLimited(message),
        StatusCode::SERVICE_UNAVAILABLE => Error::ServiceUnavailable(message),
        s if s.is_server_error() => Error::Api(format!("{}: {}", s, message)),
        s => Error::Llm(format!("OpenAI API error {}: {}", s, message)),
    }
}

fn convert_usage(usage: Option<UsageBlock>) -> Option<Usage> {
    usage.map(|u| Usage {
        total_tokens: u.total_tokens,
    })
}

pub(crate) fn parse_chat_response(response: ChatCompletionResponse) -> Result<LlmResponse> {
    let usage = convert_usage(response.usage);
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| Error::Llm("No choices in response".to_string()))?;

    let tool_call = match choice.message.function_call {
        Some(fc) => {
            let arguments: Value = serde_json::from_str(&fc.arguments)
                .map_err(|e| Error::Llm(format!("Malformed arguments for {}: {}", fc.name, e)))?;
            Some(ToolCallRequest {
                name: fc.name,
                arguments,
            })
        }
        None => None,
    };

    Ok(LlmResponse {
        content: choice.message.content,
        tool_call,
        usage,
    })
}

pub(crate) fn parse_text_response(response: TextCompletionResponse) -> Result<LlmResponse> {
    let usage = convert_usage(response.usage);
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| Error::Llm("No choices in response".to_string()))?;

    Ok(LlmResponse {
        content: Some(choice.text),
        tool_call: None,
        usage,
    })
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn chat(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<LlmResponse> {
        let mut request = json!({
            "model": self.chat_model,
            "messages": self.convert_messages(messages),
        });

        if let Some(functions) = self.convert_tools(tools) {
            request["functions"] = functions;
        }

        debug!("Chat completion with {} messages on {}", messages.len(), self.chat_model);

        let response = self.post("/chat/completions", &request).await?;
        let parsed: ChatCompletionResponse = response.json().await?;
        parse_chat_response(parsed)
    }

    async fn complete(&self, prompt: &str, sampling: &Sampling) -> Result<LlmResponse> {
        let request = json!({
            "model": self.legacy_model,
            "prompt": prompt,
            "temperature": sampling.temperature,
            "max_tokens": sampling.max_tokens,
            "top_p": sampling.top_p,
            "frequency_penalty": sampling.frequency_penalty,
            "presence_penalty": sampling.presence_penalty,
        });

        debug!("Prompt completion on {}", self.legacy_model);

        let response = self.post("/completions", &request).await?;
        let parsed: TextCompletionResponse = response.json().await?;
        parse_text_response(parsed)
    }

    fn default_model(&self) -> &str {
        &self.chat_model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> OpenAiClient {
        OpenAiClient::new(&OpenAiConfig::default())
    }

    #[test]
    fn test_classify_failure() {
        let body = r#"{"error": {"message": "Rate limit reached"}}"#;
        match classify_failure(StatusCode::TOO_MANY_REQUESTS, body) {
            Error::RateLimited(msg) => assert_eq!(msg, "Rate limit reached"),
            other => panic!("unexpected {other:?}"),
        }

        assert!(classify_failure(StatusCode::SERVICE_UNAVAILABLE, "").is_transient());
        assert!(classify_failure(StatusCode::BAD_GATEWAY, "oops").is_transient());
        assert!(!classify_failure(StatusCode::BAD_REQUEST, "nope").is_transient());
        assert!(!classify_failure(StatusCode::UNAUTHORIZED, "nope").is_transient());
    }

    #[test]
    fn test_parse_function_call() {
        let raw = r#"{
            "choices": [{
                "message": {
                    "content": null,
                    "function_call": {
                        "name": "generate_image",
                        "arguments": "{\"descriptions\": [\"a cat\"], \"aspect_ratio\": \"square\"}"
                    }
                },
                "finish_reason": "function_call"
            }],
            "usage": {"prompt_tokens": 50, "completion_tokens": 20, "total_tokens": 70}
        }"#;

        let response = parse_chat_response(serde_json::from_str(raw).unwrap()).unwrap();
        assert_eq!(response.total_tokens(), Some(70));
        let call = response.tool_call.as_ref().expect("function call");
        assert_eq!(call.name, "generate_image");
        assert_eq!(call.arguments["descriptions"][0], "a cat");
        assert!(response.content.is_none());
    }

    #[test]
    fn test_parse_malformed_arguments() {
        let raw = r#"{
            "choices": [{"message": {"content": null, "function_call": {"name": "generate_image", "arguments": "{oops"}}}]
        }"#;
        let err = parse_chat_response(serde_json::from_str(raw).unwrap()).unwrap_err();
        assert!(!err.is_transient());
    }

    #[test]
    fn test_parse_text_completion() {
        let raw = r#"{"choices": [{"text": " \"Hi there\" ", "finish_reason": "stop"}], "usage": {"total_tokens": 12}}"#;
        let response = parse_text_response(serde_json::from_str(raw).unwrap()).unwrap();
        assert_eq!(response.content.as_deref(), Some(" \"Hi there\" "));
        assert_eq!(response.total_tokens(), Some(12));
    }

    #[test]
    fn test_convert_messages_with_function_turns() {
        let call = ToolCallRequest {
            name: "generate_image".to_string(),
            arguments: json!({"descriptions": ["a dog"], "aspect_ratio": "portrait"}),
        };
        let messages = vec![
            Message::system("be nice"),
            Message::user("draw a dog"),
            Message::assistant_with_tool("", call),
            Message::tool_result("generate_image", "Successfully generated all images."),
        ];

        let converted = client().convert_messages(&messages);
        assert_eq!(converted[0]["role"], "system");
        assert_eq!(converted[1]["role"], "user");
        assert_eq!(converted[2]["content"], Value::Null);
        assert_eq!(converted[2]["function_call"]["name"], "generate_image");
        assert!(converted[2]["function_call"]["arguments"].is_string());
        assert_eq!(converted[3]["role"], "function");
        assert_eq!(converted[3]["name"], "generate_image");
    }

    #[test]
    fn test_no_tools_means_no_functions() {
        assert!(client().convert_tools(&[]).is_none());
    }
}
