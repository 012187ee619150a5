//! Message types for completion transcripts and chat delivery

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Message role in a completion transcript
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Function,
}

/// A message in the completion transcript
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,

    /// Function name (for function results)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Function call made by the assistant
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<ToolCallRequest>,
}

impl Message {
    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            name: None,
            tool_call: None,
        }
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            name: None,
            tool_call: None,
        }
    }

    /// Create an assistant message carrying a function call
    pub fn assistant_with_tool(content: impl Into<String>, tool_call: ToolCallRequest) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            name: None,
            tool_call: Some(tool_call),
        }
    }

    /// Create a function result message
    pub fn tool_result(name: impl Into<String>, result: impl Into<String>) -> Self {
        Self {
            role: Role::Function,
            content: result.into(),
            name: Some(name.into()),
            tool_call: None,
        }
    }
}

/// A function call request from the LLM
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub name: String,
    pub arguments: serde_json::Value,
}

/// A user mentioned in a chat message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mention {
    pub id: u64,
    pub name: String,
}

/// The message an inbound message replies to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotedReply {
    pub author_name: String,
    pub content: String,
}

/// Where a conversation takes place
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    Guild { id: u64, name: String },
    DirectMessage,
}

impl Environment {
    /// Description embedded in the system preamble
    pub fn describe(&self) -> String {
        match self {
            Environment::Guild { name, .. } => format!("Discord server named \"{}\"", name),
            Environment::DirectMessage => "Discord DM".to_string(),
        }
    }

    pub fn guild_id(&self) -> Option<u64> {
        match self {
            Environment::Guild { id, .. } => Some(*id),
            Environment::DirectMessage => None,
        }
    }
}

/// Inbound message from a chat platform
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Platform message id, also used to name generated images
    pub id: String,
    pub author_id: u64,
    pub author_name: String,
    pub author_is_bot: bool,
    /// The bot's own user id, for mention detection
    pub bot_id: u64,
    pub content: String,
    pub environment: Environment,
    pub mentions: Vec<Mention>,
    pub reply: Option<QuotedReply>,
}

impl InboundMessage {
    pub fn new(author_id: u64, author_name: &str, content: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            author_id,
            author_name: author_name.to_string(),
            author_is_bot: false,
            bot_id: 0,
            content: content.to_string(),
            environment: Environment::DirectMessage,
            mentions: vec![],
            reply: None,
        }
    }

    pub fn guild_id(&self) -> Option<u64> {
        self.environment.guild_id()
    }
}

/// One outbound chat message
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub content: Option<String>,
    /// Thread as a reply to the triggering message
    pub reply: bool,
    pub attachments: Vec<PathBuf>,
}

impl OutgoingMessage {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            reply: false,
            attachments: vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_creation() {
        let msg = Message::user("Hello");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.content, "Hello");

        let result = Message::tool_result("generate_image", "done");
        assert_eq!(result.role, Role::Function);
        assert_eq!(result.name.as_deref(), Some("generate_image"));
    }

    #[test]
    fn test_environment_description() {
        let guild = Environment::Guild { id: 1, name: "Bakery".to_string() };
        assert_eq!(guild.describe(), "Discord server named \"Bakery\"");
        assert_eq!(guild.guild_id(), Some(1));
        assert_eq!(Environment::DirectMessage.describe(), "Discord DM");
        assert_eq!(Environment::DirectMessage.guild_id(), None);
    }

    #[test]
    fn test_inbound_defaults_to_dm() {
        let msg = InboundMessage::new(5, "ada", "hi");
        assert_eq!(msg.guild_id(), None);
        assert!(!msg.id.is_empty());
    }
}
