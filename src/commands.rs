//! Slash commands
//!
//! Platform-neutral logic behind `/help`, `/quota`, `/sentiment`, `/legacy`
//! and `/images`. Adapters register the commands and render the replies.

use chrono::{DateTime, Utc};

use crate::clock;
use crate::config::QuotaConfig;
use crate::sentiment::{Sentiment, SENTIMENTS};
use crate::store::SettingsStore;
use crate::Result;

/// Embed colour of the help card.
pub const HELP_COLOUR: u32 = 0xb4bcac;

const EXEMPT_NOTE: &str = "\n(The token limit is disabled for this server)";

/// A parsed slash command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Quota,
    Sentiment(String),
    Legacy,
    Images,
}

impl Command {
    /// Name and description of every command, in registration order.
    pub const ALL: [(&'static str, &'static str); 5] = [
        ("help", "Get to know more about this bot."),
        ("quota", "See how many tokens you have left for today."),
        ("sentiment", "Set your preferred sentiment for the bot to use when generating text."),
        ("legacy", "Toggle the usage of the legacy model."),
        ("images", "Toggle if the bot is allowed to attach AI-generated images."),
    ];

    /// Build from a command name and its optional `sentiment` option.
    pub fn parse(name: &str, option: Option<&str>) -> Option<Self> {
        match name {
            "help" => Some(Command::Help),
            "quota" => Some(Command::Quota),
            "sentiment" => option.map(|key| Command::Sentiment(key.to_string())),
            "legacy" => Some(Command::Legacy),
            "images" => Some(Command::Images),
            _ => None,
        }
    }
}

/// Who invoked a command, and where.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub user_id: u64,
    pub user_name: String,
    pub guild_id: Option<u64>,
}

/// Reply to a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Text(String),
    Embed { description: String, colour: u32 },
}

impl Reply {
    pub fn as_text(&self) -> &str {
        match self {
            Reply::Text(text) => text,
            Reply::Embed { description, .. } => description,
        }
    }
}

/// Sentiment choices offered by `/sentiment`, as (display name, key).
pub fn sentiment_choices() -> impl Iterator<Item = (&'static str, &'static str)> {
    SENTIMENTS.iter().map(|s| (s.display_name, s.key))
}

/// Executes commands against the settings store.
#[derive(Clone)]
pub struct CommandHandler {
    store: SettingsStore,
    quota: QuotaConfig,
}

impl CommandHandler {
    pub fn new(store: SettingsStore, quota: QuotaConfig) -> Self {
        Self { store, quota }
    }

    pub async fn execute(&self, command: &Command, who: &Invocation) -> Result<Reply> {
        self.execute_at(command, who, Utc::now()).await
    }

    pub async fn execute_at(
        &self,
        command: &Command,
        who: &Invocation,
        now: DateTime<Utc>,
    ) -> Result<Reply> {
        let settings = self.store.get_at(who.user_id, now).await?;
        let name = &who.user_name;

        let reply = match command {
            Command::Help => Reply::Embed {
                description: help_text(settings.sentiment(), self.store.default_quota()),
                colour: HELP_COLOUR,
            },
            Command::Quota => {
                let left = settings.quota().max(0);
                let (hours, minutes) = clock::time_until(settings.refresh_time(), now);
                let ending = if self.quota.is_exempt(who.guild_id) { EXEMPT_NOTE } else { "" };
                Reply::Text(format!(
                    "**{}**, you have **{} {}** left for **{}h {}min**.{}",
                    name,
                    left,
                    if left == 1 { "token" } else { "tokens" },
                    hours,
                    minutes,
                    ending
                ))
            }
            Command::Sentiment(key) => {
                let sentiment = Sentiment::resolve(key);
                settings.set_sentiment(sentiment).await?;
                Reply::Text(format!(
                    "**{}**, your preferred sentiment has been set to \"**{}**\".",
                    name, sentiment.display_name
                ))
            }
            Command::Legacy => {
                let enabled = !settings.use_legacy();
                settings.set_use_legacy(enabled).await?;
                Reply::Text(format!(
                    "**{}**, you have {} the legacy model.",
                    name,
                    enabled_word(enabled)
                ))
            }
            Command::Images => {
                let enabled = !settings.allow_images();
                settings.set_allow_images(enabled).await?;
                Reply::Text(format!(
                    "**{}**, you have {} image attachments.",
                    name,
                    enabled_word(enabled)
                ))
            }
        };

        Ok(reply)
    }
}

fn enabled_word(enabled: bool) -> &'static str {
    if enabled {
        "enabled"
    } else {
        "disabled"
    }
}

fn help_text(sentiment: &Sentiment, daily_quota: i64) -> String {
    format!(
        "Hello there! I'm a bot that uses AI to answer your questions. Just mention me at the start of \
         your question and I'll try my best to help you. You can also change the tone of my replies by \
         using the /sentiment command. Your current tone choice is \"**{}**\".\n\n\
         Please remember, each answer costs some tokens and you can only use up to {} tokens per day. \
         To check how many tokens you have left and when they will be refilled, use the /quota command.\n\n\
         You can also use the /images command to decide if you want me to add images made by Adobe \
         Firefly (an AI image generation tool) to my answers.",
        sentiment.display_name, daily_quota
    )
}
