//! Adapters module: chat platform integrations.
//!
//! Each platform provides two things: a [`Channel`] that owns the connection
//! and event loop, and a [`ChatTransport`] scoped to the conversation a single
//! inbound message arrived in. The message pipeline only talks to the
//! transport.
//!
//! # Supported Channels
//!
//! - **Discord**: gateway bot via serenity
//! - **CLI**: local terminal session sharing the same pipeline
//!
//! # Adding a New Channel
//!
//! 1. Create a new file (e.g., `matrix.rs`)
//! 2. Implement [`ChatTransport`] for its conversations and [`Channel`] for the loop
//! 3. Add to [`ChannelRegistry`]

pub mod cli;
pub mod discord;

use async_trait::async_trait;

use crate::agent::OutgoingMessage;
use crate::config::Config;
use crate::Result;

/// Channel trait for chat adapters.
///
/// All channel implementations must be [`Send`] + [`Sync`] for async compatibility.
pub trait Channel: Send + Sync {
    /// Channel name (e.g., "discord", "cli").
    fn name(&self) -> &str;

    /// Start listening for messages.
    fn start(&self) -> impl std::future::Future<Output = crate::Result<()>> + Send;

    /// Stop the channel.
    fn stop(&self) -> impl std::future::Future<Output = crate::Result<()>> + Send;
}

/// The conversation one inbound message belongs to.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Show the typing indicator until [`ChatTransport::stop_typing`].
    async fn start_typing(&self) -> Result<()>;

    async fn stop_typing(&self);

    /// Whether the triggering message is still the newest in the conversation.
    async fn is_latest(&self) -> Result<bool>;

    /// Post one message.
    async fn send(&self, message: OutgoingMessage) -> Result<()>;
}

/// Channel registry: metadata about available channels.
///
/// # Example
///
/// ```ignore
/// for name in ChannelRegistry::available() {
///     if ChannelRegistry::is_enabled(name, &config) {
///         println!("{} is enabled", name);
///     }
/// }
/// ```
pub struct ChannelRegistry;

impl ChannelRegistry {
    /// List all available channel names.
    pub fn available() -> &'static [&'static str] {
        &["cli", "discord"]
    }

    /// Check if a channel is usable with the current config.
    pub fn is_enabled(name: &str, config: &Config) -> bool {
        match name {
            "cli" => true,
            "discord" => !config.discord.token.is_empty(),
            _ => false,
        }
    }

    /// Get a human-readable description of a channel.
    pub fn description(name: &str) -> &'static str {
        match name {
            "cli" => "Local terminal session",
            "discord" => "Discord gateway bot",
            _ => "Unknown channel",
        }
    }
}

/// Transport that records everything sent through it.
#[cfg(test)]
pub struct RecordingTransport {
    sent: std::sync::Mutex<Vec<OutgoingMessage>>,
    latest: std::sync::atomic::AtomicBool,
    typing: std::sync::atomic::AtomicUsize,
}

#[cfg(test)]
impl RecordingTransport {
    pub fn new() -> Self {
        Self {
            sent: std::sync::Mutex::new(Vec::new()),
            latest: std::sync::atomic::AtomicBool::new(true),
            typing: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    pub fn set_latest(&self, latest: bool) {
        self.latest.store(latest, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<OutgoingMessage> {
        self.sent.lock().unwrap().clone()
    }

    /// Text of every sent message that has any.
    pub fn texts(&self) -> Vec<String> {
        self.sent().into_iter().filter_map(|m| m.content).collect()
    }

    pub fn typing_started(&self) -> usize {
        self.typing.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
#[async_trait]
impl ChatTransport for RecordingTransport {
    async fn start_typing(&self) -> Result<()> {
        self.typing.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }

    async fn stop_typing(&self) {}

    async fn is_latest(&self) -> Result<bool> {
        Ok(self.latest.load(std::sync::atomic::Ordering::SeqCst))
    }

    async fn send(&self, message: OutgoingMessage) -> Result<()> {
        self.sent.lock().unwrap().push(message);
        Ok(())
    }
}
