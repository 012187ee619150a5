//! CLI adapter: talk to the bot from a terminal.
//!
//! Messages go through the same pipeline as Discord messages, posted as a
//! direct message from the local user. Lines starting with `/` run slash
//! commands instead.

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::warn;

use super::ChatTransport;
use crate::agent::{Handled, InboundMessage, LlmClient, MessagePipeline, OutgoingMessage};
use crate::commands::{Command, CommandHandler, Invocation, Reply};
use crate::ui;
use crate::Result;

/// User id the terminal user is stored under.
pub const LOCAL_USER_ID: u64 = 1;

/// Prints outgoing messages and keeps a copy of every attachment.
pub struct TerminalTransport {
    bot_name: String,
    save_dir: PathBuf,
    spinner: Mutex<Option<ProgressBar>>,
}

impl TerminalTransport {
    pub fn new(bot_name: impl Into<String>, save_dir: impl Into<PathBuf>) -> Self {
        Self {
            bot_name: bot_name.into(),
            save_dir: save_dir.into(),
            spinner: Mutex::new(None),
        }
    }

    async fn keep(&self, path: &Path) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.save_dir).await?;
        let target = match path.file_name() {
            Some(name) => self.save_dir.join(name),
            None => return Ok(path.to_path_buf()),
        };
        tokio::fs::copy(path, &target).await?;
        Ok(target)
    }
}

#[async_trait]
impl ChatTransport for TerminalTransport {
    async fn start_typing(&self) -> Result<()> {
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("  {spinner:.magenta} {msg}") {
            spinner.set_style(style);
        }
        spinner.set_message(format!("{} is typing...", self.bot_name));
        spinner.enable_steady_tick(Duration::from_millis(100));

        *self.spinner.lock().unwrap_or_else(PoisonError::into_inner) = Some(spinner);
        Ok(())
    }

    async fn stop_typing(&self) {
        let spinner = self.spinner.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(spinner) = spinner {
            spinner.finish_and_clear();
        }
    }

    async fn is_latest(&self) -> Result<bool> {
        Ok(true)
    }

    async fn send(&self, message: OutgoingMessage) -> Result<()> {
        if let Some(content) = &message.content {
            ui::print_bot_message(&self.bot_name, content, message.reply);
        }
        for path in &message.attachments {
            match self.keep(path).await {
                Ok(kept) => ui::print_attachment(&kept.display().to_string()),
                Err(e) => warn!("Could not keep attachment {:?}: {}", path, e),
            }
        }
        Ok(())
    }
}

/// CLI channel for local sessions.
pub struct CliChannel<C: LlmClient> {
    pipeline: MessagePipeline<C>,
    commands: CommandHandler,
    transport: TerminalTransport,
    user_name: String,
}

impl<C: LlmClient> CliChannel<C> {
    /// Create a new CLI channel.
    pub fn new(
        pipeline: MessagePipeline<C>,
        commands: CommandHandler,
        transport: TerminalTransport,
        user_name: impl Into<String>,
    ) -> Self {
        Self {
            pipeline,
            commands,
            transport,
            user_name: user_name.into(),
        }
    }

    /// Send one message through the pipeline.
    pub async fn run_once(&self, text: &str) -> Result<Handled> {
        let message = InboundMessage::new(LOCAL_USER_ID, &self.user_name, text);
        self.pipeline.handle(&message, &self.transport).await
    }

    /// Run a `/command [option]` line.
    pub async fn run_command(&self, line: &str) -> Result<()> {
        let mut parts = line.trim_start_matches('/').split_whitespace();
        let name = parts.next().unwrap_or_default();

        let Some(command) = Command::parse(name, parts.next()) else {
            ui::print_warning(&format!("Unknown command: /{}", name));
            return Ok(());
        };

        let who = Invocation {
            user_id: LOCAL_USER_ID,
            user_name: self.user_name.clone(),
            guild_id: None,
        };
        match self.commands.execute(&command, &who).await? {
            Reply::Text(text) => println!("\n{}", text),
            Reply::Embed { description, .. } => println!("\n{}", description.cyan()),
        }
        Ok(())
    }

    /// Run interactive REPL loop.
    pub async fn run_interactive(&self) -> Result<()> {
        let stdin = io::stdin();
        let mut stdout = io::stdout();

        loop {
            print!("\n{} ", format!("{}:", self.user_name).blue().bold());
            stdout.flush()?;

            let mut line = String::new();
            if stdin.lock().read_line(&mut line)? == 0 {
                // EOF
                break;
            }

            let input = line.trim();
            if input.is_empty() {
                continue;
            }

            if matches!(input.to_lowercase().as_str(), "exit" | "quit" | "q") {
                println!("Goodbye! 👋");
                break;
            }

            let result = if input.starts_with('/') {
                self.run_command(input).await
            } else {
                self.run_once(input).await.map(|_| ())
            };
            if let Err(e) = result {
                ui::print_error(&e.to_string());
            }
        }

        Ok(())
    }
}
