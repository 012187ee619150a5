//! Message pipeline - from an inbound chat message to the delivered reply.
//!
//! Order of checks for an addressed message: quota gate, empty prompt,
//! prompt length. Only then is the completion service called.

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::adapters::ChatTransport;
use crate::clock;
use crate::config::QuotaConfig;
use crate::response::send_response;
use crate::store::{SettingsStore, UserSettingsHandle};
use crate::Result;

use super::completion::{Completion, CompletionHandler, CompletionRequest};
use super::llm::LlmClient;
use super::message::{InboundMessage, OutgoingMessage};
use super::prompt;

pub const GREETING: &str =
    "Hello there, I'm a divine being. Ask me anything, or use /help to learn more.";
pub const TOO_LONG: &str = "Whoa, that's a lot of text, I can't be bothered to read that.";
pub const IMAGE_FAILURE_NOTICE: &str =
    "**Note:** At least one image could not be generated, sorry about that.";

/// What the pipeline did with a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handled {
    /// Not addressed to the bot
    Ignored,
    OutOfTokens,
    Greeted,
    TooLong,
    Answered,
}

/// Handles every inbound message end to end.
pub struct MessagePipeline<C: LlmClient> {
    completions: CompletionHandler<C>,
    store: SettingsStore,
    quota: QuotaConfig,
}

impl<C: LlmClient> MessagePipeline<C> {
    pub fn new(
        completions: CompletionHandler<C>,
        store: SettingsStore,
        quota: QuotaConfig,
    ) -> Self {
        Self {
            completions,
            store,
            quota,
        }
    }

    pub fn store(&self) -> &SettingsStore {
        &self.store
    }

    pub fn completions(&self) -> &CompletionHandler<C> {
        &self.completions
    }

    /// Process one message, replying through `transport`.
    pub async fn handle<T: ChatTransport + ?Sized>(
        &self,
        message: &InboundMessage,
        transport: &T,
    ) -> Result<Handled> {
        if !prompt::is_addressed(message) {
            return Ok(Handled::Ignored);
        }

        if let Err(e) = transport.start_typing().await {
            warn!("Failed to start typing indicator: {}", e);
        }
        let result = self.respond(message, transport).await;
        transport.stop_typing().await;

        result
    }

    async fn respond<T: ChatTransport + ?Sized>(
        &self,
        message: &InboundMessage,
        transport: &T,
    ) -> Result<Handled> {
        let now = Utc::now();
        let text = prompt::strip_bot_mention(&message.content, message.bot_id);
        let settings = self.store.get_at(message.author_id, now).await?;
        let exempt = self.quota.is_exempt(message.guild_id());

        if !may_spend(&settings, exempt) {
            let (hours, minutes) = clock::time_until(settings.refresh_time(), now);
            info!("{} is out of tokens", settings.storage_key());
            transport
                .send(OutgoingMessage::text(format!(
                    "**{}**, you have run out of tokens for today. Please try again in **{}h {}min**.",
                    message.author_name, hours, minutes
                )))
                .await?;
            return Ok(Handled::OutOfTokens);
        }

        if text.is_empty() {
            transport.send(OutgoingMessage::text(GREETING)).await?;
            return Ok(Handled::Greeted);
        }

        let text = prompt::replace_mentions(&text, &message.mentions);
        if text.chars().count() > self.quota.max_prompt_chars {
            transport.send(OutgoingMessage::text(TOO_LONG)).await?;
            return Ok(Handled::TooLong);
        }

        let sentiment = settings.sentiment();
        let user_turn =
            prompt::prepare_prompt(&text, &message.author_name, message.reply.as_ref(), sentiment);

        let completion = if settings.use_legacy() {
            debug!("Using legacy model for {}", settings.storage_key());
            let reply = self.completions.complete_legacy(&user_turn, &settings).await?;
            Completion::text_only(reply)
        } else {
            let allow_images = settings.allow_images();
            let preprompt =
                prompt::prepare_preprompt(sentiment, allow_images, &message.environment, now);
            let request = CompletionRequest {
                prompt: &user_turn,
                preprompt: &preprompt,
                allow_images,
                charge_tokens: !exempt,
                generation_id: &message.id,
            };
            self.completions.complete(request, &settings).await?
        };

        let delivered = self.deliver(&completion, transport).await;
        if !completion.images.is_empty() {
            self.completions
                .images()
                .clear_cache(&message.id, completion.images.len())
                .await;
        }
        delivered?;

        Ok(Handled::Answered)
    }

    async fn deliver<T: ChatTransport + ?Sized>(
        &self,
        completion: &Completion,
        transport: &T,
    ) -> Result<()> {
        let attachments = completion.attachments().map(|image| image.path.clone()).collect();
        send_response(transport, &completion.text, attachments).await?;

        if completion.image_failed() {
            transport.send(OutgoingMessage::text(IMAGE_FAILURE_NOTICE)).await?;
        }
        Ok(())
    }
}

/// Quota gate. Exempt servers only waive the limit for the chat model.
fn may_spend(settings: &UserSettingsHandle, exempt: bool) -> bool {
    settings.quota() > 0 || (exempt && !settings.use_legacy())
}
