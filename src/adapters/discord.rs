//! Discord adapter using serenity

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use rand::seq::SliceRandom;
use serenity::builder::{
    CreateAttachment, CreateCommand, CreateCommandOption, CreateEmbed, CreateInteractionResponse,
    CreateInteractionResponseMessage, CreateMessage, GetMessages,
};
use serenity::gateway::{ActivityData, ShardManager};
use serenity::http::{Http, Typing};
use serenity::model::application::{
    Command as SlashCommand, CommandInteraction, CommandOptionType, Interaction,
};
use serenity::model::channel::Message as DiscordMessage;
use serenity::model::gateway::Ready;
use serenity::model::id::{ChannelId, MessageId};
use serenity::prelude::{Client, Context, EventHandler, GatewayIntents};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, error, info, warn};

use super::{Channel, ChatTransport};
use crate::agent::{
    Environment, InboundMessage, LlmClient, Mention, MessagePipeline, OutgoingMessage, QuotedReply,
};
use crate::commands::{self, Command, CommandHandler, Invocation, Reply};
use crate::Result;

/// Games shown in the bot's "Playing ..." status.
const GAMES: &[&str] = &[
    "Fortnite",
    "Minecraft",
    "Diablo IV",
    "Metroid Prime Remastered",
    "Star Wars Jedi: Survivor",
    "Final Fantasy XVI",
    "Street Fighter 6",
    "Among Us",
    "Valorant",
    "League of Legends",
    "Grand Theft Auto V",
    "Elden Ring",
    "The Legend of Zelda: Tears of the Kingdom",
    "Super Mario Odyssey",
    "Animal Crossing: New Horizons",
    "Overwatch",
    "Red Dead Redemption 2",
    "Rocket League",
    "Genshin Impact",
];

const PRESENCE_INTERVAL: Duration = Duration::from_secs(30 * 60);

/// Conversation of one Discord message.
pub struct DiscordTransport {
    http: Arc<Http>,
    channel_id: ChannelId,
    message_id: MessageId,
    typing: Mutex<Option<Typing>>,
}

impl DiscordTransport {
    pub fn new(http: Arc<Http>, channel_id: ChannelId, message_id: MessageId) -> Self {
        Self {
            http,
            channel_id,
            message_id,
            typing: Mutex::new(None),
        }
    }
}

#[async_trait]
impl ChatTransport for DiscordTransport {
    async fn start_typing(&self) -> Result<()> {
        let typing = self.channel_id.start_typing(&self.http);
        *self.typing.lock().unwrap_or_else(PoisonError::into_inner) = Some(typing);
        Ok(())
    }

    async fn stop_typing(&self) {
        let typing = self.typing.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(typing) = typing {
            typing.stop();
        }
    }

    async fn is_latest(&self) -> Result<bool> {
        let latest = self
            .channel_id
            .messages(&self.http, GetMessages::new().limit(1))
            .await?;
        Ok(latest.first().map_or(true, |m| m.id == self.message_id))
    }

    async fn send(&self, message: OutgoingMessage) -> Result<()> {
        let mut builder = CreateMessage::new();
        if let Some(content) = message.content {
            builder = builder.content(content);
        }
        if message.reply {
            builder = builder.reference_message((self.channel_id, self.message_id));
        }
        for path in &message.attachments {
            builder = builder.add_file(CreateAttachment::path(path).await?);
        }

        self.channel_id.send_message(&self.http, builder).await?;
        Ok(())
    }
}

/// Convert a gateway message into the platform-neutral form.
fn to_inbound(ctx: &Context, msg: &DiscordMessage) -> InboundMessage {
    let environment = match msg.guild_id {
        Some(guild_id) => Environment::Guild {
            id: guild_id.get(),
            name: guild_id.name(&ctx.cache).unwrap_or_else(|| "unknown".to_string()),
        },
        None => Environment::DirectMessage,
    };

    InboundMessage {
        id: msg.id.get().to_string(),
        author_id: msg.author.id.get(),
        author_name: msg.author.name.clone(),
        author_is_bot: msg.author.bot,
        bot_id: ctx.cache.current_user().id.get(),
        content: msg.content.clone(),
        environment,
        mentions: msg
            .mentions
            .iter()
            .map(|user| Mention {
                id: user.id.get(),
                name: user.name.clone(),
            })
            .collect(),
        reply: msg.referenced_message.as_ref().map(|quoted| QuotedReply {
            author_name: quoted.author.name.clone(),
            content: quoted.content.clone(),
        }),
    }
}

fn slash_commands() -> Vec<CreateCommand> {
    Command::ALL
        .iter()
        .map(|(name, description)| {
            let command = CreateCommand::new(*name).description(*description);
            if *name != "sentiment" {
                return command;
            }

            let option = commands::sentiment_choices().fold(
                CreateCommandOption::new(
                    CommandOptionType::String,
                    "sentiment",
                    "The sentiment you want the bot to use when generating text.",
                )
                .required(true),
                |option, (display, key)| option.add_string_choice(display, key),
            );
            command.add_option(option)
        })
        .collect()
}

/// Gateway event handler.
pub struct Handler<C: LlmClient + 'static> {
    pipeline: Arc<MessagePipeline<C>>,
    commands: CommandHandler,
    presence_started: AtomicBool,
}

impl<C: LlmClient + 'static> Handler<C> {
    pub fn new(pipeline: Arc<MessagePipeline<C>>, commands: CommandHandler) -> Self {
        Self {
            pipeline,
            commands,
            presence_started: AtomicBool::new(false),
        }
    }

    async fn run_command(&self, ctx: &Context, interaction: &CommandInteraction) -> Result<()> {
        let option = interaction
            .data
            .options
            .first()
            .and_then(|o| o.value.as_str());
        let Some(command) = Command::parse(&interaction.data.name, option) else {
            warn!("Unknown slash command: {}", interaction.data.name);
            return Ok(());
        };

        let who = Invocation {
            user_id: interaction.user.id.get(),
            user_name: interaction.user.name.clone(),
            guild_id: interaction.guild_id.map(|g| g.get()),
        };
        debug!("Running /{} for {}", interaction.data.name, who.user_name);

        let reply = self.commands.execute(&command, &who).await?;
        let message = match reply {
            Reply::Text(text) => CreateInteractionResponseMessage::new().content(text),
            Reply::Embed { description, colour } => CreateInteractionResponseMessage::new()
                .embed(CreateEmbed::new().description(description).colour(colour)),
        };

        interaction
            .create_response(&ctx.http, CreateInteractionResponse::Message(message))
            .await?;
        Ok(())
    }
}

fn random_game() -> &'static str {
    GAMES.choose(&mut rand::thread_rng()).copied().unwrap_or("Minecraft")
}

#[async_trait]
impl<C: LlmClient + 'static> EventHandler for Handler<C> {
    async fn message(&self, ctx: Context, msg: DiscordMessage) {
        let inbound = to_inbound(&ctx, &msg);
        let pipeline = self.pipeline.clone();
        let transport = DiscordTransport::new(ctx.http.clone(), msg.channel_id, msg.id);

        tokio::spawn(async move {
            if let Err(e) = pipeline.handle(&inbound, &transport).await {
                error!("Failed to handle message {}: {}", inbound.id, e);
            }
        });
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        if let Interaction::Command(command) = interaction {
            if let Err(e) = self.run_command(&ctx, &command).await {
                error!("Slash command /{} failed: {}", command.data.name, e);
            }
        }
    }

    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("Discord bot connected as {}", ready.user.name);

        if let Err(e) = SlashCommand::set_global_commands(&ctx.http, slash_commands()).await {
            error!("Failed to register slash commands: {}", e);
        }

        if !self.presence_started.swap(true, Ordering::SeqCst) {
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(PRESENCE_INTERVAL);
                loop {
                    ticker.tick().await;
                    ctx.set_activity(Some(ActivityData::playing(random_game())));
                }
            });
        }
    }
}

/// Discord channel adapter
pub struct DiscordChannel<C: LlmClient + 'static> {
    token: String,
    pipeline: Arc<MessagePipeline<C>>,
    commands: CommandHandler,
    shard_manager: Arc<AsyncMutex<Option<Arc<ShardManager>>>>,
}

impl<C: LlmClient + 'static> DiscordChannel<C> {
    pub fn new(
        token: impl Into<String>,
        pipeline: MessagePipeline<C>,
        commands: CommandHandler,
    ) -> Self {
        Self {
            token: token.into(),
            pipeline: Arc::new(pipeline),
            commands,
            shard_manager: Arc::new(AsyncMutex::new(None)),
        }
    }

    fn intents() -> GatewayIntents {
        GatewayIntents::GUILDS
            | GatewayIntents::GUILD_MESSAGES
            | GatewayIntents::DIRECT_MESSAGES
            | GatewayIntents::MESSAGE_CONTENT
    }
}

impl<C: LlmClient + 'static> Channel for DiscordChannel<C> {
    fn name(&self) -> &str {
        "discord"
    }

    fn start(&self) -> impl std::future::Future<Output = Result<()>> + Send {
        let handler = Handler::new(self.pipeline.clone(), self.commands.clone());
        let token = self.token.clone();
        let shard_manager = self.shard_manager.clone();

        async move {
            info!("Starting Discord bot...");
            let mut client = Client::builder(&token, Self::intents())
                .event_handler(handler)
                .await?;
            *shard_manager.lock().await = Some(client.shard_manager.clone());

            client.start().await?;
            Ok(())
        }
    }

    fn stop(&self) -> impl std::future::Future<Output = Result<()>> + Send {
        let shard_manager = self.shard_manager.clone();

        async move {
            if let Some(manager) = shard_manager.lock().await.take() {
                info!("Shutting down Discord shards");
                manager.shutdown_all().await;
            }
            Ok(())
        }
    }
}
