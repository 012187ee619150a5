//! Nerd Muffin CLI entry point

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use nerd_muffin::adapters::cli::{CliChannel, TerminalTransport};
use nerd_muffin::adapters::discord::DiscordChannel;
use nerd_muffin::adapters::{Channel, ChannelRegistry};
use nerd_muffin::agent::{CompletionHandler, MessagePipeline, OpenAiClient};
use nerd_muffin::clock;
use nerd_muffin::commands::CommandHandler;
use nerd_muffin::config::{self, Config};
use nerd_muffin::images::{FireflyClient, ImageGenerator};
use nerd_muffin::store::{
    InMemoryBackend, RedisBackend, SettingsBackend, SettingsStore, UserKeyHasher,
};
use nerd_muffin::ui;

#[derive(Parser)]
#[command(name = "nerd-muffin")]
#[command(about = "🧁 Nerd Muffin - a divine creature living in your Discord server")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the configuration file interactively
    Onboard,

    /// Connect to Discord and serve messages
    Run,

    /// Talk to the bot from the terminal
    Chat {
        /// Message to send (interactive session if omitted)
        #[arg(short, long)]
        message: Option<String>,

        /// Keep settings in memory instead of Redis
        #[arg(long)]
        ephemeral: bool,
    },

    /// Show the stored settings of a Discord user
    Settings {
        /// Discord user id
        #[arg(short, long)]
        user: u64,
    },

    /// Show Nerd Muffin status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Onboard => {
            config::onboard()?;
        }

        Commands::Run => {
            let config = config::load()?;
            config.validate_for_gateway()?;
            run_gateway(config).await?;
        }

        Commands::Chat { message, ephemeral } => {
            let config = config::load()?;
            if config.openai.api_key.is_empty() {
                ui::print_warning("OPENAI_API_KEY is not set, completions will fail");
            }

            let channel = build_cli(&config, ephemeral).await?;
            match message {
                Some(msg) => {
                    channel.run_once(&msg).await?;
                }
                None => {
                    ui::print_header("Interactive mode (type 'exit' to leave, /help for commands)");
                    channel.run_interactive().await?;
                }
            }
        }

        Commands::Settings { user } => {
            let config = config::load()?;
            let store = build_store(&config, false).await?;
            let settings = store.get(user).await?.snapshot();
            let (hours, minutes) = clock::time_until(settings.refresh_time, chrono::Utc::now());

            ui::print_header(&format!("Settings of user {}", user));
            ui::print_step(&format!(
                "Quota: {} (refills in {}h {}min)",
                settings.quota, hours, minutes
            ));
            ui::print_step(&format!("Sentiment: {}", settings.sentiment));
            ui::print_step(&format!("Legacy model: {}", yes_no(settings.use_legacy)));
            ui::print_step(&format!("Images: {}", yes_no(settings.allow_images)));
        }

        Commands::Status => {
            let config = config::load()?;
            print_status(&config);
        }
    }

    Ok(())
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "on"
    } else {
        "off"
    }
}

fn set_or_missing(value: &str) -> &'static str {
    if value.is_empty() {
        "not set"
    } else {
        "✓"
    }
}

fn print_status(config: &Config) {
    ui::print_header("Status");
    println!("Config: {:?}", config::config_path());
    println!("Redis: {}:{} (db {})", config.redis.host, config.redis.port, config.redis.db);
    println!("Chat model: {}", config.openai.chat_model);
    println!("Legacy model: {}", config.openai.legacy_model);
    println!("Daily quota: {}", config.quota.default_quota);
    println!("Exempt servers: {:?}", config.quota.exempt_guilds);
    println!("Image cache: {:?}", config.firefly.cache_dir);

    println!("\nSecrets:");
    println!("  DISCORD_TOKEN: {}", set_or_missing(&config.discord.token));
    println!("  OPENAI_API_KEY: {}", set_or_missing(&config.openai.api_key));
    println!("  FIREFLY_BEARER_TOKEN: {}", set_or_missing(&config.firefly.bearer_token));
    println!("  FIREFLY_CLIENT_ID: {}", set_or_missing(&config.firefly.client_id));
    println!("  SALTING_VALUE: {}", set_or_missing(&config.salting_value));

    println!("\nChannels:");
    for name in ChannelRegistry::available() {
        let state = if ChannelRegistry::is_enabled(name, config) { "ready" } else { "disabled" };
        println!("  {} - {} ({})", name, ChannelRegistry::description(name), state);
    }
}

async fn build_store(config: &Config, ephemeral: bool) -> Result<SettingsStore> {
    let (backend, salt): (Arc<dyn SettingsBackend>, String) = if ephemeral {
        let salt = if config.salting_value.is_empty() {
            uuid::Uuid::new_v4().to_string()
        } else {
            config.salting_value.clone()
        };
        (Arc::new(InMemoryBackend::new()), salt)
    } else {
        ui::print_thinking("Connecting to Redis");
        let backend = RedisBackend::connect(&config.redis).await?;
        (Arc::new(backend), config.salting_value.clone())
    };

    let hasher = UserKeyHasher::new(salt)?;
    Ok(SettingsStore::new(backend, hasher, config.quota.default_quota))
}

async fn build_pipeline(
    config: &Config,
    store: SettingsStore,
) -> Result<MessagePipeline<OpenAiClient>> {
    tokio::fs::create_dir_all(&config.firefly.cache_dir).await?;

    let images = ImageGenerator::new(
        Arc::new(FireflyClient::new(&config.firefly)),
        config.firefly.cache_dir.clone(),
    );
    let completions = CompletionHandler::new(
        OpenAiClient::new(&config.openai),
        images,
        config.completion.max_attempts,
    );

    Ok(MessagePipeline::new(completions, store, config.quota.clone()))
}

async fn build_cli(config: &Config, ephemeral: bool) -> Result<CliChannel<OpenAiClient>> {
    let store = build_store(config, ephemeral).await?;
    let commands = CommandHandler::new(store.clone(), config.quota.clone());
    let pipeline = build_pipeline(config, store).await?;
    let transport = TerminalTransport::new(&config.bot_name, config::config_dir().join("images"));

    Ok(CliChannel::new(pipeline, commands, transport, whoami::username()))
}

async fn run_gateway(config: Config) -> Result<()> {
    ui::print_header("Gateway");

    let store = build_store(&config, false).await?;
    let commands = CommandHandler::new(store.clone(), config.quota.clone());
    let pipeline = build_pipeline(&config, store).await?;
    let channel = Arc::new(DiscordChannel::new(config.discord.token.clone(), pipeline, commands));

    // First Ctrl+C shuts the shards down, a second one exits immediately
    let stopper = channel.clone();
    let handle = tokio::runtime::Handle::current();
    let stopping = Arc::new(std::sync::atomic::AtomicBool::new(false));
    ctrlc::set_handler(move || {
        if stopping.swap(true, std::sync::atomic::Ordering::SeqCst) {
            println!("\n👋 Bye!");
            std::process::exit(0);
        }
        println!("\n⚠️  Shutting down, press Ctrl+C again to exit");
        let stopper = stopper.clone();
        handle.spawn(async move {
            if let Err(e) = stopper.stop().await {
                tracing::error!("Failed to stop {}: {}", stopper.name(), e);
            }
        });
    })
    .ok();

    ui::print_success("Listening for Discord messages...");
    channel.start().await?;
    Ok(())
}
