//! Configuration management

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use crate::Result;
use crate::error::Error;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Name the bot introduces itself with
    #[serde(default = "default_bot_name")]
    pub bot_name: String,

    /// Salt mixed into every user id before hashing (`SALTING_VALUE`)
    #[serde(default)]
    pub salting_value: String,

    /// Discord configuration
    #[serde(default)]
    pub discord: DiscordConfig,

    /// Completion service configuration
    #[serde(default)]
    pub openai: OpenAiConfig,

    /// Image service configuration
    #[serde(default)]
    pub firefly: FireflyConfig,

    /// Settings store configuration
    #[serde(default)]
    pub redis: RedisConfig,

    /// Token budget configuration
    #[serde(default)]
    pub quota: QuotaConfig,

    /// Completion retry configuration
    #[serde(default)]
    pub completion: CompletionConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscordConfig {
    /// Bot token (`DISCORD_TOKEN`)
    #[serde(default)]
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiConfig {
    /// API key (`OPENAI_API_KEY`)
    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_openai_base_url")]
    pub base_url: String,

    #[serde(default = "default_chat_model")]
    pub chat_model: String,

    /// Plain completion engine used when a user opts into the legacy model
    #[serde(default = "default_legacy_model")]
    pub legacy_model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FireflyConfig {
    /// Bearer token (`FIREFLY_BEARER_TOKEN`)
    #[serde(default)]
    pub bearer_token: String,

    /// Client id sent as `x-api-key` (`FIREFLY_CLIENT_ID`)
    #[serde(default)]
    pub client_id: String,

    #[serde(default = "default_firefly_base_url")]
    pub base_url: String,

    /// Directory generated images are written to before upload
    #[serde(default = "default_image_cache")]
    pub cache_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_redis_host")]
    pub host: String,

    #[serde(default = "default_redis_port")]
    pub port: u16,

    #[serde(default)]
    pub db: i64,

    /// Password (`REDIS_PWD`)
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaConfig {
    /// Tokens granted per UTC day
    #[serde(default = "default_quota")]
    pub default_quota: i64,

    /// Longest prompt (in characters) forwarded to the completion service
    #[serde(default = "default_max_prompt_chars")]
    pub max_prompt_chars: usize,

    /// Servers whose members are not charged for chat completions
    #[serde(default)]
    pub exempt_guilds: Vec<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionConfig {
    /// Total attempts against a flaky completion service
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_bot_name() -> String {
    "Nerd Muffin".to_string()
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_chat_model() -> String {
    "gpt-3.5-turbo".to_string()
}

fn default_legacy_model() -> String {
    "text-davinci-003".to_string()
}

fn default_firefly_base_url() -> String {
    "https://firefly-api.adobe.io".to_string()
}

fn default_image_cache() -> PathBuf {
    PathBuf::from("image_cache")
}

fn default_redis_host() -> String {
    "127.0.0.1".to_string()
}

fn default_redis_port() -> u16 {
    6379
}

fn default_quota() -> i64 {
    1500
}

fn default_max_prompt_chars() -> usize {
    800
}

fn default_max_attempts() -> u32 {
    5
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_openai_base_url(),
            chat_model: default_chat_model(),
            legacy_model: default_legacy_model(),
        }
    }
}

impl Default for FireflyConfig {
    fn default() -> Self {
        Self {
            bearer_token: String::new(),
            client_id: String::new(),
            base_url: default_firefly_base_url(),
            cache_dir: default_image_cache(),
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: default_redis_host(),
            port: default_redis_port(),
            db: 0,
            password: String::new(),
        }
    }
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            default_quota: default_quota(),
            max_prompt_chars: default_max_prompt_chars(),
            exempt_guilds: Vec::new(),
        }
    }
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bot_name: default_bot_name(),
            salting_value: String::new(),
            discord: DiscordConfig::default(),
            openai: OpenAiConfig::default(),
            firefly: FireflyConfig::default(),
            redis: RedisConfig::default(),
            quota: QuotaConfig::default(),
            completion: CompletionConfig::default(),
        }
    }
}

impl RedisConfig {
    /// Connection URL with the password percent-encoded.
    pub fn connection_url(&self) -> Result<String> {
        let mut url = url::Url::parse(&format!("redis://{}:{}/{}", self.host, self.port, self.db))
            .map_err(|e| Error::Config(format!("Invalid redis address: {}", e)))?;

        if !self.password.is_empty() {
            url.set_password(Some(&self.password))
                .map_err(|_| Error::Config("Cannot set redis password".to_string()))?;
        }

        Ok(url.to_string())
    }
}

impl QuotaConfig {
    /// Whether messages from this server skip chat-completion charges.
    pub fn is_exempt(&self, guild_id: Option<u64>) -> bool {
        guild_id.is_some_and(|id| self.exempt_guilds.contains(&id))
    }
}

impl Config {
    /// Overlay secrets from the process environment (and `.env`, if present).
    pub fn apply_env(&mut self) {
        dotenvy::dotenv().ok();
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let targets: [(&str, &mut String); 6] = [
            ("DISCORD_TOKEN", &mut self.discord.token),
            ("OPENAI_API_KEY", &mut self.openai.api_key),
            ("FIREFLY_BEARER_TOKEN", &mut self.firefly.bearer_token),
            ("FIREFLY_CLIENT_ID", &mut self.firefly.client_id),
            ("REDIS_PWD", &mut self.redis.password),
            ("SALTING_VALUE", &mut self.salting_value),
        ];

        for (key, target) in targets {
            if let Some(value) = lookup(key).filter(|v| !v.is_empty()) {
                *target = value;
            }
        }
    }

    /// Check that everything the Discord gateway needs is present.
    pub fn validate_for_gateway(&self) -> Result<()> {
        let required = [
            ("DISCORD_TOKEN", &self.discord.token),
            ("OPENAI_API_KEY", &self.openai.api_key),
            ("SALTING_VALUE", &self.salting_value),
        ];

        let missing: Vec<&str> = required
            .iter()
            .filter(|(_, value)| value.is_empty())
            .map(|(key, _)| *key)
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::Config(format!("Missing settings: {}", missing.join(", "))))
        }
    }
}

/// Get the config directory path
pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".nerd-muffin")
}

/// Get the config file path
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

/// Load configuration from file (defaults if absent), then overlay the environment
pub fn load() -> Result<Config> {
    let path = config_path();

    let mut config = if path.exists() {
        let content = std::fs::read_to_string(&path)?;
        serde_json::from_str(&content)?
    } else {
        Config::default()
    };

    config.apply_env();
    Ok(config)
}

/// Save configuration to file
pub fn save(config: &Config) -> Result<()> {
    let path = config_path();

    // Create parent directory
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let content = serde_json::to_string_pretty(config)?;
    std::fs::write(&path, content)?;
    Ok(())
}

/// Interactive setup of the non-secret settings
pub fn onboard() -> Result<()> {
    use crate::ui;
    use inquire::{Confirm, CustomType, Text};

    ui::print_header("Setup Wizard");
    println!("  Secrets (tokens, passwords, salt) are read from the environment or a .env file.\n");

    let mut config = if config_path().exists() {
        load()?
    } else {
        Config::default()
    };

    // 1. Store
    config.redis.host = Text::new("Redis host:")
        .with_default(&config.redis.host)
        .prompt()
        .map_err(|e| Error::Config(format!("Prompt failed: {}", e)))?;

    config.redis.port = CustomType::<u16>::new("Redis port:")
        .with_default(config.redis.port)
        .prompt()
        .map_err(|e| Error::Config(format!("Prompt failed: {}", e)))?;

    // 2. Quota
    config.quota.default_quota = CustomType::<i64>::new("Daily token quota per user:")
        .with_default(config.quota.default_quota)
        .prompt()
        .map_err(|e| Error::Config(format!("Prompt failed: {}", e)))?;

    let add_exempt = Confirm::new("Exempt a server from token charges?")
        .with_default(false)
        .prompt()
        .map_err(|e| Error::Config(format!("Prompt failed: {}", e)))?;

    if add_exempt {
        let guild = CustomType::<u64>::new("Server id:")
            .prompt()
            .map_err(|e| Error::Config(format!("Prompt failed: {}", e)))?;
        if !config.quota.exempt_guilds.contains(&guild) {
            config.quota.exempt_guilds.push(guild);
        }
    }

    // 3. Images
    let cache_dir = Text::new("Image cache directory:")
        .with_default(&config.firefly.cache_dir.to_string_lossy())
        .prompt()
        .map_err(|e| Error::Config(format!("Prompt failed: {}", e)))?;
    config.firefly.cache_dir = PathBuf::from(cache_dir);

    ui::print_thinking("Creating image cache");
    std::fs::create_dir_all(&config.firefly.cache_dir)?;

    // Secrets stay out of the file
    let mut on_disk = config.clone();
    on_disk.discord.token.clear();
    on_disk.openai.api_key.clear();
    on_disk.firefly.bearer_token.clear();
    on_disk.firefly.client_id.clear();
    on_disk.redis.password.clear();
    on_disk.salting_value.clear();

    ui::print_thinking("Saving configuration");
    save(&on_disk)?;

    println!();
    ui::print_success("Setup complete!");

    match config.validate_for_gateway() {
        Ok(()) => ui::print_step("You're all set! Run 'nerd-muffin run' to start the bot."),
        Err(e) => ui::print_warning(&e.to_string()),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.openai.chat_model, "gpt-3.5-turbo");
        assert_eq!(config.quota.default_quota, 1500);
        assert_eq!(config.quota.max_prompt_chars, 800);
        assert_eq!(config.completion.max_attempts, 5);
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.openai.legacy_model, config.openai.legacy_model);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let parsed: Config = serde_json::from_str(r#"{"quota": {"exempt_guilds": [42]}}"#).unwrap();
        assert_eq!(parsed.quota.default_quota, 1500);
        assert!(parsed.quota.is_exempt(Some(42)));
        assert!(!parsed.quota.is_exempt(Some(7)));
        assert!(!parsed.quota.is_exempt(None));
    }

    #[test]
    fn test_env_overlay() {
        let env: HashMap<&str, &str> = [
            ("DISCORD_TOKEN", "discord-secret"),
            ("SALTING_VALUE", "pepper"),
            ("REDIS_PWD", ""),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.redis.password = "from-file".to_string();
        config.apply_env_from(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.discord.token, "discord-secret");
        assert_eq!(config.salting_value, "pepper");
        // empty variables do not clobber file values
        assert_eq!(config.redis.password, "from-file");
    }

    #[test]
    fn test_validate_for_gateway_lists_missing() {
        let err = Config::default().validate_for_gateway().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("DISCORD_TOKEN"));
        assert!(msg.contains("SALTING_VALUE"));
    }

    #[test]
    fn test_redis_url_encodes_password() {
        let redis = RedisConfig {
            password: "p@ss word".to_string(),
            ..RedisConfig::default()
        };
        let url = redis.connection_url().unwrap();
        assert!(url.starts_with("redis://:p%40ss%20word@127.0.0.1:6379/0"));
    }
}
