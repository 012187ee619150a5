//! Store module: per-user settings and token quota.
//!
//! Records live in a key-value hash per user. The storage key is a salted
//! BLAKE2b digest of the platform user id, never the id itself.
//!
//! [`UserSettingsHandle`] is the accessor the rest of the bot works with:
//! one getter and one async setter per field, each setter writing through
//! to the [`SettingsBackend`] immediately.
//!
//! Debits are read-modify-write against the handle's snapshot without any
//! locking, so two concurrent messages from the same user may both debit
//! from the same starting quota.

mod memory;
mod redis_store;

pub use memory::InMemoryBackend;
pub use redis_store::RedisBackend;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use blake2::digest::consts::U16;
use blake2::{Blake2b, Digest};
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::clock;
use crate::error::Error;
use crate::sentiment::{Sentiment, DEFAULT_SENTIMENT};
use crate::Result;

/// Field names in the stored hash.
pub mod fields {
    pub const QUOTA: &str = "quota";
    pub const REFRESH_TIME: &str = "refresh_time";
    pub const SENTIMENT: &str = "sentiment";
    pub const USE_LEGACY: &str = "use_legacy";
    pub const ALLOW_IMAGES: &str = "allow_images";
}

/// Hash-per-key storage the settings live in.
#[async_trait]
pub trait SettingsBackend: Send + Sync {
    /// Read every field of the hash at `key` (empty map if absent).
    async fn read_fields(&self, key: &str) -> Result<HashMap<String, String>>;

    /// Write the given fields to the hash at `key` as one atomic update.
    async fn write_fields(&self, key: &str, fields: &[(&'static str, String)]) -> Result<()>;
}

/// One user's stored settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserSettings {
    pub quota: i64,
    pub refresh_time: i64,
    pub sentiment: String,
    pub use_legacy: bool,
    pub allow_images: bool,
}

impl UserSettings {
    pub fn defaults(default_quota: i64, now: DateTime<Utc>) -> Self {
        Self {
            quota: default_quota,
            refresh_time: clock::next_refresh(now),
            sentiment: DEFAULT_SENTIMENT.to_string(),
            use_legacy: false,
            allow_images: false,
        }
    }

    /// Parse a stored hash; missing or garbled fields keep their defaults.
    pub fn from_fields(
        stored: &HashMap<String, String>,
        default_quota: i64,
        now: DateTime<Utc>,
    ) -> Self {
        let mut settings = Self::defaults(default_quota, now);

        if let Some(v) = stored.get(fields::QUOTA).and_then(|v| v.parse().ok()) {
            settings.quota = v;
        }
        if let Some(v) = stored.get(fields::REFRESH_TIME).and_then(|v| v.parse().ok()) {
            settings.refresh_time = v;
        }
        if let Some(v) = stored.get(fields::SENTIMENT) {
            settings.sentiment = v.clone();
        }
        if let Some(v) = stored.get(fields::USE_LEGACY).and_then(|v| parse_flag(v)) {
            settings.use_legacy = v;
        }
        if let Some(v) = stored.get(fields::ALLOW_IMAGES).and_then(|v| parse_flag(v)) {
            settings.allow_images = v;
        }

        settings
    }

    pub fn to_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            (fields::QUOTA, self.quota.to_string()),
            (fields::REFRESH_TIME, self.refresh_time.to_string()),
            (fields::SENTIMENT, self.sentiment.clone()),
            (fields::USE_LEGACY, flag(self.use_legacy)),
            (fields::ALLOW_IMAGES, flag(self.allow_images)),
        ]
    }
}

fn flag(value: bool) -> String {
    let encoded = if value { "1" } else { "0" };
    encoded.to_string()
}

fn parse_flag(value: &str) -> Option<bool> {
    match value {
        "1" | "true" | "True" => Some(true),
        "0" | "false" | "False" => Some(false),
        _ => None,
    }
}

/// Turns platform user ids into opaque storage keys.
#[derive(Clone)]
pub struct UserKeyHasher {
    salt: String,
}

impl UserKeyHasher {
    pub fn new(salt: impl Into<String>) -> Result<Self> {
        let salt = salt.into();
        if salt.is_empty() {
            return Err(Error::Config("SALTING_VALUE must not be empty".to_string()));
        }
        Ok(Self { salt })
    }

    /// Hex BLAKE2b-128 of `salt ‖ user_id`.
    pub fn hash_user_id(&self, user_id: u64) -> String {
        let mut hasher = Blake2b::<U16>::new();
        hasher.update(self.salt.as_bytes());
        hasher.update(user_id.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn storage_key(&self, user_id: u64) -> String {
        format!("user_settings:{}", self.hash_user_id(user_id))
    }
}

/// Loads settings handles from a backend.
#[derive(Clone)]
pub struct SettingsStore {
    backend: Arc<dyn SettingsBackend>,
    hasher: UserKeyHasher,
    default_quota: i64,
}

impl SettingsStore {
    pub fn new(
        backend: Arc<dyn SettingsBackend>,
        hasher: UserKeyHasher,
        default_quota: i64,
    ) -> Self {
        Self {
            backend,
            hasher,
            default_quota,
        }
    }

    pub fn default_quota(&self) -> i64 {
        self.default_quota
    }

    /// Load a user's settings, creating or refreshing them as needed.
    pub async fn get(&self, user_id: u64) -> Result<UserSettingsHandle> {
        self.get_at(user_id, Utc::now()).await
    }

    /// [`SettingsStore::get`] against an explicit clock.
    pub async fn get_at(&self, user_id: u64, now: DateTime<Utc>) -> Result<UserSettingsHandle> {
        let key = self.hasher.storage_key(user_id);
        let stored = self.backend.read_fields(&key).await?;

        let mut settings = if stored.is_empty() {
            debug!("Creating default settings for {}", key);
            let defaults = UserSettings::defaults(self.default_quota, now);
            self.backend.write_fields(&key, &defaults.to_fields()).await?;
            defaults
        } else {
            UserSettings::from_fields(&stored, self.default_quota, now)
        };

        if settings.refresh_time < now.timestamp() {
            debug!("Quota window elapsed for {}, refilling", key);
            settings.refresh_time = clock::next_refresh(now);
            settings.quota = self.default_quota;
            self.backend
                .write_fields(
                    &key,
                    &[
                        (fields::REFRESH_TIME, settings.refresh_time.to_string()),
                        (fields::QUOTA, settings.quota.to_string()),
                    ],
                )
                .await?;
        }

        Ok(UserSettingsHandle {
            backend: self.backend.clone(),
            key,
            settings: Mutex::new(settings),
        })
    }
}

/// Loaded settings of one user with write-through setters.
pub struct UserSettingsHandle {
    backend: Arc<dyn SettingsBackend>,
    key: String,
    settings: Mutex<UserSettings>,
}

impl UserSettingsHandle {
    fn lock(&self) -> MutexGuard<'_, UserSettings> {
        self.settings.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Copy of the current values.
    pub fn snapshot(&self) -> UserSettings {
        self.lock().clone()
    }

    pub fn storage_key(&self) -> &str {
        &self.key
    }

    pub fn quota(&self) -> i64 {
        self.lock().quota
    }

    pub fn refresh_time(&self) -> i64 {
        self.lock().refresh_time
    }

    pub fn sentiment(&self) -> &'static Sentiment {
        Sentiment::resolve(&self.lock().sentiment)
    }

    pub fn use_legacy(&self) -> bool {
        self.lock().use_legacy
    }

    pub fn allow_images(&self) -> bool {
        self.lock().allow_images
    }

    pub async fn set_quota(&self, quota: i64) -> Result<()> {
        self.lock().quota = quota;
        self.write(fields::QUOTA, quota.to_string()).await
    }

    pub async fn set_sentiment(&self, sentiment: &Sentiment) -> Result<()> {
        self.lock().sentiment = sentiment.key.to_string();
        self.write(fields::SENTIMENT, sentiment.key.to_string()).await
    }

    pub async fn set_use_legacy(&self, use_legacy: bool) -> Result<()> {
        self.lock().use_legacy = use_legacy;
        self.write(fields::USE_LEGACY, flag(use_legacy)).await
    }

    pub async fn set_allow_images(&self, allow_images: bool) -> Result<()> {
        self.lock().allow_images = allow_images;
        self.write(fields::ALLOW_IMAGES, flag(allow_images)).await
    }

    /// Subtract spent tokens from the quota; it may go negative.
    pub async fn debit(&self, tokens: i64) -> Result<()> {
        let remaining = {
            let mut settings = self.lock();
            settings.quota -= tokens;
            settings.quota
        };
        debug!("Debited {} tokens from {}, {} left", tokens, self.key, remaining);
        self.write(fields::QUOTA, remaining.to_string()).await
    }

    async fn write(&self, field: &'static str, value: String) -> Result<()> {
        self.backend.write_fields(&self.key, &[(field, value)]).await
    }
}
