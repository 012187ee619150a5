//! Redis settings backend

use std::collections::HashMap;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::info;

use crate::config::RedisConfig;
use crate::Result;

use super::SettingsBackend;

/// Settings hashes stored in Redis, one `HSET` hash per user.
#[derive(Clone)]
pub struct RedisBackend {
    conn: ConnectionManager,
}

impl RedisBackend {
    /// Connect using the configured address and password.
    pub async fn connect(config: &RedisConfig) -> Result<Self> {
        let client = redis::Client::open(config.connection_url()?)?;
        let conn = ConnectionManager::new(client).await?;
        info!("Connected to redis at {}:{} (db {})", config.host, config.port, config.db);
        Ok(Self { conn })
    }
}

#[async_trait]
impl SettingsBackend for RedisBackend {
    async fn read_fields(&self, key: &str) -> Result<HashMap<String, String>> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> = conn.hgetall(key).await?;
        Ok(fields)
    }

    async fn write_fields(&self, key: &str, fields: &[(&'static str, String)]) -> Result<()> {
        if fields.is_empty() {
            return Ok(());
        }

        let mut conn = self.conn.clone();
        write_pipeline(key, fields).query_async::<()>(&mut conn).await?;
        Ok(())
    }
}

/// One transaction setting every given field of a hash.
fn write_pipeline(key: &str, fields: &[(&'static str, String)]) -> redis::Pipeline {
    let mut pipe = redis::pipe();
    pipe.atomic().hset_multiple(key, fields).ignore();
    pipe
}
