//! In-memory settings backend for tests and throwaway terminal sessions

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::Error;
use crate::Result;

use super::SettingsBackend;

/// Settings hashes kept in process memory.
pub struct InMemoryBackend {
    hashes: Mutex<HashMap<String, HashMap<String, String>>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self {
            hashes: Mutex::new(HashMap::new()),
        }
    }

    /// Current content of one hash, if it exists.
    pub fn snapshot(&self, key: &str) -> Option<HashMap<String, String>> {
        self.hashes.lock().ok()?.get(key).cloned()
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SettingsBackend for InMemoryBackend {
    async fn read_fields(&self, key: &str) -> Result<HashMap<String, String>> {
        let hashes = self
            .hashes
            .lock()
            .map_err(|_| Error::Other("settings map poisoned".to_string()))?;
        Ok(hashes.get(key).cloned().unwrap_or_default())
    }

    async fn write_fields(&self, key: &str, fields: &[(&'static str, String)]) -> Result<()> {
        let mut hashes = self
            .hashes
            .lock()
            .map_err(|_| Error::Other("settings map poisoned".to_string()))?;
        let hash = hashes.entry(key.to_string()).or_default();
        for (field, value) in fields {
            hash.insert(field.to_string(), value.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_backend() {
        let backend = InMemoryBackend::new();
        assert!(backend.read_fields("user_settings:x").await.unwrap().is_empty());

        backend
            .write_fields("user_settings:x", &[("quota", "10".to_string())])
            .await
            .unwrap();
        backend
            .write_fields("user_settings:x", &[("sentiment", "angry".to_string())])
            .await
            .unwrap();

        let fields = backend.read_fields("user_settings:x").await.unwrap();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields["quota"], "10");
        assert_eq!(fields["sentiment"], "angry");
    }
}
