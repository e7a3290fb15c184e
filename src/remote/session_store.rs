//! Persistence for the bearer token and cached profile.

use async_trait::async_trait;
use std::{
    collections::HashMap,
    io::ErrorKind,
    path::PathBuf,
    sync::Mutex,
};
use tokio::{
    fs,
    io::{AsyncWriteExt, BufWriter},
};

use crate::error::{AgentError, Result};

/// Key holding the bearer token.
pub const AUTH_TOKEN: &str = "authToken";
/// Key holding the serialized profile.
pub const USER_DATA: &str = "userData";

/// Key-value storage surviving app restarts.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
    async fn remove(&self, key: &str) -> Result<()>;
}

/// Stores session values in a local JSON file (session.json).
#[derive(Clone)]
pub struct FileSessionStore {
    /// Location of the session file on disk.
    path: PathBuf,
}

impl FileSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Load the entire map from disk; a missing file is an empty store.
    async fn load_map(&self) -> Result<HashMap<String, String>> {
        match fs::read(&self.path).await {
            Ok(data) => {
                if data.is_empty() {
                    return Ok(HashMap::new());
                }
                serde_json::from_slice(&data)
                    .map_err(|e| AgentError::SessionCorrupted(format!("session file: {e}")))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(AgentError::Storage(e.to_string())),
        }
    }

    /// Persist the map to disk, creating directories if needed.
    async fn save_map(&self, map: &HashMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| AgentError::Storage(e.to_string()))?;
        }
        let data =
            serde_json::to_vec_pretty(map).map_err(|e| AgentError::Storage(e.to_string()))?;
        let file = fs::File::create(&self.path)
            .await
            .map_err(|e| AgentError::Storage(e.to_string()))?;
        let mut writer = BufWriter::new(file);
        writer
            .write_all(&data)
            .await
            .map_err(|e| AgentError::Storage(e.to_string()))?;
        writer
            .flush()
            .await
            .map_err(|e| AgentError::Storage(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut map = self.load_map().await?;
        Ok(map.remove(key))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut map = self.load_map().await?;
        map.insert(key.to_string(), value.to_string());
        self.save_map(&map).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        // A corrupted file is replaced rather than blocking logout.
        let mut map = self.load_map().await.unwrap_or_default();
        map.remove(key);
        if !map.is_empty() {
            return self.save_map(&map).await;
        }
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AgentError::Storage(e.to_string())),
        }
    }
}

/// Process-local store for ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    map: Mutex<HashMap<String, String>>,
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let map = self.map.lock().unwrap_or_else(|e| e.into_inner());
        Ok(map.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut map = self.map.lock().unwrap_or_else(|e| e.into_inner());
        map.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut map = self.map.lock().unwrap_or_else(|e| e.into_inner());
        map.remove(key);
        Ok(())
    }
}
