//! Plugin data stores

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::application::errors::StorageError;
use crate::domain::traits::{DataStore, PluginData};

/// One pretty-printed JSON document per plugin, `<dir>/<plugin>.json`
pub struct JsonDataStore {
    base_path: PathBuf,
}

impl JsonDataStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub async fn init(&self) -> Result<(), StorageError> {
        tokio::fs::create_dir_all(&self.base_path).await?;
        Ok(())
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn path_for(&self, plugin: &str) -> PathBuf {
        self.base_path.join(format!("{}.json", plugin))
    }
}

#[async_trait]
impl DataStore for JsonDataStore {
    async fn load(&self, plugin: &str) -> Result<Option<PluginData>, StorageError> {
        let path = self.path_for(plugin);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let data: PluginData = serde_json::from_str(&content)?;
        tracing::debug!("Loaded data of {} from {}", plugin, path.display());
        Ok(Some(data))
    }

    async fn save(&self, plugin: &str, data: &PluginData) -> Result<(), StorageError> {
        tokio::fs::create_dir_all(&self.base_path).await?;
        let path = self.path_for(plugin);
        let content = serde_json::to_string_pretty(data)?;
        tokio::fs::write(&path, content).await?;
        tracing::debug!("Saved data of {} to {}", plugin, path.display());
        Ok(())
    }
}

/// Keeps documents in memory; used in tests and debug runs
#[derive(Default, Clone)]
pub struct MemoryDataStore {
    documents: Arc<RwLock<HashMap<String, PluginData>>>,
}

impl MemoryDataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored document of a plugin, if any
    pub async fn snapshot(&self, plugin: &str) -> Option<PluginData> {
        self.documents.read().await.get(plugin).cloned()
    }
}

#[async_trait]
impl DataStore for MemoryDataStore {
    async fn load(&self, plugin: &str) -> Result<Option<PluginData>, StorageError> {
        Ok(self.documents.read().await.get(plugin).cloned())
    }

    async fn save(&self, plugin: &str, data: &PluginData) -> Result<(), StorageError> {
        let mut documents = self.documents.write().await;
        documents.insert(plugin.to_string(), data.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_json_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonDataStore::new(dir.path().join("plugins"));
        assert!(store.load("echo").await.unwrap().is_none());

        let mut data = PluginData::new();
        data.insert("count".to_string(), serde_json::json!(3));
        store.save("echo", &data).await.unwrap();
        assert_eq!(store.load("echo").await.unwrap(), Some(data));
    }

    #[tokio::test]
    async fn test_json_store_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonDataStore::new(dir.path());
        tokio::fs::write(dir.path().join("bad.json"), "not json").await.unwrap();
        assert!(matches!(
            store.load("bad").await,
            Err(StorageError::Serialization(_))
        ));
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryDataStore::new();
        let mut data = PluginData::new();
        data.insert("k".to_string(), serde_json::json!("v"));
        store.save("p", &data).await.unwrap();
        assert_eq!(store.snapshot("p").await, Some(data));
        assert!(store.load("q").await.unwrap().is_none());
    }
}
