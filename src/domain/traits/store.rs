use std::sync::Arc;

use async_trait::async_trait;

use crate::application::errors::StorageError;

/// A plugin's private key/value document
pub type PluginData = serde_json::Map<String, serde_json::Value>;

/// Plugin data shared between the loader and the plugin's handlers
///
/// The framework never holds this lock while running plugin code; plugins
/// lock it themselves when they need exclusive access.
pub type SharedData = Arc<tokio::sync::Mutex<PluginData>>;

/// DataStore trait - persistence of per-plugin data documents
#[async_trait]
pub trait DataStore: Send + Sync {
    /// Load a plugin's document; `None` when it was never saved
    async fn load(&self, plugin: &str) -> Result<Option<PluginData>, StorageError>;

    /// Replace a plugin's document
    async fn save(&self, plugin: &str, data: &PluginData) -> Result<(), StorageError>;
}
