//! Plugin registry - The active plugins and the order they were loaded in

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use super::context::PluginContext;
use crate::application::errors::PluginError;
use crate::domain::entities::PluginDescriptor;
use crate::domain::traits::{Plugin, PluginFactory};

/// A loaded plugin with the factory that built it
pub(crate) struct ActivePlugin {
    pub factory: Arc<dyn PluginFactory>,
    pub instance: Box<dyn Plugin>,
    pub context: PluginContext,
}

/// Registry for managing loaded plugins
#[derive(Default)]
pub struct PluginRegistry {
    plugins: HashMap<String, ActivePlugin>,
    /// Load order; dependencies precede dependents
    order: Vec<String>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, plugin: ActivePlugin) -> Result<(), PluginError> {
        let name = plugin.instance.name().to_string();
        if self.plugins.contains_key(&name) {
            return Err(PluginError::AlreadyLoaded(name));
        }
        self.order.push(name.clone());
        self.plugins.insert(name, plugin);
        Ok(())
    }

    pub(crate) fn remove(&mut self, name: &str) -> Option<ActivePlugin> {
        let plugin = self.plugins.remove(name)?;
        self.order.retain(|n| n != name);
        Some(plugin)
    }

    pub(crate) fn get_active(&self, name: &str) -> Option<&ActivePlugin> {
        self.plugins.get(name)
    }

    pub fn get(&self, name: &str) -> Option<&dyn Plugin> {
        self.plugins.get(name).map(|p| p.instance.as_ref())
    }

    /// Descriptors of active plugins in load order
    pub fn descriptors(&self) -> Vec<PluginDescriptor> {
        self.order
            .iter()
            .filter_map(|n| self.plugins.get(n))
            .map(|p| p.instance.descriptor().clone())
            .collect()
    }

    /// Names in load order
    pub fn names(&self) -> Vec<String> {
        self.order.clone()
    }

    /// Name -> version of every active plugin
    pub fn versions(&self) -> BTreeMap<String, String> {
        self.plugins
            .iter()
            .map(|(n, p)| (n.clone(), p.instance.version().to_string()))
            .collect()
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.plugins.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}
