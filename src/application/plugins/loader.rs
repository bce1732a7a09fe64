//! Plugin loader - Orders, instantiates, loads, unloads and reloads plugins
//!
//! A batch is loaded in four passes:
//! 1. the allow/deny lists drop plugins by name,
//! 2. the dependency graph orders the rest (a cycle or a missing dependency
//!    fails the whole batch),
//! 3. every plugin is instantiated in order and all version constraints are
//!    checked against the instances (a mismatch fails the whole batch),
//! 4. load hooks run in order.
//!
//! A plugin whose construction or load hooks fail is logged and left out;
//! its dependents are left out with it.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use super::context::PluginContext;
use super::graph::DependencyGraph;
use super::registry::{ActivePlugin, PluginRegistry};
use super::version::check_constraint;
use crate::application::errors::PluginError;
use crate::application::messaging::EventBus;
use crate::domain::entities::PluginDescriptor;
use crate::domain::traits::{DataStore, Plugin, PluginEnv, PluginFactory, SharedData};

/// Which plugins may load and how they are treated
#[derive(Debug, Clone, Default)]
pub struct LoaderSettings {
    /// When set, only these plugins load
    pub allow: Option<Vec<String>>,
    pub deny: Vec<String>,
    /// Keep plugin data in memory only; it is logged on unload instead
    pub debug: bool,
}

impl LoaderSettings {
    pub fn permits(&self, name: &str) -> bool {
        let allowed = match &self.allow {
            Some(allow) => allow.iter().any(|n| n == name),
            None => true,
        };
        allowed && !self.deny.iter().any(|n| n == name)
    }
}

pub struct PluginLoader {
    bus: Arc<EventBus>,
    store: Arc<dyn DataStore>,
    settings: LoaderSettings,
    registry: PluginRegistry,
}

impl PluginLoader {
    pub fn new(bus: Arc<EventBus>, store: Arc<dyn DataStore>, settings: LoaderSettings) -> Self {
        if settings.debug {
            tracing::warn!("Plugin loader is in debug mode, plugin data will not be saved");
        }
        Self {
            bus,
            store,
            settings,
            registry: PluginRegistry::new(),
        }
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    /// Active plugins in load order
    pub fn plugins(&self) -> Vec<PluginDescriptor> {
        self.registry.descriptors()
    }

    pub fn get(&self, name: &str) -> Option<&dyn Plugin> {
        self.registry.get(name)
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.registry.is_loaded(name)
    }

    /// Load a batch; returns the names that ended up active, in load order
    pub async fn load(&mut self, factories: Vec<Arc<dyn PluginFactory>>) -> Result<Vec<String>, PluginError> {
        let mut batch: BTreeMap<String, Arc<dyn PluginFactory>> = BTreeMap::new();
        for factory in factories {
            let name = factory.descriptor().name.clone();
            if !self.settings.permits(&name) {
                tracing::info!("Skipping plugin {}: excluded by configuration", name);
                continue;
            }
            if self.registry.is_loaded(&name) || batch.contains_key(&name) {
                return Err(PluginError::AlreadyLoaded(name));
            }
            batch.insert(name, factory);
        }
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        let graph = DependencyGraph::from_descriptors(batch.values().map(|f| f.descriptor()));
        let active: BTreeSet<String> = self.registry.names().into_iter().collect();
        let order = graph.load_order(&active)?;
        tracing::info!("Loading {} plugins: {}", order.len(), order.join(", "));

        let mut versions = self.registry.versions();
        let mut instances: Vec<(Arc<dyn PluginFactory>, Box<dyn Plugin>)> = Vec::new();
        for name in &order {
            let factory = match batch.get(name) {
                Some(factory) => Arc::clone(factory),
                None => continue,
            };
            match self.instantiate(&factory, &versions) {
                Ok(instance) => {
                    versions.insert(name.clone(), instance.version().to_string());
                    instances.push((factory, instance));
                }
                Err(e) => tracing::error!("Skipping plugin {}: {}", name, e),
            }
        }

        for (factory, _) in &instances {
            let descriptor = factory.descriptor();
            validate_dependencies(&descriptor.name, &descriptor.dependencies, &versions)?;
        }

        let mut started = Vec::new();
        for (factory, instance) in instances {
            let name = instance.name().to_string();
            let missing = factory
                .descriptor()
                .dependencies
                .keys()
                .find(|dep| !self.registry.is_loaded(dep))
                .cloned();
            if let Some(dep) = missing {
                tracing::error!("Skipping plugin {}: {}", name, PluginError::NotFound(dep));
                continue;
            }
            match self.activate(factory, instance).await {
                Ok(()) => started.push(name),
                Err(e) => tracing::error!("{}", e),
            }
        }

        tracing::info!("Loaded {} of {} plugins", started.len(), order.len());
        Ok(started)
    }

    /// Unload one plugin
    ///
    /// Every step runs even if a close hook fails; the first failure is
    /// returned afterwards.
    pub async fn unload(&mut self, name: &str) -> Result<(), PluginError> {
        let active = self
            .registry
            .remove(name)
            .ok_or_else(|| PluginError::NotFound(name.to_string()))?;
        self.shutdown(active).await
    }

    /// Unload a plugin and load it again from a refreshed factory
    ///
    /// When loading the new instance fails, a fresh instance from the
    /// previous factory is loaded in its place and the error is returned.
    pub async fn reload(&mut self, name: &str) -> Result<(), PluginError> {
        let previous = self
            .registry
            .get_active(name)
            .map(|p| Arc::clone(&p.factory))
            .ok_or_else(|| PluginError::NotFound(name.to_string()))?;

        if let Err(e) = self.unload(name).await {
            tracing::warn!("Unload of {} during reload: {}", name, e);
        }

        match self.start_refreshed(&previous).await {
            Ok(()) => {
                tracing::info!("Reloaded plugin {}", name);
                Ok(())
            }
            Err(e) => {
                tracing::error!("Reload of {} failed: {}", name, e);
                tracing::warn!("Restoring previous version of plugin {}", name);
                match self.start(Arc::clone(&previous)).await {
                    Ok(()) => tracing::warn!("Plugin {} restored from its previous factory", name),
                    Err(restore) => tracing::error!("Could not restore plugin {}: {}", name, restore),
                }
                Err(e)
            }
        }
    }

    /// Unload everything, dependents first, then save the access documents
    pub async fn unload_all(&mut self) -> Result<(), PluginError> {
        let mut names = self.registry.names();
        names.reverse();
        for name in names {
            if let Err(e) = self.unload(&name).await {
                tracing::error!("{}", e);
            }
        }
        self.bus.access().save().await?;
        tracing::info!("All plugins unloaded");
        Ok(())
    }

    async fn start_refreshed(&mut self, previous: &Arc<dyn PluginFactory>) -> Result<(), PluginError> {
        let name = previous.descriptor().name.clone();
        let factory = previous.refresh()?.unwrap_or_else(|| Arc::clone(previous));
        if factory.descriptor().name != name {
            return Err(PluginError::Load(format!(
                "refreshed factory provides '{}' instead of '{}'",
                factory.descriptor().name,
                name
            )));
        }
        self.start(factory).await
    }

    /// Load one plugin whose dependencies are all active
    async fn start(&mut self, factory: Arc<dyn PluginFactory>) -> Result<(), PluginError> {
        let versions = self.registry.versions();
        let instance = self.instantiate(&factory, &versions)?;
        let descriptor = factory.descriptor();
        validate_dependencies(&descriptor.name, &descriptor.dependencies, &versions)?;
        self.activate(factory, instance).await
    }

    fn instantiate(
        &self,
        factory: &Arc<dyn PluginFactory>,
        versions: &BTreeMap<String, String>,
    ) -> Result<Box<dyn Plugin>, PluginError> {
        let descriptor = factory.descriptor();
        let mut dependencies = BTreeMap::new();
        for dep in descriptor.dependencies.keys() {
            let version = versions
                .get(dep)
                .ok_or_else(|| PluginError::NotFound(dep.clone()))?;
            dependencies.insert(dep.clone(), version.clone());
        }

        let env = PluginEnv {
            replier: self.bus.replier(),
            debug: self.settings.debug,
            dependencies,
        };
        tracing::debug!("Instantiating plugin {}", descriptor.name);
        let instance = factory
            .create(&env)
            .map_err(|e| PluginError::initialization(&descriptor.name, e))?;
        if instance.name() != descriptor.name {
            return Err(PluginError::initialization(
                &descriptor.name,
                format!("instance calls itself '{}'", instance.name()),
            ));
        }
        Ok(instance)
    }

    /// Run the load hooks and make the plugin active
    async fn activate(&mut self, factory: Arc<dyn PluginFactory>, mut instance: Box<dyn Plugin>) -> Result<(), PluginError> {
        let name = instance.name().to_string();
        let version = instance.version().to_string();

        let stored = self.store.load(&name).await?;
        let first_load = stored.is_none();
        let data: SharedData = Arc::new(tokio::sync::Mutex::new(stored.unwrap_or_default()));
        let mut context = PluginContext::new(&name, Arc::clone(&self.bus), data, first_load, self.settings.debug);

        let hooks = match instance.init(&mut context) {
            Ok(()) => instance.on_load(&mut context).await,
            Err(e) => Err(e),
        };
        if let Err(e) = hooks {
            self.detach(&name, &mut context);
            return Err(PluginError::initialization(&name, e));
        }

        self.registry.insert(ActivePlugin {
            factory,
            instance,
            context,
        })?;
        self.bus.add_plugin(&name, &version);
        tracing::info!("Loaded plugin {} v{}", name, version);
        Ok(())
    }

    async fn shutdown(&mut self, active: ActivePlugin) -> Result<(), PluginError> {
        let ActivePlugin {
            mut instance,
            mut context,
            ..
        } = active;
        let name = instance.name().to_string();
        tracing::info!("Unloading plugin {}", name);
        self.detach(&name, &mut context);

        let mut failure: Option<String> = None;
        if let Err(e) = instance.on_close(&mut context).await {
            tracing::error!("on_close of {} failed: {}", name, e);
            failure = Some(e.to_string());
        }
        if let Err(e) = instance.close(&mut context) {
            tracing::error!("close of {} failed: {}", name, e);
            if failure.is_none() {
                failure = Some(e.to_string());
            }
        }

        let data = context.data().lock().await.clone();
        if self.settings.debug {
            tracing::debug!(
                "Not saving data of {} in debug mode: {}",
                name,
                serde_json::Value::Object(data)
            );
        } else if let Err(e) = self.store.save(&name, &data).await {
            tracing::error!("Failed to save data of {}: {}", name, e);
            if failure.is_none() {
                failure = Some(e.to_string());
            }
        }

        match failure {
            Some(reason) => Err(PluginError::Unload { plugin: name, reason }),
            None => Ok(()),
        }
    }

    /// Remove everything a plugin registered on the bus
    fn detach(&self, name: &str, context: &mut PluginContext) {
        let recorded = context
            .take_subscriptions()
            .into_iter()
            .filter(|id| self.bus.unsubscribe(*id))
            .count();
        let stray = self.bus.unsubscribe_owner(name);
        self.bus.remove_plugin(name);
        tracing::debug!("Removed {} handlers of {}", recorded + stray, name);
    }
}

/// Every dependency must be present and satisfy its constraint
fn validate_dependencies(
    plugin: &str,
    dependencies: &BTreeMap<String, String>,
    versions: &BTreeMap<String, String>,
) -> Result<(), PluginError> {
    for (dep, constraint) in dependencies {
        let actual = versions
            .get(dep)
            .ok_or_else(|| PluginError::DependencyNotFound {
                plugin: plugin.to_string(),
                dependency: dep.clone(),
                constraint: constraint.clone(),
            })?;
        check_constraint(plugin, dep, constraint, actual)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allow_and_deny() {
        let open = LoaderSettings::default();
        assert!(open.permits("anything"));

        let settings = LoaderSettings {
            allow: Some(vec!["a".to_string(), "b".to_string()]),
            deny: vec!["b".to_string()],
            debug: false,
        };
        assert!(settings.permits("a"));
        assert!(!settings.permits("b"));
        assert!(!settings.permits("c"));
    }

    #[test]
    fn test_validate_dependencies() {
        let deps: BTreeMap<String, String> = [("a".to_string(), ">=1.0".to_string())].into_iter().collect();
        let mut versions = BTreeMap::new();
        assert!(matches!(
            validate_dependencies("b", &deps, &versions),
            Err(PluginError::DependencyNotFound { .. })
        ));

        versions.insert("a".to_string(), "0.9".to_string());
        assert!(matches!(
            validate_dependencies("b", &deps, &versions),
            Err(PluginError::VersionConstraint { .. })
        ));

        versions.insert("a".to_string(), "1.2".to_string());
        assert!(validate_dependencies("b", &deps, &versions).is_ok());
    }
}
