//! Plugin and plugin factory traits

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::application::errors::{BotError, PluginError};
use crate::application::plugins::PluginContext;
use crate::domain::entities::PluginDescriptor;
use crate::domain::traits::Replier;

/// Core plugin trait that all plugins must implement
///
/// Load runs `init` then `on_load`; unload runs `on_close` then `close`.
/// Handlers, funcs and confs registered through the context are removed by
/// the loader on unload.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Name, version and dependencies of this instance
    fn descriptor(&self) -> &PluginDescriptor;

    fn name(&self) -> &str {
        &self.descriptor().name
    }

    fn version(&self) -> &str {
        &self.descriptor().version
    }

    /// Synchronous load hook
    fn init(&mut self, _ctx: &mut PluginContext) -> Result<(), BotError> {
        Ok(())
    }

    /// Asynchronous load hook
    async fn on_load(&mut self, _ctx: &mut PluginContext) -> Result<(), BotError> {
        Ok(())
    }

    /// Asynchronous close hook
    async fn on_close(&mut self, _ctx: &mut PluginContext) -> Result<(), BotError> {
        Ok(())
    }

    /// Synchronous close hook
    fn close(&mut self, _ctx: &mut PluginContext) -> Result<(), BotError> {
        Ok(())
    }
}

/// Collaborators handed to a factory when it builds an instance
#[derive(Clone)]
pub struct PluginEnv {
    pub replier: Arc<dyn Replier>,
    pub debug: bool,
    /// Versions of this plugin's dependencies, all already instantiated
    pub dependencies: BTreeMap<String, String>,
}

impl fmt::Debug for PluginEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginEnv")
            .field("debug", &self.debug)
            .field("dependencies", &self.dependencies)
            .finish()
    }
}

/// Something that can build fresh instances of one plugin
pub trait PluginFactory: Send + Sync {
    /// What the loader uses to order and filter the batch
    fn descriptor(&self) -> &PluginDescriptor;

    /// Build a new instance
    fn create(&self, env: &PluginEnv) -> Result<Box<dyn Plugin>, BotError>;

    /// A factory backed by freshly loaded code, used on reload
    ///
    /// `None` means the current factory is reused.
    fn refresh(&self) -> Result<Option<Arc<dyn PluginFactory>>, PluginError> {
        Ok(None)
    }
}

type CreateFn = dyn Fn(&PluginEnv) -> Result<Box<dyn Plugin>, BotError> + Send + Sync;

/// Factory backed by a closure, for plugins compiled into the host
pub struct FnFactory {
    descriptor: PluginDescriptor,
    create: Arc<CreateFn>,
}

impl PluginFactory for FnFactory {
    fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    fn create(&self, env: &PluginEnv) -> Result<Box<dyn Plugin>, BotError> {
        (self.create)(env)
    }
}

/// Wrap a constructor closure as a factory
pub fn factory_fn<F>(descriptor: PluginDescriptor, create: F) -> Arc<dyn PluginFactory>
where
    F: Fn(&PluginEnv) -> Result<Box<dyn Plugin>, BotError> + Send + Sync + 'static,
{
    Arc::new(FnFactory {
        descriptor,
        create: Arc::new(create),
    })
}
