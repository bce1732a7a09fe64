//! Plugin context - What a plugin sees of the runtime during its hooks

use std::sync::Arc;

use serde_json::Value;

use crate::application::errors::{BotError, PluginError};
use crate::application::messaging::{EventBus, EventHandler};
use crate::application::rbac::SharedAccessController;
use crate::domain::entities::{Conf, Event, Func, FuncBuilder, SubscriptionId};
use crate::domain::traits::{Replier, SharedData};

/// Handed to every lifecycle hook of one plugin instance
///
/// Subscriptions made through the context are recorded and removed by the
/// loader when the plugin is unloaded.
pub struct PluginContext {
    name: String,
    bus: Arc<EventBus>,
    data: SharedData,
    subscriptions: Vec<SubscriptionId>,
    first_load: bool,
    debug: bool,
}

impl PluginContext {
    pub(crate) fn new(name: &str, bus: Arc<EventBus>, data: SharedData, first_load: bool, debug: bool) -> Self {
        Self {
            name: name.to_string(),
            bus,
            data,
            subscriptions: Vec::new(),
            first_load,
            debug,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn access(&self) -> &SharedAccessController {
        self.bus.access()
    }

    pub fn replier(&self) -> Arc<dyn Replier> {
        self.bus.replier()
    }

    /// The plugin's persisted data document
    pub fn data(&self) -> SharedData {
        Arc::clone(&self.data)
    }

    /// True when no data was stored for this plugin before
    pub fn first_load(&self) -> bool {
        self.first_load
    }

    pub fn debug(&self) -> bool {
        self.debug
    }

    // ---- events ----

    pub fn subscribe(
        &mut self,
        event_type: &str,
        handler: Arc<dyn EventHandler>,
        priority: i32,
    ) -> Result<SubscriptionId, BotError> {
        let id = self.bus.subscribe(event_type, handler, priority, &self.name)?;
        self.subscriptions.push(id);
        Ok(id)
    }

    pub fn subscribe_blocking<F>(&mut self, event_type: &str, handler: F, priority: i32) -> Result<SubscriptionId, BotError>
    where
        F: Fn(Event) -> Result<(), BotError> + Send + Sync + 'static,
    {
        let id = self.bus.subscribe_blocking(event_type, handler, priority, &self.name)?;
        self.subscriptions.push(id);
        Ok(id)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.subscriptions.retain(|s| *s != id);
        self.bus.unsubscribe(id)
    }

    pub fn subscriptions(&self) -> &[SubscriptionId] {
        &self.subscriptions
    }

    pub(crate) fn take_subscriptions(&mut self) -> Vec<SubscriptionId> {
        std::mem::take(&mut self.subscriptions)
    }

    // ---- funcs and confs ----

    /// Start a func owned by this plugin
    pub fn func(&self, name: impl Into<String>) -> FuncBuilder {
        Func::builder(self.name.clone(), name)
    }

    pub fn register_func(&self, func: Func) -> Result<(), PluginError> {
        if func.plugin != self.name {
            return Err(PluginError::InvalidFunc {
                plugin: self.name.clone(),
                func: func.name,
                reason: format!("owned by '{}'", func.plugin),
            });
        }
        self.bus.register_func(func)
    }

    /// Start a conf owned by this plugin
    pub fn conf(&self, key: impl Into<String>, default: impl Into<Value>) -> Conf {
        Conf::new(self.name.clone(), key, default)
    }

    pub async fn register_conf(&self, conf: Conf) -> Result<(), PluginError> {
        if conf.plugin != self.name {
            return Err(PluginError::InvalidFunc {
                plugin: self.name.clone(),
                func: conf.key,
                reason: format!("conf owned by '{}'", conf.plugin),
            });
        }
        self.bus.register_conf(conf, self.data()).await
    }

    /// Current value of one of this plugin's confs
    pub async fn config(&self, key: &str) -> Option<Value> {
        let data = self.data.lock().await;
        data.get("config").and_then(|c| c.get(key)).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::messaging::{handler_fn, BusSettings};
    use crate::application::rbac::{AccessController, AccessSettings};
    use crate::domain::traits::NullReplier;

    fn context(name: &str) -> PluginContext {
        let access = AccessController::new(AccessSettings::default()).unwrap();
        let bus = EventBus::new(
            SharedAccessController::new(access),
            Arc::new(NullReplier),
            BusSettings::default(),
        )
        .unwrap();
        let data: SharedData = Arc::new(tokio::sync::Mutex::new(serde_json::Map::new()));
        PluginContext::new(name, bus, data, true, false)
    }

    #[tokio::test]
    async fn test_subscriptions_are_recorded() {
        let mut ctx = context("echo");
        let handler = handler_fn(|_event| Box::pin(async { Ok::<(), BotError>(()) }));
        let a = ctx.subscribe("a", Arc::clone(&handler), 0).unwrap();
        let b = ctx.subscribe("b", handler, 0).unwrap();
        assert_eq!(ctx.subscriptions(), &[a, b]);

        assert!(ctx.unsubscribe(a));
        assert_eq!(ctx.take_subscriptions(), vec![b]);
        assert!(ctx.subscriptions().is_empty());
    }

    #[tokio::test]
    async fn test_foreign_funcs_are_rejected() {
        let ctx = context("echo");
        let func = Func::builder("other", "run")
            .handler(|_call| async { Ok(()) })
            .build()
            .unwrap();
        assert!(matches!(
            ctx.register_func(func),
            Err(PluginError::InvalidFunc { .. })
        ));

        let own = ctx.func("run").handler(|_call| async { Ok(()) }).build().unwrap();
        ctx.register_func(own).unwrap();
        assert!(ctx.access().lock().permission_path_exists("echo.run"));
    }

    #[tokio::test]
    async fn test_conf_value() {
        let ctx = context("echo");
        ctx.register_conf(ctx.conf("times", 2)).await.unwrap();
        assert_eq!(ctx.config("times").await, Some(serde_json::json!(2)));
        assert_eq!(ctx.config("ghost").await, None);
    }
}
