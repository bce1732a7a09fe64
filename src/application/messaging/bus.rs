//! Event bus - Routes events to subscribed handlers and activates funcs
//!
//! Handlers for one event run in the order the registry resolves them. A
//! failing handler is recorded on the event and dispatch moves on. Events
//! published asynchronously are queued per type, so two events of the same
//! type never overlap while different types proceed independently.
//! Panicking handlers and funcs are recorded like failing ones.

use std::any::Any;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::{Map, Value};
use tokio::task::JoinHandle;

use super::builtin;
use super::parser::CommandParser;
use super::registry::{BlockingHandler, EventHandler, Handler, HandlerRegistry};
use crate::application::errors::{BotError, PluginError};
use crate::application::rbac::{SharedAccessController, ADMIN_ROLE};
use crate::domain::entities::event::{GROUP_MESSAGE_EVENT, PRIVATE_MESSAGE_EVENT};
use crate::domain::entities::{
    Conf, Event, EventSource, Func, FuncCall, HandlerOutcome, PermissionMode, SubscriptionId,
};
use crate::domain::traits::{Replier, SharedData};

/// Owner name of everything the runtime registers itself
pub const FRAMEWORK_NAME: &str = "whisker";

/// Prefix of the permission paths guarding conf changes
pub const CONF_PATH_PREFIX: &str = "whisker.cfg";

/// Called for every failed handler or func
pub type ErrorObserver = Arc<dyn Fn(&Event, &HandlerOutcome) + Send + Sync>;

/// Bus behaviour knobs
#[derive(Debug, Clone)]
pub struct BusSettings {
    /// Prefix of chat commands, also used by the built-in funcs
    pub command_prefix: String,
    /// Priority of the func activator on message events
    pub func_priority: i32,
    /// Whether the built-in funcs answer users they refuse
    pub reply_on_denial: bool,
    pub denial_message: String,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            command_prefix: "/".to_string(),
            func_priority: 100,
            reply_on_denial: false,
            denial_message: "Permission denied".to_string(),
        }
    }
}

/// A conf together with the data of the plugin owning it
#[derive(Clone)]
pub(crate) struct RegisteredConf {
    pub conf: Conf,
    pub data: SharedData,
}

#[derive(Default)]
struct FuncTable {
    /// Registration order
    funcs: Vec<Func>,
    confs: BTreeMap<String, RegisteredConf>,
    /// Loaded plugin name -> version
    plugins: BTreeMap<String, String>,
}

#[derive(Default)]
struct TypeQueue {
    events: VecDeque<Event>,
}

pub struct EventBus {
    registry: RwLock<HandlerRegistry>,
    /// Pending events per type; a type present here has a running consumer
    queues: Mutex<HashMap<String, TypeQueue>>,
    observers: RwLock<Vec<ErrorObserver>>,
    table: RwLock<FuncTable>,
    access: SharedAccessController,
    replier: Arc<dyn Replier>,
    parser: CommandParser,
    settings: BusSettings,
}

impl EventBus {
    /// Create a bus with the func activator and the built-in funcs in place
    pub fn new(
        access: SharedAccessController,
        replier: Arc<dyn Replier>,
        settings: BusSettings,
    ) -> Result<Arc<Self>, BotError> {
        let bus = Arc::new(Self {
            registry: RwLock::new(HandlerRegistry::new()),
            queues: Mutex::new(HashMap::new()),
            observers: RwLock::new(Vec::new()),
            table: RwLock::new(FuncTable::default()),
            access,
            replier,
            parser: CommandParser::new(settings.command_prefix.clone()),
            settings,
        });

        let activator: Arc<dyn EventHandler> = Arc::new(FuncActivator {
            bus: Arc::downgrade(&bus),
        });
        for event_type in [GROUP_MESSAGE_EVENT, PRIVATE_MESSAGE_EVENT] {
            bus.subscribe(
                event_type,
                Arc::clone(&activator),
                bus.settings.func_priority,
                FRAMEWORK_NAME,
            )?;
        }

        for func in builtin::builtin_funcs(&bus)? {
            bus.register_func(func)?;
        }
        tracing::debug!("Event bus ready");
        Ok(bus)
    }

    pub fn access(&self) -> &SharedAccessController {
        &self.access
    }

    pub fn replier(&self) -> Arc<dyn Replier> {
        Arc::clone(&self.replier)
    }

    pub fn parser(&self) -> &CommandParser {
        &self.parser
    }

    pub fn settings(&self) -> &BusSettings {
        &self.settings
    }

    // ---- subscriptions ----

    /// Subscribe an async handler
    ///
    /// `event_type` is matched exactly unless it starts with `re:`.
    pub fn subscribe(
        &self,
        event_type: &str,
        handler: Arc<dyn EventHandler>,
        priority: i32,
        owner: &str,
    ) -> Result<SubscriptionId, BotError> {
        let id = write(&self.registry).insert(event_type, priority, owner, Handler::Async(handler))?;
        tracing::debug!("{} subscribed to {} at priority {}", owner, event_type, priority);
        Ok(id)
    }

    /// Subscribe a synchronous handler run on the blocking pool
    ///
    /// It gets a copy of the event, so it cannot stop propagation or add
    /// results.
    pub fn subscribe_blocking<F>(
        &self,
        event_type: &str,
        handler: F,
        priority: i32,
        owner: &str,
    ) -> Result<SubscriptionId, BotError>
    where
        F: Fn(Event) -> Result<(), BotError> + Send + Sync + 'static,
    {
        let handler: BlockingHandler = Arc::new(handler);
        write(&self.registry).insert(event_type, priority, owner, Handler::Blocking(handler))
    }

    /// Returns whether the handle was live
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        write(&self.registry).remove(id)
    }

    pub fn unsubscribe_owner(&self, owner: &str) -> usize {
        write(&self.registry).remove_owner(owner)
    }

    pub fn is_subscribed(&self, id: SubscriptionId) -> bool {
        read(&self.registry).contains(id)
    }

    pub fn handler_count(&self) -> usize {
        read(&self.registry).len()
    }

    pub fn add_error_observer<F>(&self, observer: F)
    where
        F: Fn(&Event, &HandlerOutcome) + Send + Sync + 'static,
    {
        write(&self.observers).push(Arc::new(observer));
    }

    // ---- publishing ----

    /// Dispatch `event` now and return what its handlers produced
    pub async fn publish_sync(&self, mut event: Event) -> Vec<HandlerOutcome> {
        self.dispatch(&mut event).await;
        event.into_results()
    }

    /// Queue `event` behind earlier events of the same type
    ///
    /// Returns the consumer task when this call started one; `None` when a
    /// consumer for the type was already running and will pick the event up.
    pub fn publish_async(self: &Arc<Self>, event: Event) -> Option<JoinHandle<()>> {
        let event_type = event.event_type.clone();
        {
            let mut queues = lock(&self.queues);
            if let Some(queue) = queues.get_mut(&event_type) {
                queue.events.push_back(event);
                return None;
            }
            let mut queue = TypeQueue::default();
            queue.events.push_back(event);
            queues.insert(event_type.clone(), queue);
        }

        let bus = Arc::clone(self);
        Some(tokio::spawn(async move { bus.consume(event_type).await }))
    }

    /// Events of `event_type` waiting for their consumer
    pub fn pending(&self, event_type: &str) -> usize {
        lock(&self.queues)
            .get(event_type)
            .map(|q| q.events.len())
            .unwrap_or(0)
    }

    async fn consume(&self, event_type: String) {
        let mut guard = ConsumerGuard {
            queues: &self.queues,
            event_type: &event_type,
            armed: true,
        };
        loop {
            let next = {
                let mut queues = lock(&self.queues);
                let next = queues
                    .get_mut(&event_type)
                    .and_then(|queue| queue.events.pop_front());
                if next.is_none() {
                    queues.remove(&event_type);
                }
                next
            };
            match next {
                Some(mut event) => self.dispatch(&mut event).await,
                None => break,
            }
        }
        guard.armed = false;
    }

    /// Run every handler resolved for the event until one stops propagation
    pub(crate) async fn dispatch(&self, event: &mut Event) {
        let handlers = read(&self.registry).resolve(&event.event_type);
        tracing::debug!("Dispatching {} to {} handlers", event.event_type, handlers.len());

        for resolved in handlers {
            if event.is_propagation_stopped() {
                break;
            }
            match resolved.handler {
                Handler::Async(handler) => {
                    let result = AssertUnwindSafe(async { handler.handle(event).await })
                        .catch_unwind()
                        .await
                        .unwrap_or_else(|payload| Err(panicked(payload)));
                    if let Err(e) = result {
                        self.record_failure(event, resolved.owner, Some(resolved.id), e);
                    }
                }
                Handler::Blocking(handler) => {
                    let snapshot = event.clone();
                    let owner = resolved.owner;
                    tokio::task::spawn_blocking(move || {
                        let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
                            handler(snapshot)
                        }))
                        .unwrap_or_else(|payload| Err(panicked(payload)));
                        if let Err(e) = result {
                            tracing::error!("Blocking handler of {} failed: {}", owner, e);
                        }
                    });
                }
            }
        }
    }

    fn record_failure(
        &self,
        event: &mut Event,
        owner: String,
        subscription: Option<SubscriptionId>,
        error: BotError,
    ) {
        tracing::error!("Handler of {} failed on {}: {}", owner, event.event_type, error);
        let outcome = HandlerOutcome::Error {
            owner,
            subscription,
            message: error.to_string(),
        };
        let observers = read(&self.observers).clone();
        for observer in &observers {
            observer(event, &outcome);
        }
        event.push_outcome(outcome);
    }

    // ---- funcs and confs ----

    /// Register a func and white-list its path to its role
    pub fn register_func(&self, func: Func) -> Result<(), PluginError> {
        let duplicate = read(&self.table)
            .funcs
            .iter()
            .any(|f| f.plugin == func.plugin && f.name == func.name);
        if duplicate {
            return Err(PluginError::DuplicateFunc {
                plugin: func.plugin,
                func: func.name,
            });
        }

        self.access.lock().assign_permissions_to_role(
            &func.permission,
            &func.granted_path(),
            PermissionMode::White,
            true,
        )?;
        tracing::debug!("Registered func {} for role {}", func.permission_path(), func.permission);
        write(&self.table).funcs.push(func);
        Ok(())
    }

    /// Register a conf of a plugin whose data lives in `data`
    ///
    /// The default is written under `config.<key>` unless a value is already
    /// stored. Admins may change it through `whisker.cfg.<plugin>.<key>`.
    pub async fn register_conf(&self, conf: Conf, data: SharedData) -> Result<(), PluginError> {
        let full_key = conf.full_key();
        let exists = read(&self.table).confs.contains_key(&full_key);
        if exists {
            return Err(PluginError::DuplicateFunc {
                plugin: conf.plugin,
                func: conf.key,
            });
        }

        let path = format!("{}.{}", CONF_PATH_PREFIX, full_key);
        self.access
            .lock()
            .assign_permissions_to_role(ADMIN_ROLE, &path, PermissionMode::White, true)?;

        {
            let mut data = data.lock().await;
            let config = data
                .entry("config")
                .or_insert_with(|| Value::Object(Map::new()));
            if !config.is_object() {
                *config = Value::Object(Map::new());
            }
            if let Some(config) = config.as_object_mut() {
                config
                    .entry(conf.key.clone())
                    .or_insert_with(|| conf.default.clone());
            }
        }

        tracing::debug!("Registered conf {}", full_key);
        write(&self.table)
            .confs
            .insert(full_key, RegisteredConf { conf, data });
        Ok(())
    }

    pub(crate) fn add_plugin(&self, name: &str, version: &str) {
        write(&self.table)
            .plugins
            .insert(name.to_string(), version.to_string());
    }

    /// Forget a plugin's funcs, confs and version
    pub(crate) fn remove_plugin(&self, name: &str) {
        let mut table = write(&self.table);
        table.funcs.retain(|f| f.plugin != name);
        table.confs.retain(|_, c| c.conf.plugin != name);
        table.plugins.remove(name);
    }

    /// Loaded plugins as `(name, version)` in name order
    pub fn plugins(&self) -> Vec<(String, String)> {
        read(&self.table)
            .plugins
            .iter()
            .map(|(n, v)| (n.clone(), v.clone()))
            .collect()
    }

    pub fn funcs(&self) -> Vec<Func> {
        read(&self.table).funcs.clone()
    }

    /// Full keys of every registered conf
    pub fn conf_keys(&self) -> Vec<String> {
        read(&self.table).confs.keys().cloned().collect()
    }

    pub(crate) fn conf(&self, full_key: &str) -> Option<RegisteredConf> {
        read(&self.table).confs.get(full_key).cloned()
    }

    /// Find the full key for `key`
    ///
    /// A bare key is accepted when exactly one plugin declares it.
    pub(crate) fn resolve_conf_key(&self, key: &str) -> Result<String, String> {
        let table = read(&self.table);
        if table.confs.contains_key(key) {
            return Ok(key.to_string());
        }
        let matches: Vec<&String> = table
            .confs
            .iter()
            .filter(|(_, c)| c.conf.key == key)
            .map(|(full, _)| full)
            .collect();
        match matches.as_slice() {
            [only] => Ok((*only).clone()),
            [] => Err(format!("Conf {} does not exist", key)),
            _ => Err(format!(
                "Conf {} is ambiguous, use one of: {}",
                key,
                matches.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ")
            )),
        }
    }

    /// Decide `path` for `source`; a failing check counts as denied
    pub(crate) fn check(&self, path: &str, source: &EventSource, permission_raise: bool) -> bool {
        match self.access.lock().with_permission(path, source, permission_raise) {
            Ok(allowed) => allowed,
            Err(e) => {
                tracing::warn!("Permission check for {} failed: {}", path, e);
                false
            }
        }
    }

    /// Run the funcs a message activates
    ///
    /// Non-default funcs go first in registration order. A plugin's
    /// `default` func only runs when none of its other funcs, and no
    /// built-in func, ran for this message.
    async fn activate_funcs(&self, event: &mut Event) {
        let message = match event.message() {
            Some(message) => message.clone(),
            None => return,
        };
        let source = event.source.clone().unwrap_or_else(|| message.source());
        let funcs = self.funcs();

        let mut activated: HashSet<String> = HashSet::new();
        let ordered = funcs
            .iter()
            .filter(|f| !f.is_default())
            .chain(funcs.iter().filter(|f| f.is_default()));

        for func in ordered {
            if !func.is_active(&message) {
                continue;
            }
            if func.is_default()
                && (activated.contains(&func.plugin) || activated.contains(FRAMEWORK_NAME))
            {
                continue;
            }

            let path = func.permission_path();
            if !self.check(&path, &source, func.permission_raise) {
                tracing::debug!("{} denied for user {}", path, source.user_id);
                if func.reply_on_denial {
                    if let Err(e) = self.replier.reply(&message, &self.settings.denial_message).await {
                        tracing::warn!("Failed to send denial for {}: {}", path, e);
                    }
                }
                continue;
            }

            if !func.is_default() {
                activated.insert(func.plugin.clone());
            }
            tracing::debug!("Running func {}", path);
            let call = FuncCall::new(message.clone(), Arc::clone(&self.replier));
            let result = AssertUnwindSafe(func.call(call))
                .catch_unwind()
                .await
                .unwrap_or_else(|payload| Err(panicked(payload)));
            if let Err(e) = result {
                self.record_failure(event, func.plugin.clone(), None, e);
            }
        }
    }
}

/// Message handler that runs funcs
struct FuncActivator {
    bus: Weak<EventBus>,
}

#[async_trait]
impl EventHandler for FuncActivator {
    async fn handle(&self, event: &mut Event) -> Result<(), BotError> {
        if let Some(bus) = self.bus.upgrade() {
            bus.activate_funcs(event).await;
        }
        Ok(())
    }
}

/// Releases the queue entry of a consumer that did not run to completion
struct ConsumerGuard<'a> {
    queues: &'a Mutex<HashMap<String, TypeQueue>>,
    event_type: &'a str,
    armed: bool,
}

impl Drop for ConsumerGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Some(queue) = lock(self.queues).remove(self.event_type) {
            tracing::warn!(
                "Consumer of {} stopped early, dropping {} queued events",
                self.event_type,
                queue.events.len()
            );
        }
    }
}

fn panicked(payload: Box<dyn Any + Send>) -> BotError {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown cause".to_string());
    BotError::Internal(format!("handler panicked: {}", message))
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
