//! whisker - embeddable plugin runtime for chat bots
//!
//! Plugins register handlers and funcs on an [`EventBus`], are gated by a
//! role-based [`AccessController`], and are loaded in dependency order by
//! the [`PluginLoader`].
//!
//! [`EventBus`]: application::messaging::EventBus
//! [`AccessController`]: application::rbac::AccessController
//! [`PluginLoader`]: application::plugins::PluginLoader

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::errors::{BotError, ConfigError, PluginError, RbacError, StorageError};
pub use application::messaging::{BusSettings, EventBus};
pub use application::plugins::{LoaderSettings, PluginContext, PluginLoader};
pub use application::rbac::{AccessController, AccessSettings, SharedAccessController};
