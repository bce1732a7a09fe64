//! Domain traits - Abstractions for infrastructure implementations

pub mod plugin;
pub mod reply;
pub mod store;

pub use plugin::{factory_fn, FnFactory, Plugin, PluginEnv, PluginFactory};
pub use reply::{NullReplier, Replier};
pub use store::{DataStore, PluginData, SharedData};
