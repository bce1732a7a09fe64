//! Plugin runtime
//!
//! - Version: comparator constraints between plugins
//! - Graph: load order of a batch
//! - Context: a plugin's handle on the bus, access control and its data
//! - Loader: the plugin lifecycle

pub mod context;
pub mod graph;
pub mod loader;
pub mod registry;
pub mod version;

pub use context::PluginContext;
pub use graph::DependencyGraph;
pub use loader::{LoaderSettings, PluginLoader};
pub use registry::PluginRegistry;
pub use version::{check_constraint, Version, VersionReq};
