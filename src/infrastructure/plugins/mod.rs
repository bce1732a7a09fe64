//! Shared-library plugins
//! 
//! Each plugin lives in its own directory with a `plugin.yaml` manifest and
//! a shared library exporting `whisker_plugin_create`.

pub mod dylib;
pub mod manifest;

pub use dylib::{discover, DylibFactory, PluginCreateFn, ENTRY_SYMBOL};
pub use manifest::{PluginManifest, MANIFEST_FILE};
