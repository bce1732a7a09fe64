//! Shared-library plugin factories
//!
//! A plugin library exports `whisker_plugin_create` (see [`declare_plugin!`])
//! and is built with the same compiler and `whisker` version as the host.
//!
//! [`declare_plugin!`]: crate::declare_plugin

use async_trait::async_trait;
use libloading::{Library, Symbol};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::manifest::{PluginManifest, MANIFEST_FILE};
use crate::application::errors::{BotError, PluginError};
use crate::application::plugins::PluginContext;
use crate::domain::entities::PluginDescriptor;
use crate::domain::traits::{Plugin, PluginEnv, PluginFactory};

/// Entry symbol looked up in every plugin library
pub const ENTRY_SYMBOL: &[u8] = b"whisker_plugin_create";

/// Signature of the entry symbol; null means construction failed
pub type PluginCreateFn = unsafe extern "C" fn(env: *const PluginEnv) -> *mut Box<dyn Plugin>;

/// Export a constructor `fn(&PluginEnv) -> Result<Box<dyn Plugin>, BotError>`
/// as the entry symbol of a plugin library
#[macro_export]
macro_rules! declare_plugin {
    ($ctor:path) => {
        #[no_mangle]
        pub unsafe extern "C" fn whisker_plugin_create(
            env: *const $crate::domain::traits::PluginEnv,
        ) -> *mut ::std::boxed::Box<dyn $crate::domain::traits::Plugin> {
            let env = match env.as_ref() {
                Some(env) => env,
                None => return ::std::ptr::null_mut(),
            };
            match $ctor(env) {
                Ok(plugin) => ::std::boxed::Box::into_raw(::std::boxed::Box::new(plugin)),
                Err(_) => ::std::ptr::null_mut(),
            }
        }
    };
}

/// Builds plugin instances from a shared library
pub struct DylibFactory {
    dir: PathBuf,
    manifest: PluginManifest,
    descriptor: PluginDescriptor,
    library: Arc<Library>,
}

impl DylibFactory {
    /// Read `plugin.yaml` in `dir` and open the library it names
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, PluginError> {
        let dir = dir.as_ref();
        let manifest = PluginManifest::from_file(dir.join(MANIFEST_FILE))?;
        let library_path = manifest.library_path(dir);
        if !library_path.exists() {
            return Err(PluginError::Load(format!(
                "Library not found: {}",
                library_path.display()
            )));
        }

        // Initializers of the library run here; plugin libraries are trusted
        let library = unsafe {
            Library::new(&library_path)
                .map_err(|e| PluginError::Load(format!("Failed to load library: {}", e)))?
        };
        // Fail early when the entry symbol is missing
        unsafe {
            library
                .get::<PluginCreateFn>(ENTRY_SYMBOL)
                .map_err(|e| PluginError::Load(format!("Failed to find entry symbol: {}", e)))?;
        }

        tracing::debug!("Opened plugin library {}", library_path.display());
        Ok(Self {
            dir: dir.to_path_buf(),
            descriptor: manifest.descriptor(),
            manifest,
            library: Arc::new(library),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn manifest(&self) -> &PluginManifest {
        &self.manifest
    }
}

impl PluginFactory for DylibFactory {
    fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    fn create(&self, env: &PluginEnv) -> Result<Box<dyn Plugin>, BotError> {
        let raw = unsafe {
            let create: Symbol<PluginCreateFn> = self
                .library
                .get(ENTRY_SYMBOL)
                .map_err(|e| BotError::Plugin(format!("Failed to find entry symbol: {}", e)))?;
            create(env as *const PluginEnv)
        };
        if raw.is_null() {
            return Err(BotError::Plugin(format!(
                "{} returned no plugin",
                self.descriptor.name
            )));
        }

        // The pointer came from Box::into_raw in declare_plugin!
        let inner = unsafe { *Box::from_raw(raw) };
        Ok(Box::new(LibraryPlugin {
            inner,
            _library: Arc::clone(&self.library),
        }))
    }

    /// Re-read the manifest and reopen the library
    fn refresh(&self) -> Result<Option<Arc<dyn PluginFactory>>, PluginError> {
        let factory = DylibFactory::open(&self.dir)?;
        Ok(Some(Arc::new(factory)))
    }
}

/// Keeps the library mapped while an instance from it is alive
///
/// Fields drop in order, so the instance goes before the library.
struct LibraryPlugin {
    inner: Box<dyn Plugin>,
    _library: Arc<Library>,
}

#[async_trait]
impl Plugin for LibraryPlugin {
    fn descriptor(&self) -> &PluginDescriptor {
        self.inner.descriptor()
    }

    fn init(&mut self, ctx: &mut PluginContext) -> Result<(), BotError> {
        self.inner.init(ctx)
    }

    async fn on_load(&mut self, ctx: &mut PluginContext) -> Result<(), BotError> {
        self.inner.on_load(ctx).await
    }

    async fn on_close(&mut self, ctx: &mut PluginContext) -> Result<(), BotError> {
        self.inner.on_close(ctx).await
    }

    fn close(&mut self, ctx: &mut PluginContext) -> Result<(), BotError> {
        self.inner.close(ctx)
    }
}

/// Open every plugin directory under `dir`
///
/// Directories without a manifest are ignored; broken plugins are logged
/// and skipped.
pub fn discover(dir: impl AsRef<Path>) -> Result<Vec<Arc<dyn PluginFactory>>, PluginError> {
    let dir = dir.as_ref();
    let mut factories: Vec<Arc<dyn PluginFactory>> = Vec::new();

    if !dir.exists() {
        tracing::warn!("Plugin directory does not exist: {}", dir.display());
        return Ok(factories);
    }

    let entries = std::fs::read_dir(dir)
        .map_err(|e| PluginError::Load(format!("Failed to read plugin directory: {}", e)))?;
    let mut paths: Vec<PathBuf> = Vec::new();
    for entry in entries {
        match entry {
            Ok(entry) => paths.push(entry.path()),
            Err(e) => tracing::warn!("Failed to read directory entry: {}", e),
        }
    }
    paths.sort();

    for path in paths {
        if !path.is_dir() || !path.join(MANIFEST_FILE).exists() {
            continue;
        }
        // Skip hidden directories
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            if name.starts_with('.') {
                continue;
            }
        }

        match DylibFactory::open(&path) {
            Ok(factory) => factories.push(Arc::new(factory)),
            Err(e) => tracing::warn!("Failed to open plugin in {}: {}", path.display(), e),
        }
    }

    tracing::info!("Found {} plugins in {}", factories.len(), dir.display());
    Ok(factories)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discover_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let factories = discover(dir.path().join("none")).unwrap();
        assert!(factories.is_empty());
    }

    #[test]
    fn test_discover_skips_broken_plugins() {
        let dir = tempfile::tempdir().unwrap();
        let plugin = dir.path().join("shop");
        std::fs::create_dir_all(&plugin).unwrap();
        std::fs::write(plugin.join(MANIFEST_FILE), "name: shop\nversion: \"1.0\"\n").unwrap();
        std::fs::create_dir_all(dir.path().join("no_manifest")).unwrap();

        assert!(discover(dir.path()).unwrap().is_empty());
        assert!(DylibFactory::open(&plugin).is_err());
    }
}
