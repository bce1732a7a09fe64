//! Plugin manifest definition

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::application::errors::PluginError;
use crate::domain::entities::PluginDescriptor;

/// Manifest file expected in every plugin directory
pub const MANIFEST_FILE: &str = "plugin.yaml";

/// Plugin metadata
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct PluginManifest {
    /// Plugin name (required)
    pub name: String,

    /// Plugin version (required)
    pub version: String,

    pub description: Option<String>,

    pub author: Option<String>,

    /// Path to the shared library, relative to the manifest
    pub library: Option<PathBuf>,

    /// Dependency name to version specifier
    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,
}

impl PluginManifest {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, PluginError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| PluginError::Load(format!("Failed to read manifest {}: {}", path.display(), e)))?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, PluginError> {
        let manifest: PluginManifest = serde_yaml::from_str(content)
            .map_err(|e| PluginError::Load(format!("Failed to parse manifest: {}", e)))?;
        if manifest.name.trim().is_empty() {
            return Err(PluginError::Load("Manifest has an empty name".to_string()));
        }
        Ok(manifest)
    }

    /// Library path inside `dir`; defaults to the platform name of
    /// `whisker_<name>`
    pub fn library_path(&self, dir: &Path) -> PathBuf {
        match &self.library {
            Some(lib) => dir.join(lib),
            None => dir.join(libloading::library_filename(format!("whisker_{}", self.name))),
        }
    }

    pub fn descriptor(&self) -> PluginDescriptor {
        PluginDescriptor {
            name: self.name.clone(),
            version: self.version.clone(),
            dependencies: self.dependencies.clone(),
            author: self.author.clone(),
            description: self.description.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_manifest() {
        let manifest = PluginManifest::from_yaml(
            "name: shop\nversion: \"1.2\"\ndependencies:\n  wallet: \">=1.0\"\n",
        )
        .unwrap();
        let descriptor = manifest.descriptor();
        assert_eq!(descriptor.name, "shop");
        assert_eq!(descriptor.dependencies.get("wallet").map(String::as_str), Some(">=1.0"));

        let dir = Path::new("/plugins/shop");
        assert_eq!(
            manifest.library_path(dir),
            dir.join(libloading::library_filename("whisker_shop"))
        );
    }

    #[test]
    fn test_manifest_requires_name() {
        assert!(PluginManifest::from_yaml("name: \"\"\nversion: \"1\"\n").is_err());
        assert!(PluginManifest::from_yaml("version: \"1\"\n").is_err());
    }
}
