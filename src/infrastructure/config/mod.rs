//! Configuration management

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::application::errors::ConfigError;
use crate::application::messaging::BusSettings;
use crate::application::plugins::LoaderSettings;
use crate::application::rbac::AccessSettings;

/// Runtime configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Config {
    pub bot: BotConfig,
    pub access: AccessConfig,
    pub plugins: PluginConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct BotConfig {
    pub name: String,
    pub command_prefix: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct AccessConfig {
    /// User granted the root role at startup
    pub root: Option<String>,
    pub case_sensitive: bool,
    /// Directory of the two access documents
    pub data_dir: PathBuf,
    /// Whether built-in funcs answer users they refuse
    pub reply_on_denial: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct PluginConfig {
    /// Where shared-library plugins are discovered
    pub directory: PathBuf,
    /// Where plugin data documents are stored
    pub data_directory: PathBuf,
    pub allow: Option<Vec<String>>,
    pub deny: Vec<String>,
    pub debug: bool,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            name: "whisker".to_string(),
            command_prefix: "/".to_string(),
        }
    }
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            root: None,
            case_sensitive: false,
            data_dir: PathBuf::from("data"),
            reply_on_denial: false,
        }
    }
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("plugins"),
            data_directory: PathBuf::from("data/plugins"),
            allow: None,
            deny: Vec::new(),
            debug: false,
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Parse(format!("Failed to read config {}: {}", path.display(), e)))?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(content)
            .map_err(|e| ConfigError::Parse(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults with environment overrides applied
    pub fn load_env() -> Self {
        let mut config = Config::default();
        config.apply_env();
        config
    }

    /// Override fields from `WHISKER_*` environment variables
    pub fn apply_env(&mut self) {
        if let Ok(root) = std::env::var("WHISKER_ROOT") {
            self.access.root = Some(root);
        }
        if let Ok(dir) = std::env::var("WHISKER_DATA_DIR") {
            self.access.data_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var("WHISKER_PLUGINS_DIR") {
            self.plugins.directory = PathBuf::from(dir);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bot.command_prefix.is_empty() {
            return Err(ConfigError::MissingField("bot.command-prefix".to_string()));
        }
        if self.bot.command_prefix.chars().any(char::is_whitespace) {
            return Err(ConfigError::InvalidValue(format!(
                "command prefix '{}' contains whitespace",
                self.bot.command_prefix
            )));
        }
        Ok(())
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        serde_yaml::to_string(self).map_err(|e| ConfigError::Parse(format!("Failed to serialize config: {}", e)))
    }

    pub fn access_settings(&self) -> AccessSettings {
        AccessSettings {
            root: self.access.root.clone(),
            case_sensitive: self.access.case_sensitive,
            data_dir: Some(self.access.data_dir.clone()),
        }
    }

    pub fn bus_settings(&self) -> BusSettings {
        BusSettings {
            command_prefix: self.bot.command_prefix.clone(),
            reply_on_denial: self.access.reply_on_denial,
            ..BusSettings::default()
        }
    }

    pub fn loader_settings(&self) -> LoaderSettings {
        LoaderSettings {
            allow: self.plugins.allow.clone(),
            deny: self.plugins.deny.clone(),
            debug: self.plugins.debug,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config = Config::from_yaml(
            "access:\n  root: \"42\"\n  case-sensitive: true\nplugins:\n  deny: [spam]\n",
        )
        .unwrap();
        assert_eq!(config.access.root.as_deref(), Some("42"));
        assert!(config.access.case_sensitive);
        assert_eq!(config.bot.command_prefix, "/");
        assert_eq!(config.plugins.deny, vec!["spam"]);
        assert!(config.loader_settings().permits("echo"));
        assert!(!config.loader_settings().permits("spam"));
    }

    #[test]
    fn test_yaml_round_trip() {
        let mut config = Config::default();
        config.plugins.allow = Some(vec!["echo".to_string()]);
        let text = config.to_yaml().unwrap();
        assert!(text.contains("command-prefix"));
        let back = Config::from_yaml(&text).unwrap();
        assert_eq!(back.plugins.allow, config.plugins.allow);
    }

    #[test]
    fn test_rejects_bad_prefix() {
        assert!(Config::from_yaml("bot:\n  command-prefix: \"\"\n").is_err());
        assert!(Config::from_yaml("bot:\n  command-prefix: \"a b\"\n").is_err());
    }
}
