//! Application layer errors

use thiserror::Error;

/// General bot errors
///
/// Returned by handler bodies, repliers and plugin hooks. The runtime never
/// lets one of these escape a dispatch: they are recorded on the event instead.
#[derive(Error, Debug)]
pub enum BotError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid arguments: {0}")]
    InvalidArgs(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Access error: {0}")]
    Access(#[from] RbacError),

    #[error("Plugin error: {0}")]
    Plugin(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<PluginError> for BotError {
    fn from(err: PluginError) -> Self {
        BotError::Plugin(err.to_string())
    }
}

/// RBAC errors
///
/// Every variant is raised before the store is touched, so a rejected
/// operation leaves roles, principals and the trie unchanged.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RbacError {
    #[error("{kind} '{name}' not found")]
    NotFound { kind: &'static str, name: String },

    #[error("{kind} '{name}' already exists")]
    AlreadyExists { kind: &'static str, name: String },

    #[error("Role '{0}' cannot inherit from itself")]
    SelfInheritance(String),

    #[error("Circular inheritance detected: '{role}' -> '{parent}'")]
    CircularInheritance { role: String, parent: String },

    #[error("Invalid permission path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },
}

impl RbacError {
    pub(crate) fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        RbacError::NotFound { kind, name: name.into() }
    }

    pub(crate) fn already_exists(kind: &'static str, name: impl Into<String>) -> Self {
        RbacError::AlreadyExists { kind, name: name.into() }
    }

    pub(crate) fn invalid_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        RbacError::InvalidPath { path: path.into(), reason: reason.into() }
    }
}

/// Plugin loading and lifecycle errors
#[derive(Error, Debug)]
pub enum PluginError {
    #[error("Plugin '{0}' not found")]
    NotFound(String),

    #[error("Plugin '{0}' is already loaded")]
    AlreadyLoaded(String),

    #[error("Circular dependency between plugins: {}", .0.join(", "))]
    CircularDependency(Vec<String>),

    #[error("Plugin '{plugin}' depends on '{dependency}' ({constraint}), which is not available")]
    DependencyNotFound {
        plugin: String,
        dependency: String,
        constraint: String,
    },

    #[error("Plugin '{plugin}' requires '{dependency}' {constraint}, but version {actual} is loaded")]
    VersionConstraint {
        plugin: String,
        dependency: String,
        constraint: String,
        actual: String,
    },

    #[error("Invalid version '{version}': {reason}")]
    InvalidVersion { version: String, reason: String },

    #[error("Failed to initialize plugin '{plugin}': {reason}")]
    Initialization { plugin: String, reason: String },

    #[error("Failed to unload plugin '{plugin}': {reason}")]
    Unload { plugin: String, reason: String },

    #[error("Plugin '{plugin}' already registers '{func}'")]
    DuplicateFunc { plugin: String, func: String },

    #[error("Invalid func '{plugin}.{func}': {reason}")]
    InvalidFunc {
        plugin: String,
        func: String,
        reason: String,
    },

    #[error("Failed to load plugin: {0}")]
    Load(String),

    #[error("Access error: {0}")]
    Access(#[from] RbacError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl PluginError {
    pub(crate) fn initialization(plugin: impl Into<String>, reason: impl ToString) -> Self {
        PluginError::Initialization {
            plugin: plugin.into(),
            reason: reason.to_string(),
        }
    }
}

/// Storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Parse error: {0}")]
    Parse(String),
}
