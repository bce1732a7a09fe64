//! Funcs and confs - what a plugin exposes to chat users
//!
//! A `Func` is an activation filter plus an async body, gated by the
//! permission path `{plugin}.{name}`. A `Conf` is a typed setting stored in
//! the plugin's data document and editable through the `/cfg` built-in.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use regex_lite::Regex;
use serde_json::Value;

use super::{EventSource, Message, PermissionPath};
use crate::application::errors::{BotError, PluginError};
use crate::domain::traits::Replier;

/// Boxed future used for stored async callbacks
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Async func body
pub type FuncBody = Arc<dyn Fn(FuncCall) -> BoxFuture<'static, Result<(), BotError>> + Send + Sync>;

/// Custom activation predicate
pub type FuncPredicate = Arc<dyn Fn(&Message) -> bool + Send + Sync>;

/// Called after a conf value changed through `/cfg`
pub type ConfHook = Arc<dyn Fn(Value, FuncCall) -> BoxFuture<'static, Result<(), BotError>> + Send + Sync>;

/// Name of the func that only runs when nothing else of its plugin did
pub const DEFAULT_FUNC: &str = "default";

/// Role granted a func's path when none is given
pub const DEFAULT_FUNC_ROLE: &str = "user";

/// Decides whether a message activates a func
#[derive(Clone)]
pub enum ActivationFilter {
    Prefix(String),
    /// Matched from the start of the message
    Regex(Regex),
    Custom(FuncPredicate),
}

impl ActivationFilter {
    pub fn check(&self, message: &Message) -> bool {
        match self {
            ActivationFilter::Prefix(prefix) => {
                !message.raw_message.is_empty() && message.raw_message.starts_with(prefix.as_str())
            }
            ActivationFilter::Regex(re) => re
                .find(&message.raw_message)
                .map(|m| m.start() == 0)
                .unwrap_or(false),
            ActivationFilter::Custom(predicate) => predicate(message),
        }
    }
}

impl fmt::Debug for ActivationFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActivationFilter::Prefix(p) => write!(f, "Prefix({:?})", p),
            ActivationFilter::Regex(re) => write!(f, "Regex({:?})", re.as_str()),
            ActivationFilter::Custom(_) => f.write_str("Custom"),
        }
    }
}

/// What a func body receives
#[derive(Clone)]
pub struct FuncCall {
    pub message: Message,
    pub replier: Arc<dyn Replier>,
}

impl FuncCall {
    pub fn new(message: Message, replier: Arc<dyn Replier>) -> Self {
        Self { message, replier }
    }

    pub fn source(&self) -> EventSource {
        self.message.source()
    }

    /// Arguments after the command word
    pub fn args(&self) -> Vec<&str> {
        self.message.args()
    }

    pub async fn reply(&self, text: impl Into<String>) -> Result<(), BotError> {
        let text = text.into();
        self.replier.reply(&self.message, &text).await
    }
}

/// A registered capability of a plugin
#[derive(Clone)]
pub struct Func {
    pub plugin: String,
    pub name: String,
    /// Any one passing activates the func; none means always active
    pub filters: Vec<ActivationFilter>,
    /// Base role white-listed the func's path on registration
    pub permission: String,
    /// Check the group side against the root scope instead of the real group
    pub permission_raise: bool,
    pub reply_on_denial: bool,
    pub description: String,
    pub usage: String,
    pub examples: Vec<String>,
    pub tags: Vec<String>,
    /// Path granted to `permission` instead of the func's own path
    pub grant: Option<String>,
    body: FuncBody,
}

impl Func {
    pub fn builder(plugin: impl Into<String>, name: impl Into<String>) -> FuncBuilder {
        FuncBuilder::new(plugin, name)
    }

    /// Permission path gating this func
    pub fn permission_path(&self) -> String {
        format!("{}.{}", self.plugin, self.name)
    }

    /// Path white-listed to the func's role on registration
    pub fn granted_path(&self) -> String {
        self.grant.clone().unwrap_or_else(|| self.permission_path())
    }

    pub fn is_default(&self) -> bool {
        self.name == DEFAULT_FUNC
    }

    pub fn is_active(&self, message: &Message) -> bool {
        self.filters.is_empty() || self.filters.iter().any(|f| f.check(message))
    }

    pub async fn call(&self, call: FuncCall) -> Result<(), BotError> {
        (self.body)(call).await
    }
}

impl fmt::Debug for Func {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Func")
            .field("plugin", &self.plugin)
            .field("name", &self.name)
            .field("filters", &self.filters)
            .field("permission", &self.permission)
            .field("permission_raise", &self.permission_raise)
            .finish()
    }
}

/// Builder for [`Func`]
pub struct FuncBuilder {
    plugin: String,
    name: String,
    prefix: Option<String>,
    regex: Option<String>,
    predicate: Option<FuncPredicate>,
    permission: String,
    permission_raise: bool,
    reply_on_denial: bool,
    description: String,
    usage: String,
    examples: Vec<String>,
    tags: Vec<String>,
    grant: Option<String>,
    body: Option<FuncBody>,
}

impl FuncBuilder {
    pub fn new(plugin: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            plugin: plugin.into(),
            name: name.into(),
            prefix: None,
            regex: None,
            predicate: None,
            permission: DEFAULT_FUNC_ROLE.to_string(),
            permission_raise: false,
            reply_on_denial: false,
            description: String::new(),
            usage: String::new(),
            examples: Vec::new(),
            tags: Vec::new(),
            grant: None,
            body: None,
        }
    }

    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn regex(mut self, pattern: impl Into<String>) -> Self {
        self.regex = Some(pattern.into());
        self
    }

    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Message) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    pub fn permission(mut self, role: impl Into<String>) -> Self {
        self.permission = role.into();
        self
    }

    pub fn permission_raise(mut self, raise: bool) -> Self {
        self.permission_raise = raise;
        self
    }

    pub fn reply_on_denial(mut self, reply: bool) -> Self {
        self.reply_on_denial = reply;
        self
    }

    pub fn description(mut self, desc: impl Into<String>) -> Self {
        self.description = desc.into();
        self
    }

    pub fn usage(mut self, usage: impl Into<String>) -> Self {
        self.usage = usage.into();
        self
    }

    pub fn example(mut self, example: impl Into<String>) -> Self {
        self.examples.push(example.into());
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn grant(mut self, path: impl Into<String>) -> Self {
        self.grant = Some(path.into());
        self
    }

    pub fn handler<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(FuncCall) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BotError>> + Send + 'static,
    {
        self.body = Some(Arc::new(move |call| Box::pin(handler(call))));
        self
    }

    pub fn build(self) -> Result<Func, PluginError> {
        let invalid = |reason: String| PluginError::InvalidFunc {
            plugin: self.plugin.clone(),
            func: self.name.clone(),
            reason,
        };

        if self.name.is_empty() {
            return Err(invalid("func name is empty".to_string()));
        }
        // The name becomes the last segment of `<plugin>.<name>`
        let single_segment = PermissionPath::parse(&self.name)
            .map(|path| path.len() == 1 && !path.has_wildcard())
            .unwrap_or(false);
        if !single_segment {
            return Err(invalid(format!(
                "func name '{}' must be one path segment (alphanumeric, '_' or '-')",
                self.name
            )));
        }
        let body = match &self.body {
            Some(body) => body.clone(),
            None => return Err(invalid("no handler given".to_string())),
        };

        // Custom predicate first, then prefix, then regex
        let mut filters = Vec::new();
        if let Some(predicate) = &self.predicate {
            filters.push(ActivationFilter::Custom(predicate.clone()));
        }
        if let Some(prefix) = &self.prefix {
            filters.push(ActivationFilter::Prefix(prefix.clone()));
        }
        if let Some(pattern) = &self.regex {
            let re = Regex::new(pattern).map_err(|e| invalid(format!("bad regex: {}", e)))?;
            filters.push(ActivationFilter::Regex(re));
        }

        Ok(Func {
            plugin: self.plugin,
            name: self.name,
            filters,
            permission: self.permission,
            permission_raise: self.permission_raise,
            reply_on_denial: self.reply_on_denial,
            description: self.description,
            usage: self.usage,
            examples: self.examples,
            tags: self.tags,
            grant: self.grant,
            body,
        })
    }
}

/// Type of a conf value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfValueType {
    String,
    Int,
    Float,
    Bool,
}

impl ConfValueType {
    pub fn as_str(&self) -> &str {
        match self {
            ConfValueType::String => "string",
            ConfValueType::Int => "int",
            ConfValueType::Float => "float",
            ConfValueType::Bool => "bool",
        }
    }

    /// Type implied by a default value
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Bool(_) => ConfValueType::Bool,
            Value::Number(n) if n.is_i64() || n.is_u64() => ConfValueType::Int,
            Value::Number(_) => ConfValueType::Float,
            _ => ConfValueType::String,
        }
    }
}

/// A plugin setting
#[derive(Clone)]
pub struct Conf {
    pub plugin: String,
    pub key: String,
    pub default: Value,
    pub value_type: ConfValueType,
    pub description: String,
    /// Empty means anything of the right type
    pub allowed_values: Vec<Value>,
    pub on_change: Option<ConfHook>,
}

impl Conf {
    pub fn new(plugin: impl Into<String>, key: impl Into<String>, default: impl Into<Value>) -> Self {
        let default = default.into();
        Self {
            plugin: plugin.into(),
            key: key.into(),
            value_type: ConfValueType::of(&default),
            default,
            description: String::new(),
            allowed_values: Vec::new(),
            on_change: None,
        }
    }

    pub fn with_type(mut self, value_type: ConfValueType) -> Self {
        self.value_type = value_type;
        self
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = desc.into();
        self
    }

    pub fn with_allowed_values(mut self, values: Vec<Value>) -> Self {
        self.allowed_values = values;
        self
    }

    pub fn on_change<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(Value, FuncCall) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BotError>> + Send + 'static,
    {
        self.on_change = Some(Arc::new(move |value, call| Box::pin(hook(value, call))));
        self
    }

    /// `{plugin}.{key}`
    pub fn full_key(&self) -> String {
        format!("{}.{}", self.plugin, self.key)
    }

    /// Convert user text to a value of this conf's type
    pub fn parse_value(&self, text: &str) -> Result<Value, BotError> {
        let value = match self.value_type {
            ConfValueType::String => Value::String(text.to_string()),
            ConfValueType::Int => text
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| BotError::InvalidArgs(format!("'{}' is not an integer", text)))?,
            ConfValueType::Float => text
                .parse::<f64>()
                .map(Value::from)
                .map_err(|_| BotError::InvalidArgs(format!("'{}' is not a number", text)))?,
            ConfValueType::Bool => {
                let lower = text.to_lowercase();
                Value::Bool(!matches!(lower.as_str(), "false" | "0" | "f"))
            }
        };

        if !self.allowed_values.is_empty() && !self.allowed_values.contains(&value) {
            return Err(BotError::InvalidArgs(format!(
                "'{}' is not one of the allowed values for {}",
                text,
                self.full_key()
            )));
        }
        Ok(value)
    }
}

impl fmt::Debug for Conf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Conf")
            .field("plugin", &self.plugin)
            .field("key", &self.key)
            .field("default", &self.default)
            .field("value_type", &self.value_type)
            .finish()
    }
}
