//! Domain entities - Core business objects with no external dependencies

pub mod event;
pub mod func;
pub mod message;
pub mod permission;
pub mod plugin;

pub use event::{Event, EventData, EventSource, HandlerOutcome, SubscriptionId};
pub use func::{ActivationFilter, BoxFuture, Conf, ConfValueType, Func, FuncBuilder, FuncCall};
pub use message::{Message, MessageType, ReplyTarget};
pub use permission::{PermissionMode, PermissionPath};
pub use plugin::PluginDescriptor;
