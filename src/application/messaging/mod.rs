//! Messaging - Event bus, handler registry and built-in commands

pub mod builtin;
pub mod bus;
pub mod parser;
pub mod registry;

pub use builtin::{command_pattern, CONF_PLACEHOLDER_PATH};
pub use bus::{BusSettings, ErrorObserver, EventBus, CONF_PATH_PREFIX, FRAMEWORK_NAME};
pub use parser::{CommandLine, CommandParser};
pub use registry::{handler_fn, BlockingHandler, EventHandler, Handler, HandlerRegistry};
