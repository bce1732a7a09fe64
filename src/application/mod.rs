//! Application layer - The runtime core
//! 
//! This layer contains:
//! - Errors: Error types of every layer
//! - RBAC: Permission trie, role managers and the access controller
//! - Messaging: Event bus, handler registry and built-in funcs
//! - Plugins: Dependency ordering and the plugin lifecycle

pub mod errors;
pub mod messaging;
pub mod plugins;
pub mod rbac;
