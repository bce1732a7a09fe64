//! Infrastructure layer - External concerns
//! 
//! This layer contains:
//! - Config: Configuration loading
//! - Storage: Plugin data persistence
//! - Adapters: Transports (console)
//! - Plugins: Shared-library plugin factories

pub mod adapters;
pub mod config;
pub mod plugins;
pub mod storage;
