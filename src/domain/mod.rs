//! Domain layer - Plain data and the seams to the outside
//! 
//! This layer contains:
//! - Entities: Permission paths, events, messages, funcs and plugin descriptors
//! - Traits: Plugins and their factories, repliers and data stores

pub mod entities;
pub mod traits;
