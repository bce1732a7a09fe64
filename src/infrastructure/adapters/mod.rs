//! Transports

pub mod console;
