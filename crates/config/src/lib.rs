//! Configuration module for DynamiX
//!
//! Handles loading the daemon configuration from TOML files with environment
//! variable overrides, and the user settings document with its time and
//! season blocks.

pub mod config;
pub mod settings;

pub use config::*;
pub use settings::*;
