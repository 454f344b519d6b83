//! CLI-specific functionality for sessionkeeper
//!
//! This module contains argument parsing and configuration discovery.

pub mod args;
pub mod config;

pub use args::{Args, Commands};
pub use config::ConfigDiscovery;
