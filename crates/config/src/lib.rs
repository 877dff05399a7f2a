//! Configuration module for the bulletproof watch-folder transcoder
//!
//! Handles loading configuration from YAML or JSON files, environment variable
//! overrides, and fail-closed validation.

pub mod config;

pub use config::*;
