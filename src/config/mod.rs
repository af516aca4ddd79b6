//! Configuration module for opusmt
//!
//! Loads config from `$XDG_CONFIG_HOME/opusmt/config.toml` or the platform config directory.
//! Falls back to embedded defaults if the file doesn't exist.
//! Partial configs are merged with defaults using serde's default attributes.
//!
//! # Example
//!
//! ```no_run
//! use opusmt::config::Config;
//!
//! let config = Config::load().expect("Failed to load config");
//! println!("Engine: {}", config.engine.program);
//! println!("Model storage: {}", config.models.storage_url);
//! ```

pub mod schema;

pub use schema::{Config, EngineConfig, ModelsConfig, PreTranslationConfig};
