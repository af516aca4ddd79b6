#![allow(clippy::multiple_crate_versions)]

pub mod config;
pub mod error;
pub mod host;
pub mod lang;
pub mod models;
pub mod pretranslate;
pub mod provider;
pub mod search;
pub mod worker;

pub use error::{OpusMtError, Result};
pub use lang::LanguagePair;
pub use provider::TranslationProvider;
