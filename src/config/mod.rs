//! Configuration Module
//!
//! Handles client configuration loading and validation.

pub mod loader;
pub mod settings;

pub use loader::ConfigLoader;
pub use settings::{ClientConfig, DEFAULT_API_KEY_ENV, DEFAULT_BASE_URL, DEFAULT_CHAT_ENDPOINT};
