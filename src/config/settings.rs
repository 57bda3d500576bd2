//! Client Configuration
//!
//! Defines the configuration schema for the DeepSeek client.

use crate::error::{DeepSeekError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.deepseek.com";
pub const DEFAULT_CHAT_ENDPOINT: &str = "/chat/completions";
pub const DEFAULT_API_KEY_ENV: &str = "DEEPSEEK_API_KEY";

/// Connection settings for one DeepSeek-compatible endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL for the API
    pub base_url: String,

    /// Path of the chat completion endpoint (local deployments often differ)
    pub chat_endpoint: String,

    /// Raw API key, takes precedence over `api_key_env`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Environment variable name for the API key
    pub api_key_env: String,

    /// Default model for requests built by the client
    pub model: String,

    /// Whole-request timeout; streams of long reasoning answers need a lot
    pub timeout_secs: u64,

    pub connect_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            chat_endpoint: DEFAULT_CHAT_ENDPOINT.to_string(),
            api_key: None,
            api_key_env: DEFAULT_API_KEY_ENV.to_string(),
            model: crate::api::chat::CHAT_MODEL.to_string(),
            timeout_secs: 300,
            connect_timeout_secs: 10,
        }
    }
}

impl ClientConfig {
    /// Full URL of the chat endpoint
    pub fn chat_url(&self) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            self.chat_endpoint.trim_start_matches('/')
        )
    }

    /// Resolve the API key, from the config first then the environment.
    ///
    /// A missing key is not an error: local deployments may run without auth.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| std::env::var(&self.api_key_env).ok())
            .filter(|k| !k.is_empty())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Reject settings that cannot produce a usable request
    pub fn validate(&self) -> Result<()> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(DeepSeekError::Config(format!(
                "base_url must start with http:// or https://, got '{}'",
                self.base_url
            )));
        }
        if self.model.is_empty() {
            return Err(DeepSeekError::Config("model must not be empty".to_string()));
        }
        if self.timeout_secs == 0 {
            return Err(DeepSeekError::Config(
                "timeout_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
