//! deepseek-stream
//!
//! Client for DeepSeek-style chat completions, built around an incremental
//! Server-Sent Events consumer: frames are read as bytes arrive, decoded
//! into choice deltas, accumulated per choice (content, reasoning and
//! tool-call arguments) and exposed as a cancellable `futures::Stream`.
//!
//! ```ignore
//! use deepseek_stream::{ChatRequest, DeepSeekClient, Message};
//! use futures::StreamExt;
//! use tokio_util::sync::CancellationToken;
//!
//! let client = DeepSeekClient::new()?;
//! let request = ChatRequest::new("deepseek-reasoner", vec![Message::user("9.11 or 9.8?")]);
//! let mut stream = client.chat_stream(request, CancellationToken::new());
//! while let Some(delta) = stream.next().await {
//!     print!("{}", delta?.delta.content.unwrap_or_default());
//! }
//! let answer = stream.message(0);
//! ```

pub mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod stream;

pub use api::{ChatRequest, Message, ToolCall, Usage, CHAT_MODEL, REASONER_MODEL};
pub use client::HttpClient;
pub use config::{ClientConfig, ConfigLoader};
pub use error::{DeepSeekError, Result};
pub use stream::{AccumulatedMessage, ChatStream, ChoiceDelta, FinishReason, StreamState};

use tokio_util::sync::CancellationToken;
use tracing::debug;

/// The main DeepSeek client
#[derive(Debug, Clone)]
pub struct DeepSeekClient {
    config: ClientConfig,
    http_client: HttpClient,
}

impl DeepSeekClient {
    /// Create a new client with configuration from the default locations
    pub fn new() -> Result<Self> {
        let loader = ConfigLoader::new()?;
        Self::from_config(loader.into_config())
    }

    /// Create a client with a custom config path
    pub fn with_config_path(path: &str) -> Result<Self> {
        let loader = ConfigLoader::from_path(path)?;
        Self::from_config(loader.into_config())
    }

    /// Create a client from a config object
    pub fn from_config(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let http_client = HttpClient::new(&config)?;
        Ok(Self {
            config,
            http_client,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Start a streamed chat completion.
    ///
    /// The request is sent when the returned stream is first polled. An empty
    /// `model` falls back to the configured default. Cancelling `cancel`
    /// ends the stream with [`DeepSeekError::Cancelled`] and closes the
    /// connection.
    pub fn chat_stream(&self, request: ChatRequest, cancel: CancellationToken) -> ChatStream {
        let mut request = request.into_streaming();
        if request.model.is_empty() {
            request.model = self.config.model.clone();
        }

        let http_client = self.http_client.clone();
        let url = self.config.chat_url();
        let api_key = self.config.resolve_api_key();

        debug!(model = %request.model, url = %url, "starting chat stream");
        ChatStream::connect(
            async move {
                http_client
                    .post_stream(&url, &request, api_key.as_deref())
                    .await
            },
            cancel,
        )
    }
}
