//! HTTP Client
//!
//! Issues the streaming POST and hands the response body over as a byte
//! stream. No retries: a failed request is reported to the caller as is.

use crate::config::ClientConfig;
use crate::error::{DeepSeekError, Result};
use crate::stream::ByteStream;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use serde::Serialize;
use tracing::debug;

/// HTTP client for streaming chat requests
#[derive(Debug, Clone)]
pub struct HttpClient {
    /// Inner reqwest client
    client: Client,
}

impl HttpClient {
    /// Create a new HTTP client with the configured timeouts
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .connect_timeout(config.connect_timeout())
            .pool_max_idle_per_host(10)
            .build()
            .map_err(|e| DeepSeekError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    fn headers(api_key: Option<&str>) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));

        if let Some(key) = api_key {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {}", key))
                    .map_err(|e| DeepSeekError::Config(format!("Invalid API key format: {}", e)))?,
            );
        }

        Ok(headers)
    }

    /// Make a streaming POST request.
    ///
    /// Resolves once the response headers arrive. A connection that cannot
    /// be opened is a `TransportFailure`, as are body read errors, which
    /// surface as items of the returned stream.
    pub async fn post_stream(
        &self,
        url: &str,
        body: &impl Serialize,
        api_key: Option<&str>,
    ) -> Result<ByteStream> {
        use async_stream::stream;
        use futures::StreamExt;

        let headers = Self::headers(api_key)?;

        debug!(url, "sending streaming request");
        let response = self
            .client
            .post(url)
            .headers(headers)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let excerpt: String = body.chars().take(500).collect();

            if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                return Err(DeepSeekError::Auth(excerpt));
            }

            return Err(DeepSeekError::Request(format!(
                "Streaming request failed with status {}: {}",
                status, excerpt
            )));
        }

        // Convert to our stream type
        let mut byte_stream = response.bytes_stream();
        let s = stream! {
            while let Some(chunk) = byte_stream.next().await {
                yield chunk.map_err(|e| DeepSeekError::TransportFailure(e.to_string()));
            }
        };

        Ok(s.boxed())
    }
}
