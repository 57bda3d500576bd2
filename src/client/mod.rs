//! Client Module
//!
//! HTTP transport for streaming requests.

pub mod http;

pub use http::HttpClient;
