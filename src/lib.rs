//! Tapline - intercepting HTTP/HTTPS proxy
//!
//! Core library: incremental HTTP/1.x parsing, replayable body buffers, the
//! per-connection session pipeline with lifecycle hooks, and CONNECT
//! tunneling.

pub mod buffer;
pub mod config;
pub mod error;
pub mod http;
pub mod pipe;
pub mod proxy;
pub mod server;

pub use error::{ProxyError, Result};
