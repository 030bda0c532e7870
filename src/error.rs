//! Error taxonomy shared by the parser, the body buffers and the session
//! pipeline.
//!
//! Reading a message field before the parser produced it is not represented
//! here: that is a programming defect and the accessors panic instead.

use std::io;

/// Errors surfaced while proxying one exchange.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// The request or response violates HTTP/1.x wire grammar.
    #[error("malformed message: {0}")]
    Malformed(String),

    /// A request or response head did not fit in the configured limit.
    #[error("message head exceeds {0} bytes")]
    HeadTooLarge(usize),

    /// DNS or TCP failure reaching an origin or an upstream proxy.
    #[error("failed to connect to {target}: {reason}")]
    Connect { target: String, reason: String },

    /// Sending the request or receiving the response failed after a
    /// connection was established.
    #[error("forwarding failed: {0}")]
    Forwarding(String),

    /// The peer closed the connection in the middle of a message.
    #[error("connection closed before the message was complete")]
    UnexpectedEof,

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ProxyError {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        ProxyError::Malformed(reason.into())
    }

    /// Whether the `RequestFailed` hook may schedule another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProxyError::Connect { .. }
                | ProxyError::Forwarding(_)
                | ProxyError::UnexpectedEof
                | ProxyError::Io(_)
        )
    }

    /// Re-labels a transport error raised while talking to an origin.
    pub(crate) fn into_forwarding(self) -> Self {
        match self {
            ProxyError::Io(e) => ProxyError::Forwarding(e.to_string()),
            ProxyError::UnexpectedEof => {
                ProxyError::Forwarding("origin closed the connection early".to_string())
            }
            other => other,
        }
    }
}

pub type Result<T, E = ProxyError> = std::result::Result<T, E>;
