use crate::error::{ProxyError, Result};
use crate::http::headers::HeaderCollection;
use crate::http::method::{Method, Version};

/// Progress of a request through the parser.
///
/// Stages only move forward; the header stage repeats once per field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RequestStage {
    /// Waiting for the method token
    ParsingMethod,
    /// Waiting for the request target
    ParsingRequestUri,
    /// Waiting for `HTTP/1.0` or `HTTP/1.1` and the line end
    ParsingVersion,
    /// Reading header lines until the blank line
    ParsingHeader,
    /// Head complete; body framing chosen
    HeadersParsed,
    /// `Expect: 100-continue` seen; the interim reply is still owed
    HandlingExpect100Continue,
    /// Body bytes are being decoded
    ReadingBody,
    /// Head and body fully consumed
    MessageParsed,
}

/// Request line and headers of a proxied request.
///
/// A field may only be read once the parser has moved past the stage that
/// produces it. Reading earlier is a bug in the caller and panics.
#[derive(Debug, Clone)]
pub struct RequestHead {
    /// How far the parser has got
    pub(crate) stage: RequestStage,
    /// The request method (GET, CONNECT, or a custom token)
    pub(crate) method: Method,
    /// The target exactly as sent
    pub(crate) target: String,
    /// HTTP/1.0 or HTTP/1.1
    pub(crate) version: Version,
    /// Header fields in arrival order
    pub(crate) headers: HeaderCollection,
    /// Set for CONNECT requests
    pub(crate) is_tunnel: bool,
}

impl Default for RequestHead {
    fn default() -> Self {
        Self {
            stage: RequestStage::ParsingMethod,
            method: Method::Get,
            target: String::new(),
            version: Version::Http11,
            headers: HeaderCollection::new(),
            is_tunnel: false,
        }
    }
}

impl RequestHead {
    pub fn stage(&self) -> RequestStage {
        self.stage
    }

    fn require(&self, producer: RequestStage, field: &str) {
        assert!(
            self.stage > producer,
            "request {field} read before it was parsed (stage {:?})",
            self.stage
        );
    }

    pub fn method(&self) -> &Method {
        self.require(RequestStage::ParsingMethod, "method");
        &self.method
    }

    /// Request target as sent: an absolute URI, an origin-form path or, for
    /// CONNECT, an authority.
    pub fn target(&self) -> &str {
        self.require(RequestStage::ParsingRequestUri, "target");
        &self.target
    }

    pub fn version(&self) -> Version {
        self.require(RequestStage::ParsingVersion, "version");
        self.version
    }

    pub fn headers(&self) -> &HeaderCollection {
        self.require(RequestStage::ParsingHeader, "headers");
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderCollection {
        self.require(RequestStage::ParsingHeader, "headers");
        &mut self.headers
    }

    /// Rewrites the request target, e.g. from a `before_request` hook.
    pub fn set_target(&mut self, target: impl Into<String>) {
        self.require(RequestStage::ParsingRequestUri, "target");
        self.target = target.into();
    }

    /// Whether this is a CONNECT request asking for an opaque tunnel.
    pub fn is_tunnel(&self) -> bool {
        self.require(RequestStage::ParsingMethod, "method");
        self.is_tunnel
    }

    /// Declared `Content-Length`, rejecting unparsable or conflicting values.
    pub fn content_length(&self) -> Result<Option<u64>> {
        content_length(self.headers())
    }

    /// Whether `Transfer-Encoding` lists `chunked`.
    pub fn is_chunked(&self) -> bool {
        self.headers().has_token("Transfer-Encoding", "chunked")
    }

    /// Whether the client asked for `100 Continue` before sending a body.
    pub fn expects_continue(&self) -> bool {
        self.headers().has_token("Expect", "100-continue")
    }
}

pub(crate) fn content_length(headers: &HeaderCollection) -> Result<Option<u64>> {
    let mut declared = None;

    for value in headers.get_all("Content-Length") {
        let digits = value.trim();
        let invalid = || ProxyError::malformed(format!("invalid Content-Length {value:?}"));
        // `u64::from_str` would also take a leading `+`.
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let parsed = digits.parse::<u64>().map_err(|_| invalid())?;

        match declared {
            Some(previous) if previous != parsed => {
                return Err(ProxyError::malformed("conflicting Content-Length values"));
            }
            _ => declared = Some(parsed),
        }
    }

    Ok(declared)
}

/// Builder for request heads created by the proxy itself, such as the
/// CONNECT sent to an upstream proxy.
#[derive(Debug, Default)]
pub struct RequestBuilder {
    method: Option<Method>,
    target: Option<String>,
    version: Option<Version>,
    headers: HeaderCollection,
}

impl RequestBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the method; required.
    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    /// Sets the request target; required.
    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Sets the version; defaults to HTTP/1.1.
    pub fn version(mut self, version: Version) -> Self {
        self.version = Some(version);
        self
    }

    /// Appends a header field, keeping earlier ones of the same name.
    pub fn header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Builds a fully parsed head.
    ///
    /// # Errors
    ///
    /// Returns an error naming the missing field if the method or the
    /// target was never set.
    pub fn build(self) -> Result<RequestHead, &'static str> {
        let method = self.method.ok_or("method missing")?;
        let target = self.target.ok_or("target missing")?;

        Ok(RequestHead {
            stage: RequestStage::MessageParsed,
            is_tunnel: method == Method::Connect,
            method,
            target,
            version: self.version.unwrap_or(Version::Http11),
            headers: self.headers,
        })
    }
}
