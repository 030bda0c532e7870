use bytes::Bytes;

use crate::http::headers::HeaderCollection;
use crate::http::method::Version;

/// Progress of a response through the parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ResponseStage {
    /// Waiting for the version word
    ParsingVersion,
    /// Waiting for the three-digit status
    ParsingStatus,
    /// Reading the reason phrase up to the line end
    ParsingReason,
    /// Reading header lines until the blank line
    ParsingHeader,
    /// Head complete; body framing chosen
    HeadersParsed,
    /// Body bytes are being decoded
    ReadingBody,
    /// Head and body fully consumed
    MessageParsed,
}

/// Status line and headers of a response.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    /// How far the parser has got
    pub(crate) stage: ResponseStage,
    /// HTTP/1.0 or HTTP/1.1
    pub(crate) version: Version,
    /// Status code (e.g. 200, 502)
    pub(crate) status: u16,
    /// Reason phrase; may be empty
    pub(crate) reason: String,
    /// Header fields in arrival order
    pub(crate) headers: HeaderCollection,
}

impl Default for ResponseHead {
    fn default() -> Self {
        Self {
            stage: ResponseStage::ParsingVersion,
            version: Version::Http11,
            status: 0,
            reason: String::new(),
            headers: HeaderCollection::new(),
        }
    }
}

impl ResponseHead {
    pub fn stage(&self) -> ResponseStage {
        self.stage
    }

    fn require(&self, producer: ResponseStage, field: &str) {
        assert!(
            self.stage > producer,
            "response {field} read before it was parsed (stage {:?})",
            self.stage
        );
    }

    pub fn version(&self) -> Version {
        self.require(ResponseStage::ParsingVersion, "version");
        self.version
    }

    pub fn status(&self) -> u16 {
        self.require(ResponseStage::ParsingStatus, "status");
        self.status
    }

    pub fn reason(&self) -> &str {
        self.require(ResponseStage::ParsingReason, "reason");
        &self.reason
    }

    pub fn headers(&self) -> &HeaderCollection {
        self.require(ResponseStage::ParsingHeader, "headers");
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderCollection {
        self.require(ResponseStage::ParsingHeader, "headers");
        &mut self.headers
    }

    /// Replaces the status code and reason phrase.
    pub fn set_status(&mut self, status: u16, reason: impl Into<String>) {
        self.require(ResponseStage::ParsingReason, "status");
        self.status = status;
        self.reason = reason.into();
    }
}

/// Returns the standard reason phrase for `status`, or an empty string.
///
/// # Example
///
/// ```
/// # use tapline::http::response::reason_phrase;
/// assert_eq!(reason_phrase(200), "OK");
/// assert_eq!(reason_phrase(502), "Bad Gateway");
/// ```
pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        100 => "Continue",
        101 => "Switching Protocols",
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        204 => "No Content",
        206 => "Partial Content",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        407 => "Proxy Authentication Required",
        408 => "Request Timeout",
        413 => "Content Too Large",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => "",
    }
}

/// A complete response produced by the proxy rather than an origin: the
/// synthesized 502 or a substitute supplied by a `RequestFailed` hook.
#[derive(Debug, Clone)]
pub struct Response {
    /// Status line and headers, `Content-Length` included
    pub head: ResponseHead,
    /// The complete body
    pub body: Bytes,
}

/// Builder for constructing responses in a fluent style.
///
/// # Example
///
/// ```
/// # use tapline::http::response::ResponseBuilder;
/// let response = ResponseBuilder::new(503)
///     .header("Retry-After", "5")
///     .body("try again later")
///     .build();
/// assert_eq!(response.head.headers().get("Content-Length"), Some("15"));
/// ```
pub struct ResponseBuilder {
    /// Status code
    status: u16,
    /// Reason phrase; the standard one for `status` when unset
    reason: Option<String>,
    /// Protocol version, HTTP/1.1 by default
    version: Version,
    /// Header fields in insertion order
    headers: HeaderCollection,
    /// Response body
    body: Bytes,
}

impl ResponseBuilder {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            reason: None,
            version: Version::Http11,
            headers: HeaderCollection::new(),
            body: Bytes::new(),
        }
    }

    /// Overrides the standard reason phrase.
    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Sets the version, usually to match the client's.
    pub fn version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    /// Appends a header field.
    pub fn header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Sets the body.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Builds the response, adding `Content-Length` when absent.
    pub fn build(mut self) -> Response {
        if !self.headers.contains("Content-Length") {
            self.headers.append("Content-Length", self.body.len().to_string());
        }

        Response {
            head: ResponseHead {
                stage: ResponseStage::MessageParsed,
                version: self.version,
                status: self.status,
                reason: self
                    .reason
                    .unwrap_or_else(|| reason_phrase(self.status).to_string()),
                headers: self.headers,
            },
            body: self.body,
        }
    }
}

impl Response {
    /// The `502` sent when an exchange fails before any response byte left.
    pub fn bad_gateway(version: Version, detail: &str) -> Self {
        ResponseBuilder::new(502)
            .version(version)
            .header("Content-Type", "text/plain")
            .header("Connection", "close")
            .body(format!("502 Bad Gateway\r\n\r\n{detail}"))
            .build()
    }
}
