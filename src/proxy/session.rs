use std::any::Any;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use url::{Host, Position, Url};

use crate::buffer::SegmentBuffer;
use crate::error::{ProxyError, Result};
use crate::http::headers::HeaderCollection;
use crate::http::method::{Method, Version};
use crate::http::request::RequestHead;
use crate::http::response::ResponseHead;
use crate::proxy::upstream::UpstreamProxy;

/// Where an exchange is in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Preparing,
    BeforeRequest,
    AfterRequest,
    BeforeResponse,
    AfterResponse,
    Completed,
    Failed,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Failed)
    }
}

/// The endpoint a session was forwarded to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    /// Host name or address literal of the next hop
    pub host: String,
    /// TCP port of the next hop
    pub port: u16,
    /// Whether `host` is an upstream proxy rather than the origin.
    pub via_proxy: bool,
    /// The address the connection was made to.
    pub address: Option<SocketAddr>,
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Everything known about one proxied exchange.
///
/// Owned by the task serving the connection and handed to lifecycle hooks
/// by reference.
pub struct Session {
    id: u64,
    client: SocketAddr,
    request: RequestHead,
    request_body: Arc<SegmentBuffer>,
    response: Option<ResponseHead>,
    response_body: Option<Arc<SegmentBuffer>>,
    status: SessionStatus,
    destination: Option<Destination>,
    upstream_proxy: Option<UpstreamProxy>,
    user_data: Option<Box<dyn Any + Send + Sync>>,
}

impl Session {
    pub fn new(id: u64, client: SocketAddr, request: RequestHead, request_body: Arc<SegmentBuffer>) -> Self {
        Self {
            id,
            client,
            request,
            request_body,
            response: None,
            response_body: None,
            status: SessionStatus::Preparing,
            destination: None,
            upstream_proxy: None,
            user_data: None,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn client_addr(&self) -> SocketAddr {
        self.client
    }

    pub fn request(&self) -> &RequestHead {
        &self.request
    }

    pub fn request_mut(&mut self) -> &mut RequestHead {
        &mut self.request
    }

    pub fn method(&self) -> &Method {
        self.request.method()
    }

    pub fn target(&self) -> &str {
        self.request.target()
    }

    pub fn version(&self) -> Version {
        self.request.version()
    }

    pub fn is_tunnel(&self) -> bool {
        self.request.is_tunnel()
    }

    pub fn request_headers(&self) -> &HeaderCollection {
        self.request.headers()
    }

    pub fn request_body(&self) -> &Arc<SegmentBuffer> {
        &self.request_body
    }

    pub fn response(&self) -> Option<&ResponseHead> {
        self.response.as_ref()
    }

    pub fn response_mut(&mut self) -> Option<&mut ResponseHead> {
        self.response.as_mut()
    }

    pub fn response_body(&self) -> Option<&Arc<SegmentBuffer>> {
        self.response_body.as_ref()
    }

    /// Installs the response that will be sent to the client.
    pub fn set_response(&mut self, head: ResponseHead, body: Arc<SegmentBuffer>) {
        self.response = Some(head);
        self.response_body = Some(body);
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub(crate) fn set_status(&mut self, status: SessionStatus) {
        self.status = status;
    }

    pub fn destination(&self) -> Option<&Destination> {
        self.destination.as_ref()
    }

    pub(crate) fn set_destination(&mut self, destination: Destination) {
        self.destination = Some(destination);
    }

    /// The upstream proxy chosen for this session only, if any.
    pub fn upstream_proxy(&self) -> Option<&UpstreamProxy> {
        self.upstream_proxy.as_ref()
    }

    /// Routes this session through `proxy` instead of the configured one.
    pub fn set_upstream_proxy(&mut self, proxy: UpstreamProxy) {
        self.upstream_proxy = Some(proxy);
    }

    pub fn set_user_data<T: Any + Send + Sync>(&mut self, data: T) {
        self.user_data = Some(Box::new(data));
    }

    pub fn user_data<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.user_data.as_ref()?.downcast_ref()
    }

    pub fn user_data_mut<T: Any + Send + Sync>(&mut self) -> Option<&mut T> {
        self.user_data.as_mut()?.downcast_mut()
    }

    /// Host and port of the origin the request is addressed to.
    ///
    /// CONNECT targets are authorities; absolute-form targets carry the host
    /// themselves; origin-form targets rely on the `Host` header.
    pub fn origin(&self) -> Result<(String, u16)> {
        let target = self.request.target();

        if self.request.is_tunnel() {
            return split_authority(target, 443);
        }
        if let Some(url) = absolute_target(target)? {
            let host = url
                .host_str()
                .ok_or_else(|| ProxyError::malformed("request target has no host"))?;
            let port = url.port_or_known_default().unwrap_or(80);
            return Ok((host.to_string(), port));
        }

        let host = self
            .request
            .headers()
            .get("Host")
            .ok_or_else(|| ProxyError::malformed("request has no Host header"))?;
        split_authority(host, 80)
    }

    /// The target as sent to an origin: path and query only.
    pub fn origin_form_target(&self) -> Result<String> {
        let target = self.request.target();
        Ok(match absolute_target(target)? {
            Some(url) => url[Position::BeforePath..].to_string(),
            None => target.to_string(),
        })
    }

    /// The target as sent to an upstream proxy: always absolute.
    pub fn absolute_form_target(&self) -> Result<String> {
        let target = self.request.target();
        if absolute_target(target)?.is_some() {
            return Ok(target.to_string());
        }

        let (host, port) = self.origin()?;
        Ok(match port {
            80 => format!("http://{host}{target}"),
            port => format!("http://{host}:{port}{target}"),
        })
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("client", &self.client)
            .field("status", &self.status)
            .field("destination", &self.destination)
            .finish_non_exhaustive()
    }
}

fn absolute_target(target: &str) -> Result<Option<Url>> {
    if target.starts_with('/') || target == "*" {
        return Ok(None);
    }

    let url = Url::parse(target).map_err(|e| ProxyError::malformed(format!("bad request target: {e}")))?;
    if url.scheme() != "http" {
        return Err(ProxyError::malformed(format!(
            "unsupported scheme {} in request target",
            url.scheme()
        )));
    }
    Ok(Some(url))
}

/// Splits `host[:port]`, accepting bracketed IPv6 literals.
pub(crate) fn split_authority(authority: &str, default_port: u16) -> Result<(String, u16)> {
    let (host, port) = match authority.rsplit_once(':') {
        Some((host, port)) if !port.contains(']') => {
            let port = port
                .parse::<u16>()
                .map_err(|_| ProxyError::malformed(format!("invalid port in {authority}")))?;
            (host, port)
        }
        _ => (authority, default_port),
    };

    let host = Host::parse(host).map_err(|e| ProxyError::malformed(format!("invalid host {host}: {e}")))?;
    Ok((host.to_string(), port))
}
