//! Outbound request dispatch.
//!
//! A [`Dispatcher`] sends the session's request somewhere and returns the
//! reader the response will arrive on. The pipeline parses the response
//! head itself, so body streaming can begin as soon as the head is in.

use async_trait::async_trait;
use bytes::BytesMut;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

use crate::buffer::{BodyCursor, BufferPool};
use crate::error::{ProxyError, Result};
use crate::pipe::{Pipe, PipeReader};
use crate::proxy::resolve::{Resolver, connect_any};
use crate::proxy::session::{Destination, Session};
use crate::proxy::upstream::{UpstreamProxy, strip_hop_by_hop};
use crate::http::writer::write_request_head;

#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Sends the request line, headers and body of `session`.
    async fn send_request(&self, session: &mut Session) -> Result<PipeReader>;
}

/// Dispatches over a fresh TCP connection per request, to the origin or to
/// an upstream proxy.
pub struct HttpDispatcher {
    resolver: Arc<dyn Resolver>,
    pool: BufferPool,
    upstream: Option<UpstreamProxy>,
    connect_timeout: Duration,
}

impl HttpDispatcher {
    pub fn new(
        resolver: Arc<dyn Resolver>,
        pool: BufferPool,
        upstream: Option<UpstreamProxy>,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            resolver,
            pool,
            upstream,
            connect_timeout,
        }
    }

    /// Picks the next hop and the request target to send it.
    fn route(&self, session: &Session) -> Result<(Destination, String)> {
        if let Some(proxy) = session.upstream_proxy().or(self.upstream.as_ref()) {
            let destination = Destination {
                host: proxy.host().to_string(),
                port: proxy.port(),
                via_proxy: true,
                address: None,
            };
            return Ok((destination, session.absolute_form_target()?));
        }

        let (host, port) = session.origin()?;
        let destination = Destination {
            host,
            port,
            via_proxy: false,
            address: None,
        };
        Ok((destination, session.origin_form_target()?))
    }
}

#[async_trait]
impl Dispatcher for HttpDispatcher {
    async fn send_request(&self, session: &mut Session) -> Result<PipeReader> {
        let (mut destination, target) = self.route(session)?;

        let (stream, address) = connect_any(
            self.resolver.as_ref(),
            &destination.host,
            destination.port,
            self.connect_timeout,
        )
        .await?;
        destination.address = Some(address);
        debug!(session = session.id(), %destination, via_proxy = destination.via_proxy, "forwarding");
        session.set_destination(destination);

        let (reader, mut writer) = Pipe::new(stream, &self.pool).into_split();

        let mut forwarded = session.request().clone();
        let length = forwarded.content_length()?;
        let chunked = length.is_none() && forwarded.is_chunked();
        let headers = forwarded.headers_mut();
        strip_hop_by_hop(headers);
        // Framing follows what the body is actually sent with.
        match length {
            Some(length) => {
                headers.remove("Transfer-Encoding");
                headers.set("Content-Length", length.to_string());
            }
            None if chunked && !headers.contains("Transfer-Encoding") => {
                headers.append("Transfer-Encoding", "chunked");
            }
            None => {}
        }
        if !headers.contains("Host") {
            let (host, port) = session.origin()?;
            headers.append("Host", if port == 80 { host } else { format!("{host}:{port}") });
        }
        headers.set("Connection", "close");

        let mut head = BytesMut::with_capacity(512);
        write_request_head(&mut head, &forwarded, &target);

        let sent: Result<u64> = async {
            writer.send(&head).await?;
            let mut body = BodyCursor::new(session.request_body().clone());
            writer.send_stream(&mut body, chunked).await
        }
        .await;

        let body_bytes = sent.map_err(ProxyError::into_forwarding)?;
        trace!(session = session.id(), body_bytes, "request sent");

        Ok(reader)
    }
}
