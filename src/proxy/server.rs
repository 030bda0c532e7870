//! Per-connection session pipeline.
//!
//! Each accepted connection carries exactly one exchange:
//!
//! ```text
//!   Preparing → BeforeRequest ─┬─ CONNECT ──→ tunnel
//!                              └─ otherwise → forward → AfterRequest
//!                                  → BeforeResponse → emit → AfterResponse
//!                                  → Completed
//! ```
//!
//! Any phase may end in `Failed`. A client whose request cannot be parsed,
//! or that stops sending mid-head for longer than the read timeout, is
//! disconnected; a failure before the first response byte is answered with
//! `502 Bad Gateway`; a failure while the response is streaming tears the
//! connection down.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, error, info, trace, warn};

use crate::buffer::{BodyCursor, BodySource, BufferPool, SegmentBuffer};
use crate::config::Config;
use crate::error::{ProxyError, Result};
use crate::http::body::ChunkedEncoder;
use crate::http::constants;
use crate::http::method::{Method, Version};
use crate::http::parser::{RequestParser, ResponseParser};
use crate::http::request::content_length;
use crate::http::response::Response;
use crate::http::writer::response_head_bytes;
use crate::pipe::{Pipe, PipeReader, PipeWriter};
use crate::proxy::dispatch::{Dispatcher, HttpDispatcher};
use crate::proxy::hooks::{FailureAction, Hooks, SessionListener};
use crate::proxy::resolve::{DnsResolver, Resolver};
use crate::proxy::session::{Session, SessionStatus};
use crate::proxy::upstream::UpstreamProxy;

/// Serves proxied exchanges; shared by every connection task.
pub struct ProxyServer {
    pub(super) pool: BufferPool,
    pub(super) hooks: Hooks,
    pub(super) dispatcher: Arc<dyn Dispatcher>,
    pub(super) resolver: Arc<dyn Resolver>,
    pub(super) upstream: Option<UpstreamProxy>,
    pub(super) max_head_bytes: usize,
    pub(super) connect_timeout: Duration,
    pub(super) read_timeout: Duration,
    sessions: AtomicU64,
}

impl ProxyServer {
    pub fn new(config: &Config) -> Result<Self> {
        Self::builder(config).build()
    }

    pub fn builder(config: &Config) -> ProxyServerBuilder {
        ProxyServerBuilder {
            config: config.clone(),
            hooks: Hooks::new(),
            resolver: None,
            dispatcher: None,
        }
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    pub fn hooks(&self) -> &Hooks {
        &self.hooks
    }

    /// Runs the single exchange carried by `stream` to completion.
    pub async fn handle_connection<S>(&self, stream: S, peer: SocketAddr)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (mut reader, mut writer) = Pipe::new(stream, &self.pool).into_split();
        reader.set_read_timeout(Some(self.read_timeout));
        let mut parser = RequestParser::new();

        match reader.read_head(&mut parser, self.max_head_bytes).await {
            Ok(true) => {}
            Ok(false) => {
                trace!(%peer, "client closed before sending a request");
                return;
            }
            Err(e) => {
                warn!(%peer, error = %e, "could not read a request head");
                self.hooks.session_failed(None, &e).await;
                return;
            }
        }

        if parser.awaiting_continue() {
            let line = constants::continue_line(parser.head().version().as_bytes());
            if let Err(e) = send_and_flush(&mut writer, &line).await {
                debug!(%peer, error = %e, "client went away before 100 Continue");
                return;
            }
            parser.continue_sent();
        }

        let id = self.sessions.fetch_add(1, Ordering::Relaxed) + 1;
        let (head, decoder) = parser.into_parts();

        info!(
            session = id,
            %peer,
            method = %head.method(),
            target = %head.target(),
            "request received"
        );

        if head.is_tunnel() {
            let session = Session::new(id, peer, head, SegmentBuffer::empty(self.pool.clone()));
            self.tunnel(session, reader, writer).await;
            return;
        }

        let body = SegmentBuffer::streaming(self.pool.clone(), BodySource::new(reader, decoder));
        let mut session = Session::new(id, peer, head, body);
        let replied_before = writer.bytes_sent();

        match self.exchange(&mut session, &mut writer).await {
            Ok(()) => {
                session.set_status(SessionStatus::Completed);
                info!(
                    session = id,
                    status = session.response().map(|r| r.status()),
                    bytes = writer.bytes_sent(),
                    "exchange completed"
                );
            }
            Err(e) => {
                session.set_status(SessionStatus::Failed);
                error!(session = id, target = %session.target(), error = %e, "exchange failed");

                // Nothing of the response has gone out yet.
                if writer.bytes_sent() == replied_before {
                    let response = Response::bad_gateway(session.version(), &e.to_string());
                    if let Err(e) = self.emit_fixed(&mut writer, &response).await {
                        debug!(session = id, error = %e, "could not deliver 502");
                    }
                }

                self.hooks.session_failed(Some(&session), &e).await;
            }
        }

        let _ = writer.shutdown().await;
    }

    async fn exchange(&self, session: &mut Session, writer: &mut PipeWriter) -> Result<()> {
        session.set_status(SessionStatus::BeforeRequest);
        self.hooks.before_request(session).await;

        let mut attempt = 0;
        loop {
            attempt += 1;

            let error = match self.forward(session).await {
                Ok(origin) => {
                    let (head, decoder) = origin.parser.into_parts();
                    let body = SegmentBuffer::streaming(
                        self.pool.clone(),
                        BodySource::new(origin.reader, decoder),
                    );
                    session.set_response(head, body);
                    break;
                }
                Err(e) => e,
            };

            warn!(session = session.id(), attempt, error = %error, "forwarding failed");

            match self.hooks.request_failed(session, &error, attempt).await {
                Some(FailureAction::Retry(delay)) => {
                    debug!(session = session.id(), ?delay, "retrying request");
                    tokio::time::sleep(delay).await;
                }
                Some(FailureAction::Respond(response)) => {
                    debug!(session = session.id(), status = response.head.status(), "substituting response");
                    let body = SegmentBuffer::from_bytes(self.pool.clone(), &response.body);
                    session.set_response(response.head, body);
                    break;
                }
                None => return Err(error),
            }
        }

        session.set_status(SessionStatus::BeforeResponse);
        self.hooks.before_response(session).await;

        self.emit_response(session, writer).await?;

        session.set_status(SessionStatus::AfterResponse);
        self.hooks.after_response(session).await;
        Ok(())
    }

    /// Sends the request and waits for the final response head.
    async fn forward(&self, session: &mut Session) -> Result<OriginResponse> {
        let mut reader = self.dispatcher.send_request(session).await?;
        reader.set_read_timeout(Some(self.read_timeout));

        session.set_status(SessionStatus::AfterRequest);
        self.hooks.after_request(session).await;

        let mut parser = ResponseParser::new(session.method().clone());
        loop {
            let answered = reader
                .read_head(&mut parser, self.max_head_bytes)
                .await
                .map_err(ProxyError::into_forwarding)?;
            if !answered {
                return Err(ProxyError::Forwarding(
                    "origin closed the connection without responding".to_string(),
                ));
            }

            if !parser.is_interim() {
                break;
            }
            trace!(session = session.id(), status = parser.head().status(), "skipping interim response");
            parser.reset();
        }

        Ok(OriginResponse { parser, reader })
    }

    /// Streams the session's response to the client.
    ///
    /// A declared length is passed through; otherwise HTTP/1.1 clients get
    /// the body re-chunked and HTTP/1.0 clients get it raw until close.
    async fn emit_response(&self, session: &Session, writer: &mut PipeWriter) -> Result<()> {
        let (Some(head), Some(body)) = (session.response(), session.response_body()) else {
            return Err(ProxyError::Forwarding("no response to send".to_string()));
        };

        let mut head = head.clone();
        let body = body.clone();
        let status = head.status();
        let bodiless = session.method() == &Method::Head || matches!(status, 100..=199 | 204 | 304);

        let headers = head.headers_mut();
        for name in ["Connection", "Keep-Alive", "Proxy-Connection"] {
            headers.remove(name);
        }

        let mut chunked = false;
        if !bodiless {
            if content_length(headers)?.is_some() {
                headers.remove("Transfer-Encoding");
            } else {
                headers.remove("Transfer-Encoding");
                if session.version() == Version::Http11 {
                    headers.append("Transfer-Encoding", "chunked");
                    chunked = true;
                }
            }
        }
        headers.set("Connection", "close");

        writer.send(&response_head_bytes(&head)).await?;

        if !bodiless {
            let mut cursor = BodyCursor::new(body);
            let mut encoder = chunked.then(ChunkedEncoder::new);

            while let Some(segment) = cursor.next_segment().await? {
                writer.send_body(&segment, encoder.as_mut()).await?;
                self.hooks.session_progress(session, cursor.position()).await;
            }
            if let Some(encoder) = encoder.as_mut() {
                writer.finish_chunked(encoder).await?;
            }
        }

        writer.flush().await?;
        Ok(())
    }

    async fn emit_fixed(&self, writer: &mut PipeWriter, response: &Response) -> Result<()> {
        writer.send(&response_head_bytes(&response.head)).await?;
        writer.send(&response.body).await?;
        writer.flush().await?;
        Ok(())
    }
}

struct OriginResponse {
    parser: ResponseParser,
    reader: PipeReader,
}

async fn send_and_flush(writer: &mut PipeWriter, bytes: &[u8]) -> std::io::Result<()> {
    writer.send(bytes).await?;
    writer.flush().await
}

/// Assembles a [`ProxyServer`] from configuration plus optional
/// collaborators.
pub struct ProxyServerBuilder {
    config: Config,
    hooks: Hooks,
    resolver: Option<Arc<dyn Resolver>>,
    dispatcher: Option<Arc<dyn Dispatcher>>,
}

impl ProxyServerBuilder {
    pub fn listener(mut self, listener: Arc<dyn SessionListener>) -> Self {
        self.hooks.register(listener);
        self
    }

    pub fn resolver(mut self, resolver: Arc<dyn Resolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Replaces the built-in HTTP dispatcher.
    pub fn dispatcher(mut self, dispatcher: Arc<dyn Dispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn build(self) -> Result<ProxyServer> {
        let config = self.config;
        let pool = BufferPool::new(config.buffers.segment_size, config.buffers.pool_capacity);
        let upstream = config
            .upstream
            .proxy
            .as_deref()
            .map(UpstreamProxy::parse)
            .transpose()?;
        let connect_timeout = config.connect_timeout();

        let resolver = self.resolver.unwrap_or_else(|| Arc::new(DnsResolver));
        let dispatcher = self.dispatcher.unwrap_or_else(|| {
            Arc::new(HttpDispatcher::new(
                resolver.clone(),
                pool.clone(),
                upstream.clone(),
                connect_timeout,
            ))
        });

        Ok(ProxyServer {
            pool,
            hooks: self.hooks,
            dispatcher,
            resolver,
            upstream,
            max_head_bytes: config.server.max_head_bytes,
            connect_timeout,
            read_timeout: config.read_timeout(),
            sessions: AtomicU64::new(0),
        })
    }
}
