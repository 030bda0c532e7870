use tokio::io::copy;
use tracing::{debug, info, warn};

use crate::error::{ProxyError, Result};
use crate::http::constants::{bad_gateway_line, connection_established};
use crate::pipe::{Pipe, PipeReader, PipeWriter};
use crate::proxy::resolve::connect_any;
use crate::proxy::server::ProxyServer;
use crate::proxy::session::{Destination, Session, SessionStatus};

impl ProxyServer {
    /// Serves a CONNECT request: reach the target, acknowledge, then relay
    /// raw bytes both ways until one side stops.
    pub(super) async fn tunnel(&self, mut session: Session, mut client_reader: PipeReader, mut client_writer: PipeWriter) {
        session.set_status(SessionStatus::BeforeRequest);
        self.hooks.before_request(&mut session).await;

        let version = session.version();

        let remote = match self.open_tunnel(&mut session).await {
            Ok(remote) => remote,
            Err(e) => {
                warn!(session = session.id(), target = %session.target(), error = %e, "tunnel target unreachable");
                session.set_status(SessionStatus::Failed);

                let _ = client_writer.send(&bad_gateway_line(version.as_bytes())).await;
                let _ = client_writer.flush().await;
                let _ = client_writer.shutdown().await;

                self.hooks.session_failed(Some(&session), &e).await;
                return;
            }
        };

        let ack = connection_established(version.as_bytes());
        if let Err(e) = client_writer.send(&ack).await {
            debug!(session = session.id(), error = %e, "client left before the tunnel opened");
            return;
        }
        if let Err(e) = client_writer.flush().await {
            debug!(session = session.id(), error = %e, "client left before the tunnel opened");
            return;
        }

        session.set_status(SessionStatus::AfterRequest);
        self.hooks.tunnel_established(&mut session).await;

        let (mut remote_reader, mut remote_writer) = remote.into_split();

        // Whichever direction finishes first ends the tunnel.
        let outcome = tokio::select! {
            sent = copy(&mut client_reader, &mut remote_writer) => sent.map(|n| ("client", n)),
            received = copy(&mut remote_reader, &mut client_writer) => received.map(|n| ("remote", n)),
        };

        let _ = remote_writer.shutdown().await;
        let _ = client_writer.shutdown().await;

        match outcome {
            Ok((closed_by, bytes)) => {
                session.set_status(SessionStatus::Completed);
                info!(
                    session = session.id(),
                    target = %session.target(),
                    closed_by,
                    bytes,
                    "tunnel closed"
                );
            }
            Err(e) => {
                session.set_status(SessionStatus::Failed);
                let error = ProxyError::from(e);
                debug!(session = session.id(), %error, "tunnel aborted");
                self.hooks.session_failed(Some(&session), &error).await;
            }
        }
    }

    /// Connects to the CONNECT target, directly or through an upstream proxy.
    async fn open_tunnel(&self, session: &mut Session) -> Result<Pipe> {
        let (host, port) = session.origin()?;
        let authority = format!("{host}:{port}");

        let proxy = session.upstream_proxy().or(self.upstream.as_ref()).cloned();

        let (pipe, destination) = match proxy {
            Some(proxy) => {
                let pipe = proxy
                    .connect_through(
                        self.resolver.as_ref(),
                        &authority,
                        &self.pool,
                        self.connect_timeout,
                        self.max_head_bytes,
                    )
                    .await?;
                let destination = Destination {
                    host: proxy.host().to_string(),
                    port: proxy.port(),
                    via_proxy: true,
                    address: None,
                };
                (pipe, destination)
            }
            None => {
                let (stream, address) =
                    connect_any(self.resolver.as_ref(), &host, port, self.connect_timeout).await?;
                let destination = Destination {
                    host,
                    port,
                    via_proxy: false,
                    address: Some(address),
                };
                (Pipe::new(stream, &self.pool), destination)
            }
        };

        debug!(session = session.id(), %destination, "tunnel connected");
        session.set_destination(destination);
        Ok(pipe)
    }
}
