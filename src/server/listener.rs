use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::config::Config;
use crate::proxy::ProxyServer;

/// Binds the configured address and serves until `shutdown` resolves.
pub async fn run<F>(cfg: &Config, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()>,
{
    let listener = TcpListener::bind(&cfg.server.listen_addr).await?;
    info!("Listening on {}", cfg.server.listen_addr);

    let server = Arc::new(ProxyServer::new(cfg)?);
    serve(listener, server, shutdown).await
}

/// Accepts connections and spawns one session task per socket.
///
/// Stops accepting once `shutdown` resolves; sessions already running are
/// left to finish on their own.
pub async fn serve<F>(listener: TcpListener, server: Arc<ProxyServer>, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown signal received, no longer accepting connections");
                return Ok(());
            }

            accepted = listener.accept() => {
                let (socket, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        continue;
                    }
                };
                info!("Accepted connection from {}", peer);

                let _ = socket.set_nodelay(true);
                let server = server.clone();
                tokio::spawn(async move {
                    server.handle_connection(socket, peer).await;
                });
            }
        }
    }
}
