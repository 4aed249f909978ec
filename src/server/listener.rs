use std::future::Future;
use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpStream};
use tracing::{error, info};

use crate::server::{Shutdown, ShutdownSignal};

pub async fn bind(host: &str, port: u16) -> anyhow::Result<TcpListener> {
    let listener = TcpListener::bind((host, port)).await?;
    Ok(listener)
}

/// Runs the accept loop on its own task until `shutdown` fires.
///
/// Each connection is served on a separate task that receives its own
/// shutdown signal.
pub fn spawn_accept_loop<F, Fut>(listener: TcpListener, shutdown: &Shutdown, protocol: &'static str, serve: F)
where
    F: Fn(TcpStream, SocketAddr, ShutdownSignal) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    let mut signal = shutdown.subscribe();
    let connections = shutdown.subscribe();

    tokio::spawn(async move {
        if let Ok(addr) = listener.local_addr() {
            info!(protocol, %addr, "Listening");
        }

        loop {
            let (socket, peer) = tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        error!(protocol, error = %e, "Accept failed");
                        continue;
                    }
                },
                _ = signal.recv() => break,
            };

            tracing::debug!(protocol, %peer, "Accepted connection");
            let conn = serve(socket, peer, connections.clone());
            tokio::spawn(async move {
                if let Err(e) = conn.await {
                    error!(protocol, %peer, error = %e, "Connection error");
                }
            });
        }

        info!(protocol, "Listener stopped");
    });
}
