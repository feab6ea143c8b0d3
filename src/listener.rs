//! Listener (C7): accept loop over IPv4 and, when available, IPv6.

use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::proxy::ClientHandler;

/// Binds `0.0.0.0:port` and, if the host supports it, `[::]:port`, then
/// spawns one session per accepted connection until `shutdown` resolves.
pub async fn serve(port: u16, handler: ClientHandler, shutdown: impl std::future::Future<Output = ()>) -> std::io::Result<()> {
    let v4 = TcpListener::bind(("0.0.0.0", port)).await?;
    info!("listening on 0.0.0.0:{port}");

    let v6 = match TcpListener::bind(("::", port)).await {
        Ok(listener) => {
            info!("listening on [::]:{port}");
            Some(listener)
        }
        Err(e) => {
            warn!("IPv6 listener unavailable, serving IPv4 only: {e}");
            None
        }
    };

    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("listener shutting down");
                return Ok(());
            }
            accepted = v4.accept() => {
                dispatch(accepted, &handler);
            }
            accepted = accept_optional(v6.as_ref()) => {
                dispatch(accepted, &handler);
            }
        }
    }
}

async fn accept_optional(listener: Option<&TcpListener>) -> std::io::Result<(tokio::net::TcpStream, std::net::SocketAddr)> {
    match listener {
        Some(l) => l.accept().await,
        None => std::future::pending().await,
    }
}

fn dispatch(accepted: std::io::Result<(tokio::net::TcpStream, std::net::SocketAddr)>, handler: &ClientHandler) {
    match accepted {
        Ok((stream, _peer)) => {
            let handler = handler.clone();
            tokio::spawn(async move { handler.handle(stream).await });
        }
        Err(e) => warn!("accept failed: {e}"),
    }
}
