//! Upgrade acceptor
//!
//! Accepts TCP connections, optionally wraps them in TLS, and upgrades them
//! to WebSocket sessions when the request path matches a route. Each session
//! runs its own [`ServerRelay`] on its own task.

use crate::config::{Destination, RouteTable};
use crate::transport::{websocket, TransportError};
use crate::tunnel::ServerRelay;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tracing::{debug, error, info, warn};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Route matched during the upgrade handshake
#[derive(Debug, Clone, PartialEq, Eq)]
struct Target {
    destination: Destination,
    query: Option<String>,
}

/// Tunnel server
pub struct Server {
    routes: RouteTable,
    tls: Option<TlsAcceptor>,
}

impl Server {
    pub fn new(routes: RouteTable, tls: Option<TlsAcceptor>) -> Self {
        Self { routes, tls }
    }

    /// Accept connections until the task is dropped
    pub async fn serve(self: Arc<Self>, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, peer_addr)) => {
                    debug!("New connection from {}", peer_addr);
                    let server = Arc::clone(&self);
                    tokio::spawn(async move {
                        if let Err(e) = server.handle_connection(stream, peer_addr).await {
                            debug!("Connection from {} ended: {}", peer_addr, e);
                        }
                    });
                }
                Err(e) => {
                    error!("Accept error: {}", e);
                }
            }
        }
    }

    async fn handle_connection(
        &self,
        stream: TcpStream,
        peer_addr: SocketAddr,
    ) -> Result<(), TransportError> {
        stream.set_nodelay(true)?;

        match &self.tls {
            Some(acceptor) => {
                let stream = acceptor
                    .accept(stream)
                    .await
                    .map_err(|e| TransportError::Tls(e.to_string()))?;
                self.upgrade(stream, peer_addr).await
            }
            None => self.upgrade(stream, peer_addr).await,
        }
    }

    async fn upgrade<S>(&self, stream: S, peer_addr: SocketAddr) -> Result<(), TransportError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let mut target = None;
        let callback = |req: &Request, response: Response| match self.resolve(req) {
            Some(found) => {
                target = Some(found);
                Ok(response)
            }
            None => {
                warn!("No route for {} requested by {}", req.uri().path(), peer_addr);
                Err(not_found(req.uri().path()))
            }
        };
        let ws = accept_hdr_async(stream, callback).await?;

        let Some(Target { destination, query }) = target else {
            return Err(TransportError::WebSocket(
                "upgrade completed without a route".to_string(),
            ));
        };

        let id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
        let relay = ServerRelay::new(id, destination);
        info!(
            "Session {} from {} for {}",
            relay.id(),
            peer_addr,
            relay.destination()
        );

        let (sink, source) = websocket::split(ws);
        let report = relay.run(sink, source, query.as_deref()).await;
        debug!(
            "Session {} finished in state {:?} with {} error(s)",
            relay.id(),
            report.state,
            report.errors
        );
        Ok(())
    }

    /// Match the request path exactly against the route table
    fn resolve(&self, req: &Request) -> Option<Target> {
        let uri = req.uri();
        self.routes.get(uri.path()).map(|destination| Target {
            destination: destination.clone(),
            query: uri.query().map(str::to_string),
        })
    }
}

fn not_found(path: &str) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(format!("No tunnel at {}", path)));
    *response.status_mut() = StatusCode::NOT_FOUND;
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(uri: &str) -> Request {
        Request::builder().uri(uri).body(()).unwrap()
    }

    #[test]
    fn test_resolve_exact_path() {
        let server = Server::new(RouteTable::parse("/ssh localhost:22\n"), None);

        assert_eq!(
            server.resolve(&request("/ssh?key=1f")),
            Some(Target {
                destination: Destination::new("localhost", 22),
                query: Some("key=1f".to_string()),
            })
        );
        assert_eq!(
            server.resolve(&request("/ssh")).unwrap().query,
            None
        );
        assert_eq!(server.resolve(&request("/ssh/")), None);
        assert_eq!(server.resolve(&request("/")), None);
    }

    #[test]
    fn test_not_found_response() {
        let response = not_found("/nope");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.body().as_deref(), Some("No tunnel at /nope"));
    }
}
