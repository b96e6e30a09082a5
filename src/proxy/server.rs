use anyhow::Result;
use hyper::server::conn::{AddrIncoming, AddrStream};
use hyper::server::Builder;
use hyper::service::{make_service_fn, service_fn};
use hyper::Server;
use std::convert::Infallible;
use std::future::Future;
use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use tracing::{error, info};

use super::handler::RequestHandler;
use crate::error::{GatewayError, GatewayResult};
use crate::gateway::Gateway;

/// HTTP/1.1 + HTTP/2 (prior knowledge) listener in front of a [`Gateway`]
pub struct GatewayServer {
    builder: Builder<AddrIncoming>,
    local_addr: SocketAddr,
    handler: RequestHandler,
}

impl GatewayServer {
    /// Bind the listening socket
    ///
    /// A bind failure (port taken, permission denied) is returned here and is
    /// fatal for the process. Must be called inside a Tokio runtime.
    pub fn bind(gateway: Arc<Gateway>, addr: SocketAddr) -> GatewayResult<Self> {
        let listener = TcpListener::bind(addr)
            .map_err(|e| GatewayError::io(format!("failed to bind {}: {}", addr, e)))?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        let builder = Server::from_tcp(listener)
            .map_err(|e| GatewayError::io(format!("failed to listen on {}: {}", addr, e)))?
            .tcp_nodelay(true);

        info!("Gateway listening on {}", local_addr);
        Ok(Self {
            builder,
            local_addr,
            handler: RequestHandler::new(gateway),
        })
    }

    /// Actual bound address (useful with port 0)
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serve until the process is interrupted
    pub async fn run(self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Serve until `shutdown` resolves, then drain open connections
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handler = self.handler;

        let make_service = make_service_fn(move |conn: &AddrStream| {
            let handler = handler.clone();
            let remote = conn.remote_addr();
            async move {
                Ok::<_, Infallible>(service_fn(move |mut req| {
                    let handler = handler.clone();
                    // Attach remote addr to request extensions
                    req.extensions_mut().insert(remote);
                    async move { handler.handle_request(req).await }
                }))
            }
        });

        let server = self
            .builder
            .serve(make_service)
            .with_graceful_shutdown(shutdown);

        if let Err(e) = server.await {
            error!("Gateway server error: {}", e);
            return Err(e.into());
        }

        info!("Gateway server stopped");
        Ok(())
    }
}
