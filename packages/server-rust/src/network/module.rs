//! Network module with deferred startup lifecycle.
//!
//! `new()` wires the endpoint, `start()` binds the TCP listener, and
//! `serve()` accepts connections until shutdown. The split lets callers learn
//! the bound port (for example when port 0 is configured) before serving.

use std::future::Future;
use std::net::SocketAddr;

use axum::Router;
use protowire_core::Message;
use tokio::net::TcpListener;
use tracing::info;

use super::config::NetworkConfig;
use super::middleware::endpoint_layers;
use crate::dispatch::Endpoint;

/// Hosts a single [`Endpoint`] over HTTP/1.1 and HTTP/2.
///
/// Every request path reaches the endpoint; there is no routing.
pub struct NetworkModule<Req, Resp> {
    config: NetworkConfig,
    endpoint: Endpoint<Req, Resp>,
    listener: Option<TcpListener>,
}

impl<Req: Message, Resp: Message> NetworkModule<Req, Resp> {
    /// Creates a network module without binding any port.
    #[must_use]
    pub fn new(config: NetworkConfig, endpoint: Endpoint<Req, Resp>) -> Self {
        Self {
            config,
            endpoint,
            listener: None,
        }
    }

    #[must_use]
    pub fn endpoint(&self) -> &Endpoint<Req, Resp> {
        &self.endpoint
    }

    /// Assembles the axum router: the endpoint as the fallback service,
    /// wrapped in [`endpoint_layers`].
    pub fn build_router(&self) -> Router {
        Router::new()
            .fallback_service(self.endpoint.clone())
            .layer(endpoint_layers(&self.config))
    }

    /// Binds the TCP listener to the configured host and port.
    ///
    /// Returns the actual bound port, which may differ from the configured
    /// port when port 0 is used (OS-assigned ephemeral port).
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound (e.g., port in use).
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let listener = TcpListener::bind(self.config.bind_addr()).await?;
        let port = listener.local_addr()?.port();

        info!("TCP listener bound to {}:{}", self.config.host, port);

        self.listener = Some(listener);
        Ok(port)
    }

    /// Address of the bound listener, once `start()` has succeeded.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    /// Serves connections until `shutdown` resolves, then waits for
    /// in-flight requests to finish.
    ///
    /// # Errors
    ///
    /// Returns an error if `start()` was not called first or the server hits
    /// a fatal I/O error.
    pub async fn serve(
        mut self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let listener = self
            .listener
            .take()
            .ok_or_else(|| anyhow::anyhow!("start() must be called before serve()"))?;
        let router = self.build_router();

        info!(endpoint = ?self.endpoint.descriptor().binding(), "serving endpoint");

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("server stopped");
        Ok(())
    }
}
