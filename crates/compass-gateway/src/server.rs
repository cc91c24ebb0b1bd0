use std::net::SocketAddr;

use compass_common::{Error, Result};
use tokio::net::TcpListener;
use tracing::info;

use crate::router::build_router;
use crate::state::SharedState;

/// Binds the configured address and serves the API until ctrl-c.
pub struct GatewayServer {
    state: SharedState,
}

impl GatewayServer {
    pub fn new(state: SharedState) -> Self {
        Self { state }
    }

    pub fn addr(&self) -> Result<SocketAddr> {
        let gateway = &self.state.config.gateway;
        format!("{}:{}", gateway.host, gateway.port)
            .parse()
            .map_err(|e| Error::Config(format!("invalid gateway address: {e}")))
    }

    pub async fn run(self) -> Result<()> {
        let addr = self.addr()?;
        let app = build_router(self.state);

        let listener = TcpListener::bind(addr).await?;
        info!("College Compass listening on http://{}", listener.local_addr()?);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        info!("gateway stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
