//! HTTP surfaces: the node API and the orchestrator's attestation intake.

pub mod error;
pub mod node;
pub mod orchestrator;

use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

pub use error::ApiError;
pub use node::{NodeInfo, NodeState};
pub use orchestrator::OrchestratorState;

/// Serve `app` on `listener` until `shutdown` is cancelled. In-flight requests
/// are allowed to finish.
pub async fn serve(
    listener: TcpListener,
    app: Router,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let addr = listener.local_addr()?;
    tracing::info!(%addr, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    tracing::info!(%addr, "server stopped");
    Ok(())
}
