//! Liveness and readiness endpoints.
//!
//! `/healthz` answers as long as the process serves HTTP. `/readyz` turns to
//! 503 once the shutdown gate closed, so the pod leaves its Service before
//! in-flight passes finish.

use crate::error::ControllerError;
use crate::shutdown::ShutdownGate;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tracing::info;

pub fn router(gate: ShutdownGate) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/readyz", get(ready))
        .with_state(gate)
}

async fn ready(State(gate): State<ShutdownGate>) -> (StatusCode, &'static str) {
    if gate.is_accepting() {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "shutting down")
    }
}

/// Binds the probe port on all interfaces and serves until the process exits.
pub async fn serve(port: u16, gate: ShutdownGate) -> Result<(), ControllerError> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    serve_on(listener, gate).await
}

async fn serve_on(listener: TcpListener, gate: ShutdownGate) -> Result<(), ControllerError> {
    info!(address = %listener.local_addr()?, "Probe endpoints listening");
    axum::serve(listener, router(gate)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    async fn spawn_probes(gate: ShutdownGate) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve_on(listener, gate));
        addr
    }

    #[tokio::test]
    async fn test_healthz_always_ok() {
        let gate = ShutdownGate::new();
        let addr = spawn_probes(gate.clone()).await;
        gate.close();

        let response = reqwest::get(format!("http://{addr}/healthz")).await.unwrap();
        assert_eq!(response.status().as_u16(), 200);
        assert_eq!(response.text().await.unwrap(), "ok");
    }

    #[tokio::test]
    async fn test_readyz_follows_gate() {
        let gate = ShutdownGate::new();
        let addr = spawn_probes(gate.clone()).await;

        let response = reqwest::get(format!("http://{addr}/readyz")).await.unwrap();
        assert_eq!(response.status().as_u16(), 200);

        gate.close();
        let response = reqwest::get(format!("http://{addr}/readyz")).await.unwrap();
        assert_eq!(response.status().as_u16(), 503);
    }
}
