//! Read-only HTTP status endpoint for the kiosk front end.
//!
//! `GET /api/status` answers `409` while a transaction is in flight and
//! `200` otherwise.

use crate::application::controller::TransactionController;
use crate::domain::transaction::Transaction;
use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use parking_lot::Mutex;
use serde::Serialize;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{error, info};

#[derive(Debug, Serialize)]
struct StatusBody {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    transaction: Option<Transaction>,
}

async fn status_handler(State(controller): State<TransactionController>) -> impl IntoResponse {
    let snapshot = controller.snapshot();
    if snapshot.state.is_in_flight() {
        let body = StatusBody {
            status: "error",
            state: Some(snapshot.state.to_string()),
            transaction: snapshot.transaction,
        };
        (StatusCode::CONFLICT, Json(body))
    } else {
        let body = StatusBody {
            status: "success",
            state: None,
            transaction: None,
        };
        (StatusCode::OK, Json(body))
    }
}

pub fn router(controller: TransactionController) -> Router {
    Router::new()
        .route("/api/status", get(status_handler))
        .with_state(controller)
}

pub struct StatusServer {
    addr: SocketAddr,
    controller: TransactionController,
    shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
}

impl StatusServer {
    pub fn new(addr: SocketAddr, controller: TransactionController) -> Self {
        Self {
            addr,
            controller,
            shutdown_tx: Mutex::new(None),
        }
    }

    /// Binds the listener and serves in a background task.
    ///
    /// Returns the bound address, which differs from the configured one
    /// when port 0 was requested.
    pub async fn start(&self) -> std::io::Result<SocketAddr> {
        let listener = TcpListener::bind(self.addr).await?;
        let local_addr = listener.local_addr()?;
        let app = router(self.controller.clone());

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        *self.shutdown_tx.lock() = Some(shutdown_tx);

        info!(addr = %local_addr, "status endpoint listening");
        tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async {
                shutdown_rx.await.ok();
            });
            if let Err(e) = server.await {
                error!(error = %e, "status endpoint stopped");
            }
        });
        Ok(local_addr)
    }

    pub fn shutdown(&self) {
        if let Some(tx) = self.shutdown_tx.lock().take() {
            let _ = tx.send(());
            info!("status endpoint shutdown signal sent");
        }
    }
}
