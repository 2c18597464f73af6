//! REST surface over the ledger and record services.

mod accounts;
mod error;
mod extract;
mod records;
mod request_tracing;

use std::future::Future;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{middleware, Extension, Json, Router};
use serde_json::json;
use tokio::net::TcpListener;
use tracing::info;

use crate::application::{ErrorKind, LedgerService, RecordService};
use crate::domain::RecordKind;

pub use error::{status_for, ApiError};

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<LedgerService>,
    pub records: RecordService,
    request_id_seed: Arc<AtomicU64>,
}

impl AppState {
    pub fn new(ledger: LedgerService) -> Self {
        let records = RecordService::new(ledger.repository().clone());
        Self {
            ledger: Arc::new(ledger),
            records,
            request_id_seed: Arc::new(AtomicU64::new(1)),
        }
    }
}

pub fn router(state: AppState) -> Router {
    let mut api = Router::new()
        .route(
            "/accounts",
            get(accounts::list_accounts).post(accounts::open_account),
        )
        .route(
            "/accounts/:id",
            get(accounts::get_account).delete(accounts::delete_account),
        )
        .route("/accounts/:id/close", post(accounts::close_account))
        .route("/accounts/:id/balance", get(accounts::get_balance))
        .route("/accounts/:id/transactions", get(accounts::list_transactions))
        .route("/accounts/:id/deposit", post(accounts::deposit))
        .route("/accounts/:id/withdraw", post(accounts::withdraw))
        .route("/accounts/:id/fees", post(accounts::charge_fee))
        .route("/transfers", post(accounts::transfer))
        .route("/transactions", get(accounts::list_all_transactions))
        .route(
            "/transactions/:id",
            get(accounts::get_transaction).patch(accounts::correct_transaction),
        )
        .route("/ledger/verify", get(accounts::verify_ledger))
        .route("/calculators/interest", get(accounts::interest));

    for kind in RecordKind::ALL {
        api = api
            .route(
                &format!("/{}", kind.collection()),
                get(records::list)
                    .post(records::create)
                    .layer(Extension(kind)),
            )
            .route(
                &format!("/{}/:id", kind.collection()),
                get(records::show)
                    .put(records::update)
                    .delete(records::remove)
                    .layer(Extension(kind)),
            );
    }

    Router::new()
        .route("/healthz", get(healthz))
        .nest("/api", api)
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            request_tracing::request_tracing_middleware,
        ))
        .with_state(state)
}

async fn healthz(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    state.ledger.health_check().await?;
    Ok(Json(json!({"status": "ok"})))
}

async fn not_found(uri: axum::http::Uri) -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": {
                "kind": ErrorKind::NotFound.as_str(),
                "message": format!("No route for {}", uri.path()),
            }
        })),
    )
}

/// Serve until `shutdown` resolves, then drain in-flight requests.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let addr = listener.local_addr().context("Listener has no local address")?;
    info!(%addr, "Listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("Server failed")
}

/// Resolves on SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => {}
                    _ = sigint.recv() => {}
                }
            }
            _ => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    info!("Shutdown signal received");
}

/// Plain `(status, json)` helper used by handlers that create things.
fn created<T: serde::Serialize>(value: T) -> (StatusCode, Json<T>) {
    (StatusCode::CREATED, Json(value))
}
