#![forbid(unsafe_code)]

use std::{sync::Arc, time::Duration};

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use slotbook_adapter::{
    observability::init_logging, reason_codes, AdapterConfig, AdapterRejection, AdapterResult,
    AdapterRuntime, AvailabilityAdapterQuery,
};
use slotbook_contracts::booking::BookingSubmission;
use tracing::{error, info, warn};

type SharedRuntime = Arc<AdapterRuntime>;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = AdapterConfig::from_env()?;
    init_logging(config.log_format);

    let runtime: SharedRuntime = Arc::new(AdapterRuntime::default_from_env(&config)?);
    if config.reconcile_worker_enabled {
        spawn_reconcile_worker(runtime.clone(), config.reconcile_interval_ms);
    }

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/bookings", post(submit_booking))
        .route("/v1/availability", get(availability))
        .route("/v1/reconcile", post(reconcile))
        .route("/v1/shards", get(list_shards))
        .route("/v1/shards/:shard", get(shard_view))
        .with_state(runtime);

    info!(
        addr = %config.bind,
        reconcile_worker_enabled = config.reconcile_worker_enabled,
        interval_ms = config.reconcile_interval_ms,
        "slotbook_adapter_http listening"
    );
    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = %err, "ctrl-c handler unavailable");
            }
        })
        .await?;
    info!("slotbook_adapter_http stopped");
    Ok(())
}

fn spawn_reconcile_worker(runtime: SharedRuntime, interval_ms: u64) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let runtime = runtime.clone();
            match tokio::task::spawn_blocking(move || runtime.reconcile()).await {
                Ok(Ok(_)) => {}
                Ok(Err(err)) => warn!(
                    kind = err.kind(),
                    error = %err,
                    reason_code = %reason_codes::ADAPTER_RECONCILE_RETRY,
                    "reconcile pass failed; next tick retries"
                ),
                Err(join_err) => {
                    error!(
                        error = %join_err,
                        reason_code = %reason_codes::ADAPTER_RECONCILE_WORKER_STOPPED,
                        "reconcile worker task panicked"
                    );
                    return;
                }
            }
        }
    });
}

/// Runs a blocking runtime call off the async executor.
async fn blocking<T, F>(runtime: SharedRuntime, f: F) -> Response
where
    T: serde::Serialize + Send + 'static,
    F: FnOnce(&AdapterRuntime) -> AdapterResult<T> + Send + 'static,
{
    match tokio::task::spawn_blocking(move || f(&runtime)).await {
        Ok(Ok(body)) => (StatusCode::OK, Json(body)).into_response(),
        Ok(Err(rejection)) => rejection_response(rejection),
        Err(join_err) => {
            error!(error = %join_err, "request task panicked");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn rejection_response(rejection: AdapterRejection) -> Response {
    let status =
        StatusCode::from_u16(rejection.http_status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(rejection.body)).into_response()
}

async fn healthz(State(runtime): State<SharedRuntime>) -> Response {
    (StatusCode::OK, Json(runtime.health_report())).into_response()
}

async fn submit_booking(
    State(runtime): State<SharedRuntime>,
    Json(submission): Json<BookingSubmission>,
) -> Response {
    blocking(runtime, move |rt| rt.submit_booking(&submission)).await
}

async fn availability(
    State(runtime): State<SharedRuntime>,
    Query(query): Query<AvailabilityAdapterQuery>,
) -> Response {
    blocking(runtime, move |rt| rt.availability(&query)).await
}

async fn reconcile(State(runtime): State<SharedRuntime>) -> Response {
    blocking(runtime, |rt| {
        rt.reconcile()
            .map_err(|err| AdapterRejection::from_error(&err))
    })
    .await
}

async fn list_shards(State(runtime): State<SharedRuntime>) -> Response {
    blocking(runtime, |rt| rt.list_shards()).await
}

async fn shard_view(State(runtime): State<SharedRuntime>, Path(shard): Path<String>) -> Response {
    blocking(runtime, move |rt| rt.shard_view(&shard)).await
}
