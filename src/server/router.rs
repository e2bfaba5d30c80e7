use std::sync::Arc;
use std::time::Instant;

use axum::body::Bytes;
use axum::extract::{Path, Request, State};
use axum::http::HeaderMap;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::{Json, Router, routing::get, routing::post};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::dispatch::dispatch;
use super::response::{ApiError, ApiResponse};
use crate::rpc::{CallContext, Pipeline};
use crate::service::Services;
use crate::status::Status;

pub struct AppState {
    pub pipeline: Pipeline,
    pub services: Services,
}

impl AppState {
    pub fn new(pipeline: Pipeline, services: Services) -> Self {
        Self { pipeline, services }
    }
}

async fn health() -> &'static str {
    "OK"
}

async fn log_request(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    let response = next.run(request).await;

    let latency = start.elapsed();
    let status = response.status();

    tracing::debug!(
        "{} {} {} {}ms",
        method,
        uri.path(),
        status.as_u16(),
        latency.as_millis()
    );

    response
}

/// `POST /{service}/{method}`: runs `/{service}/{method}` as a unary call.
///
/// The call runs on a blocking thread. If the client goes away the request
/// future is dropped, which cancels the call's token; the handler then
/// stops before its next commit.
async fn call(
    State(state): State<Arc<AppState>>,
    Path((service, method)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ApiResponse<Value>>, ApiError> {
    let token = CancellationToken::new();
    let _cancel_on_drop = token.clone().drop_guard();
    let ctx = CallContext::new(format!("/{service}/{method}"), headers).with_cancellation(token);

    let result = tokio::task::spawn_blocking(move || dispatch(&state, ctx, &body))
        .await
        .map_err(|e| Status::internal("request handler failed", e))?;

    Ok(Json(ApiResponse::success(result?)))
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/{service}/{method}", post(call))
        .layer(middleware::from_fn(log_request))
        .with_state(state)
}
