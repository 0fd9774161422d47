//! HTTP endpoints for the launch API, health check and metrics

use crate::coordinator::{LaunchCoordinator, NotifyRequest};
use crate::errors::LaunchError;
use crate::metrics::metrics;
use crate::types::{CreateRequest, GetQuery, LogView};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::json;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

pub const REQUEST_SUCCESSFUL: &str = "REQUEST_SUCCESSFUL";
pub const REQUEST_FAILED: &str = "REQUEST_FAILED";

type AppState = Arc<LaunchCoordinator>;

#[derive(Debug, Serialize)]
struct CreateResponse {
    status: &'static str,
    message: String,
    id: u64,
}

#[derive(Debug, Serialize)]
struct GetResponse {
    status: &'static str,
    data: Vec<LogView>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    status: &'static str,
    kind: String,
    message: String,
}

/// HTTP face of a [`LaunchError`]
pub struct ApiError {
    status: StatusCode,
    kind: String,
    message: String,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<LaunchError> for ApiError {
    fn from(err: LaunchError) -> Self {
        let status = match &err {
            LaunchError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            LaunchError::NotFound(_) => StatusCode::NOT_FOUND,
            LaunchError::InvalidTransition { .. } => StatusCode::CONFLICT,
            LaunchError::NoSuchKey(_) => StatusCode::UNPROCESSABLE_ENTITY,
            LaunchError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            LaunchError::Upstream(_) => StatusCode::BAD_GATEWAY,
            LaunchError::Persistence(_) | LaunchError::SigningFailed(_) | LaunchError::Config(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self {
            status,
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        LaunchError::invalid_argument(rejection.body_text()).into()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            status: REQUEST_FAILED,
            kind: self.kind,
            message: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

/// Build the API router. `/metrics` is only mounted when `expose_metrics` is set.
pub fn build_router(coordinator: Arc<LaunchCoordinator>, expose_metrics: bool) -> Router {
    let mut router = Router::new()
        .route("/v1/create", post(create_handler))
        .route("/v1/get", post(get_handler))
        .route("/v1/notify", post(notify_handler))
        .route("/v1/hello", get(hello_handler))
        .route("/v1/subscribe", get(subscribe_handler));
    if expose_metrics {
        router = router.route("/metrics", get(metrics_handler));
    }
    router.with_state(coordinator)
}

async fn create_handler(
    State(coordinator): State<AppState>,
    body: Result<Json<CreateRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(request) = body?;
    let log = coordinator.create(request).await?;
    Ok(Json(CreateResponse {
        status: REQUEST_SUCCESSFUL,
        message: String::new(),
        id: log.id,
    }))
}

async fn get_handler(
    State(coordinator): State<AppState>,
    body: Result<Json<GetQuery>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(query) = body?;
    let data = coordinator.get(query).await?;
    Ok(Json(GetResponse {
        status: REQUEST_SUCCESSFUL,
        data,
    }))
}

async fn notify_handler(
    State(coordinator): State<AppState>,
    body: Result<Json<NotifyRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(request) = body?;
    coordinator.notify(request).await?;
    Ok(Json(json!({})))
}

async fn hello_handler(State(coordinator): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    coordinator.hello().await?;
    Ok(Json(json!({})))
}

async fn subscribe_handler() -> impl IntoResponse {
    (
        StatusCode::NOT_IMPLEMENTED,
        Json(ErrorBody {
            status: REQUEST_FAILED,
            kind: "NotImplemented".to_string(),
            message: "status subscription is not defined".to_string(),
        }),
    )
}

async fn metrics_handler() -> Response {
    match metrics().encode_text() {
        Ok(text) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Serve `router` on `addr` until `shutdown` resolves
pub async fn serve<F>(addr: SocketAddr, router: Router, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Launch API listening on {}", listener.local_addr()?);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
