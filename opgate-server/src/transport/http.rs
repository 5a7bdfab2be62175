//! HTTP transport
//!
//! # API Endpoints
//!
//! ## POST /upload
//!
//! Submit file pairs for processing. The `X-Operation-Key` header makes the
//! request idempotent: while the operation lives, repeating the key returns
//! `409` with the id of the existing operation. Files are sent as repeated
//! `files` fields of a `multipart/form-data` body.
//!
//! ```json
//! {
//!   "operation_id": "7f9c0e64-3c5e-4a8e-9a43-5d3c2f1e8b10",
//!   "status": "NEW",
//!   "pairs_count": 2,
//!   "message": "2 pairs of files accepted for processing"
//! }
//! ```
//!
//! ## GET /get?id=<operation id>
//!
//! Current status of an operation, shaped by its status:
//!
//! ```json
//! {"operation_id": "...", "status": "PROGRESS", "progress": {"processed": 1, "total": 2}, "estimated_completion_seconds": 10}
//! {"operation_id": "...", "status": "DONE", "results": [...]}
//! {"operation_id": "...", "status": "ERROR", "error": "...", "error_code": "...", "failed_files": [...]}
//! ```
//!
//! ## GET /ping, GET /health
//!
//! Liveness and cache health. `/health` answers `503` when the cache does not.
//!
//! ## Errors
//!
//! Every error body is `{"error": "<message>", "code": "<CODE>"}`.
//!
//! ## Rate limiting
//!
//! Every request except `OPTIONS` is charged to the client: the first
//! `X-Forwarded-For` entry, else `X-Real-IP`, else the peer address. Admitted
//! responses carry `X-RateLimit-Limit` and `X-RateLimit-Remaining`; rejected
//! requests get `429` with `X-RateLimit-Reset` and `Retry-After` as well.

use super::Transport;
use crate::backend::AppCoordinator;
use anyhow::Result;
use async_trait::async_trait;
use axum::{
    Json, Router,
    extract::{
        ConnectInfo, DefaultBodyLimit, FromRequest, Query, Request, State,
        multipart::{Multipart, MultipartError},
    },
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, header::RETRY_AFTER},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use bytes::BytesMut;
use opgate::core::coordinator::SNIFF_LEN;
use opgate::{
    CacheClient, Coordinator, DuplicateOperation, ErrorBody, ErrorCode, RateLimited, StatusError,
    UploadError, UploadedFile, ValidationError,
};
use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::net::TcpListener;

/// Header carrying the client's idempotency key
pub const OPERATION_KEY_HEADER: &str = "x-operation-key";

/// Multipart field holding the uploaded files
pub const FILES_FIELD: &str = "files";

const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_REAL_IP: &str = "x-real-ip";
const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// HTTP transport implementation
pub struct HttpTransport {
    addr: String,
}

impl HttpTransport {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            addr: format!("{host}:{port}"),
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn start(self, coordinator: Arc<AppCoordinator>) -> Result<()> {
        let listener = TcpListener::bind(&self.addr).await?;
        tracing::info!("HTTP server listening on {}", listener.local_addr()?);

        serve(listener, coordinator).await
    }
}

/// Serve the API on an already bound listener
pub async fn serve<C: CacheClient + 'static>(
    listener: TcpListener,
    coordinator: Arc<Coordinator<C>>,
) -> Result<()> {
    let app = router(coordinator);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

/// Routes and middleware of the API
pub fn router<C: CacheClient + 'static>(coordinator: Arc<Coordinator<C>>) -> Router {
    let body_limit =
        usize::try_from(coordinator.config().upload.max_request_bytes()).unwrap_or(usize::MAX);

    Router::new()
        .route("/upload", post(handle_upload::<C>))
        .route("/get", get(handle_status::<C>))
        .route("/ping", get(|| async { "pong" }))
        .route("/health", get(handle_health::<C>))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(middleware::from_fn_with_state(
            coordinator.clone(),
            rate_limit::<C>,
        ))
        .with_state(coordinator)
}

/// Identify the client a request is charged to
pub fn client_identifier(headers: &HeaderMap, peer: Option<IpAddr>) -> String {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    };

    if let Some(forwarded) = header(X_FORWARDED_FOR) {
        if let Some(first) = forwarded.split(',').map(str::trim).find(|ip| !ip.is_empty()) {
            return first.to_string();
        }
    }
    if let Some(real_ip) = header(X_REAL_IP) {
        return real_ip.to_string();
    }
    peer.map(|ip| ip.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

async fn rate_limit<C: CacheClient + 'static>(
    State(coordinator): State<Arc<Coordinator<C>>>,
    request: Request,
    next: Next,
) -> Response {
    if request.method() == Method::OPTIONS {
        return next.run(request).await;
    }

    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let identifier = client_identifier(request.headers(), peer);

    match coordinator
        .handle_rate_limit(&identifier, || next.run(request))
        .await
    {
        Ok((mut response, status)) => {
            let headers = response.headers_mut();
            headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(status.limit));
            headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(status.remaining));
            response
        }
        Err(limited) => {
            tracing::debug!(identifier = %identifier, "Rate limit exceeded");
            rate_limited_response(limited)
        }
    }
}

fn rate_limited_response(limited: RateLimited) -> Response {
    let retry_after = limited.retry_after.as_secs();
    let reset = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
        + retry_after;

    let mut response = error_response(
        StatusCode::TOO_MANY_REQUESTS,
        ErrorCode::RateLimitExceeded,
        "Rate limit exceeded",
    );
    let headers = response.headers_mut();
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(limited.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(limited.remaining));
    headers.insert(X_RATELIMIT_RESET, HeaderValue::from(reset));
    headers.insert(RETRY_AFTER, HeaderValue::from(retry_after));
    response
}

async fn handle_upload<C: CacheClient + 'static>(
    State(coordinator): State<Arc<Coordinator<C>>>,
    headers: HeaderMap,
    request: Request,
) -> Response {
    // Reject before reading the body
    let operation_key = match headers.get(OPERATION_KEY_HEADER) {
        None => return validation_response(&ValidationError::MissingOperationKey),
        Some(value) => match value.to_str() {
            Ok(key) => key.to_string(),
            Err(_) => {
                return validation_response(&ValidationError::InvalidOperationKey(
                    "operation key must be visible ASCII".into(),
                ));
            }
        },
    };
    if let Err(e) = opgate::core::coordinator::validate_operation_key(&operation_key) {
        return validation_response(&e);
    }

    let multipart = match Multipart::from_request(request, &()).await {
        Ok(multipart) => multipart,
        Err(rejection) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                ErrorCode::InvalidFormData,
                format!("Failed to parse form: {}", rejection.body_text()),
            );
        }
    };
    let files = match read_files(multipart).await {
        Ok(files) => files,
        Err(e) => {
            tracing::debug!(error = %e, "Failed to read multipart body");
            return error_response(
                e.status(),
                ErrorCode::InvalidFormData,
                format!("Failed to parse form: {}", e.body_text()),
            );
        }
    };

    match coordinator.handle_upload(&operation_key, &files).await {
        Ok(accepted) => (StatusCode::OK, Json(accepted)).into_response(),
        Err(UploadError::Validation(e)) => validation_response(&e),
        Err(UploadError::Duplicate {
            existing_operation_id,
        }) => (
            StatusCode::CONFLICT,
            Json(DuplicateOperation::new(existing_operation_id)),
        )
            .into_response(),
        Err(UploadError::Internal(_)) => internal_error(),
    }
}

/// Drain the multipart body, keeping the head and size of each file
async fn read_files(mut multipart: Multipart) -> Result<Vec<UploadedFile>, MultipartError> {
    let mut files = Vec::new();

    while let Some(mut field) = multipart.next_field().await? {
        if field.name() != Some(FILES_FIELD) {
            continue;
        }

        let name = field
            .file_name()
            .map(str::to_string)
            .unwrap_or_else(|| format!("file_{}", files.len()));
        let mut head = BytesMut::with_capacity(SNIFF_LEN);
        let mut size = 0u64;

        while let Some(chunk) = field.chunk().await? {
            size += chunk.len() as u64;
            let wanted = SNIFF_LEN.saturating_sub(head.len());
            head.extend_from_slice(&chunk[..chunk.len().min(wanted)]);
        }

        files.push(UploadedFile::from_parts(name, &head, size));
    }

    Ok(files)
}

#[derive(Debug, Deserialize)]
struct StatusQuery {
    #[serde(default)]
    id: String,
}

async fn handle_status<C: CacheClient + 'static>(
    State(coordinator): State<Arc<Coordinator<C>>>,
    Query(query): Query<StatusQuery>,
) -> Response {
    match coordinator.handle_status(query.id.trim()).await {
        Ok(view) => (StatusCode::OK, Json(view)).into_response(),
        Err(StatusError::Internal(_)) => internal_error(),
        Err(e) => {
            let status = match e {
                StatusError::NotFound => StatusCode::NOT_FOUND,
                _ => StatusCode::BAD_REQUEST,
            };
            error_response(status, e.code(), e.to_string())
        }
    }
}

async fn handle_health<C: CacheClient + 'static>(
    State(coordinator): State<Arc<Coordinator<C>>>,
) -> Response {
    if coordinator.cache_healthy().await {
        (StatusCode::OK, "OK").into_response()
    } else {
        tracing::warn!("Health check failed: cache unavailable");
        (StatusCode::SERVICE_UNAVAILABLE, "cache unavailable").into_response()
    }
}

fn validation_response(e: &ValidationError) -> Response {
    error_response(StatusCode::BAD_REQUEST, e.code(), e.to_string())
}

fn internal_error() -> Response {
    error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        ErrorCode::InternalError,
        "Internal server error",
    )
}

fn error_response(status: StatusCode, code: ErrorCode, message: impl Into<String>) -> Response {
    (status, Json(ErrorBody::new(code, message))).into_response()
}
