//! HTTP surface of the named backup server.
//!
//! Every route lives under [`BACKUP_PREFIX`]:
//! - `GET  /ping`            liveness probe
//! - `GET  /list`            named backups, legacy slot last
//! - `GET  /cv[?id=]`        stored document (wrapper stripped)
//! - `POST /cv[?id=]`        store a bare or wrapped document
//! - `DELETE /cv?id=`        remove a named backup
//!
//! Without `id`, or with an id that slugifies to `legacy`, the legacy slot
//! is addressed. Failures are always answered with
//! `{"ok": false, "error": ...}`.

use axum::{
    extract::{
        rejection::{BytesRejection, QueryRejection},
        DefaultBodyLimit, FromRequestParts, Query, Request, State,
    },
    http::{header, request::Parts, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use bytes::Bytes;
use cv_backup_core::storage::named::{DeleteOutcome, NamedBackupStore, Slot};
use cv_backup_core::storage::remote::BACKUP_PREFIX;
use cv_backup_core::BackupError;
use serde::Deserialize;
use serde_json::json;
use std::any::Any;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};
use tracing::{error, warn};

/// Request bodies above this size are refused.
const BODY_LIMIT: usize = 32 * 1024 * 1024;

const ALLOW_READ_ONLY: &str = "GET, OPTIONS";
const ALLOW_CV: &str = "GET, POST, DELETE, OPTIONS";

/// Shared application state containing the backup store.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<NamedBackupStore>,
}

#[derive(Debug, Default, Deserialize)]
pub struct IdParams {
    id: Option<String>,
}

/// The slot named by `?id=`. Unparsable query strings are answered with a
/// structured 400 instead of axum's plain-text rejection.
pub struct SlotQuery(pub Slot);

impl<S: Send + Sync> FromRequestParts<S> for SlotQuery {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(params) = Query::<IdParams>::from_request_parts(parts, state).await?;
        Ok(SlotQuery(Slot::from_id(params.id.as_deref())))
    }
}

/// Structured failure answered to the client.
#[derive(Debug)]
pub enum ApiError {
    NotFound { path: String },
    InvalidQuery(String),
    InvalidBody { status: StatusCode, message: String },
    InvalidJson(String),
    LegacyProtected,
    MethodNotAllowed(&'static str),
    Internal(String),
    /// A panic caught at the top of the stack.
    Crash(String),
}

impl From<BackupError> for ApiError {
    fn from(err: BackupError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::InvalidQuery(rejection.body_text())
    }
}

impl From<BytesRejection> for ApiError {
    fn from(rejection: BytesRejection) -> Self {
        ApiError::InvalidBody {
            status: rejection.status(),
            message: rejection.body_text(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::NotFound { path } => (
                StatusCode::NOT_FOUND,
                Json(json!({ "ok": false, "error": "not_found", "path": path })),
            )
                .into_response(),
            ApiError::InvalidQuery(message) => (
                StatusCode::BAD_REQUEST,
                Json(json!({ "ok": false, "error": "invalid_query", "message": message })),
            )
                .into_response(),
            ApiError::InvalidBody { status, message } => (
                status,
                Json(json!({ "ok": false, "error": "invalid_body", "message": message })),
            )
                .into_response(),
            ApiError::InvalidJson(message) => (
                StatusCode::BAD_REQUEST,
                Json(json!({ "ok": false, "error": "invalid_json", "message": message })),
            )
                .into_response(),
            ApiError::LegacyProtected => (
                StatusCode::METHOD_NOT_ALLOWED,
                Json(json!({ "ok": false, "error": "cannot_delete_legacy" })),
            )
                .into_response(),
            ApiError::MethodNotAllowed(allow) => (
                StatusCode::METHOD_NOT_ALLOWED,
                [(header::ALLOW, allow)],
                Json(json!({ "ok": false, "error": "method_not_allowed" })),
            )
                .into_response(),
            ApiError::Internal(message) => {
                error!(%message, "backup request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "ok": false, "error": "internal_error", "message": message })),
                )
                    .into_response()
            }
            ApiError::Crash(message) => {
                error!(%message, "backup handler panicked");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "ok": false, "error": "middleware_crash", "message": message })),
                )
                    .into_response()
            }
        }
    }
}

pub fn router(store: Arc<NamedBackupStore>) -> Router {
    let state = AppState { store };
    let backup = Router::new()
        .route(
            "/ping",
            get(ping).fallback(|| async { ApiError::MethodNotAllowed(ALLOW_READ_ONLY) }),
        )
        .route(
            "/list",
            get(list).fallback(|| async { ApiError::MethodNotAllowed(ALLOW_READ_ONLY) }),
        )
        .route(
            "/cv",
            get(get_cv)
                .post(post_cv)
                .delete(delete_cv)
                .fallback(|| async { ApiError::MethodNotAllowed(ALLOW_CV) }),
        )
        .layer(middleware::from_fn(cors))
        .with_state(state);

    Router::new().nest(BACKUP_PREFIX, backup).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(CatchPanicLayer::custom(panic_response))
            .layer(DefaultBodyLimit::max(BODY_LIMIT)),
    )
}

/// Permissive CORS on every backup route; preflights end here.
async fn cors(req: Request, next: Next) -> Response {
    let mut resp = if req.method() == Method::OPTIONS {
        StatusCode::NO_CONTENT.into_response()
    } else {
        next.run(req).await
    };
    let headers = resp.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(ALLOW_CV),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type"),
    );
    resp
}

/// Answer for a handler that panicked. The connection stays usable.
pub fn panic_response(err: Box<dyn Any + Send + 'static>) -> Response {
    let message = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    };
    ApiError::Crash(message).into_response()
}

async fn ping() -> Json<serde_json::Value> {
    Json(json!({ "ok": true }))
}

async fn list(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let items = state.store.list().await?;
    Ok(Json(json!({ "ok": true, "items": items })))
}

async fn get_cv(
    State(state): State<AppState>,
    SlotQuery(slot): SlotQuery,
) -> Result<Json<serde_json::Value>, ApiError> {
    match state.store.get(&slot).await? {
        Some(doc) => Ok(Json(doc)),
        None => Err(ApiError::NotFound {
            path: state.store.path_for(&slot).display().to_string(),
        }),
    }
}

async fn post_cv(
    State(state): State<AppState>,
    SlotQuery(slot): SlotQuery,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let body = body?;
    let parsed: serde_json::Value = serde_json::from_slice(&body).map_err(|e| {
        warn!(error = %e, "rejecting malformed backup body");
        ApiError::InvalidJson(e.to_string())
    })?;
    let receipt = state.store.put(&slot, parsed).await?;
    Ok(Json(json!({
        "ok": true,
        "id": receipt.id,
        "name": receipt.name,
        "path": receipt.path,
    })))
}

async fn delete_cv(
    State(state): State<AppState>,
    SlotQuery(slot): SlotQuery,
) -> Result<Json<serde_json::Value>, ApiError> {
    match state.store.delete(&slot).await? {
        DeleteOutcome::Removed(id) => Ok(Json(json!({ "ok": true, "id": id }))),
        DeleteOutcome::LegacyProtected => Err(ApiError::LegacyProtected),
    }
}
