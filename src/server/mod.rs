// 🌐 API Server - axum router, key middleware and error responses
//
// Every route under /api/1 except health sits behind the key middleware.
// GET needs the `read` privilege, every other method `readWrite`. A single
// product scan stores its result, so it needs `readWrite` even over GET.
// Key listing is further limited to the admin key inside its handler.

mod handlers;

use crate::auth::{Authorizer, Principal, Privilege};
use crate::catalog::CatalogService;
use crate::envelope::Envelope;
use crate::error::CatalogError;
use axum::{
    extract::{OriginalUri, Request, State},
    http::{HeaderMap, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tracing::warn;

pub const API_PREFIX: &str = "/api/1";
pub const API_KEY_HEADER: &str = "x-api-key";

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub service: CatalogService,
    pub auth: Arc<Authorizer>,
}

impl AppState {
    pub fn new(service: CatalogService, auth: Authorizer) -> Self {
        AppState {
            service,
            auth: Arc::new(auth),
        }
    }
}

// ============================================================================
// ERRORS
// ============================================================================

/// A `CatalogError` on its way out as an envelope response.
#[derive(Debug)]
pub struct ApiError {
    error: CatalogError,
    path: Option<String>,
}

impl ApiError {
    pub fn at(error: CatalogError, path: &str) -> Self {
        ApiError {
            error,
            path: Some(path.to_string()),
        }
    }
}

impl From<CatalogError> for ApiError {
    fn from(error: CatalogError) -> Self {
        ApiError { error, path: None }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.error.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            warn!(code = self.error.code(), error = %self.error, "request failed");
        }
        let mut envelope = Envelope::error(&self.error);
        if let Some(path) = self.path.as_deref() {
            envelope = envelope.with_path(path);
        }
        (status, Json(envelope)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

// ============================================================================
// KEY MIDDLEWARE
// ============================================================================

/// Read the key from `?key=` first, then from the `x-api-key` header.
fn request_key(query: Option<&str>, headers: &HeaderMap) -> Option<String> {
    let from_query = query.and_then(|q| {
        q.split('&').find_map(|pair| {
            let (name, value) = pair.split_once('=')?;
            (name == "key").then(|| {
                urlencoding::decode(value)
                    .map(|v| v.into_owned())
                    .unwrap_or_else(|_| value.to_string())
            })
        })
    });
    from_query.or_else(|| {
        headers
            .get(API_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    })
}

/// Routes that write even though they are reached with GET.
const WRITING_READS: &[&str] = &["/product-data/single"];

pub fn required_privilege(method: &Method, path: &str) -> Privilege {
    let path = path.trim_end_matches('/');
    if WRITING_READS.iter().any(|suffix| path.ends_with(suffix)) {
        return Privilege::ReadWrite;
    }
    if method == Method::GET || method == Method::HEAD {
        Privilege::Read
    } else {
        Privilege::ReadWrite
    }
}

async fn require_key(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let key = request_key(req.uri().query(), req.headers());
    let required = required_privilege(req.method(), req.uri().path());

    match state.auth.authorize(key.as_deref(), required) {
        Ok(principal) => {
            req.extensions_mut().insert::<Principal>(principal);
            next.run(req).await
        }
        Err(err) => {
            let path = req
                .extensions()
                .get::<OriginalUri>()
                .map(|uri| uri.path().to_string())
                .unwrap_or_else(|| req.uri().path().to_string());
            ApiError::at(err, &path).into_response()
        }
    }
}

// ============================================================================
// ROUTER
// ============================================================================

pub fn router(state: AppState) -> Router {
    let guarded = Router::new()
        .route(
            "/locales",
            get(handlers::list_locales).post(handlers::submit_locale),
        )
        .route(
            "/locales/single",
            get(handlers::get_locale).delete(handlers::delete_locale),
        )
        .route("/locales/single/download", get(handlers::download_locale))
        .route("/pages", get(handlers::list_pages))
        .route(
            "/pages/single",
            get(handlers::get_pages)
                .post(handlers::save_page)
                .delete(handlers::delete_pages),
        )
        .route("/keys/create-key", post(handlers::create_key))
        .route("/keys/deactivate-key", post(handlers::deactivate_key))
        .route("/keys/key-info", get(handlers::key_info))
        .route("/:provider/product-data", post(handlers::scan_locale))
        .route("/:provider/product-data/single", get(handlers::scan_entry))
        .layer(middleware::from_fn_with_state(state.clone(), require_key));

    let api = Router::new()
        .route("/health", get(handlers::health))
        .merge(guarded)
        .with_state(state);

    Router::new().nest(API_PREFIX, api)
}
