use std::time::Instant;

use axum::{
    Router,
    extract::{FromRef, Request},
    http::HeaderName,
    middleware::{self, Next},
    response::Response,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{Level, Span};

// --- Module Structure ---

pub mod auth;
pub mod authenticator;
pub mod config;
pub mod error;
pub mod extract;
pub mod handlers;
pub mod models;
pub mod repository;
pub mod seed;
pub mod validation;

// Routing segregation (Public, Authenticated, Admin).
pub mod routes;
use auth::AuthUser;
use error::ApiError;
use routes::{admin, authenticated, public};

// --- Public Re-exports ---

pub use authenticator::{AuthenticatorState, HttpAuthenticator, MockAuthenticator};
pub use config::AppConfig;
pub use repository::{InMemoryRepository, RepositoryState, SqlServerRepository};

/// AppState
///
/// The single, immutable container shared by every request: the repository
/// (which owns the connection pool), the Authenticator API client and the
/// loaded configuration.
#[derive(Clone)]
pub struct AppState {
    pub repo: RepositoryState,
    pub authenticator: AuthenticatorState,
    pub config: AppConfig,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(repo: RepositoryState, authenticator: AuthenticatorState, config: AppConfig) -> Self {
        Self {
            repo,
            authenticator,
            config,
            started_at: Instant::now(),
        }
    }
}

// --- Axum FromRef Extractor Implementations ---

impl FromRef<AppState> for RepositoryState {
    fn from_ref(app_state: &AppState) -> RepositoryState {
        app_state.repo.clone()
    }
}

impl FromRef<AppState> for AuthenticatorState {
    fn from_ref(app_state: &AppState) -> AuthenticatorState {
        app_state.authenticator.clone()
    }
}

impl FromRef<AppState> for AppConfig {
    fn from_ref(app_state: &AppState) -> AppConfig {
        app_state.config.clone()
    }
}

/// auth_middleware
///
/// Guards the authenticated routes. Extracting `AuthUser` rejects the request
/// with 401 before the handler runs; the resolved identity is cached in the
/// request extensions for the handler's own extractor.
async fn auth_middleware(_auth_user: AuthUser, request: Request, next: Next) -> Response {
    next.run(request).await
}

/// admin_middleware
///
/// Guards the admin routes: authentication first (401), then role (403).
async fn admin_middleware(auth_user: AuthUser, request: Request, next: Next) -> Result<Response, ApiError> {
    auth_user.require_admin()?;
    Ok(next.run(request).await)
}

/// create_router
///
/// Assembles the routing structure, applies the scoped auth layers and the
/// global observability layers, and registers the application state.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    let x_request_id = HeaderName::from_static("x-request-id");

    let base_router = Router::new()
        // Public Routes: identity is optional.
        .merge(public::public_routes())
        // Authenticated Routes: a valid session token is required.
        .merge(
            authenticated::authenticated_routes()
                .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware)),
        )
        // Admin Routes: valid token and role = admin. Handlers re-check the role.
        .merge(
            admin::admin_routes()
                .route_layer(middleware::from_fn_with_state(state.clone(), admin_middleware)),
        )
        .fallback(handlers::system::not_found)
        .with_state(state);

    base_router
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(trace_span_logger)
                        .on_response(
                            DefaultOnResponse::new()
                                .level(Level::INFO)
                                .latency_unit(tower_http::LatencyUnit::Millis),
                        ),
                )
                .layer(PropagateRequestIdLayer::new(x_request_id)),
        )
        .layer(cors)
}

/// trace_span_logger
///
/// Span factory for `TraceLayer`: method, URI and the generated `x-request-id`,
/// so every log line of one request can be correlated.
fn trace_span_logger(request: &axum::http::Request<axum::body::Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown");

    tracing::info_span!(
        "http_request",
        method = ?request.method(),
        uri = ?request.uri(),
        req_id = %request_id,
    )
}
