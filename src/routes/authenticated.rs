use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post, put},
};

/// Authenticated Router Module
///
/// Endpoints requiring a valid session token. Ownership of individual trails is
/// checked inside the handlers (owner or admin, else 403).
pub fn authenticated_routes() -> Router<AppState> {
    Router::new()
        .route("/api/v1/auth/verify", get(handlers::session::verify))
        .route("/api/v1/auth/logout", post(handlers::session::logout))
        // POST /api/v1/trails
        // Creates a trail owned by the caller (optionally with its points).
        .route("/api/v1/trails", post(handlers::trails::create_trail))
        // PUT / DELETE /api/v1/trails/{id}
        // Owner or admin only.
        .route(
            "/api/v1/trails/{id}",
            put(handlers::trails::update_trail).delete(handlers::trails::delete_trail),
        )
        // POST /api/v1/trails/{id}/points
        // Appends a waypoint; owner or admin only.
        .route("/api/v1/trails/{id}/points", post(handlers::trails::add_trail_point))
        // GET /api/v1/users/me
        // The caller's profile, statistics and recent activity.
        .route("/api/v1/users/me", get(handlers::users::me))
}
