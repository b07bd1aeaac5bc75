use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post, put},
};

/// Admin Router Module
///
/// Endpoints restricted to role = admin. The whole router is wrapped in the
/// `admin_middleware`; each handler repeats the role check as a second line.
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        // GET /api/v1/users?role=&search=&limit=&offset=
        .route("/api/v1/users", get(handlers::users::list_users))
        // GET /api/v1/users/{id}
        // Profile, statistics and the five most recent actions.
        .route("/api/v1/users/{id}", get(handlers::users::get_user))
        // PUT /api/v1/users/{id}/role
        // Role must be `user` or `admin`; admins cannot change their own role.
        .route("/api/v1/users/{id}/role", put(handlers::users::update_user_role))
        // GET /api/v1/users/{id}/trails?include_private=
        .route("/api/v1/users/{id}/trails", get(handlers::users::list_user_trails))
        // Location maintenance.
        .route("/api/v1/locations", post(handlers::locations::create_location))
        .route(
            "/api/v1/locations/{id}",
            put(handlers::locations::update_location).delete(handlers::locations::delete_location),
        )
}
