use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post},
};

/// Public Router Module
///
/// Unauthenticated endpoints. Trail reads consult the optional caller identity
/// so private trails stay invisible to everyone but their owner and admins.
pub fn public_routes() -> Router<AppState> {
    Router::new()
        // GET / and GET /api
        // Service identity and the endpoint map.
        .route("/", get(handlers::system::service_info))
        .route("/api", get(handlers::system::service_info))
        // GET /health
        // Liveness plus a database round trip; 503 when the database is unreachable.
        .route("/health", get(handlers::system::health))
        .route("/api/v1/status", get(handlers::system::status))
        // POST /api/v1/auth/login
        // Verifies credentials with the Authenticator API and issues a session token.
        .route("/api/v1/auth/login", post(handlers::session::login))
        .route("/api/v1/auth/register", post(handlers::session::register))
        // GET /api/v1/trails?difficulty=&min_length=&max_length=&location_id=&limit=&offset=
        // Public trails, plus the caller's own private trails when a valid token is sent.
        .route("/api/v1/trails", get(handlers::trails::list_trails))
        // GET /api/v1/trails/{id}
        // Detail view; a private trail is a 404 unless the caller owns it or is an admin.
        .route("/api/v1/trails/{id}", get(handlers::trails::get_trail))
        .route("/api/v1/trails/{id}/points", get(handlers::trails::list_trail_points))
        // GET /api/v1/features
        // Tags accepted in a trail's feature_ids.
        .route("/api/v1/features", get(handlers::features::list_features))
        // Geography reference data.
        .route("/api/v1/locations", get(handlers::locations::list_locations))
        .route("/api/v1/locations/{id}", get(handlers::locations::get_location))
        .route("/api/v1/countries", get(handlers::locations::list_countries))
        .route(
            "/api/v1/countries/{id}/cities",
            get(handlers::locations::list_country_cities),
        )
        // GET /api/v1/cities?country_id=
        .route("/api/v1/cities", get(handlers::locations::list_cities))
}
