use axum::{Json, extract::State};
use serde_json::{Value, json};

use crate::{AppState, error::ApiError};

pub const SERVICE_NAME: &str = "TrailService";

/// service_info
///
/// [Public Route] `GET /` and `GET /api`: service identity and the endpoint map.
pub async fn service_info() -> Json<Value> {
    Json(json!({
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "description": "CRUD API for hiking trails, locations and users",
        "endpoints": {
            "public": [
                "GET /",
                "GET /health",
                "GET /api/v1/status",
                "POST /api/v1/auth/login",
                "POST /api/v1/auth/register",
                "GET /api/v1/trails",
                "GET /api/v1/trails/{id}",
                "GET /api/v1/trails/{id}/points",
                "GET /api/v1/features",
                "GET /api/v1/locations",
                "GET /api/v1/locations/{id}",
                "GET /api/v1/countries",
                "GET /api/v1/countries/{id}/cities",
                "GET /api/v1/cities"
            ],
            "protected": [
                "GET /api/v1/auth/verify",
                "POST /api/v1/auth/logout",
                "POST /api/v1/trails",
                "PUT /api/v1/trails/{id}",
                "DELETE /api/v1/trails/{id}",
                "POST /api/v1/trails/{id}/points",
                "GET /api/v1/users/me"
            ],
            "admin": [
                "POST /api/v1/locations",
                "PUT /api/v1/locations/{id}",
                "DELETE /api/v1/locations/{id}",
                "GET /api/v1/users",
                "GET /api/v1/users/{id}",
                "PUT /api/v1/users/{id}/role",
                "GET /api/v1/users/{id}/trails"
            ]
        },
        "authentication": "Authorization: Bearer <token> (obtain via POST /api/v1/auth/login)"
    }))
}

/// health
///
/// [Public Route] Liveness plus a database round trip. 503 when the database is unreachable.
pub async fn health(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    match state.repo.ping().await {
        Ok(()) => Ok(Json(json!({
            "status": "healthy",
            "database": "connected",
            "service": SERVICE_NAME,
        }))),
        Err(e) => {
            tracing::error!("Health check failed: {}", e);
            Err(ApiError::ServiceUnavailable(
                "Database connection failed".to_string(),
            ))
        }
    }
}

/// status
///
/// [Public Route] `GET /api/v1/status`.
pub async fn status(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "api": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "status": "operational",
        "uptime_seconds": state.started_at.elapsed().as_secs(),
    }))
}

pub async fn not_found() -> ApiError {
    ApiError::not_found("No such endpoint")
}
