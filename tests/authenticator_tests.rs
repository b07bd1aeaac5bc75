use axum::{Json, Router, http::StatusCode, routing::post};
use serde_json::{Value, json};
use std::time::Duration;
use tokio::net::TcpListener;
use trail_service::{
    HttpAuthenticator, MockAuthenticator,
    authenticator::{Authenticator, AuthenticatorError, parse_verdict},
};

// --- Stub Authenticator API ---

async fn verify(Json(body): Json<Value>) -> Json<Value> {
    let verified = body["email"] == "grace@plymouth.ac.uk" && body["password"] == "ISAD123!";
    Json(json!(["Verified", if verified { "True" } else { "False" }]))
}

/// Serves the stub on an ephemeral port and returns its base URL.
async fn spawn_stub() -> String {
    let app = Router::new()
        .route("/users", post(verify))
        .route("/refuse", post(|| async { StatusCode::UNAUTHORIZED }))
        .route("/broken", post(|| async { StatusCode::INTERNAL_SERVER_ERROR }))
        .route("/garbage", post(|| async { Json(json!({ "ok": true })) }));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn client(url: String) -> HttpAuthenticator {
    HttpAuthenticator::new(url, Duration::from_secs(5)).unwrap()
}

// --- Verdict parsing ---

#[test]
fn test_parse_verdict() {
    assert!(parse_verdict(&json!(["Verified", "True"])).unwrap());
    assert!(!parse_verdict(&json!(["Verified", "False"])).unwrap());
    assert!(!parse_verdict(&json!(["Denied", "True"])).unwrap());
    assert!(matches!(
        parse_verdict(&json!(["Verified"])),
        Err(AuthenticatorError::InvalidResponse(_))
    ));
    assert!(parse_verdict(&json!("Verified")).is_err());
}

// --- HTTP client ---

#[tokio::test]
async fn test_http_authenticator_accepts_verified_pair() {
    let base = spawn_stub().await;
    let auth = client(format!("{base}/users"));

    assert!(auth.verify_credentials("grace@plymouth.ac.uk", "ISAD123!").await.unwrap());
    assert!(!auth.verify_credentials("grace@plymouth.ac.uk", "wrong").await.unwrap());
}

#[tokio::test]
async fn test_http_authenticator_maps_statuses() {
    let base = spawn_stub().await;

    // 4xx is a rejection, not an outage.
    let refused = client(format!("{base}/refuse"))
        .verify_credentials("grace@plymouth.ac.uk", "ISAD123!")
        .await;
    assert!(!refused.unwrap());

    let broken = client(format!("{base}/broken"))
        .verify_credentials("grace@plymouth.ac.uk", "ISAD123!")
        .await;
    assert!(matches!(broken, Err(AuthenticatorError::Status(500))));

    let garbage = client(format!("{base}/garbage"))
        .verify_credentials("grace@plymouth.ac.uk", "ISAD123!")
        .await;
    assert!(matches!(garbage, Err(AuthenticatorError::InvalidResponse(_))));
}

#[tokio::test]
async fn test_http_authenticator_unreachable() {
    // Bind then drop to get a port nothing listens on.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let result = client(format!("http://{addr}/users"))
        .verify_credentials("grace@plymouth.ac.uk", "ISAD123!")
        .await;
    assert!(matches!(result, Err(AuthenticatorError::Transport(_))));
}

// --- Mock ---

#[tokio::test]
async fn test_mock_authenticator() {
    let mock = MockAuthenticator::new().with_user("Tim@Plymouth.ac.uk", "COMP2001!");
    assert!(mock.verify_credentials("tim@plymouth.ac.uk", "COMP2001!").await.unwrap());
    assert!(!mock.verify_credentials("tim@plymouth.ac.uk", "comp2001!").await.unwrap());
    assert!(!mock.verify_credentials("nobody@plymouth.ac.uk", "COMP2001!").await.unwrap());

    let failing = MockAuthenticator::new_failing();
    assert!(matches!(
        failing.verify_credentials("tim@plymouth.ac.uk", "COMP2001!").await,
        Err(AuthenticatorError::Status(503))
    ));
}
