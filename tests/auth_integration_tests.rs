use axum::{
    extract::FromRequestParts,
    http::{Method, Request, StatusCode, Uri, request::Parts},
};
use jsonwebtoken::{EncodingKey, Header, encode};
use std::{sync::Arc, time::SystemTime};
use trail_service::{
    AppConfig, AppState, InMemoryRepository, MockAuthenticator,
    auth::{AuthUser, Claims, DEV_USER_HEADER, MaybeAuthUser, decode_token, issue_token},
    config::Env,
    error::ApiError,
    models::{Role, User},
    repository::RepositoryState,
};

// --- Helper Functions ---

const TEST_JWT_SECRET: &str = "test-secret-value-1234567890";

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64
}

/// Signs a token for `user_id` expiring `exp_offset` seconds from now (negative = already expired).
fn create_token(user_id: i32, email: &str, exp_offset: i64, secret: &str) -> String {
    let now = now_secs();
    let claims = Claims {
        sub: email.to_string(),
        user_id,
        email: email.to_string(),
        iat: now as usize,
        exp: (now + exp_offset) as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .unwrap()
}

struct Fixture {
    state: AppState,
    admin: User,
    walker: User,
}

fn fixture(env: Env) -> Fixture {
    let repo = InMemoryRepository::new();
    let admin = repo.seed_user("Grace Hopper", "grace@plymouth.ac.uk", Role::Admin);
    let walker = repo.seed_user("Ada Lovelace", "ada@plymouth.ac.uk", Role::User);

    let config = AppConfig {
        env,
        jwt_secret: TEST_JWT_SECRET.to_string(),
        ..AppConfig::default()
    };
    let state = AppState::new(
        Arc::new(repo) as RepositoryState,
        Arc::new(MockAuthenticator::new()),
        config,
    );
    Fixture { state, admin, walker }
}

/// Helper to get the mutable Parts struct from a generated Request
fn request_parts(headers: &[(&str, String)]) -> Parts {
    let mut builder = Request::builder()
        .method(Method::GET)
        .uri("/api/v1/users/me".parse::<Uri>().unwrap());
    for (name, value) in headers {
        builder = builder.header(*name, value);
    }
    let (parts, _) = builder.body(axum::body::Body::empty()).unwrap().into_parts();
    parts
}

fn bearer(token: &str) -> (&'static str, String) {
    ("authorization", format!("Bearer {token}"))
}

// --- Token issuing ---

#[test]
fn test_issued_token_round_trips_through_decode() {
    let f = fixture(Env::Production);
    let token = issue_token(&f.state.config, &f.walker).unwrap();
    let claims = decode_token(&f.state.config, &token).unwrap();

    assert_eq!(claims.user_id, f.walker.user_id);
    assert_eq!(claims.sub, "ada@plymouth.ac.uk");
    assert_eq!(
        claims.exp as i64 - claims.iat as i64,
        f.state.config.token_ttl_secs()
    );
}

// --- AuthUser extractor ---

#[tokio::test]
async fn test_auth_success_with_valid_jwt() {
    let f = fixture(Env::Production);
    let token = create_token(f.walker.user_id, &f.walker.email, 3600, TEST_JWT_SECRET);

    let mut parts = request_parts(&[bearer(&token)]);
    let user = AuthUser::from_request_parts(&mut parts, &f.state).await.unwrap();

    assert_eq!(user.id, f.walker.user_id);
    assert_eq!(user.role, Role::User);
    assert!(!user.is_admin());
    // Cached for later extractors in the same request.
    assert_eq!(parts.extensions.get::<AuthUser>(), Some(&user));
}

#[tokio::test]
async fn test_role_comes_from_the_database() {
    let f = fixture(Env::Production);
    let token = create_token(f.admin.user_id, &f.admin.email, 3600, TEST_JWT_SECRET);

    let mut parts = request_parts(&[bearer(&token)]);
    let user = AuthUser::from_request_parts(&mut parts, &f.state).await.unwrap();

    assert!(user.is_admin());
    assert!(user.require_admin().is_ok());
    assert!(user.can_manage(f.walker.user_id));
}

#[tokio::test]
async fn test_auth_failure_with_missing_header() {
    let f = fixture(Env::Production);
    let mut parts = request_parts(&[]);

    let err = AuthUser::from_request_parts(&mut parts, &f.state).await.unwrap_err();
    assert!(matches!(err, ApiError::Unauthenticated(_)));
    assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_auth_failure_with_non_bearer_scheme() {
    let f = fixture(Env::Production);
    let mut parts = request_parts(&[("authorization", "Basic Z3JhY2U6cHc=".to_string())]);

    let err = AuthUser::from_request_parts(&mut parts, &f.state).await.unwrap_err();
    assert!(matches!(err, ApiError::Unauthenticated(_)));
}

#[tokio::test]
async fn test_auth_failure_with_expired_token() {
    let f = fixture(Env::Production);
    let token = create_token(f.walker.user_id, &f.walker.email, -3600, TEST_JWT_SECRET);

    let mut parts = request_parts(&[bearer(&token)]);
    let err = AuthUser::from_request_parts(&mut parts, &f.state).await.unwrap_err();

    match err {
        ApiError::InvalidToken(message) => assert!(message.contains("expired")),
        other => panic!("expected InvalidToken, got {other:?}"),
    }
}

#[tokio::test]
async fn test_auth_failure_with_wrong_signature() {
    let f = fixture(Env::Production);
    let token = create_token(f.walker.user_id, &f.walker.email, 3600, "another-secret-entirely");

    let mut parts = request_parts(&[bearer(&token)]);
    let err = AuthUser::from_request_parts(&mut parts, &f.state).await.unwrap_err();
    assert!(matches!(err, ApiError::InvalidToken(_)));
    assert_eq!(err.error_code(), "INVALID_TOKEN");
}

#[tokio::test]
async fn test_auth_failure_when_token_user_was_removed() {
    let f = fixture(Env::Production);
    let token = create_token(9_999, "ghost@plymouth.ac.uk", 3600, TEST_JWT_SECRET);

    let mut parts = request_parts(&[bearer(&token)]);
    let err = AuthUser::from_request_parts(&mut parts, &f.state).await.unwrap_err();
    assert!(matches!(err, ApiError::InvalidToken(_)));
}

// --- Local development bypass ---

#[tokio::test]
async fn test_dev_header_accepted_in_local_mode() {
    let f = fixture(Env::Local);
    let mut parts = request_parts(&[(DEV_USER_HEADER, f.admin.user_id.to_string())]);

    let user = AuthUser::from_request_parts(&mut parts, &f.state).await.unwrap();
    assert_eq!(user.id, f.admin.user_id);
    assert!(user.is_admin());
}

#[tokio::test]
async fn test_dev_header_ignored_in_production() {
    let f = fixture(Env::Production);
    let mut parts = request_parts(&[(DEV_USER_HEADER, f.admin.user_id.to_string())]);

    let err = AuthUser::from_request_parts(&mut parts, &f.state).await.unwrap_err();
    assert!(matches!(err, ApiError::Unauthenticated(_)));
}

#[tokio::test]
async fn test_dev_header_for_unknown_user_falls_back_to_token_flow() {
    let f = fixture(Env::Local);
    let mut parts = request_parts(&[(DEV_USER_HEADER, "424242".to_string())]);

    let err = AuthUser::from_request_parts(&mut parts, &f.state).await.unwrap_err();
    assert!(matches!(err, ApiError::Unauthenticated(_)));
}

// --- Optional identity ---

#[tokio::test]
async fn test_maybe_auth_user_is_anonymous_without_credentials() {
    let f = fixture(Env::Production);
    let mut parts = request_parts(&[]);

    let MaybeAuthUser(user) = MaybeAuthUser::from_request_parts(&mut parts, &f.state)
        .await
        .unwrap();
    assert!(user.is_none());
}

#[tokio::test]
async fn test_maybe_auth_user_treats_bad_token_as_anonymous() {
    let f = fixture(Env::Production);
    let mut parts = request_parts(&[bearer("not.a.jwt")]);

    let MaybeAuthUser(user) = MaybeAuthUser::from_request_parts(&mut parts, &f.state)
        .await
        .unwrap();
    assert!(user.is_none());
}

#[tokio::test]
async fn test_maybe_auth_user_resolves_valid_token() {
    let f = fixture(Env::Production);
    let token = create_token(f.walker.user_id, &f.walker.email, 3600, TEST_JWT_SECRET);
    let mut parts = request_parts(&[bearer(&token)]);

    let MaybeAuthUser(user) = MaybeAuthUser::from_request_parts(&mut parts, &f.state)
        .await
        .unwrap();
    assert_eq!(user.map(|u| u.id), Some(f.walker.user_id));
}

// --- Authorisation helpers ---

#[test]
fn test_ownership_rules() {
    let owner = AuthUser {
        id: 3,
        email: "ada@plymouth.ac.uk".to_string(),
        role: Role::User,
    };
    assert!(owner.can_manage(3));
    assert!(!owner.can_manage(4));

    let err = owner.require_admin().unwrap_err();
    assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
}
