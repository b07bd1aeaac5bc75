use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use serde_json::Value;

/// AuthenticatorError
///
/// Failures talking to the external Authenticator API. A rejected login is not an
/// error; it is `Ok(false)`.
#[derive(Debug, thiserror::Error)]
pub enum AuthenticatorError {
    #[error("authenticator unreachable: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("authenticator responded with status {0}")]
    Status(u16),

    #[error("authenticator returned an unexpected body: {0}")]
    InvalidResponse(String),
}

// 1. Authenticator Contract
/// Authenticator
///
/// Verifies an e-mail/password pair against the identity provider. Called once
/// per login or registration; there is no caching and no retry.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn verify_credentials(&self, email: &str, password: &str) -> Result<bool, AuthenticatorError>;
}

// 2. The Real Implementation
/// HttpAuthenticator
///
/// POSTs `{"email", "password"}` to the Authenticator API. A valid pair is
/// answered with the JSON array `["Verified", "True"]`.
#[derive(Clone)]
pub struct HttpAuthenticator {
    client: reqwest::Client,
    url: String,
}

impl HttpAuthenticator {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, AuthenticatorError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

/// Interprets the Authenticator API's verdict body.
pub fn parse_verdict(body: &Value) -> Result<bool, AuthenticatorError> {
    match body.as_array().map(Vec::as_slice) {
        Some([first, second, ..]) => Ok(first.as_str() == Some("Verified") && second.as_str() == Some("True")),
        _ => Err(AuthenticatorError::InvalidResponse(body.to_string())),
    }
}

#[async_trait]
impl Authenticator for HttpAuthenticator {
    async fn verify_credentials(&self, email: &str, password: &str) -> Result<bool, AuthenticatorError> {
        let response = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({ "email": email, "password": password }))
            .send()
            .await?;

        let status = response.status();
        if status.is_server_error() {
            return Err(AuthenticatorError::Status(status.as_u16()));
        }
        if !status.is_success() {
            // 4xx: the provider refused these credentials.
            tracing::debug!("Authenticator rejected credentials with {}", status);
            return Ok(false);
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| AuthenticatorError::InvalidResponse(e.to_string()))?;
        parse_verdict(&body)
    }
}

// 3. The Mock Implementation (For Tests)
/// MockAuthenticator
///
/// Accepts exactly the credential pairs registered with `with_user`.
#[derive(Clone, Default)]
pub struct MockAuthenticator {
    accepted: HashMap<String, String>,
    /// When true, every call fails as if the provider were down.
    pub should_fail: bool,
}

impl MockAuthenticator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_failing() -> Self {
        Self {
            should_fail: true,
            ..Self::default()
        }
    }

    pub fn with_user(mut self, email: &str, password: &str) -> Self {
        self.accepted.insert(email.to_lowercase(), password.to_string());
        self
    }
}

#[async_trait]
impl Authenticator for MockAuthenticator {
    async fn verify_credentials(&self, email: &str, password: &str) -> Result<bool, AuthenticatorError> {
        if self.should_fail {
            return Err(AuthenticatorError::Status(503));
        }
        Ok(self
            .accepted
            .get(&email.to_lowercase())
            .is_some_and(|expected| expected == password))
    }
}

/// AuthenticatorState
///
/// Shared handle held in `AppState`.
pub type AuthenticatorState = Arc<dyn Authenticator>;
