use std::{env, str::FromStr};

/// Endpoint of the university Authenticator API used to verify credentials.
pub const DEFAULT_AUTH_API_URL: &str = "https://web.socem.plymouth.ac.uk/COMP2001/auth/api/users";

const LOCAL_JWT_SECRET: &str = "trail-service-local-development-secret";

/// AppConfig
///
/// Immutable configuration loaded once at startup and shared through `AppState`.
/// Handlers and extractors pull it out of the state via `FromRef`.
#[derive(Clone, Debug)]
pub struct AppConfig {
    // Runtime environment marker. Controls the local `x-user-id` bypass and log format.
    pub env: Env,
    // ADO.NET style SQL Server connection string.
    pub db_url: String,
    pub db_max_connections: u32,
    // Address the HTTP listener binds to.
    pub bind_addr: String,
    // HS256 secret for issuing and validating session tokens.
    pub jwt_secret: String,
    pub token_ttl_hours: i64,
    // External Authenticator API endpoint and its per-call timeout.
    pub auth_api_url: String,
    pub auth_api_timeout_secs: u64,
}

/// Env
///
/// Runtime context. `Local` enables development conveniences, `Production`
/// demands every secret be supplied explicitly.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Env {
    Local,
    Production,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{var} has an invalid value: {value:?}")]
    Invalid { var: &'static str, value: String },
}

impl Default for AppConfig {
    /// default
    ///
    /// Non-secret values for test state scaffolding. Never reads the environment.
    fn default() -> Self {
        Self {
            env: Env::Local,
            db_url: "server=tcp:localhost,1433;database=TrailService;user=sa;password=test;TrustServerCertificate=true".to_string(),
            db_max_connections: 5,
            bind_addr: "0.0.0.0:5000".to_string(),
            jwt_secret: "super-secure-test-secret-value-local".to_string(),
            token_ttl_hours: 24,
            auth_api_url: DEFAULT_AUTH_API_URL.to_string(),
            auth_api_timeout_secs: 10,
        }
    }
}

impl AppConfig {
    /// load
    ///
    /// Reads the configuration from environment variables (call `dotenv` first).
    ///
    /// # Errors
    /// `ConfigError::Missing` when `DATABASE_URL` is absent, or when `JWT_SECRET`
    /// is absent in production. `ConfigError::Invalid` for unparseable numbers.
    pub fn load() -> Result<Self, ConfigError> {
        let env = match env::var("APP_ENV").as_deref() {
            Ok("production") => Env::Production,
            _ => Env::Local,
        };

        // The production secret is mandatory; local development falls back to a known value.
        let jwt_secret = match (env, env::var("JWT_SECRET")) {
            (_, Ok(secret)) if !secret.trim().is_empty() => secret,
            (Env::Production, _) => return Err(ConfigError::Missing("JWT_SECRET")),
            (Env::Local, _) => LOCAL_JWT_SECRET.to_string(),
        };

        let db_url = env::var("DATABASE_URL")
            .ok()
            .filter(|url| !url.trim().is_empty())
            .ok_or(ConfigError::Missing("DATABASE_URL"))?;

        Ok(Self {
            env,
            db_url,
            db_max_connections: parse_var("DB_MAX_CONNECTIONS", 5)?,
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:5000".to_string()),
            jwt_secret,
            token_ttl_hours: parse_var("TOKEN_TTL_HOURS", 24)?,
            auth_api_url: env::var("AUTH_API_URL")
                .unwrap_or_else(|_| DEFAULT_AUTH_API_URL.to_string()),
            auth_api_timeout_secs: parse_var("AUTH_API_TIMEOUT_SECS", 10)?,
        })
    }

    /// Session token lifetime in seconds.
    pub fn token_ttl_secs(&self) -> i64 {
        self.token_ttl_hours * 3600
    }
}

fn parse_var<T: FromStr>(var: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(var) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { var, value }),
        Err(_) => Ok(default),
    }
}
