// src/config.rs
use std::{env, fmt::Display, str::FromStr};

use chrono::Duration;
use tracing::{info, warn};

use crate::error::{AppError, AppResult};
use crate::throttle::Rate;

const DEV_JWT_SECRET: &str = "dev-only-secret-change-me";

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub max_connections: u32,
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
    pub jwt_secret: String,
    pub jwt_issuer: String,
    pub access_token_ttl: Duration,
    pub refresh_token_ttl: Duration,
    pub password_reset_ttl: Duration,
    pub password_min_length: usize,
    pub public_base_url: String,
    pub fingerprint_salt: String,
    pub trust_forwarded_for: bool,
    pub rates: Rates,
    pub bootstrap_admin: Option<AdminSeed>,
}

/// Administrator created at startup when no account with that username exists.
#[derive(Debug, Clone)]
pub struct AdminSeed {
    pub username: String,
    pub email: String,
    pub password: String,
}

/// Request budgets per throttle scope.
#[derive(Debug, Clone)]
pub struct Rates {
    pub anon: Rate,
    pub user: Rate,
    pub admin: Rate,
    pub poll_creation: Rate,
    pub signup: Rate,
}

impl Config {
    pub fn load() -> AppResult<Self> {
        let jwt_secret = match var("JWT_SECRET") {
            Some(secret) if !secret.trim().is_empty() => secret,
            _ if cfg!(debug_assertions) => {
                warn!("JWT_SECRET not set, using development secret");
                DEV_JWT_SECRET.to_string()
            }
            _ => return Err(AppError::Config("JWT_SECRET must be set".into())),
        };

        Ok(Self {
            database_url: try_load("DATABASE_URL", "sqlite://polls.db")?,
            max_connections: try_load("DATABASE_MAX_CONNECTIONS", "5")?,
            host: try_load("HOST", "0.0.0.0")?,
            port: try_load("PORT", "3030")?,
            cors_origins: var("CORS_ORIGINS")
                .map(|origins| {
                    origins
                        .split(',')
                        .map(str::trim)
                        .filter(|origin| !origin.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
            jwt_secret,
            jwt_issuer: try_load("JWT_ISSUER", "polling-service")?,
            access_token_ttl: Duration::minutes(try_load("ACCESS_TOKEN_TTL_MINUTES", "15")?),
            refresh_token_ttl: Duration::days(try_load("REFRESH_TOKEN_TTL_DAYS", "7")?),
            password_reset_ttl: Duration::minutes(try_load("PASSWORD_RESET_TTL_MINUTES", "60")?),
            password_min_length: try_load("PASSWORD_MIN_LENGTH", "8")?,
            public_base_url: try_load("PUBLIC_BASE_URL", "http://localhost:3030")?,
            fingerprint_salt: try_load("FINGERPRINT_SALT", "polling-service")?,
            trust_forwarded_for: try_load("TRUST_FORWARDED_FOR", "false")?,
            rates: Rates {
                anon: try_load("THROTTLE_ANON", "100/hour")?,
                user: try_load("THROTTLE_USER", "1000/day")?,
                admin: try_load("THROTTLE_ADMIN", "10000/day")?,
                poll_creation: try_load("THROTTLE_POLL_CREATION", "20/day")?,
                signup: try_load("THROTTLE_SIGNUP", "5/hour")?,
            },
            bootstrap_admin: match (var("ADMIN_USERNAME"), var("ADMIN_PASSWORD")) {
                (Some(username), Some(password)) => Some(AdminSeed {
                    username,
                    email: var("ADMIN_EMAIL").unwrap_or_default(),
                    password,
                }),
                _ => None,
            },
        })
    }

    /// Fixed settings for tests: fast expiry-free tokens and generous rates.
    pub fn for_tests(database_url: &str) -> Self {
        let generous = Rate::new(10_000, std::time::Duration::from_secs(60));

        Self {
            database_url: database_url.to_string(),
            max_connections: 5,
            host: "127.0.0.1".to_string(),
            port: 0,
            cors_origins: Vec::new(),
            jwt_secret: "test-secret".to_string(),
            jwt_issuer: "polling-service-test".to_string(),
            access_token_ttl: Duration::minutes(15),
            refresh_token_ttl: Duration::days(1),
            password_reset_ttl: Duration::minutes(30),
            password_min_length: 8,
            public_base_url: "http://localhost".to_string(),
            fingerprint_salt: "test-salt".to_string(),
            trust_forwarded_for: true,
            rates: Rates {
                anon: generous,
                user: generous,
                admin: generous,
                poll_creation: generous,
                signup: generous,
            },
            bootstrap_admin: None,
        }
    }

    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn var(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn try_load<T: FromStr>(key: &str, default: &str) -> AppResult<T>
where
    T::Err: Display,
{
    var(key)
        .unwrap_or_else(|| {
            info!("{key} not set, using default: {default}");
            default.to_string()
        })
        .parse()
        .map_err(|e| {
            warn!("Invalid {key} value: {e}");
            AppError::Config(format!("invalid {key}: {e}"))
        })
}
