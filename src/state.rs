// src/state.rs
use std::sync::Arc;

use sqlx::SqlitePool;

use crate::auth::{
    crypto::PasswordPolicy,
    jwt::JwtManager,
    mail::{LogMailer, Mailer},
};
use crate::config::Config;
use crate::db::create_pool;
use crate::error::AppResult;
use crate::throttle::RateLimiter;

pub type SharedState = Arc<AppState>;

pub struct AppState {
    pub config: Config,
    pub pool: SqlitePool,
    pub jwt: JwtManager,
    pub limiter: RateLimiter,
    pub mailer: Arc<dyn Mailer>,
}

impl AppState {
    pub async fn new(config: Config) -> AppResult<SharedState> {
        let pool = create_pool(&config.database_url, config.max_connections).await?;
        Ok(Self::with_parts(config, pool, Arc::new(LogMailer)))
    }

    pub fn with_parts(config: Config, pool: SqlitePool, mailer: Arc<dyn Mailer>) -> SharedState {
        let jwt = JwtManager::new(&config.jwt_secret, &config.jwt_issuer, config.access_token_ttl);

        Arc::new(Self {
            config,
            pool,
            jwt,
            limiter: RateLimiter::new(),
            mailer,
        })
    }

    pub fn password_policy(&self) -> PasswordPolicy {
        PasswordPolicy {
            min_length: self.config.password_min_length,
        }
    }
}
