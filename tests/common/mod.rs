//! Shared fixtures: a fresh SQLite file per test and helpers for seeding
//! accounts and polls.
#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{header, request::Builder, Request, Response},
    Router,
};
use chrono::{Duration, Utc};
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use polling_service::{
    accounts,
    auth::{self, crypto::PasswordPolicy, mail::RecordingMailer},
    config::Config,
    db::create_pool,
    models::{NewUser, OptionInput, PollDetail, PollInput, User},
    poll,
    routes::create_routes,
    state::{AppState, SharedState},
};

pub const PASSWORD: &str = "correct horse battery";

pub struct TestApp {
    pub state: SharedState,
    pub mailer: Arc<RecordingMailer>,
    // Keeps the database file alive for the duration of the test.
    _dir: TempDir,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config(adjust: impl FnOnce(&mut Config)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("polls.db").display());

        let mut config = Config::for_tests(&url);
        adjust(&mut config);
        let pool = create_pool(&config.database_url, config.max_connections)
            .await
            .unwrap();
        let mailer = Arc::new(RecordingMailer::new());
        let state = AppState::with_parts(config, pool, mailer.clone());

        Self {
            state,
            mailer,
            _dir: dir,
        }
    }

    pub fn pool(&self) -> &sqlx::SqlitePool {
        &self.state.pool
    }

    pub fn router(&self) -> Router {
        create_routes(self.state.clone())
    }

    pub async fn user(&self, username: &str) -> User {
        self.account(username, false).await
    }

    pub async fn admin(&self, username: &str) -> User {
        self.account(username, true).await
    }

    async fn account(&self, username: &str, is_admin: bool) -> User {
        let new = NewUser {
            username: username.to_string(),
            password: PASSWORD.to_string(),
            email: format!("{username}@example.com"),
            first_name: String::new(),
            last_name: String::new(),
        };
        accounts::create_account(self.pool(), &PasswordPolicy { min_length: 8 }, new, is_admin)
            .await
            .unwrap()
    }

    pub async fn bearer(&self, user: &User) -> String {
        let tokens = auth::issue_tokens(&self.state, user).await.unwrap();
        format!("Bearer {}", tokens.access)
    }

    pub async fn poll(&self, creator: &User, options: &[&str]) -> PollDetail {
        poll::create_poll(self.pool(), creator.id, poll_input("Lunch", options))
            .await
            .unwrap()
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router().oneshot(request).await.unwrap()
    }
}

pub fn poll_input(title: &str, options: &[&str]) -> PollInput {
    PollInput {
        title: title.to_string(),
        description: String::new(),
        expire_date: Utc::now() + Duration::days(1),
        options: options.iter().map(|text| OptionInput::new(text)).collect(),
    }
}

pub fn request(method: &str, uri: &str) -> Builder {
    Request::builder().method(method).uri(uri)
}

pub fn with_json(builder: Builder, body: &Value) -> Request<Body> {
    builder
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn empty(builder: Builder) -> Request<Body> {
    builder.body(Body::empty()).unwrap()
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(&bytes).unwrap()
}
