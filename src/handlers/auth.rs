// src/handlers/auth.rs
use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use serde_json::{json, Value};

use crate::accounts;
use crate::auth::{
    self, ForgotPasswordRequest, LoginRequest, RefreshRequest, ResetPasswordRequest, TokenPair,
};
use crate::error::AppResult;
use crate::identity::{Caller, ClientContext};
use crate::models::{NewUser, User};
use crate::policy::{authorize, Action};
use crate::state::SharedState;
use crate::throttle::Scope;

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub user: User,
    #[serde(flatten)]
    pub tokens: TokenPair,
}

/// Register and log in with one request
pub async fn signup(
    State(state): State<SharedState>,
    caller: Caller,
    client: ClientContext,
    Json(new): Json<NewUser>,
) -> AppResult<(StatusCode, Json<SessionResponse>)> {
    authorize(&caller, Action::CreateAccount, None)?;
    state
        .limiter
        .check(Scope::Signup, client.throttle_key(), state.config.rates.signup)?;

    let user = accounts::create_user(&state.pool, &state.password_policy(), new).await?;
    let tokens = auth::issue_tokens(&state, &user).await?;

    Ok((StatusCode::CREATED, Json(SessionResponse { user, tokens })))
}

pub async fn login(
    State(state): State<SharedState>,
    Json(request): Json<LoginRequest>,
) -> AppResult<Json<SessionResponse>> {
    let (user, tokens) = auth::login(&state, request).await?;
    Ok(Json(SessionResponse { user, tokens }))
}

/// Trade a refresh token for a new access/refresh pair
pub async fn refresh(
    State(state): State<SharedState>,
    Json(request): Json<RefreshRequest>,
) -> AppResult<Json<TokenPair>> {
    Ok(Json(auth::refresh(&state, request).await?))
}

pub async fn logout(
    State(state): State<SharedState>,
    Json(request): Json<RefreshRequest>,
) -> AppResult<StatusCode> {
    auth::logout(&state, request).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn forgot_password(
    State(state): State<SharedState>,
    Json(request): Json<ForgotPasswordRequest>,
) -> AppResult<Json<Value>> {
    auth::forgot_password(&state, request).await?;
    Ok(Json(json!({
        "status": "If the address is registered, password reset instructions have been sent"
    })))
}

pub async fn reset_password(
    State(state): State<SharedState>,
    Json(request): Json<ResetPasswordRequest>,
) -> AppResult<Json<Value>> {
    auth::reset_password(&state, request).await?;
    Ok(Json(json!({ "status": "Password has been reset" })))
}
