// src/auth/mod.rs
//! Account sessions: login, token refresh, logout and password recovery.
pub mod crypto;
pub mod jwt;
pub mod mail;
pub mod tokens;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::accounts;
use crate::error::{AppError, AppResult};
use crate::models::User;
use crate::state::AppState;

use crypto::{dummy_password_hash, hash_password_off_thread, verify_password_off_thread};
use mail::OutgoingMail;

#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
    pub token_type: &'static str,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh: String,
}

#[derive(Debug, Deserialize)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct ResetPasswordRequest {
    pub token: String,
    pub password: String,
}

pub async fn issue_tokens(state: &AppState, user: &User) -> AppResult<TokenPair> {
    let (access, expires_at) = state.jwt.issue(user)?;
    let refresh =
        tokens::issue_refresh_token(&state.pool, user.id, state.config.refresh_token_ttl).await?;

    Ok(TokenPair {
        access,
        refresh,
        token_type: "Bearer",
        expires_at,
    })
}

pub async fn login(state: &AppState, request: LoginRequest) -> AppResult<(User, TokenPair)> {
    let user = accounts::find_by_username(&state.pool, &request.username).await?;

    // Unknown users are verified against a dummy hash so both failures take
    // as long and give the same answer.
    let stored = user
        .as_ref()
        .map_or_else(|| dummy_password_hash().to_string(), |user| user.password_hash.clone());
    let verified = verify_password_off_thread(request.password, stored).await?;

    let user = match user {
        Some(user) if verified => user,
        _ => {
            warn!("failed login attempt");
            return Err(AppError::InvalidCredentials);
        }
    };

    let tokens = issue_tokens(state, &user).await?;
    info!(user_id = user.id, "user logged in");
    Ok((user, tokens))
}

pub async fn refresh(state: &AppState, request: RefreshRequest) -> AppResult<TokenPair> {
    let (user_id, refresh) =
        tokens::rotate_refresh_token(&state.pool, &request.refresh, state.config.refresh_token_ttl)
            .await?;

    let user = accounts::find_user(&state.pool, user_id)
        .await?
        .ok_or_else(|| AppError::InvalidToken("user no longer exists".into()))?;
    let (access, expires_at) = state.jwt.issue(&user)?;

    Ok(TokenPair {
        access,
        refresh,
        token_type: "Bearer",
        expires_at,
    })
}

pub async fn logout(state: &AppState, request: RefreshRequest) -> AppResult<()> {
    tokens::revoke_refresh_token(&state.pool, &request.refresh).await?;
    Ok(())
}

/// Succeeds whether or not the address belongs to an account, so the answer
/// cannot be used to discover registered emails.
pub async fn forgot_password(state: &AppState, request: ForgotPasswordRequest) -> AppResult<()> {
    let Some(user) = accounts::find_by_email(&state.pool, &request.email).await? else {
        info!("password reset requested for unknown address");
        return Ok(());
    };

    let ttl = state.config.password_reset_ttl;
    let token = tokens::issue_password_reset(&state.pool, user.id, ttl).await?;

    let mail = OutgoingMail::password_reset(
        &user.email,
        &state.config.public_base_url,
        &token,
        ttl.num_minutes(),
    );
    state.mailer.send(&mail)?;

    Ok(())
}

pub async fn reset_password(state: &AppState, request: ResetPasswordRequest) -> AppResult<()> {
    state.password_policy().validate(&request.password)?;
    let password_hash = hash_password_off_thread(request.password).await?;

    tokens::consume_password_reset(&state.pool, &request.token, &password_hash).await?;
    Ok(())
}
