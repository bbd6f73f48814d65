// src/auth/tokens.rs
//! Refresh tokens and password-reset tokens.
//!
//! Both are random values given to the client once and stored only as a
//! SHA-256 digest. Each is single use: the consuming statement flips the
//! `revoked`/`used` flag and only one caller can observe the unflipped row.
//!
//! Spent and expired rows of a user are deleted whenever that user is issued a
//! new token of the same kind, so each user keeps only live tokens plus the
//! ones spent since their last issue.
use chrono::{DateTime, Duration, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info};

use super::crypto::{generate_token, hash_token};
use crate::error::{AppError, AppResult};
use crate::models::UserId;

pub async fn issue_refresh_token(pool: &SqlitePool, user_id: UserId, ttl: Duration) -> AppResult<String> {
    let mut tx = pool.begin().await?;
    let now = Utc::now();

    purge_spent_refresh_tokens(&mut tx, user_id, now).await?;
    let token = insert_refresh_token(&mut tx, user_id, now, ttl).await?;

    tx.commit().await?;

    debug!(user_id, "refresh token issued");
    Ok(token)
}

async fn insert_refresh_token(
    conn: &mut SqliteConnection,
    user_id: UserId,
    now: DateTime<Utc>,
    ttl: Duration,
) -> AppResult<String> {
    let token = generate_token();

    sqlx::query(
        "INSERT INTO refresh_tokens (user_id, token_hash, created_at, expires_at)
         VALUES (?, ?, ?, ?)",
    )
    .bind(user_id)
    .bind(hash_token(&token))
    .bind(now)
    .bind(now + ttl)
    .execute(conn)
    .await?;

    Ok(token)
}

// Timestamps are RFC 3339 text; julianday() compares them as instants.
async fn purge_spent_refresh_tokens(
    conn: &mut SqliteConnection,
    user_id: UserId,
    now: DateTime<Utc>,
) -> AppResult<()> {
    let purged = sqlx::query(
        "DELETE FROM refresh_tokens
         WHERE user_id = ? AND (revoked = TRUE OR julianday(expires_at) < julianday(?))",
    )
    .bind(user_id)
    .bind(now)
    .execute(conn)
    .await?
    .rows_affected();

    if purged > 0 {
        debug!(user_id, purged, "spent refresh tokens purged");
    }
    Ok(())
}

/// Spends `token` and returns its owner together with a fresh replacement.
pub async fn rotate_refresh_token(
    pool: &SqlitePool,
    token: &str,
    ttl: Duration,
) -> AppResult<(UserId, String)> {
    let mut tx = pool.begin().await?;

    let (user_id, expires_at) = sqlx::query_as::<_, (UserId, DateTime<Utc>)>(
        "UPDATE refresh_tokens SET revoked = TRUE
         WHERE token_hash = ? AND revoked = FALSE
         RETURNING user_id, expires_at",
    )
    .bind(hash_token(token))
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| AppError::InvalidToken("unknown or revoked refresh token".into()))?;

    if expires_at < Utc::now() {
        return Err(AppError::InvalidToken("refresh token expired".into()));
    }

    let now = Utc::now();
    purge_spent_refresh_tokens(&mut tx, user_id, now).await?;
    let replacement = insert_refresh_token(&mut tx, user_id, now, ttl).await?;

    tx.commit().await?;

    debug!(user_id, "refresh token rotated");
    Ok((user_id, replacement))
}

pub async fn revoke_refresh_token(pool: &SqlitePool, token: &str) -> AppResult<UserId> {
    let user_id = sqlx::query_scalar::<_, UserId>(
        "UPDATE refresh_tokens SET revoked = TRUE
         WHERE token_hash = ? AND revoked = FALSE
         RETURNING user_id",
    )
    .bind(hash_token(token))
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::InvalidToken("unknown or revoked refresh token".into()))?;

    info!(user_id, "refresh token revoked");
    Ok(user_id)
}

pub async fn issue_password_reset(pool: &SqlitePool, user_id: UserId, ttl: Duration) -> AppResult<String> {
    let token = generate_token();
    let now = Utc::now();
    let mut tx = pool.begin().await?;

    sqlx::query(
        "DELETE FROM password_resets
         WHERE user_id = ? AND (used = TRUE OR julianday(expires_at) < julianday(?))",
    )
    .bind(user_id)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    sqlx::query("INSERT INTO password_resets (user_id, token_hash, expires_at) VALUES (?, ?, ?)")
        .bind(user_id)
        .bind(hash_token(&token))
        .bind(now + ttl)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    info!(user_id, "password reset issued");
    Ok(token)
}

/// Marks the reset token used, stores the new password hash, and revokes every
/// refresh token of the user, all in one transaction.
pub async fn consume_password_reset(
    pool: &SqlitePool,
    token: &str,
    password_hash: &str,
) -> AppResult<UserId> {
    let mut tx = pool.begin().await?;

    let (user_id, expires_at) = sqlx::query_as::<_, (UserId, DateTime<Utc>)>(
        "UPDATE password_resets SET used = TRUE
         WHERE token_hash = ? AND used = FALSE
         RETURNING user_id, expires_at",
    )
    .bind(hash_token(token))
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| AppError::InvalidToken("unknown or used reset token".into()))?;

    if expires_at < Utc::now() {
        return Err(AppError::InvalidToken("reset token expired".into()));
    }

    sqlx::query("UPDATE users SET password_hash = ? WHERE id = ?")
        .bind(password_hash)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

    sqlx::query("UPDATE refresh_tokens SET revoked = TRUE WHERE user_id = ?")
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    info!(user_id, "password reset consumed");
    Ok(user_id)
}
