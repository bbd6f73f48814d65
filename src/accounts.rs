// src/accounts.rs
use chrono::Utc;
use sqlx::SqlitePool;
use tracing::info;

use crate::auth::crypto::{hash_password_off_thread, PasswordPolicy};
use crate::config::AdminSeed;
use crate::error::{AppError, AppResult};
use crate::models::{NewUser, User, UserId, UserPatch};

const MAX_USERNAME_LEN: usize = 150;

fn validate_username(username: &str) -> AppResult<String> {
    let username = username.trim();

    if username.is_empty() {
        return Err(AppError::validation("Username may not be blank"));
    }
    if username.chars().count() > MAX_USERNAME_LEN {
        return Err(AppError::validation(format!(
            "Username may not exceed {MAX_USERNAME_LEN} characters"
        )));
    }
    if username.chars().any(char::is_whitespace) {
        return Err(AppError::validation("Username may not contain whitespace"));
    }

    Ok(username.to_string())
}

fn username_taken(err: sqlx::Error) -> AppError {
    match AppError::from(err) {
        AppError::Conflict(_) => AppError::validation("A user with that username already exists"),
        other => other,
    }
}

pub async fn create_user(pool: &SqlitePool, policy: &PasswordPolicy, new: NewUser) -> AppResult<User> {
    create_account(pool, policy, new, false).await
}

/// Also used to seed the administrator account at startup.
pub async fn create_account(
    pool: &SqlitePool,
    policy: &PasswordPolicy,
    new: NewUser,
    is_admin: bool,
) -> AppResult<User> {
    let username = validate_username(&new.username)?;
    policy.validate(&new.password)?;
    let password_hash = hash_password_off_thread(new.password).await?;

    let user = sqlx::query_as::<_, User>(
        "INSERT INTO users (username, email, first_name, last_name, password_hash, is_admin, date_joined)
         VALUES (?, ?, ?, ?, ?, ?, ?)
         RETURNING *",
    )
    .bind(&username)
    .bind(new.email.trim())
    .bind(new.first_name.trim())
    .bind(new.last_name.trim())
    .bind(&password_hash)
    .bind(is_admin)
    .bind(Utc::now())
    .fetch_one(pool)
    .await
    .map_err(username_taken)?;

    info!(user_id = user.id, is_admin, "user created");
    Ok(user)
}

/// Creates the configured administrator unless the username is already taken.
pub async fn ensure_admin(pool: &SqlitePool, policy: &PasswordPolicy, seed: &AdminSeed) -> AppResult<()> {
    if find_by_username(pool, &seed.username).await?.is_some() {
        return Ok(());
    }

    let new = NewUser {
        username: seed.username.clone(),
        email: seed.email.clone(),
        password: seed.password.clone(),
        first_name: String::new(),
        last_name: String::new(),
    };
    create_account(pool, policy, new, true).await?;
    Ok(())
}

pub async fn list_users(pool: &SqlitePool) -> AppResult<Vec<User>> {
    let users = sqlx::query_as::<_, User>("SELECT * FROM users ORDER BY id")
        .fetch_all(pool)
        .await?;
    Ok(users)
}

pub async fn find_user(pool: &SqlitePool, id: UserId) -> AppResult<Option<User>> {
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(user)
}

pub async fn get_user(pool: &SqlitePool, id: UserId) -> AppResult<User> {
    find_user(pool, id).await?.ok_or(AppError::NotFound("User"))
}

pub async fn find_by_username(pool: &SqlitePool, username: &str) -> AppResult<Option<User>> {
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE username = ?")
        .bind(username.trim())
        .fetch_optional(pool)
        .await?;
    Ok(user)
}

pub async fn find_by_email(pool: &SqlitePool, email: &str) -> AppResult<Option<User>> {
    let email = email.trim();
    if email.is_empty() {
        return Ok(None);
    }

    let user = sqlx::query_as::<_, User>(
        "SELECT * FROM users WHERE lower(email) = lower(?) ORDER BY id LIMIT 1",
    )
    .bind(email)
    .fetch_optional(pool)
    .await?;
    Ok(user)
}

/// Applies the supplied fields. `allow_admin_flag` is true only when an
/// administrator is editing; anyone else touching `is_admin` is refused.
pub async fn update_user(
    pool: &SqlitePool,
    policy: &PasswordPolicy,
    id: UserId,
    patch: UserPatch,
    allow_admin_flag: bool,
) -> AppResult<User> {
    if patch.is_admin.is_some() && !allow_admin_flag {
        return Err(AppError::Forbidden);
    }

    let username = patch.username.as_deref().map(validate_username).transpose()?;
    let password_hash = match patch.password.as_deref() {
        Some(password) => {
            policy.validate(password)?;
            Some(hash_password_off_thread(password.to_string()).await?)
        }
        None => None,
    };

    let mut tx = pool.begin().await?;

    let user = sqlx::query_as::<_, User>(
        "UPDATE users SET
             username      = COALESCE(?, username),
             email         = COALESCE(?, email),
             first_name    = COALESCE(?, first_name),
             last_name     = COALESCE(?, last_name),
             password_hash = COALESCE(?, password_hash),
             is_admin      = COALESCE(?, is_admin)
         WHERE id = ?
         RETURNING *",
    )
    .bind(username)
    .bind(patch.email.as_deref().map(str::trim))
    .bind(patch.first_name.as_deref().map(str::trim))
    .bind(patch.last_name.as_deref().map(str::trim))
    .bind(&password_hash)
    .bind(patch.is_admin)
    .bind(id)
    .fetch_optional(&mut *tx)
    .await
    .map_err(username_taken)?
    .ok_or(AppError::NotFound("User"))?;

    // A new password invalidates every outstanding refresh token.
    if password_hash.is_some() {
        sqlx::query("UPDATE refresh_tokens SET revoked = TRUE WHERE user_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;

    info!(user_id = id, password_changed = password_hash.is_some(), "user updated");
    Ok(user)
}

pub async fn delete_user(pool: &SqlitePool, id: UserId) -> AppResult<()> {
    let result = sqlx::query("DELETE FROM users WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("User"));
    }

    info!(user_id = id, "user deleted");
    Ok(())
}
