// src/handlers/users.rs
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use crate::accounts;
use crate::error::AppResult;
use crate::identity::{Caller, ClientContext};
use crate::models::{NewUser, User, UserId, UserPatch};
use crate::policy::{authorize, Action};
use crate::state::SharedState;
use crate::throttle::Scope;

/// All accounts (admin only)
pub async fn list_users(State(state): State<SharedState>, caller: Caller) -> AppResult<Json<Vec<User>>> {
    authorize(&caller, Action::ListAccounts, None)?;
    Ok(Json(accounts::list_users(&state.pool).await?))
}

/// Register an account; limited per origin
pub async fn create_user(
    State(state): State<SharedState>,
    caller: Caller,
    client: ClientContext,
    Json(new): Json<NewUser>,
) -> AppResult<(StatusCode, Json<User>)> {
    authorize(&caller, Action::CreateAccount, None)?;
    state
        .limiter
        .check(Scope::Signup, client.throttle_key(), state.config.rates.signup)?;

    let user = accounts::create_user(&state.pool, &state.password_policy(), new).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

pub async fn get_user(
    State(state): State<SharedState>,
    caller: Caller,
    Path(id): Path<UserId>,
) -> AppResult<Json<User>> {
    authorize(&caller, Action::RetrieveAccount, Some(id))?;
    Ok(Json(accounts::get_user(&state.pool, id).await?))
}

/// Used for both PUT and PATCH; omitted fields are left as they are
pub async fn update_user(
    State(state): State<SharedState>,
    caller: Caller,
    Path(id): Path<UserId>,
    Json(patch): Json<UserPatch>,
) -> AppResult<Json<User>> {
    authorize(&caller, Action::UpdateAccount, Some(id))?;

    let user = accounts::update_user(
        &state.pool,
        &state.password_policy(),
        id,
        patch,
        caller.is_admin(),
    )
    .await?;
    Ok(Json(user))
}

pub async fn delete_user(
    State(state): State<SharedState>,
    caller: Caller,
    Path(id): Path<UserId>,
) -> AppResult<StatusCode> {
    authorize(&caller, Action::DeleteAccount, Some(id))?;
    accounts::delete_user(&state.pool, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
