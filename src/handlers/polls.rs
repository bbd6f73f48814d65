// src/handlers/polls.rs
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;

use crate::error::{AppError, AppResult};
use crate::identity::{Caller, ClientContext, VoterContext};
use crate::models::{PollDetail, PollId, PollInput, PollPatch, PollQuery, PollResults, VoteRequest};
use crate::policy::{authorize, Action};
use crate::state::SharedState;
use crate::throttle::Scope;
use crate::{poll, results, vote};

/// List polls, optionally filtered by title, creator and whether still open
pub async fn list_polls(
    State(state): State<SharedState>,
    caller: Caller,
    Query(query): Query<PollQuery>,
) -> AppResult<Json<Vec<PollDetail>>> {
    authorize(&caller, Action::ListPolls, None)?;
    let polls = poll::list_polls(&state.pool, &query, Utc::now()).await?;
    Ok(Json(polls))
}

/// Create a poll with its options
pub async fn create_poll(
    State(state): State<SharedState>,
    caller: Caller,
    Json(input): Json<PollInput>,
) -> AppResult<(StatusCode, Json<PollDetail>)> {
    authorize(&caller, Action::CreatePoll, None)?;
    let creator = caller.require_user()?;

    state
        .limiter
        .check(Scope::PollCreation, &creator.to_string(), state.config.rates.poll_creation)?;

    let created = poll::create_poll(&state.pool, creator, input).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn get_poll(
    State(state): State<SharedState>,
    caller: Caller,
    Path(id): Path<PollId>,
) -> AppResult<Json<PollDetail>> {
    authorize(&caller, Action::RetrievePoll, None)?;
    Ok(Json(poll::get_poll(&state.pool, id).await?))
}

async fn edit(state: &SharedState, caller: &Caller, id: PollId, patch: PollPatch) -> AppResult<PollDetail> {
    let existing = poll::find_poll(&state.pool, id)
        .await?
        .ok_or(AppError::NotFound("Poll"))?;
    authorize(caller, Action::UpdatePoll, Some(existing.created_by))?;

    poll::update_poll(&state.pool, id, patch).await
}

/// Replace a poll; the submitted option list becomes the full option set
pub async fn replace_poll(
    State(state): State<SharedState>,
    caller: Caller,
    Path(id): Path<PollId>,
    Json(input): Json<PollInput>,
) -> AppResult<Json<PollDetail>> {
    Ok(Json(edit(&state, &caller, id, input.into()).await?))
}

/// Change only the supplied fields; options are reconciled only when present
pub async fn patch_poll(
    State(state): State<SharedState>,
    caller: Caller,
    Path(id): Path<PollId>,
    Json(patch): Json<PollPatch>,
) -> AppResult<Json<PollDetail>> {
    Ok(Json(edit(&state, &caller, id, patch).await?))
}

pub async fn delete_poll(
    State(state): State<SharedState>,
    caller: Caller,
    Path(id): Path<PollId>,
) -> AppResult<StatusCode> {
    let existing = poll::find_poll(&state.pool, id)
        .await?
        .ok_or(AppError::NotFound("Poll"))?;
    authorize(&caller, Action::DeletePoll, Some(existing.created_by))?;

    poll::delete_poll(&state.pool, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Vote for an option. Anonymous callers get a newly issued session token back
/// in the response headers whether or not the vote was admitted.
pub async fn cast_vote(
    State(state): State<SharedState>,
    caller: Caller,
    client: ClientContext,
    Path(id): Path<PollId>,
    Json(request): Json<VoteRequest>,
) -> Response {
    let outcome = match authorize(&caller, Action::Vote, None) {
        Ok(()) => {
            let context = match caller {
                Caller::User { id, .. } => VoterContext::authenticated(id),
                Caller::Anonymous => VoterContext::from_request(&caller, &client),
            };
            vote::submit_vote(&state.pool, id, request.option, &context).await
        }
        Err(err) => Err(err),
    };

    let response = match outcome {
        Ok(admitted) => (StatusCode::CREATED, Json(admitted)).into_response(),
        Err(err) => err.into_response(),
    };

    // Account holders are identified by their token and never get a session.
    match caller {
        Caller::Anonymous => client.attach(response),
        Caller::User { .. } => response,
    }
}

/// Vote counts per option
pub async fn show_results(
    State(state): State<SharedState>,
    caller: Caller,
    Path(id): Path<PollId>,
) -> AppResult<Json<PollResults>> {
    authorize(&caller, Action::ViewResults, None)?;
    Ok(Json(results::poll_results(&state.pool, id).await?))
}
