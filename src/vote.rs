// src/vote.rs
//! Vote admission.
//!
//! Checks run in a fixed order and the first failure is returned:
//!
//! 1. the poll exists
//! 2. the poll has not expired (a poll without expiry counts as expired)
//! 3. the caller resolves to exactly one identity
//! 4. that identity has not voted in this poll
//! 5. the option belongs to the poll
//!
//! The vote is then written with a single `INSERT`. The unique indexes on
//! `(poll_id, user_id)` and `(poll_id, ip_hash, session_id)` and the
//! `(option_id, poll_id)` foreign key are the final word: when two requests for
//! the same identity race past step 4, the store rejects the second insert and
//! that rejection is reported exactly like step 4.
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult, ALREADY_VOTED};
use crate::identity::{Voter, VoterContext};
use crate::models::{OptionId, PollId, Vote};
use crate::poll::find_poll;

pub const POLL_EXPIRED: &str = "This poll has already expired";
pub const OPTION_NOT_IN_POLL: &str = "This option is not part of the poll";

const RETRY_DELAY: Duration = Duration::from_millis(50);

/// Admits a vote, retrying once when the store is momentarily unavailable.
pub async fn submit_vote(
    pool: &SqlitePool,
    poll_id: PollId,
    option_id: OptionId,
    context: &VoterContext,
) -> AppResult<Vote> {
    match admit(pool, poll_id, option_id, context, Utc::now()).await {
        Err(err) if err.is_transient() => {
            warn!(poll_id, error = %err, "vote admission hit a transient failure, retrying");
            tokio::time::sleep(RETRY_DELAY).await;
            admit(pool, poll_id, option_id, context, Utc::now()).await
        }
        result => result,
    }
}

pub async fn admit(
    pool: &SqlitePool,
    poll_id: PollId,
    option_id: OptionId,
    context: &VoterContext,
    now: DateTime<Utc>,
) -> AppResult<Vote> {
    let poll = find_poll(pool, poll_id).await?.ok_or(AppError::NotFound("Poll"))?;

    if !poll.is_open_at(now) {
        return Err(rejected(poll_id, POLL_EXPIRED));
    }

    let voter = context.resolve()?;

    if has_voted(pool, poll_id, &voter).await? {
        return Err(rejected(poll_id, ALREADY_VOTED));
    }

    if !option_belongs_to(pool, poll_id, option_id).await? {
        return Err(rejected(poll_id, OPTION_NOT_IN_POLL));
    }

    let vote = insert_vote(pool, poll_id, option_id, &voter, now).await?;

    info!(
        poll_id,
        option_id,
        vote_id = vote.id,
        user_id = vote.user_id,
        anonymous = vote.user_id.is_none(),
        "vote admitted"
    );
    Ok(vote)
}

fn rejected(poll_id: PollId, reason: &'static str) -> AppError {
    debug!(poll_id, reason, "vote rejected");
    AppError::validation(reason)
}

pub async fn has_voted(pool: &SqlitePool, poll_id: PollId, voter: &Voter) -> AppResult<bool> {
    let exists = match voter {
        Voter::User(user_id) => {
            sqlx::query_scalar::<_, bool>(
                "SELECT EXISTS(SELECT 1 FROM votes WHERE poll_id = ? AND user_id = ?)",
            )
            .bind(poll_id)
            .bind(user_id)
            .fetch_one(pool)
            .await?
        }
        Voter::Anonymous { fingerprint, session } => {
            sqlx::query_scalar::<_, bool>(
                "SELECT EXISTS(
                     SELECT 1 FROM votes
                     WHERE poll_id = ? AND user_id IS NULL AND ip_hash = ? AND session_id = ?
                 )",
            )
            .bind(poll_id)
            .bind(fingerprint)
            .bind(session)
            .fetch_one(pool)
            .await?
        }
    };

    Ok(exists)
}

async fn option_belongs_to(pool: &SqlitePool, poll_id: PollId, option_id: OptionId) -> AppResult<bool> {
    let belongs = sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS(SELECT 1 FROM options WHERE id = ? AND poll_id = ?)",
    )
    .bind(option_id)
    .bind(poll_id)
    .fetch_one(pool)
    .await?;

    Ok(belongs)
}

async fn insert_vote(
    pool: &SqlitePool,
    poll_id: PollId,
    option_id: OptionId,
    voter: &Voter,
    now: DateTime<Utc>,
) -> AppResult<Vote> {
    let (user_id, ip_hash, session_id) = match voter {
        Voter::User(user_id) => (Some(*user_id), None, None),
        Voter::Anonymous { fingerprint, session } => (None, Some(fingerprint.as_str()), Some(session.as_str())),
    };

    sqlx::query_as::<_, Vote>(
        "INSERT INTO votes (poll_id, option_id, user_id, ip_hash, session_id, voted_at)
         VALUES (?, ?, ?, ?, ?, ?)
         RETURNING *",
    )
    .bind(poll_id)
    .bind(option_id)
    .bind(user_id)
    .bind(ip_hash)
    .bind(session_id)
    .bind(now)
    .fetch_one(pool)
    .await
    .map_err(|err| store_rejection(poll_id, err))
}

/// Maps constraint failures raised by the insert onto the admission messages.
fn store_rejection(poll_id: PollId, err: sqlx::Error) -> AppError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            debug!(poll_id, "concurrent duplicate vote refused by store");
            return AppError::validation(ALREADY_VOTED);
        }
        if db_err.is_foreign_key_violation() {
            debug!(poll_id, "option vanished before the vote was stored");
            return AppError::validation(OPTION_NOT_IN_POLL);
        }
    }
    AppError::from(err)
}
