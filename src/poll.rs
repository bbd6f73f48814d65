// src/poll.rs
//! Poll lifecycle: creation, edits with option reconciliation, deletion and reads.
//!
//! A poll and its options are written together in one transaction; nothing
//! partial survives a failure. `created_by` and `created_at` are fixed at
//! creation, `updated_at` moves on every save.
use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use tracing::info;

use crate::error::{AppError, AppResult};
use crate::models::{
    OptionId, Poll, PollDetail, PollId, PollInput, PollOption, PollPatch, PollQuery, UserId,
};
use crate::reconcile::{normalized_texts, plan_option_changes};

const MAX_TITLE_LEN: usize = 255;
const MAX_OPTION_LEN: usize = 255;
/// Poll ids bound per options query; SQLite caps the number of bound
/// parameters in one statement at 32766.
const OPTION_FETCH_BATCH: usize = 500;

fn validate_title(title: &str) -> AppResult<String> {
    let title = title.trim();

    if title.is_empty() {
        return Err(AppError::validation("Title may not be blank"));
    }
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(AppError::validation(format!(
            "Title may not exceed {MAX_TITLE_LEN} characters"
        )));
    }

    Ok(title.to_string())
}

fn validate_option_lengths<'a>(texts: impl IntoIterator<Item = &'a String>) -> AppResult<()> {
    for text in texts {
        if text.chars().count() > MAX_OPTION_LEN {
            return Err(AppError::validation(format!(
                "Option text may not exceed {MAX_OPTION_LEN} characters"
            )));
        }
    }
    Ok(())
}

async fn insert_option(conn: &mut SqliteConnection, poll_id: PollId, text: &str) -> AppResult<PollOption> {
    let option = sqlx::query_as::<_, PollOption>(
        "INSERT INTO options (poll_id, text) VALUES (?, ?) RETURNING *",
    )
    .bind(poll_id)
    .bind(text)
    .fetch_one(conn)
    .await?;
    Ok(option)
}

async fn options_of(conn: &mut SqliteConnection, poll_id: PollId) -> AppResult<Vec<PollOption>> {
    let options = sqlx::query_as::<_, PollOption>("SELECT * FROM options WHERE poll_id = ? ORDER BY id")
        .bind(poll_id)
        .fetch_all(conn)
        .await?;
    Ok(options)
}

pub async fn create_poll(pool: &SqlitePool, creator: UserId, input: PollInput) -> AppResult<PollDetail> {
    let title = validate_title(&input.title)?;
    let texts = normalized_texts(&input.options)?;
    validate_option_lengths(&texts)?;

    let now = Utc::now();
    let mut tx = pool.begin().await?;

    let poll = sqlx::query_as::<_, Poll>(
        "INSERT INTO polls (title, description, created_by, created_at, updated_at, expire_date)
         VALUES (?, ?, ?, ?, ?, ?)
         RETURNING *",
    )
    .bind(&title)
    .bind(input.description.trim())
    .bind(creator)
    .bind(now)
    .bind(now)
    .bind(input.expire_date)
    .fetch_one(&mut *tx)
    .await?;

    let mut options = Vec::with_capacity(texts.len());
    for text in &texts {
        options.push(insert_option(&mut tx, poll.id, text).await?);
    }

    tx.commit().await?;

    info!(poll_id = poll.id, user_id = creator, options = options.len(), "poll created");
    Ok(PollDetail { poll, options })
}

pub async fn find_poll(pool: &SqlitePool, id: PollId) -> AppResult<Option<Poll>> {
    let poll = sqlx::query_as::<_, Poll>("SELECT * FROM polls WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(poll)
}

pub async fn get_poll(pool: &SqlitePool, id: PollId) -> AppResult<PollDetail> {
    let mut conn = pool.acquire().await?;

    let poll = sqlx::query_as::<_, Poll>("SELECT * FROM polls WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(AppError::NotFound("Poll"))?;
    let options = options_of(&mut conn, id).await?;

    Ok(PollDetail { poll, options })
}

/// `title` matches case-insensitively anywhere in the title; `is_ongoing`
/// selects polls whose expiry is at or after `now` (or strictly before it).
pub async fn list_polls(pool: &SqlitePool, query: &PollQuery, now: DateTime<Utc>) -> AppResult<Vec<PollDetail>> {
    // Polls and their options come from one read snapshot.
    let mut tx = pool.begin().await?;

    let mut builder = QueryBuilder::<Sqlite>::new("SELECT * FROM polls WHERE 1 = 1");

    if let Some(title) = query.title.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
        builder.push(" AND instr(lower(title), lower(");
        builder.push_bind(title.to_string());
        builder.push(")) > 0");
    }
    if let Some(created_by) = query.created_by {
        builder.push(" AND created_by = ");
        builder.push_bind(created_by);
    }
    builder.push(" ORDER BY id");

    let mut polls = builder.build_query_as::<Poll>().fetch_all(&mut *tx).await?;

    match query.is_ongoing {
        Some(true) => polls.retain(|poll| poll.is_open_at(now)),
        Some(false) => polls.retain(|poll| poll.expire_date.is_some_and(|expiry| expiry < now)),
        None => {}
    }

    let mut options = Vec::new();
    for batch in polls.chunks(OPTION_FETCH_BATCH) {
        options.extend(options_of_polls(&mut tx, batch).await?);
    }
    tx.commit().await?;

    let mut options = options.into_iter().peekable();
    let mut details = Vec::with_capacity(polls.len());
    for poll in polls {
        let mut own = Vec::new();
        while let Some(option) = options.next_if(|option| option.poll_id == poll.id) {
            own.push(option);
        }
        details.push(PollDetail { poll, options: own });
    }

    Ok(details)
}

/// Options of `polls` (sorted by id), ordered by poll then option id.
async fn options_of_polls(conn: &mut SqliteConnection, polls: &[Poll]) -> AppResult<Vec<PollOption>> {
    let mut builder = QueryBuilder::<Sqlite>::new("SELECT * FROM options WHERE poll_id IN (");
    let mut ids = builder.separated(", ");
    for poll in polls {
        ids.push_bind(poll.id);
    }
    ids.push_unseparated(") ORDER BY poll_id, id");

    let options = builder.build_query_as::<PollOption>().fetch_all(conn).await?;
    Ok(options)
}

/// Applies `patch` to a poll. When options are supplied they replace the
/// current set: submitted ids are kept with their new text, entries without an
/// id are created, and existing options left out are deleted together with
/// their votes.
pub async fn update_poll(pool: &SqlitePool, id: PollId, patch: PollPatch) -> AppResult<PollDetail> {
    let title = patch.title.as_deref().map(validate_title).transpose()?;

    let mut tx = pool.begin().await?;

    let poll = sqlx::query_as::<_, Poll>(
        "UPDATE polls SET
             title       = COALESCE(?, title),
             description = COALESCE(?, description),
             expire_date = COALESCE(?, expire_date),
             updated_at  = ?
         WHERE id = ?
         RETURNING *",
    )
    .bind(title)
    .bind(patch.description.as_deref().map(str::trim))
    .bind(patch.expire_date)
    .bind(Utc::now())
    .bind(id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(AppError::NotFound("Poll"))?;

    if let Some(submitted) = patch.options.as_deref() {
        let existing = options_of(&mut tx, id).await?;
        let plan = plan_option_changes(&existing, submitted)?;
        validate_option_lengths(plan.update.iter().map(|(_, text)| text).chain(&plan.create))?;

        for (option_id, text) in &plan.update {
            sqlx::query("UPDATE options SET text = ? WHERE id = ? AND poll_id = ?")
                .bind(text)
                .bind(option_id)
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        for text in &plan.create {
            insert_option(&mut tx, id, text).await?;
        }
        for option_id in &plan.delete {
            delete_option(&mut tx, id, *option_id).await?;
        }

        info!(
            poll_id = id,
            updated = plan.update.len(),
            created = plan.create.len(),
            deleted = plan.delete.len(),
            "poll options reconciled"
        );
    }

    let options = options_of(&mut tx, id).await?;
    tx.commit().await?;

    info!(poll_id = id, "poll updated");
    Ok(PollDetail { poll, options })
}

async fn delete_option(conn: &mut SqliteConnection, poll_id: PollId, option_id: OptionId) -> AppResult<()> {
    sqlx::query("DELETE FROM options WHERE id = ? AND poll_id = ?")
        .bind(option_id)
        .bind(poll_id)
        .execute(conn)
        .await?;
    Ok(())
}

/// Options and votes go with the poll.
pub async fn delete_poll(pool: &SqlitePool, id: PollId) -> AppResult<()> {
    let result = sqlx::query("DELETE FROM polls WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Poll"));
    }

    info!(poll_id = id, "poll deleted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_title_rules() {
        assert_eq!(validate_title("  Lunch?  ").unwrap(), "Lunch?");
        assert!(validate_title(" ").is_err());
        assert!(validate_title(&"x".repeat(256)).is_err());
    }

    #[test]
    fn test_option_length_limit() {
        let long = "x".repeat(256);
        let fine = "Pizza".to_string();

        assert!(validate_option_lengths([&fine]).is_ok());
        assert!(validate_option_lengths([&fine, &long]).is_err());
    }
}
