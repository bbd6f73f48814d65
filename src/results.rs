// src/results.rs
use sqlx::SqlitePool;

use crate::error::{AppError, AppResult};
use crate::models::{OptionTally, Poll, PollId, PollResults};

/// Per-option vote counts for a poll. Options without votes are reported with
/// a count of zero. Poll and counts are read from one snapshot.
pub async fn poll_results(pool: &SqlitePool, poll_id: PollId) -> AppResult<PollResults> {
    let mut tx = pool.begin().await?;

    let poll = sqlx::query_as::<_, Poll>("SELECT * FROM polls WHERE id = ?")
        .bind(poll_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(AppError::NotFound("Poll"))?;

    let options = sqlx::query_as::<_, OptionTally>(
        "SELECT o.id AS option_id, o.text AS option_text, COUNT(v.id) AS vote_count
         FROM options o
         LEFT JOIN votes v ON v.option_id = o.id AND v.poll_id = o.poll_id
         WHERE o.poll_id = ?
         GROUP BY o.id, o.text
         ORDER BY o.id",
    )
    .bind(poll_id)
    .fetch_all(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(PollResults {
        poll_id: poll.id,
        title: poll.title,
        options,
    })
}
