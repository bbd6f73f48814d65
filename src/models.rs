// src/models.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type PollId = i64;
pub type OptionId = i64;
pub type UserId = i64;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Poll {
    pub id: PollId,
    pub title: String,
    pub description: String,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expire_date: Option<DateTime<Utc>>,
}

impl Poll {
    /// A poll without an expiry date is treated as already closed.
    pub fn is_open_at(&self, now: DateTime<Utc>) -> bool {
        self.expire_date.is_some_and(|expiry| expiry >= now)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct PollOption {
    pub id: OptionId,
    #[serde(skip_serializing)]
    pub poll_id: PollId,
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PollDetail {
    #[serde(flatten)]
    pub poll: Poll,
    pub options: Vec<PollOption>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Vote {
    pub id: i64,
    pub poll_id: PollId,
    pub option_id: OptionId,
    pub user_id: Option<UserId>,
    #[serde(skip_serializing)]
    pub ip_hash: Option<String>,
    #[serde(skip_serializing)]
    pub session_id: Option<String>,
    pub voted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub is_admin: bool,
    pub date_joined: DateTime<Utc>,
}

/// One submitted option. `id` refers to an existing option of the poll being
/// edited; options without one are created.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OptionInput {
    #[serde(default)]
    pub id: Option<OptionId>,
    pub text: String,
}

impl OptionInput {
    pub fn new(text: &str) -> Self {
        Self { id: None, text: text.to_string() }
    }

    pub fn existing(id: OptionId, text: &str) -> Self {
        Self { id: Some(id), text: text.to_string() }
    }
}

/// Full poll body used by create and replace. `created_by` and any timestamp
/// other than `expire_date` are not part of it and are dropped on input.
#[derive(Debug, Clone, Deserialize)]
pub struct PollInput {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub expire_date: DateTime<Utc>,
    pub options: Vec<OptionInput>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PollPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub expire_date: Option<DateTime<Utc>>,
    pub options: Option<Vec<OptionInput>>,
}

impl From<PollInput> for PollPatch {
    fn from(input: PollInput) -> Self {
        Self {
            title: Some(input.title),
            description: Some(input.description),
            expire_date: Some(input.expire_date),
            options: Some(input.options),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PollQuery {
    pub title: Option<String>,
    pub created_by: Option<UserId>,
    pub is_ongoing: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct VoteRequest {
    pub option: OptionId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct OptionTally {
    pub option_id: OptionId,
    pub option_text: String,
    pub vote_count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PollResults {
    pub poll_id: PollId,
    pub title: String,
    pub options: Vec<OptionTally>,
}

impl PollResults {
    pub fn total_votes(&self) -> i64 {
        self.options.iter().map(|tally| tally.vote_count).sum()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserPatch {
    pub username: Option<String>,
    pub password: Option<String>,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub is_admin: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn poll(expire_date: Option<DateTime<Utc>>) -> Poll {
        let now = Utc::now();
        Poll {
            id: 1,
            title: "Lunch".into(),
            description: String::new(),
            created_by: 1,
            created_at: now,
            updated_at: now,
            expire_date,
        }
    }

    #[test]
    fn test_poll_open_until_expiry() {
        let now = Utc::now();
        assert!(poll(Some(now + Duration::hours(1))).is_open_at(now));
        assert!(poll(Some(now)).is_open_at(now));
        assert!(!poll(Some(now - Duration::seconds(1))).is_open_at(now));
        assert!(!poll(None).is_open_at(now));
    }

    #[test]
    fn test_poll_input_ignores_read_only_fields() {
        let input: PollInput = serde_json::from_value(serde_json::json!({
            "title": "Lunch",
            "expire_date": "2030-01-01T00:00:00Z",
            "created_by": 99,
            "created_at": "1999-01-01T00:00:00Z",
            "options": [{"text": "Pizza"}, {"id": 4, "text": "Tacos"}]
        }))
        .unwrap();

        assert_eq!(input.description, "");
        assert_eq!(input.options[0], OptionInput::new("Pizza"));
        assert_eq!(input.options[1], OptionInput::existing(4, "Tacos"));
    }
}
