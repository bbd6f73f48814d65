// src/auth/mail.rs
//! Outgoing mail. Delivery itself belongs to whatever transport is plugged in;
//! the service only composes messages.
use std::sync::Mutex;

use tracing::info;

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

impl OutgoingMail {
    pub fn password_reset(to: &str, base_url: &str, token: &str, ttl_minutes: i64) -> Self {
        let link = format!("{base_url}/api/auth/reset-password?token={token}");

        Self {
            to: to.to_string(),
            subject: "Reset your password".to_string(),
            body: format!(
                "Hello,\n\n\
                 A password reset was requested for your account. Use the token below \
                 or follow the link to choose a new password:\n\n\
                 {token}\n{link}\n\n\
                 The token expires in {ttl_minutes} minutes. If you did not ask for \
                 this you can ignore this message."
            ),
        }
    }
}

pub trait Mailer: Send + Sync {
    fn send(&self, mail: &OutgoingMail) -> AppResult<()>;
}

/// Logs the envelope and drops the message.
#[derive(Debug, Default)]
pub struct LogMailer;

impl Mailer for LogMailer {
    fn send(&self, mail: &OutgoingMail) -> AppResult<()> {
        info!(to = %mail.to, subject = %mail.subject, "mail queued for delivery");
        Ok(())
    }
}

/// Keeps every message in memory.
#[derive(Debug, Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<OutgoingMail>>,
}

impl RecordingMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<OutgoingMail> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }
}

impl Mailer for RecordingMailer {
    fn send(&self, mail: &OutgoingMail) -> AppResult<()> {
        self.sent
            .lock()
            .map_err(|_| AppError::Internal("mail outbox poisoned".into()))?
            .push(mail.clone());
        Ok(())
    }
}
