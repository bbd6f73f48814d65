// src/policy.rs
//! Access rules, kept as one table from action to requirement.
use crate::error::{AppError, AppResult};
use crate::identity::Caller;
use crate::models::UserId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    ListPolls,
    RetrievePoll,
    ViewResults,
    Vote,
    CreatePoll,
    UpdatePoll,
    DeletePoll,
    CreateAccount,
    ListAccounts,
    RetrieveAccount,
    UpdateAccount,
    DeleteAccount,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    Anyone,
    Authenticated,
    /// The resource owner or an administrator.
    OwnerOrAdmin,
    Admin,
}

pub const POLICY: &[(Action, Requirement)] = &[
    (Action::ListPolls, Requirement::Anyone),
    (Action::RetrievePoll, Requirement::Anyone),
    (Action::ViewResults, Requirement::Anyone),
    (Action::Vote, Requirement::Anyone),
    (Action::CreatePoll, Requirement::Authenticated),
    (Action::UpdatePoll, Requirement::OwnerOrAdmin),
    (Action::DeletePoll, Requirement::OwnerOrAdmin),
    (Action::CreateAccount, Requirement::Anyone),
    (Action::ListAccounts, Requirement::Admin),
    (Action::RetrieveAccount, Requirement::OwnerOrAdmin),
    (Action::UpdateAccount, Requirement::OwnerOrAdmin),
    (Action::DeleteAccount, Requirement::OwnerOrAdmin),
];

pub fn requirement(action: Action) -> Requirement {
    POLICY
        .iter()
        .find(|(candidate, _)| *candidate == action)
        .map(|(_, requirement)| *requirement)
        // Unlisted actions are closed to everyone but administrators.
        .unwrap_or(Requirement::Admin)
}

/// `owner` is the user owning the target: a poll's creator, or the account
/// itself for account actions.
pub fn authorize(caller: &Caller, action: Action, owner: Option<UserId>) -> AppResult<()> {
    let required = requirement(action);

    if required == Requirement::Anyone {
        return Ok(());
    }

    let Caller::User { id, is_admin } = *caller else {
        return Err(AppError::AuthenticationRequired);
    };

    let allowed = match required {
        Requirement::Anyone | Requirement::Authenticated => true,
        Requirement::OwnerOrAdmin => is_admin || owner == Some(id),
        Requirement::Admin => is_admin,
    };

    if allowed {
        Ok(())
    } else {
        Err(AppError::Forbidden)
    }
}
