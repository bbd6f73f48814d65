// src/reconcile.rs
//! Option-set reconciliation.
//!
//! An edit submits the complete option list. Entries carrying an id keep that
//! option (with new text), entries without one are created, and every existing
//! option whose id was not submitted is deleted. Planning is pure; the poll
//! module applies a plan inside one transaction.
use std::collections::{BTreeSet, HashSet};

use crate::error::{AppError, AppResult};
use crate::models::{OptionId, OptionInput, PollOption};

pub const MIN_OPTIONS: usize = 2;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct OptionPlan {
    /// Surviving options and their (possibly unchanged) text.
    pub update: Vec<(OptionId, String)>,
    pub create: Vec<String>,
    pub delete: Vec<OptionId>,
}

impl OptionPlan {
    pub fn resulting_len(&self) -> usize {
        self.update.len() + self.create.len()
    }
}

/// Checks a submitted option list on its own: at least two entries, no blank
/// text, and no two texts equal after trimming and case folding. Returns the
/// trimmed texts in submission order.
pub fn normalized_texts(options: &[OptionInput]) -> AppResult<Vec<String>> {
    if options.len() < MIN_OPTIONS {
        return Err(AppError::validation("A poll must have at least two options"));
    }

    let mut seen = HashSet::with_capacity(options.len());
    let mut texts = Vec::with_capacity(options.len());

    for option in options {
        let text = option.text.trim();
        if text.is_empty() {
            return Err(AppError::validation("Option text may not be blank"));
        }
        if !seen.insert(text.to_lowercase()) {
            return Err(AppError::validation(format!("Option \"{text}\" already exists")));
        }
        texts.push(text.to_string());
    }

    Ok(texts)
}

pub fn plan_option_changes(
    existing: &[PollOption],
    submitted: &[OptionInput],
) -> AppResult<OptionPlan> {
    let texts = normalized_texts(submitted)?;

    let existing_ids: BTreeSet<OptionId> = existing.iter().map(|option| option.id).collect();
    let mut referenced = BTreeSet::new();
    let mut plan = OptionPlan::default();

    for (option, text) in submitted.iter().zip(texts) {
        match option.id {
            Some(id) => {
                if !existing_ids.contains(&id) {
                    return Err(AppError::validation(format!(
                        "Option {id} does not belong to this poll"
                    )));
                }
                if !referenced.insert(id) {
                    return Err(AppError::validation(format!(
                        "Option {id} was submitted more than once"
                    )));
                }
                plan.update.push((id, text));
            }
            None => plan.create.push(text),
        }
    }

    plan.delete = existing_ids.difference(&referenced).copied().collect();

    Ok(plan)
}
