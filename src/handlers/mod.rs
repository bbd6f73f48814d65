// src/handlers/mod.rs
pub mod auth;
pub mod polls;
pub mod users;

use axum::{
    extract::{FromRequestParts, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::identity::{Caller, ClientContext};
use crate::state::SharedState;
use crate::throttle::Scope;

pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// Resolves the caller once per request and spends one unit of the matching
/// global budget: per user for accounts, per origin fingerprint otherwise.
pub async fn throttle_requests(
    State(state): State<SharedState>,
    request: Request,
    next: Next,
) -> Response {
    let (mut parts, body) = request.into_parts();

    let caller = match Caller::from_request_parts(&mut parts, &state).await {
        Ok(caller) => caller,
        Err(err) => return err.into_response(),
    };

    let rates = &state.config.rates;
    let verdict = match caller {
        Caller::User { id, is_admin: true } => state.limiter.check(Scope::Admin, &id.to_string(), rates.admin),
        Caller::User { id, .. } => state.limiter.check(Scope::User, &id.to_string(), rates.user),
        Caller::Anonymous => {
            let client = ClientContext::from_parts(
                &parts,
                &state.config.fingerprint_salt,
                state.config.trust_forwarded_for,
            );
            let verdict = state.limiter.check(Scope::Anon, client.throttle_key(), rates.anon);
            parts.extensions.insert(client);
            verdict
        }
    };

    if let Err(err) = verdict {
        return err.into_response();
    }

    next.run(Request::from_parts(parts, body)).await
}
