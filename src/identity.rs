// src/identity.rs
//! Who is calling.
//!
//! [`Caller`] is the authenticated-or-anonymous principal taken from the bearer
//! token. [`ClientContext`] carries the anonymous voter material: a one-way
//! fingerprint of the network origin plus a server-issued session token. A
//! vote resolves both into a [`Voter`], which is always exactly one of the two
//! identity forms.
use std::net::{IpAddr, SocketAddr};

use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::{request::Parts, HeaderMap, HeaderName, HeaderValue},
    response::Response,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use http::header::AUTHORIZATION;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::accounts;
use crate::error::{AppError, AppResult};
use crate::models::UserId;
use crate::state::SharedState;

pub const SESSION_HEADER: HeaderName = HeaderName::from_static("x-session-token");
const FORWARDED_FOR: &str = "x-forwarded-for";
const MAX_SESSION_TOKEN_LEN: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Caller {
    User { id: UserId, is_admin: bool },
    Anonymous,
}

impl Caller {
    pub fn user_id(&self) -> Option<UserId> {
        match self {
            Caller::User { id, .. } => Some(*id),
            Caller::Anonymous => None,
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Caller::User { is_admin: true, .. })
    }

    pub fn require_user(&self) -> AppResult<UserId> {
        self.user_id().ok_or(AppError::AuthenticationRequired)
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
}

/// Resolves the bearer token, if any. A token that fails validation or names a
/// deleted user is an error rather than a silent downgrade to anonymous.
pub async fn resolve_caller(state: &SharedState, headers: &HeaderMap) -> AppResult<Caller> {
    let Some(token) = bearer_token(headers) else {
        return Ok(Caller::Anonymous);
    };

    let claims = state.jwt.validate(token)?;
    let user = accounts::find_user(&state.pool, claims.user_id()?)
        .await?
        .ok_or_else(|| AppError::InvalidToken("user no longer exists".into()))?;

    Ok(Caller::User {
        id: user.id,
        is_admin: user.is_admin,
    })
}

impl FromRequestParts<SharedState> for Caller {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &SharedState) -> Result<Self, Self::Rejection> {
        if let Some(caller) = parts.extensions.get::<Caller>() {
            return Ok(*caller);
        }

        let caller = resolve_caller(state, &parts.headers).await?;
        parts.extensions.insert(caller);
        Ok(caller)
    }
}

/// One-way digest of an origin address; the raw address is never stored.
pub fn fingerprint(salt: &str, origin: IpAddr) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b"\0");
    hasher.update(origin.to_string().as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

pub fn issue_session_token() -> String {
    Uuid::new_v4().simple().to_string()
}

fn usable_session_token(token: &str) -> bool {
    !token.is_empty()
        && token.len() <= MAX_SESSION_TOKEN_LEN
        && token.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

fn origin_address(parts: &Parts, trust_forwarded_for: bool) -> Option<IpAddr> {
    if trust_forwarded_for {
        let forwarded = parts
            .headers
            .get(FORWARDED_FOR)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .and_then(|first| first.trim().parse().ok());

        if forwarded.is_some() {
            return forwarded;
        }
    }

    parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientContext {
    pub fingerprint: Option<String>,
    pub session: String,
    /// True when `session` was minted for this request and must be echoed back.
    pub issued_session: bool,
}

impl ClientContext {
    pub fn from_parts(parts: &Parts, salt: &str, trust_forwarded_for: bool) -> Self {
        let fingerprint =
            origin_address(parts, trust_forwarded_for).map(|origin| fingerprint(salt, origin));

        let presented = parts
            .headers
            .get(&SESSION_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|token| usable_session_token(token));

        match presented {
            Some(token) => Self {
                fingerprint,
                session: token.to_string(),
                issued_session: false,
            },
            None => Self {
                fingerprint,
                session: issue_session_token(),
                issued_session: true,
            },
        }
    }

    /// Key for per-client bookkeeping such as throttling.
    pub fn throttle_key(&self) -> &str {
        self.fingerprint.as_deref().unwrap_or("unknown-origin")
    }

    /// Returns a newly issued session token to the client for reuse.
    pub fn attach(&self, mut response: Response) -> Response {
        if self.issued_session {
            if let Ok(value) = HeaderValue::from_str(&self.session) {
                response.headers_mut().insert(SESSION_HEADER, value);
            }
        }
        response
    }
}

impl FromRequestParts<SharedState> for ClientContext {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &SharedState) -> Result<Self, Self::Rejection> {
        if let Some(context) = parts.extensions.get::<ClientContext>() {
            return Ok(context.clone());
        }

        let context = Self::from_parts(
            parts,
            &state.config.fingerprint_salt,
            state.config.trust_forwarded_for,
        );
        parts.extensions.insert(context.clone());
        Ok(context)
    }
}

/// The identity a vote is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Voter {
    User(UserId),
    Anonymous { fingerprint: String, session: String },
}

/// Identity material gathered from a request, prior to admission.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VoterContext {
    pub user: Option<UserId>,
    pub fingerprint: Option<String>,
    pub session: Option<String>,
}

impl VoterContext {
    pub fn authenticated(user: UserId) -> Self {
        Self {
            user: Some(user),
            ..Self::default()
        }
    }

    pub fn anonymous(fingerprint: &str, session: &str) -> Self {
        Self {
            user: None,
            fingerprint: Some(fingerprint.to_string()),
            session: Some(session.to_string()),
        }
    }

    pub fn from_request(caller: &Caller, client: &ClientContext) -> Self {
        Self {
            user: caller.user_id(),
            fingerprint: client.fingerprint.clone(),
            session: Some(client.session.clone()),
        }
    }

    /// An authenticated user always wins; otherwise both anonymous parts must
    /// be present.
    pub fn resolve(&self) -> AppResult<Voter> {
        if let Some(user) = self.user {
            return Ok(Voter::User(user));
        }

        match (self.fingerprint.as_deref(), self.session.as_deref()) {
            (Some(fingerprint), Some(session)) if !fingerprint.is_empty() && !session.is_empty() => {
                Ok(Voter::Anonymous {
                    fingerprint: fingerprint.to_string(),
                    session: session.to_string(),
                })
            }
            _ => Err(AppError::validation(
                "You must be either authenticated or provide an IP address and session ID",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts(headers: &[(&str, &str)], peer: Option<&str>) -> Parts {
        let mut builder = Request::builder().uri("/");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let (mut parts, _) = builder.body(()).unwrap().into_parts();
        if let Some(peer) = peer {
            parts
                .extensions
                .insert(ConnectInfo(peer.parse::<SocketAddr>().unwrap()));
        }
        parts
    }

    #[test]
    fn test_fingerprint_is_stable_and_hides_address() {
        let origin: IpAddr = "203.0.113.9".parse().unwrap();
        let first = fingerprint("salt", origin);

        assert_eq!(first, fingerprint("salt", origin));
        assert_ne!(first, fingerprint("pepper", origin));
        assert_ne!(first, fingerprint("salt", "203.0.113.10".parse().unwrap()));
        assert!(!first.contains("203.0.113.9"));
    }

    #[test]
    fn test_session_issued_when_absent() {
        let context = ClientContext::from_parts(&parts(&[], Some("10.0.0.1:5000")), "s", false);

        assert!(context.issued_session);
        assert!(context.fingerprint.is_some());

        let response = context.attach(Response::new(axum::body::Body::empty()));
        assert_eq!(response.headers().get(SESSION_HEADER).unwrap(), context.session.as_str());
    }

    #[test]
    fn test_presented_session_reused() {
        let context = ClientContext::from_parts(
            &parts(&[("x-session-token", "abc-123")], Some("10.0.0.1:5000")),
            "s",
            false,
        );

        assert!(!context.issued_session);
        assert_eq!(context.session, "abc-123");

        let response = context.attach(Response::new(axum::body::Body::empty()));
        assert!(response.headers().get(SESSION_HEADER).is_none());
    }

    #[test]
    fn test_unusable_session_replaced() {
        let context = ClientContext::from_parts(&parts(&[("x-session-token", "a b;c")], None), "s", false);
        assert!(context.issued_session);
        assert_ne!(context.session, "a b;c");
    }

    #[test]
    fn test_forwarded_for_only_when_trusted() {
        let request = parts(&[("x-forwarded-for", "198.51.100.7, 10.0.0.1")], Some("10.0.0.1:80"));

        let trusted = ClientContext::from_parts(&request, "s", true);
        let direct = ClientContext::from_parts(&request, "s", false);

        assert_eq!(
            trusted.fingerprint.unwrap(),
            fingerprint("s", "198.51.100.7".parse().unwrap())
        );
        assert_eq!(direct.fingerprint.unwrap(), fingerprint("s", "10.0.0.1".parse().unwrap()));
    }

    #[test]
    fn test_no_origin_means_no_fingerprint() {
        let context = ClientContext::from_parts(&parts(&[], None), "s", true);
        assert!(context.fingerprint.is_none());
        assert_eq!(context.throttle_key(), "unknown-origin");
    }

    #[test]
    fn test_voter_resolution() {
        assert_eq!(VoterContext::authenticated(4).resolve().unwrap(), Voter::User(4));

        let both = VoterContext {
            user: Some(4),
            fingerprint: Some("fp".into()),
            session: Some("s".into()),
        };
        assert_eq!(both.resolve().unwrap(), Voter::User(4));

        assert_eq!(
            VoterContext::anonymous("fp", "s").resolve().unwrap(),
            Voter::Anonymous {
                fingerprint: "fp".into(),
                session: "s".into()
            }
        );

        let missing_origin = VoterContext {
            user: None,
            fingerprint: None,
            session: Some("s".into()),
        };
        assert!(matches!(missing_origin.resolve(), Err(AppError::Validation(_))));
        assert!(VoterContext::default().resolve().is_err());
    }

    #[test]
    fn test_caller_helpers() {
        let admin = Caller::User { id: 1, is_admin: true };
        assert!(admin.is_admin());
        assert_eq!(admin.require_user().unwrap(), 1);
        assert!(!Caller::Anonymous.is_admin());
        assert!(matches!(
            Caller::Anonymous.require_user(),
            Err(AppError::AuthenticationRequired)
        ));
    }
}
