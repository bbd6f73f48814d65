//! Vote admission: one vote per identity, option membership, expiry and
//! concurrent submissions.

mod common;

use chrono::{Duration, Utc};

use common::{poll_input, TestApp};
use polling_service::{
    error::{AppError, ALREADY_VOTED},
    identity::{Voter, VoterContext},
    poll,
    vote::{self, OPTION_NOT_IN_POLL, POLL_EXPIRED},
};

fn rejected_with(result: &Result<polling_service::models::Vote, AppError>, message: &str) -> bool {
    matches!(result, Err(AppError::Validation(msg)) if msg == message)
}

async fn vote_count(app: &TestApp) -> i64 {
    sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM votes")
        .fetch_one(app.pool())
        .await
        .unwrap()
}

#[tokio::test]
async fn test_user_votes_once() {
    let app = TestApp::new().await;
    let alice = app.user("alice").await;
    let bob = app.user("bob").await;
    let created = app.poll(&alice, &["A", "B"]).await;
    let voter = VoterContext::authenticated(bob.id);

    let first = vote::submit_vote(app.pool(), created.poll.id, created.options[0].id, &voter).await.unwrap();
    assert_eq!(first.user_id, Some(bob.id));
    assert_eq!(first.option_id, created.options[0].id);

    // A different option does not help.
    let second = vote::submit_vote(app.pool(), created.poll.id, created.options[1].id, &voter).await;
    assert!(rejected_with(&second, ALREADY_VOTED));
    assert_eq!(vote_count(&app).await, 1);

    assert!(vote::has_voted(app.pool(), created.poll.id, &Voter::User(bob.id)).await.unwrap());
    assert!(!vote::has_voted(app.pool(), created.poll.id, &Voter::User(alice.id)).await.unwrap());
}

/// Anonymous identity is the fingerprint and session together.
#[tokio::test]
async fn test_anonymous_identity_is_fingerprint_and_session() {
    let app = TestApp::new().await;
    let alice = app.user("alice").await;
    let created = app.poll(&alice, &["A", "B"]).await;
    let (poll_id, option) = (created.poll.id, created.options[0].id);

    vote::submit_vote(app.pool(), poll_id, option, &VoterContext::anonymous("fp-1", "s-1")).await.unwrap();

    let repeat = vote::submit_vote(app.pool(), poll_id, option, &VoterContext::anonymous("fp-1", "s-1")).await;
    assert!(rejected_with(&repeat, ALREADY_VOTED));

    vote::submit_vote(app.pool(), poll_id, option, &VoterContext::anonymous("fp-1", "s-2")).await.unwrap();
    vote::submit_vote(app.pool(), poll_id, option, &VoterContext::anonymous("fp-2", "s-1")).await.unwrap();

    assert_eq!(vote_count(&app).await, 3);
}

/// An authenticated caller is counted as the user even when anonymous
/// material is present too.
#[tokio::test]
async fn test_user_identity_wins_over_anonymous_material() {
    let app = TestApp::new().await;
    let alice = app.user("alice").await;
    let created = app.poll(&alice, &["A", "B"]).await;

    let context = VoterContext {
        user: Some(alice.id),
        fingerprint: Some("fp".into()),
        session: Some("s".into()),
    };
    let admitted = vote::submit_vote(app.pool(), created.poll.id, created.options[1].id, &context).await.unwrap();

    assert_eq!(admitted.user_id, Some(alice.id));
    assert_eq!(admitted.ip_hash, None);
    assert_eq!(admitted.session_id, None);

    // The same fingerprint and session may still vote anonymously.
    vote::submit_vote(
        app.pool(),
        created.poll.id,
        created.options[1].id,
        &VoterContext::anonymous("fp", "s"),
    )
    .await
    .unwrap();
}

#[tokio::test]
async fn test_option_must_belong_to_poll() {
    let app = TestApp::new().await;
    let alice = app.user("alice").await;
    let lunch = app.poll(&alice, &["A", "B"]).await;
    let dinner = app.poll(&alice, &["X", "Y"]).await;

    let result = vote::submit_vote(
        app.pool(),
        lunch.poll.id,
        dinner.options[0].id,
        &VoterContext::authenticated(alice.id),
    )
    .await;

    assert!(rejected_with(&result, OPTION_NOT_IN_POLL));
    assert_eq!(vote_count(&app).await, 0);
}

#[tokio::test]
async fn test_missing_identity_is_rejected() {
    let app = TestApp::new().await;
    let alice = app.user("alice").await;
    let created = app.poll(&alice, &["A", "B"]).await;

    let only_session = VoterContext {
        session: Some("s".into()),
        ..VoterContext::default()
    };
    let result = vote::submit_vote(app.pool(), created.poll.id, created.options[0].id, &only_session).await;

    assert!(rejected_with(
        &result,
        "You must be either authenticated or provide an IP address and session ID"
    ));
}

#[tokio::test]
async fn test_unknown_poll_is_not_found() {
    let app = TestApp::new().await;

    let result = vote::submit_vote(app.pool(), 99, 1, &VoterContext::anonymous("fp", "s")).await;
    assert!(matches!(result, Err(AppError::NotFound("Poll"))));
}

// =============================================================================
// Expiry
// =============================================================================

/// Expiry is checked before identity, so even an unidentified caller learns
/// that the poll is closed.
#[tokio::test]
async fn test_expired_poll_refuses_votes() {
    let app = TestApp::new().await;
    let alice = app.user("alice").await;
    let mut input = poll_input("Yesterday", &["A", "B"]);
    input.expire_date = Utc::now() - Duration::minutes(1);
    let created = poll::create_poll(app.pool(), alice.id, input).await.unwrap();

    let result = vote::submit_vote(
        app.pool(),
        created.poll.id,
        created.options[0].id,
        &VoterContext::default(),
    )
    .await;

    assert!(rejected_with(&result, POLL_EXPIRED));
}

#[tokio::test]
async fn test_poll_without_expiry_is_closed() {
    let app = TestApp::new().await;
    let alice = app.user("alice").await;
    let created = app.poll(&alice, &["A", "B"]).await;

    sqlx::query("UPDATE polls SET expire_date = NULL WHERE id = ?")
        .bind(created.poll.id)
        .execute(app.pool())
        .await
        .unwrap();

    let result = vote::submit_vote(
        app.pool(),
        created.poll.id,
        created.options[0].id,
        &VoterContext::authenticated(alice.id),
    )
    .await;

    assert!(rejected_with(&result, POLL_EXPIRED));
}

/// The expiry instant itself still accepts votes.
#[tokio::test]
async fn test_vote_at_expiry_instant_is_admitted() {
    let app = TestApp::new().await;
    let alice = app.user("alice").await;
    let created = app.poll(&alice, &["A", "B"]).await;
    let expiry = created.poll.expire_date.unwrap();

    let voter = VoterContext::authenticated(alice.id);
    vote::admit(app.pool(), created.poll.id, created.options[0].id, &voter, expiry)
        .await
        .unwrap();

    let late = vote::admit(
        app.pool(),
        created.poll.id,
        created.options[0].id,
        &VoterContext::anonymous("fp", "s"),
        expiry + Duration::milliseconds(1),
    )
    .await;
    assert!(rejected_with(&late, POLL_EXPIRED));
}

// =============================================================================
// Concurrency
// =============================================================================

/// Simultaneous submissions for one identity admit exactly one vote.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_votes_for_one_identity() {
    let app = TestApp::new().await;
    let alice = app.user("alice").await;
    let created = app.poll(&alice, &["A", "B"]).await;

    let mut tasks = Vec::new();
    for i in 0..8 {
        let pool = app.pool().clone();
        let poll_id = created.poll.id;
        let option = created.options[i % 2].id;
        tasks.push(tokio::spawn(async move {
            vote::submit_vote(&pool, poll_id, option, &VoterContext::anonymous("fp", "shared")).await
        }));
    }

    let mut admitted = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => admitted += 1,
            Err(err) => assert!(
                matches!(&err, AppError::Validation(msg) if msg == ALREADY_VOTED),
                "unexpected rejection: {err}"
            ),
        }
    }

    assert_eq!(admitted, 1);
    assert_eq!(vote_count(&app).await, 1);
}
