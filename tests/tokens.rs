//! Refresh and password-reset token storage.

mod common;

use chrono::Duration;

use common::TestApp;
use polling_service::{
    auth::tokens::{
        consume_password_reset, issue_password_reset, issue_refresh_token, revoke_refresh_token,
        rotate_refresh_token,
    },
    models::UserId,
};

async fn rows(app: &TestApp, table: &str, user_id: UserId) -> i64 {
    sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM {table} WHERE user_id = ?"))
        .bind(user_id)
        .fetch_one(app.pool())
        .await
        .unwrap()
}

/// Rotation leaves one live row behind instead of a growing trail.
#[tokio::test]
async fn test_rotation_purges_spent_refresh_tokens() {
    let app = TestApp::new().await;
    let alice = app.user("alice").await;
    let ttl = Duration::days(1);

    let mut token = issue_refresh_token(app.pool(), alice.id, ttl).await.unwrap();
    for _ in 0..5 {
        let (owner, next) = rotate_refresh_token(app.pool(), &token, ttl).await.unwrap();
        assert_eq!(owner, alice.id);
        token = next;
    }

    assert_eq!(rows(&app, "refresh_tokens", alice.id).await, 1);
}

#[tokio::test]
async fn test_issue_purges_revoked_and_expired_refresh_tokens() {
    let app = TestApp::new().await;
    let alice = app.user("alice").await;
    let bob = app.user("bob").await;

    let revoked = issue_refresh_token(app.pool(), alice.id, Duration::days(1)).await.unwrap();
    issue_refresh_token(app.pool(), alice.id, Duration::seconds(-1)).await.unwrap();
    revoke_refresh_token(app.pool(), &revoked).await.unwrap();
    let live = issue_refresh_token(app.pool(), bob.id, Duration::days(1)).await.unwrap();
    assert_eq!(rows(&app, "refresh_tokens", alice.id).await, 2);

    let kept = issue_refresh_token(app.pool(), alice.id, Duration::days(1)).await.unwrap();

    assert_eq!(rows(&app, "refresh_tokens", alice.id).await, 1);
    // Other users' tokens are untouched.
    assert_eq!(rows(&app, "refresh_tokens", bob.id).await, 1);
    rotate_refresh_token(app.pool(), &kept, Duration::days(1)).await.unwrap();
    rotate_refresh_token(app.pool(), &live, Duration::days(1)).await.unwrap();
}

#[tokio::test]
async fn test_issue_purges_used_and_expired_resets() {
    let app = TestApp::new().await;
    let alice = app.user("alice").await;

    let used = issue_password_reset(app.pool(), alice.id, Duration::minutes(30)).await.unwrap();
    consume_password_reset(app.pool(), &used, "new-hash").await.unwrap();
    issue_password_reset(app.pool(), alice.id, Duration::seconds(-1)).await.unwrap();
    let pending = issue_password_reset(app.pool(), alice.id, Duration::minutes(30)).await.unwrap();
    assert_eq!(rows(&app, "password_resets", alice.id).await, 1);

    // The newest token still works after the purge.
    let owner = consume_password_reset(app.pool(), &pending, "newer-hash").await.unwrap();
    assert_eq!(owner, alice.id);
    assert!(consume_password_reset(app.pool(), &pending, "again").await.is_err());
}
