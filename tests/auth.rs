//! Session protocol integration tests against the in-memory store.

use axum::http::{header, HeaderMap, Method};
use hearthbeat::auth::{AuthError, SessionProtocol, SessionTokens};
use hearthbeat::config::Settings;
use hearthbeat::storage::{AuthStore, MemoryStore};
use std::sync::Arc;

struct Harness {
    store: Arc<dyn AuthStore>,
    protocol: SessionProtocol,
    settings: Arc<Settings>,
}

fn harness() -> Harness {
    let store: Arc<dyn AuthStore> = Arc::new(MemoryStore::new());
    let settings = Arc::new(Settings::for_tests());
    let protocol = SessionProtocol::new(Arc::clone(&store), Arc::clone(&settings));
    Harness {
        store,
        protocol,
        settings,
    }
}

fn headers_for(settings: &Settings, tokens: &SessionTokens, with_csrf: bool) -> HeaderMap {
    let mut headers = HeaderMap::new();
    let mut cookie = format!("{}={}", settings.access_cookie_name, tokens.access_token);
    if with_csrf {
        cookie.push_str(&format!(
            "; {}={}",
            settings.csrf_cookie_name, tokens.csrf_token
        ));
        headers.insert("x-csrf-token", tokens.csrf_token.parse().unwrap());
    }
    headers.insert(header::COOKIE, cookie.parse().unwrap());
    headers
}

#[tokio::test]
async fn test_signup_then_authenticate() {
    let h = harness();
    let outcome = h
        .protocol
        .signup("Anna@Example.com", "Anna", "hunter2hunter2", true)
        .await
        .unwrap();
    assert_eq!(outcome.context.user.email, "anna@example.com");
    assert!(!outcome.context.user.email_verified);

    let headers = headers_for(&h.settings, &outcome.tokens, false);
    let context = h
        .protocol
        .authenticate(&Method::GET, &headers)
        .await
        .unwrap();
    assert_eq!(context.user.id, outcome.context.user.id);
    assert_eq!(context.member.project_id, outcome.context.member.project_id);
}

#[tokio::test]
async fn test_bearer_header_fallback() {
    let h = harness();
    let outcome = h
        .protocol
        .signup("b@example.com", "B", "hunter2hunter2", false)
        .await
        .unwrap();

    let mut headers = HeaderMap::new();
    headers.insert(
        header::AUTHORIZATION,
        format!("Bearer {}", outcome.tokens.access_token)
            .parse()
            .unwrap(),
    );
    assert!(h.protocol.authenticate(&Method::GET, &headers).await.is_ok());
}

#[tokio::test]
async fn test_tampered_access_token_rejected() {
    let h = harness();
    let outcome = h
        .protocol
        .signup("c@example.com", "C", "hunter2hunter2", false)
        .await
        .unwrap();

    // Flip one character inside the signature segment.
    let mut token = outcome.tokens.access_token.clone();
    let last = token.pop().unwrap();
    token.push(if last == 'A' { 'B' } else { 'A' });

    let mut headers = HeaderMap::new();
    headers.insert(
        header::COOKIE,
        format!("{}={}", h.settings.access_cookie_name, token)
            .parse()
            .unwrap(),
    );
    let err = h
        .protocol
        .authenticate(&Method::GET, &headers)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::Unauthenticated));
}

#[tokio::test]
async fn test_csrf_gate_on_mutations() {
    let h = harness();
    let outcome = h
        .protocol
        .signup("d@example.com", "D", "hunter2hunter2", false)
        .await
        .unwrap();

    // Reads pass without the anti-forgery pair.
    let plain = headers_for(&h.settings, &outcome.tokens, false);
    assert!(h.protocol.authenticate(&Method::GET, &plain).await.is_ok());

    // Mutations without it are forbidden, not unauthenticated.
    let err = h
        .protocol
        .authenticate(&Method::POST, &plain)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::Forbidden(_)));

    // Header and cookie disagreeing is forbidden too.
    let mut mismatched = headers_for(&h.settings, &outcome.tokens, true);
    mismatched.insert("x-csrf-token", "something-else".parse().unwrap());
    let err = h
        .protocol
        .authenticate(&Method::POST, &mismatched)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::Forbidden(_)));

    // The full pair passes.
    let good = headers_for(&h.settings, &outcome.tokens, true);
    assert!(h.protocol.authenticate(&Method::POST, &good).await.is_ok());
}

#[tokio::test]
async fn test_refresh_rotates_and_detects_reuse() {
    let h = harness();
    let (_, tokens) = h
        .protocol
        .signup("e@example.com", "E", "hunter2hunter2", true)
        .await
        .map(|o| (o.context, o.tokens))
        .unwrap();

    let (_, rotated) = h.protocol.refresh(&tokens.refresh_token).await.unwrap();
    assert_ne!(rotated.refresh_token, tokens.refresh_token);

    // Presenting the consumed value again is a reuse: rejected generically.
    let err = h.protocol.refresh(&tokens.refresh_token).await.unwrap_err();
    assert!(matches!(err, AuthError::Unauthenticated));

    // The successor still works.
    assert!(h.protocol.refresh(&rotated.refresh_token).await.is_ok());
}

#[tokio::test]
async fn test_password_change_revokes_every_session() {
    let h = harness();
    let outcome = h
        .protocol
        .signup("f@example.com", "F", "hunter2hunter2", true)
        .await
        .unwrap();
    let (_, second) = h
        .protocol
        .login("f@example.com", "hunter2hunter2", true)
        .await
        .unwrap();

    h.protocol
        .change_password(&outcome.context.user, "hunter2hunter2", "correct-horse-battery")
        .await
        .unwrap();

    for raw in [&outcome.tokens.refresh_token, &second.refresh_token] {
        let err = h.protocol.refresh(raw).await.unwrap_err();
        assert!(matches!(err, AuthError::Unauthenticated));
    }

    // Old password is dead, new one works.
    assert!(h
        .protocol
        .login("f@example.com", "hunter2hunter2", false)
        .await
        .is_err());
    assert!(h
        .protocol
        .login("f@example.com", "correct-horse-battery", false)
        .await
        .is_ok());
}

#[tokio::test]
async fn test_change_password_requires_current_secret() {
    let h = harness();
    let outcome = h
        .protocol
        .signup("g@example.com", "G", "hunter2hunter2", false)
        .await
        .unwrap();
    let err = h
        .protocol
        .change_password(&outcome.context.user, "wrong", "whatever-new")
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::Forbidden(_)));
}

#[tokio::test]
async fn test_password_reset_flow_is_single_use() {
    let h = harness();
    h.protocol
        .signup("h@example.com", "H", "hunter2hunter2", false)
        .await
        .unwrap();

    let token = h
        .protocol
        .request_password_reset("h@example.com")
        .await
        .unwrap()
        .unwrap();
    h.protocol
        .reset_password(&token, "brand-new-secret")
        .await
        .unwrap();

    // Second presentation is conflated with expiry.
    let err = h
        .protocol
        .reset_password(&token, "another-secret")
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::TokenExpiredOrInvalid));

    assert!(h
        .protocol
        .login("h@example.com", "brand-new-secret", false)
        .await
        .is_ok());
}

#[tokio::test]
async fn test_reset_request_for_unknown_email_is_silent() {
    let h = harness();
    let token = h
        .protocol
        .request_password_reset("nobody@example.com")
        .await
        .unwrap();
    assert!(token.is_none());
}

#[tokio::test]
async fn test_email_verification() {
    let h = harness();
    let outcome = h
        .protocol
        .signup("i@example.com", "I", "hunter2hunter2", false)
        .await
        .unwrap();

    h.protocol.confirm_email(&outcome.verify_token).await.unwrap();
    let user = h
        .store
        .user_by_id(outcome.context.user.id)
        .await
        .unwrap()
        .unwrap();
    assert!(user.email_verified);

    // Already verified: resend declines quietly.
    assert!(h
        .protocol
        .resend_verify_email("i@example.com")
        .await
        .unwrap()
        .is_none());

    // A reset token does not double as a verification token.
    let reset = h
        .protocol
        .request_password_reset("i@example.com")
        .await
        .unwrap()
        .unwrap();
    let err = h.protocol.confirm_email(&reset).await.unwrap_err();
    assert!(matches!(err, AuthError::TokenExpiredOrInvalid));
}

#[tokio::test]
async fn test_duplicate_email_conflicts() {
    let h = harness();
    h.protocol
        .signup("j@example.com", "J", "hunter2hunter2", false)
        .await
        .unwrap();
    let err = h
        .protocol
        .signup("J@EXAMPLE.COM", "J2", "hunter2hunter2", false)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::EmailTaken));
}

#[tokio::test]
async fn test_logout_is_idempotent() {
    let h = harness();
    let outcome = h
        .protocol
        .signup("k@example.com", "K", "hunter2hunter2", true)
        .await
        .unwrap();

    h.protocol
        .logout(Some(&outcome.tokens.refresh_token))
        .await
        .unwrap();
    h.protocol
        .logout(Some(&outcome.tokens.refresh_token))
        .await
        .unwrap();
    h.protocol.logout(None).await.unwrap();

    let err = h
        .protocol
        .refresh(&outcome.tokens.refresh_token)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::Unauthenticated));
}

#[tokio::test]
async fn test_invite_joins_existing_project() {
    let h = harness();
    let outcome = h
        .protocol
        .signup("owner@example.com", "Owner", "hunter2hunter2", false)
        .await
        .unwrap();

    let invite = h
        .protocol
        .create_invite(
            outcome.context.member.project_id,
            outcome.context.user.id,
            Some(24),
        )
        .await
        .unwrap();

    let (joined, _) = h
        .protocol
        .accept_invite(&invite, "guest@example.com", "Guest", "hunter2hunter2")
        .await
        .unwrap();
    assert_eq!(
        joined.member.project_id,
        outcome.context.member.project_id
    );

    // A garbage invite token is conflated with expiry.
    let err = h
        .protocol
        .accept_invite("bogus", "x@example.com", "X", "hunter2hunter2")
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::TokenExpiredOrInvalid));
}
