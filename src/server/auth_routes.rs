//! Authentication endpoints
//!
//! Signup, login, refresh, logout, the one-time-token flows and invites.
//! Credential-guessing surfaces (login, signup, the email-driven token
//! endpoints) are rate-limited per caller address. Endpoints that take an
//! email and might leak whether an account exists answer 204 either way.

use crate::auth::{AuthError, SessionTokens};
use crate::server::cookies::{clear_session_cookies, set_session_cookies};
use crate::server::state::AppState;
use crate::storage::{Member, User};
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use axum_extra::extract::cookie::CookieJar;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserView {
    pub id: Uuid,
    pub display_name: String,
    pub email: String,
    pub email_verified: bool,
}

impl From<&User> for UserView {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            display_name: user.display_name.clone(),
            email: user.email.clone(),
            email_verified: user.email_verified,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberView {
    pub id: Uuid,
    pub project_id: Uuid,
    pub display_name: String,
}

impl From<&Member> for MemberView {
    fn from(member: &Member) -> Self {
        Self {
            id: member.id,
            project_id: member.project_id,
            display_name: member.display_name.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub user: UserView,
    pub member: MemberView,
    /// Echo of the anti-forgery cookie for clients that prefer reading the
    /// body over the cookie.
    pub csrf_token: String,
}

fn session_response(
    user: &User,
    member: &Member,
    tokens: &SessionTokens,
) -> SessionResponse {
    SessionResponse {
        user: UserView::from(user),
        member: MemberView::from(member),
        csrf_token: tokens.csrf_token.clone(),
    }
}

fn check_rate(state: &AppState, addr: SocketAddr, suffix: &str) -> Result<(), AuthError> {
    let key = format!("{}:{}", addr.ip(), suffix);
    if state
        .limiter
        .allow(&key, state.settings.rate_limit_per_minute, 60)
    {
        Ok(())
    } else {
        debug!(%addr, suffix, "Rate limited");
        Err(AuthError::RateLimited)
    }
}

// ---- Signup / login / session ------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignupRequest {
    pub email: String,
    pub display_name: String,
    pub password: String,
    #[serde(default)]
    pub remember_me: bool,
}

pub async fn signup(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    jar: CookieJar,
    Json(body): Json<SignupRequest>,
) -> Result<impl IntoResponse, AuthError> {
    check_rate(&state, addr, "signup")?;
    let outcome = state
        .sessions
        .signup(&body.email, &body.display_name, &body.password, body.remember_me)
        .await?;

    // TODO: hand outcome.verify_token to the mailer once delivery lands.
    let response = session_response(
        &outcome.context.user,
        &outcome.context.member,
        &outcome.tokens,
    );
    let jar = set_session_cookies(jar, &outcome.tokens, &state.settings);
    Ok((StatusCode::CREATED, jar, Json(response)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub remember_me: bool,
}

pub async fn login(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    jar: CookieJar,
    Json(body): Json<LoginRequest>,
) -> Result<impl IntoResponse, AuthError> {
    check_rate(&state, addr, "login")?;
    let (context, tokens) = state
        .sessions
        .login(&body.email, &body.password, body.remember_me)
        .await?;

    let response = session_response(&context.user, &context.member, &tokens);
    let jar = set_session_cookies(jar, &tokens, &state.settings);
    Ok((jar, Json(response)))
}

pub async fn session(
    State(state): State<AppState>,
    method: Method,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AuthError> {
    let context = state.sessions.authenticate(&method, &headers).await?;
    Ok(Json(serde_json::json!({
        "user": UserView::from(&context.user),
        "member": MemberView::from(&context.member),
    })))
}

// ---- Refresh / logout ---------------------------------------------------

pub async fn refresh(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<impl IntoResponse, AuthError> {
    let raw = jar
        .get(&state.settings.refresh_cookie_name)
        .map(|c| c.value().to_string())
        .ok_or(AuthError::Unauthenticated)?;

    let (context, tokens) = state.sessions.refresh(&raw).await?;
    let response = session_response(&context.user, &context.member, &tokens);
    let jar = set_session_cookies(jar, &tokens, &state.settings);
    Ok((jar, Json(response)))
}

pub async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<impl IntoResponse, AuthError> {
    // Anonymity is fine here; an expired access token still logs out.
    if let Some(user) = state.sessions.authenticate_optional(&headers).await? {
        debug!(user_id = %user.id, "Logout");
    }
    let raw = jar
        .get(&state.settings.refresh_cookie_name)
        .map(|c| c.value().to_string());
    state.sessions.logout(raw.as_deref()).await?;

    let jar = clear_session_cookies(jar, &state.settings);
    Ok((StatusCode::NO_CONTENT, jar))
}

// ---- Email verification -------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct EmailRequest {
    pub email: String,
}

pub async fn resend_verify_email(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(body): Json<EmailRequest>,
) -> Result<StatusCode, AuthError> {
    check_rate(&state, addr, "resend-verify")?;
    // TODO: hand the token to the mailer once delivery lands.
    let _token = state.sessions.resend_verify_email(&body.email).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    pub token: String,
}

pub async fn confirm_email(
    State(state): State<AppState>,
    Json(body): Json<TokenRequest>,
) -> Result<StatusCode, AuthError> {
    state.sessions.confirm_email(&body.token).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ---- Password reset / change --------------------------------------------

pub async fn forgot_password(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(body): Json<EmailRequest>,
) -> Result<StatusCode, AuthError> {
    check_rate(&state, addr, "forgot-password")?;
    let _token = state.sessions.request_password_reset(&body.email).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordRequest {
    pub token: String,
    pub new_password: String,
}

pub async fn reset_password(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(body): Json<ResetPasswordRequest>,
) -> Result<StatusCode, AuthError> {
    check_rate(&state, addr, "reset-password")?;
    state
        .sessions
        .reset_password(&body.token, &body.new_password)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

pub async fn change_password(
    State(state): State<AppState>,
    method: Method,
    headers: HeaderMap,
    jar: CookieJar,
    Json(body): Json<ChangePasswordRequest>,
) -> Result<impl IntoResponse, AuthError> {
    let context = state.sessions.authenticate(&method, &headers).await?;
    state
        .sessions
        .change_password(&context.user, &body.current_password, &body.new_password)
        .await?;

    // Every refresh session is now revoked, including this client's.
    let jar = clear_session_cookies(jar, &state.settings);
    Ok((StatusCode::NO_CONTENT, jar))
}

// ---- Invites ------------------------------------------------------------

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CreateInviteRequest {
    pub expires_in_hours: Option<i64>,
}

pub async fn create_invite(
    State(state): State<AppState>,
    method: Method,
    headers: HeaderMap,
    Json(body): Json<CreateInviteRequest>,
) -> Result<impl IntoResponse, AuthError> {
    let context = state.sessions.authenticate(&method, &headers).await?;
    let token = state
        .sessions
        .create_invite(
            context.member.project_id,
            context.user.id,
            body.expires_in_hours,
        )
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "token": token })),
    ))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptInviteRequest {
    pub token: String,
    pub email: String,
    pub display_name: String,
    pub password: String,
}

pub async fn accept_invite(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    jar: CookieJar,
    Json(body): Json<AcceptInviteRequest>,
) -> Result<impl IntoResponse, AuthError> {
    check_rate(&state, addr, "accept-invite")?;
    let (context, tokens) = state
        .sessions
        .accept_invite(&body.token, &body.email, &body.display_name, &body.password)
        .await?;

    let response = session_response(&context.user, &context.member, &tokens);
    let jar = set_session_cookies(jar, &tokens, &state.settings);
    Ok((StatusCode::CREATED, jar, Json(response)))
}
