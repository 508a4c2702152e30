//! Session protocol
//!
//! The request-facing state machine that turns raw credentials into an
//! authenticated identity: bearer extraction, stateless verification, the
//! anti-forgery gate on mutating methods, and membership resolution. Also
//! owns the credential lifecycle — login/signup issuance, rotate-on-refresh
//! with reuse detection, logout, password change and the one-time-token
//! flows (email verification, password reset, invites).

use crate::auth::password::{hash_password, verify_password};
use crate::auth::tokens::{
    create_access_token, decode_access_token, generate_opaque_token, hash_token, sign_csrf_token,
    verify_csrf_token,
};
use crate::config::Settings;
use crate::storage::{
    AuthStore, InviteLink, Member, OneTimePurpose, OneTimeToken, Project, RefreshSession,
    StorageError, User,
};
use axum::http::{header, HeaderMap, Method};
use axum_extra::extract::cookie::CookieJar;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

pub const CSRF_HEADER: &str = "x-csrf-token";

const DEFAULT_PROJECT_NAME: &str = "Our family";
const VERIFY_EMAIL_TTL_HOURS: i64 = 24;
const PASSWORD_RESET_TTL_HOURS: i64 = 1;

/// Request-level rejection taxonomy. The messages are deliberately generic:
/// an expired access token and a forged one read identically, and a
/// consumed one-time token is indistinguishable from a plain-expired one.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Missing/invalid/expired access credential; re-login may help.
    #[error("invalid credentials")]
    Unauthenticated,

    /// Anti-forgery failure, missing membership or ownership violation;
    /// re-login will not help.
    #[error("{0}")]
    Forbidden(&'static str),

    #[error("email already registered")]
    EmailTaken,

    /// One-time token consumed, superseded or past expiry — conflated.
    #[error("token expired or invalid")]
    TokenExpiredOrInvalid,

    #[error("too many requests")]
    RateLimited,

    /// The only fatal condition in this core.
    #[error(transparent)]
    Store(#[from] StorageError),
}

/// An authenticated identity with its single project membership.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user: User,
    pub member: Member,
}

/// The three credential artifacts handed to the client after issuance.
#[derive(Debug, Clone)]
pub struct SessionTokens {
    pub access_token: String,
    /// Raw refresh value; only its hash is persisted.
    pub refresh_token: String,
    /// Signed anti-forgery value; readable by client code.
    pub csrf_token: String,
    pub refresh_expires_at: DateTime<Utc>,
    pub remember_me: bool,
}

#[derive(Debug)]
pub struct SignupOutcome {
    pub context: AuthContext,
    pub tokens: SessionTokens,
    /// Raw email-verification token, for the (out of scope) mailer.
    pub verify_token: String,
}

pub struct SessionProtocol {
    store: Arc<dyn AuthStore>,
    settings: Arc<Settings>,
}

impl SessionProtocol {
    pub fn new(store: Arc<dyn AuthStore>, settings: Arc<Settings>) -> Self {
        Self { store, settings }
    }

    // ---- Credential extraction ------------------------------------------

    /// Bearer credential from the access cookie, falling back to an
    /// `Authorization: Bearer` header.
    pub fn extract_access_token(&self, headers: &HeaderMap) -> Option<String> {
        let jar = CookieJar::from_headers(headers);
        if let Some(cookie) = jar.get(&self.settings.access_cookie_name) {
            return Some(cookie.value().to_string());
        }
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(|v| v.trim().to_string())
    }

    fn verified_subject(&self, headers: &HeaderMap) -> Option<Uuid> {
        let token = self.extract_access_token(headers)?;
        let claims = decode_access_token(&token, &self.settings.jwt_secret)?;
        Some(claims.sub)
    }

    /// Anti-forgery gate. Only mutating methods are gated; both token forms
    /// must be present, equal, and MAC-valid.
    pub fn ensure_csrf(&self, method: &Method, headers: &HeaderMap) -> Result<(), AuthError> {
        if !matches!(
            *method,
            Method::POST | Method::PUT | Method::PATCH | Method::DELETE
        ) {
            return Ok(());
        }

        let jar = CookieJar::from_headers(headers);
        let cookie_value = jar
            .get(&self.settings.csrf_cookie_name)
            .map(|c| c.value().to_string());
        let header_value = headers
            .get(CSRF_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string());

        let (Some(cookie_value), Some(header_value)) = (cookie_value, header_value) else {
            return Err(AuthError::Forbidden("CSRF token is required"));
        };
        if cookie_value != header_value {
            return Err(AuthError::Forbidden("CSRF token mismatch"));
        }
        if !verify_csrf_token(&cookie_value, &self.settings.csrf_secret) {
            return Err(AuthError::Forbidden("Invalid CSRF token"));
        }
        Ok(())
    }

    /// Full request authentication: bearer, anti-forgery on mutations,
    /// membership resolution.
    pub async fn authenticate(
        &self,
        method: &Method,
        headers: &HeaderMap,
    ) -> Result<AuthContext, AuthError> {
        let subject = self.verified_subject(headers).ok_or(AuthError::Unauthenticated)?;
        self.ensure_csrf(method, headers)?;

        let user = self
            .store
            .user_by_id(subject)
            .await?
            .ok_or(AuthError::Unauthenticated)?;
        let member = self
            .store
            .member_for_user(user.id)
            .await?
            .ok_or(AuthError::Forbidden("No project membership"))?;
        Ok(AuthContext { user, member })
    }

    /// Bearer-only authentication for streaming handshakes; the upgrade
    /// request cannot carry the anti-forgery header pair.
    pub async fn authenticate_stream(&self, headers: &HeaderMap) -> Result<AuthContext, AuthError> {
        let subject = self.verified_subject(headers).ok_or(AuthError::Unauthenticated)?;
        let user = self
            .store
            .user_by_id(subject)
            .await?
            .ok_or(AuthError::Unauthenticated)?;
        let member = self
            .store
            .member_for_user(user.id)
            .await?
            .ok_or(AuthError::Forbidden("No project membership"))?;
        Ok(AuthContext { user, member })
    }

    /// Best-effort identification where anonymity is acceptable (logout).
    pub async fn authenticate_optional(
        &self,
        headers: &HeaderMap,
    ) -> Result<Option<User>, AuthError> {
        let Some(subject) = self.verified_subject(headers) else {
            return Ok(None);
        };
        Ok(self.store.user_by_id(subject).await?)
    }

    // ---- Issuance --------------------------------------------------------

    fn build_refresh(
        &self,
        user_id: Uuid,
        remember_me: bool,
        rotated_from: Option<Uuid>,
    ) -> (String, RefreshSession) {
        let raw = generate_opaque_token();
        let days = if remember_me {
            self.settings.refresh_ttl_days
        } else {
            1
        };
        let now = Utc::now();
        let session = RefreshSession {
            id: Uuid::new_v4(),
            user_id,
            token_hash: hash_token(&raw),
            expires_at: now + Duration::days(days),
            remember_me,
            revoked_at: None,
            rotated_from,
            created_at: now,
        };
        (raw, session)
    }

    fn make_tokens(&self, user_id: Uuid, raw_refresh: String, session: &RefreshSession) -> SessionTokens {
        let access_token = create_access_token(
            user_id,
            &self.settings.jwt_secret,
            self.settings.access_ttl_minutes,
        );
        let csrf_token = sign_csrf_token(&generate_opaque_token(), &self.settings.csrf_secret);
        SessionTokens {
            access_token,
            refresh_token: raw_refresh,
            csrf_token,
            refresh_expires_at: session.expires_at,
            remember_me: session.remember_me,
        }
    }

    async fn resolve_context(&self, user: User) -> Result<AuthContext, AuthError> {
        let member = self
            .store
            .member_for_user(user.id)
            .await?
            .ok_or(AuthError::Forbidden("No project membership"))?;
        Ok(AuthContext { user, member })
    }

    // ---- Flows -----------------------------------------------------------

    /// Create identity + default project graph, then issue a session and an
    /// email-verification token.
    pub async fn signup(
        &self,
        email: &str,
        display_name: &str,
        password: &str,
        remember_me: bool,
    ) -> Result<SignupOutcome, AuthError> {
        let email = email.trim().to_lowercase();
        if self.store.user_by_email(&email).await?.is_some() {
            return Err(AuthError::EmailTaken);
        }

        let user = User::new(display_name, &email, Some(hash_password(password)));
        match self.store.insert_user(&user).await {
            Ok(()) => {}
            Err(StorageError::Conflict(_)) => return Err(AuthError::EmailTaken),
            Err(e) => return Err(e.into()),
        }

        let project = Project::new(DEFAULT_PROJECT_NAME);
        self.store.insert_project(&project).await?;
        let member = Member::new(project.id, user.id, display_name.trim());
        self.store.insert_member(&member).await?;

        let (raw_refresh, session) = self.build_refresh(user.id, remember_me, None);
        self.store.insert_refresh(&session).await?;
        let tokens = self.make_tokens(user.id, raw_refresh, &session);

        let verify_token = self
            .issue_one_time(user.id, OneTimePurpose::VerifyEmail, VERIFY_EMAIL_TTL_HOURS)
            .await?;

        info!(user_id = %user.id, project_id = %project.id, "New signup");
        Ok(SignupOutcome {
            context: AuthContext { user, member },
            tokens,
            verify_token,
        })
    }

    /// Verify the stored secret and issue a fresh session.
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        remember_me: bool,
    ) -> Result<(AuthContext, SessionTokens), AuthError> {
        let email = email.trim().to_lowercase();
        let user = self
            .store
            .user_by_email(&email)
            .await?
            .ok_or(AuthError::Unauthenticated)?;
        let valid = user
            .password_hash
            .as_deref()
            .is_some_and(|encoded| verify_password(password, encoded));
        if !valid {
            return Err(AuthError::Unauthenticated);
        }

        let context = self.resolve_context(user).await?;
        let (raw_refresh, session) = self.build_refresh(context.user.id, remember_me, None);
        self.store.insert_refresh(&session).await?;
        let tokens = self.make_tokens(context.user.id, raw_refresh, &session);
        Ok((context, tokens))
    }

    /// Rotate a refresh credential. The presented session is revoked and a
    /// successor marked "rotated from" it is created, atomically: a stolen
    /// token used once invalidates itself, and the legitimate holder's next
    /// attempt with the now-revoked value fails — the intended compromise
    /// signal.
    pub async fn refresh(&self, raw_refresh: &str) -> Result<(AuthContext, SessionTokens), AuthError> {
        let now = Utc::now();
        let presented = self
            .store
            .refresh_by_hash(&hash_token(raw_refresh))
            .await?
            .ok_or(AuthError::Unauthenticated)?;
        if !presented.is_active(now) {
            debug!(session_id = %presented.id, "Refresh with revoked or expired session");
            return Err(AuthError::Unauthenticated);
        }

        let user = self
            .store
            .user_by_id(presented.user_id)
            .await?
            .ok_or(AuthError::Unauthenticated)?;
        let context = self.resolve_context(user).await?;

        let (raw_next, next) =
            self.build_refresh(presented.user_id, presented.remember_me, Some(presented.id));
        let rotated = self.store.rotate_refresh(presented.id, &next, now).await?;
        if !rotated {
            // Lost a race against another rotation of the same token:
            // treat exactly like presenting a revoked token.
            return Err(AuthError::Unauthenticated);
        }

        let tokens = self.make_tokens(presented.user_id, raw_next, &next);
        Ok((context, tokens))
    }

    /// Revoke the presented refresh session, if any. Idempotent from the
    /// caller's perspective: the client always ends up logged out.
    pub async fn logout(&self, raw_refresh: Option<&str>) -> Result<(), AuthError> {
        if let Some(raw) = raw_refresh {
            if let Some(session) = self.store.refresh_by_hash(&hash_token(raw)).await? {
                self.store.revoke_refresh(session.id, Utc::now()).await?;
            }
        }
        Ok(())
    }

    /// Re-prove the current secret, replace it, and forcibly log out every
    /// other session for the subject.
    pub async fn change_password(
        &self,
        user: &User,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), AuthError> {
        let valid = user
            .password_hash
            .as_deref()
            .is_some_and(|encoded| verify_password(current_password, encoded));
        if !valid {
            return Err(AuthError::Forbidden("Current password is incorrect"));
        }

        let mut updated = user.clone();
        updated.password_hash = Some(hash_password(new_password));
        self.store.update_user(&updated).await?;

        let revoked = self
            .store
            .revoke_all_refresh_for_user(user.id, Utc::now())
            .await?;
        info!(user_id = %user.id, revoked, "Password changed, sessions revoked");
        Ok(())
    }

    // ---- One-time tokens -------------------------------------------------

    async fn issue_one_time(
        &self,
        user_id: Uuid,
        purpose: OneTimePurpose,
        ttl_hours: i64,
    ) -> Result<String, AuthError> {
        let raw = generate_opaque_token();
        let now = Utc::now();
        let token = OneTimeToken {
            id: Uuid::new_v4(),
            user_id,
            purpose,
            token_hash: hash_token(&raw),
            expires_at: now + Duration::hours(ttl_hours),
            used_at: None,
            created_at: now,
        };
        self.store.insert_one_time(&token).await?;
        Ok(raw)
    }

    /// Re-issue an email-verification token. `None` when the email is
    /// unknown or already verified — the endpoint answers identically
    /// either way.
    pub async fn resend_verify_email(&self, email: &str) -> Result<Option<String>, AuthError> {
        let email = email.trim().to_lowercase();
        let Some(user) = self.store.user_by_email(&email).await? else {
            return Ok(None);
        };
        if user.email_verified {
            return Ok(None);
        }
        let raw = self
            .issue_one_time(user.id, OneTimePurpose::VerifyEmail, VERIFY_EMAIL_TTL_HOURS)
            .await?;
        Ok(Some(raw))
    }

    /// Consume a verification token and mark the email verified.
    pub async fn confirm_email(&self, raw_token: &str) -> Result<(), AuthError> {
        let user_id = self
            .store
            .consume_one_time(&hash_token(raw_token), OneTimePurpose::VerifyEmail, Utc::now())
            .await?
            .ok_or(AuthError::TokenExpiredOrInvalid)?;

        let mut user = self
            .store
            .user_by_id(user_id)
            .await?
            .ok_or(AuthError::TokenExpiredOrInvalid)?;
        user.email_verified = true;
        self.store.update_user(&user).await?;
        Ok(())
    }

    /// Issue a password-reset token. `None` for unknown emails.
    pub async fn request_password_reset(&self, email: &str) -> Result<Option<String>, AuthError> {
        let email = email.trim().to_lowercase();
        let Some(user) = self.store.user_by_email(&email).await? else {
            return Ok(None);
        };
        let raw = self
            .issue_one_time(user.id, OneTimePurpose::PasswordReset, PASSWORD_RESET_TTL_HOURS)
            .await?;
        Ok(Some(raw))
    }

    /// Consume a reset token, replace the secret, revoke all sessions.
    pub async fn reset_password(&self, raw_token: &str, new_password: &str) -> Result<(), AuthError> {
        let user_id = self
            .store
            .consume_one_time(
                &hash_token(raw_token),
                OneTimePurpose::PasswordReset,
                Utc::now(),
            )
            .await?
            .ok_or(AuthError::TokenExpiredOrInvalid)?;

        let mut user = self
            .store
            .user_by_id(user_id)
            .await?
            .ok_or(AuthError::TokenExpiredOrInvalid)?;
        user.password_hash = Some(hash_password(new_password));
        self.store.update_user(&user).await?;
        self.store
            .revoke_all_refresh_for_user(user_id, Utc::now())
            .await?;
        Ok(())
    }

    // ---- Invites ---------------------------------------------------------

    /// Create a shareable invite link token for a project.
    pub async fn create_invite(
        &self,
        project_id: Uuid,
        created_by: Uuid,
        ttl_hours: Option<i64>,
    ) -> Result<String, AuthError> {
        let raw = generate_opaque_token();
        let now = Utc::now();
        let invite = InviteLink {
            id: Uuid::new_v4(),
            project_id,
            token_hash: hash_token(&raw),
            expires_at: ttl_hours.map(|h| now + Duration::hours(h)),
            is_revoked: false,
            created_by,
            created_at: now,
        };
        self.store.insert_invite(&invite).await?;
        Ok(raw)
    }

    /// Join the inviting project as a new identity and issue a session.
    pub async fn accept_invite(
        &self,
        raw_invite: &str,
        email: &str,
        display_name: &str,
        password: &str,
    ) -> Result<(AuthContext, SessionTokens), AuthError> {
        let invite = self
            .store
            .invite_by_hash(&hash_token(raw_invite))
            .await?
            .ok_or(AuthError::TokenExpiredOrInvalid)?;
        if invite.is_revoked {
            return Err(AuthError::TokenExpiredOrInvalid);
        }
        if invite.expires_at.is_some_and(|at| at < Utc::now()) {
            return Err(AuthError::TokenExpiredOrInvalid);
        }
        let project = self
            .store
            .project_by_id(invite.project_id)
            .await?
            .ok_or(AuthError::TokenExpiredOrInvalid)?;

        let email = email.trim().to_lowercase();
        if self.store.user_by_email(&email).await?.is_some() {
            return Err(AuthError::EmailTaken);
        }
        let user = User::new(display_name, &email, Some(hash_password(password)));
        match self.store.insert_user(&user).await {
            Ok(()) => {}
            Err(StorageError::Conflict(_)) => return Err(AuthError::EmailTaken),
            Err(e) => return Err(e.into()),
        }
        let member = Member::new(project.id, user.id, display_name.trim());
        self.store.insert_member(&member).await?;

        let (raw_refresh, session) = self.build_refresh(user.id, false, None);
        self.store.insert_refresh(&session).await?;
        let tokens = self.make_tokens(user.id, raw_refresh, &session);
        Ok((AuthContext { user, member }, tokens))
    }
}
