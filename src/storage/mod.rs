//! Storage backends
//!
//! - Postgres: durable storage for identities, refresh-session chains,
//!   one-time tokens, invites, lenses and calendar entries
//! - Memory: lock-guarded in-process store for tests and single-node dev runs

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::{PostgresConfig, PostgresStore};

pub use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

/// Storage errors
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),
}

/// An authenticated subject.
#[derive(Debug, Clone)]
pub struct User {
    pub id: Uuid,
    pub display_name: String,
    pub email: String,
    /// Absent for accounts that never set a password.
    pub password_hash: Option<String>,
    pub email_verified: bool,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(display_name: &str, email: &str, password_hash: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            display_name: display_name.trim().to_string(),
            email: email.trim().to_lowercase(),
            password_hash,
            email_verified: false,
            created_at: Utc::now(),
        }
    }
}

/// A family project: the single sharing scope a member belongs to.
#[derive(Debug, Clone)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl Project {
    pub fn new(name: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            created_at: Utc::now(),
        }
    }
}

/// A user's membership in a project. Each user holds exactly one.
#[derive(Debug, Clone)]
pub struct Member {
    pub id: Uuid,
    pub project_id: Uuid,
    pub user_id: Uuid,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
}

impl Member {
    pub fn new(project_id: Uuid, user_id: Uuid, display_name: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            project_id,
            user_id,
            display_name: display_name.to_string(),
            created_at: Utc::now(),
        }
    }
}

/// One link in a refresh-token rotation chain. Only the hash of the raw
/// value is ever stored.
#[derive(Debug, Clone)]
pub struct RefreshSession {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub remember_me: bool,
    pub revoked_at: Option<DateTime<Utc>>,
    /// The session this one was rotated from, if any.
    pub rotated_from: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl RefreshSession {
    /// Unrevoked and unexpired at `now`.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && self.expires_at > now
    }
}

/// What a one-time token is good for. A token presented for the wrong
/// purpose is rejected even if its hash matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OneTimePurpose {
    VerifyEmail,
    PasswordReset,
}

impl OneTimePurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            OneTimePurpose::VerifyEmail => "verify_email",
            OneTimePurpose::PasswordReset => "password_reset",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "verify_email" => Some(OneTimePurpose::VerifyEmail),
            "password_reset" => Some(OneTimePurpose::PasswordReset),
            _ => None,
        }
    }
}

/// A single-use token (email verification, password reset).
#[derive(Debug, Clone)]
pub struct OneTimeToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub purpose: OneTimePurpose,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// A shareable invite into a project.
#[derive(Debug, Clone)]
pub struct InviteLink {
    pub id: Uuid,
    pub project_id: Uuid,
    pub token_hash: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_revoked: bool,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
}

/// A named, shareable, filtered presentation of calendar entries.
#[derive(Debug, Clone)]
pub struct CalendarLens {
    pub id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    /// Member ids explicitly allowed to see this lens. The creator always
    /// has access regardless of this list.
    pub member_ids: Vec<Uuid>,
    pub is_default: bool,
    /// User id of the creator.
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A calendar entry, kept minimal: enough for visibility and soft-hide
/// semantics. Full entity validation lives outside this core.
#[derive(Debug, Clone)]
pub struct EntryRecord {
    pub id: Uuid,
    pub project_id: Uuid,
    pub lens_id: Option<Uuid>,
    pub title: String,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Soft-hide marker; hidden entries drop out of listings but the raw
    /// record stays retrievable by id.
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Durable bookkeeping the session protocol and access resolver depend on.
///
/// The read-modify-write sequences (`rotate_refresh`, `consume_one_time`,
/// `revoke_all_refresh_for_user`) must be transactional: a concurrent caller
/// must observe either the old state or the fully-applied new state.
#[async_trait]
pub trait AuthStore: Send + Sync {
    // Identities
    async fn insert_user(&self, user: &User) -> Result<(), StorageError>;
    async fn user_by_id(&self, id: Uuid) -> Result<Option<User>, StorageError>;
    async fn user_by_email(&self, email: &str) -> Result<Option<User>, StorageError>;
    async fn update_user(&self, user: &User) -> Result<(), StorageError>;

    // Project graph
    async fn insert_project(&self, project: &Project) -> Result<(), StorageError>;
    async fn project_by_id(&self, id: Uuid) -> Result<Option<Project>, StorageError>;
    async fn insert_member(&self, member: &Member) -> Result<(), StorageError>;
    async fn member_for_user(&self, user_id: Uuid) -> Result<Option<Member>, StorageError>;
    async fn members_for_project(&self, project_id: Uuid) -> Result<Vec<Member>, StorageError>;

    // Refresh-session chains
    async fn insert_refresh(&self, session: &RefreshSession) -> Result<(), StorageError>;
    async fn refresh_by_hash(&self, hash: &str) -> Result<Option<RefreshSession>, StorageError>;
    /// Set the revocation timestamp; idempotent (a second call is a no-op).
    async fn revoke_refresh(&self, id: Uuid, now: DateTime<Utc>) -> Result<(), StorageError>;
    /// Atomically revoke `old_id` (iff still active at `now`) and insert
    /// `next`. Returns false without inserting when the old session was
    /// already revoked or expired — the reuse-detection signal.
    async fn rotate_refresh(
        &self,
        old_id: Uuid,
        next: &RefreshSession,
        now: DateTime<Utc>,
    ) -> Result<bool, StorageError>;
    /// Revoke every active session for the subject. Returns how many.
    async fn revoke_all_refresh_for_user(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, StorageError>;

    // One-time tokens
    async fn insert_one_time(&self, token: &OneTimeToken) -> Result<(), StorageError>;
    /// Atomically consume a one-time token: hash must match, purpose must
    /// match, token must be unused and unexpired. Marks it used and returns
    /// the owning user id, or `None` for every failure mode alike.
    async fn consume_one_time(
        &self,
        hash: &str,
        purpose: OneTimePurpose,
        now: DateTime<Utc>,
    ) -> Result<Option<Uuid>, StorageError>;

    // Invites
    async fn insert_invite(&self, invite: &InviteLink) -> Result<(), StorageError>;
    async fn invite_by_hash(&self, hash: &str) -> Result<Option<InviteLink>, StorageError>;

    // Lenses
    async fn insert_lens(&self, lens: &CalendarLens) -> Result<(), StorageError>;
    async fn lens_by_id(&self, id: Uuid) -> Result<Option<CalendarLens>, StorageError>;
    async fn lenses_for_project(&self, project_id: Uuid)
        -> Result<Vec<CalendarLens>, StorageError>;
    async fn update_lens(&self, lens: &CalendarLens) -> Result<(), StorageError>;
    async fn delete_lens(&self, id: Uuid) -> Result<(), StorageError>;
    /// Clear `is_default` on every lens in the project.
    async fn clear_default_lens(&self, project_id: Uuid) -> Result<(), StorageError>;

    // Calendar entries
    async fn insert_entry(&self, entry: &EntryRecord) -> Result<(), StorageError>;
    /// Raw record, soft-hidden or not (audit path).
    async fn entry_by_id(&self, id: Uuid) -> Result<Option<EntryRecord>, StorageError>;
    /// Listing excludes soft-hidden entries.
    async fn entries_for_project(&self, project_id: Uuid)
        -> Result<Vec<EntryRecord>, StorageError>;
    async fn update_entry(&self, entry: &EntryRecord) -> Result<(), StorageError>;
    /// Soft-hide every visible entry tied to the lens. Returns how many.
    async fn hide_entries_for_lens(
        &self,
        project_id: Uuid,
        lens_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, StorageError>;
}
