//! In-memory store for tests and single-node dev runs
//!
//! Every trait method takes the single write lock for its whole
//! read-modify-write sequence, which gives the same atomicity the Postgres
//! backend gets from transactions.

use crate::storage::{
    async_trait, AuthStore, CalendarLens, EntryRecord, InviteLink, Member, OneTimePurpose,
    OneTimeToken, Project, RefreshSession, StorageError, User,
};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Default)]
struct Inner {
    users: HashMap<Uuid, User>,
    projects: HashMap<Uuid, Project>,
    members: HashMap<Uuid, Member>,
    refresh_sessions: HashMap<Uuid, RefreshSession>,
    one_time_tokens: HashMap<Uuid, OneTimeToken>,
    invites: HashMap<Uuid, InviteLink>,
    lenses: HashMap<Uuid, CalendarLens>,
    entries: HashMap<Uuid, EntryRecord>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuthStore for MemoryStore {
    async fn insert_user(&self, user: &User) -> Result<(), StorageError> {
        let mut inner = self.inner.write();
        if inner.users.values().any(|u| u.email == user.email) {
            return Err(StorageError::Conflict(format!(
                "email already registered: {}",
                user.email
            )));
        }
        inner.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn user_by_id(&self, id: Uuid) -> Result<Option<User>, StorageError> {
        Ok(self.inner.read().users.get(&id).cloned())
    }

    async fn user_by_email(&self, email: &str) -> Result<Option<User>, StorageError> {
        Ok(self
            .inner
            .read()
            .users
            .values()
            .find(|u| u.email == email)
            .cloned())
    }

    async fn update_user(&self, user: &User) -> Result<(), StorageError> {
        let mut inner = self.inner.write();
        if !inner.users.contains_key(&user.id) {
            return Err(StorageError::NotFound(format!("user {}", user.id)));
        }
        inner.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn insert_project(&self, project: &Project) -> Result<(), StorageError> {
        self.inner.write().projects.insert(project.id, project.clone());
        Ok(())
    }

    async fn project_by_id(&self, id: Uuid) -> Result<Option<Project>, StorageError> {
        Ok(self.inner.read().projects.get(&id).cloned())
    }

    async fn insert_member(&self, member: &Member) -> Result<(), StorageError> {
        self.inner.write().members.insert(member.id, member.clone());
        Ok(())
    }

    async fn member_for_user(&self, user_id: Uuid) -> Result<Option<Member>, StorageError> {
        Ok(self
            .inner
            .read()
            .members
            .values()
            .find(|m| m.user_id == user_id)
            .cloned())
    }

    async fn members_for_project(&self, project_id: Uuid) -> Result<Vec<Member>, StorageError> {
        Ok(self
            .inner
            .read()
            .members
            .values()
            .filter(|m| m.project_id == project_id)
            .cloned()
            .collect())
    }

    async fn insert_refresh(&self, session: &RefreshSession) -> Result<(), StorageError> {
        self.inner
            .write()
            .refresh_sessions
            .insert(session.id, session.clone());
        Ok(())
    }

    async fn refresh_by_hash(&self, hash: &str) -> Result<Option<RefreshSession>, StorageError> {
        Ok(self
            .inner
            .read()
            .refresh_sessions
            .values()
            .find(|s| s.token_hash == hash)
            .cloned())
    }

    async fn revoke_refresh(&self, id: Uuid, now: DateTime<Utc>) -> Result<(), StorageError> {
        let mut inner = self.inner.write();
        if let Some(session) = inner.refresh_sessions.get_mut(&id) {
            if session.revoked_at.is_none() {
                session.revoked_at = Some(now);
            }
        }
        Ok(())
    }

    async fn rotate_refresh(
        &self,
        old_id: Uuid,
        next: &RefreshSession,
        now: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        let mut inner = self.inner.write();
        let Some(old) = inner.refresh_sessions.get_mut(&old_id) else {
            return Ok(false);
        };
        if !old.is_active(now) {
            return Ok(false);
        }
        old.revoked_at = Some(now);
        inner.refresh_sessions.insert(next.id, next.clone());
        Ok(true)
    }

    async fn revoke_all_refresh_for_user(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, StorageError> {
        let mut inner = self.inner.write();
        let mut revoked = 0;
        for session in inner.refresh_sessions.values_mut() {
            if session.user_id == user_id && session.is_active(now) {
                session.revoked_at = Some(now);
                revoked += 1;
            }
        }
        Ok(revoked)
    }

    async fn insert_one_time(&self, token: &OneTimeToken) -> Result<(), StorageError> {
        self.inner
            .write()
            .one_time_tokens
            .insert(token.id, token.clone());
        Ok(())
    }

    async fn consume_one_time(
        &self,
        hash: &str,
        purpose: OneTimePurpose,
        now: DateTime<Utc>,
    ) -> Result<Option<Uuid>, StorageError> {
        let mut inner = self.inner.write();
        let Some(token) = inner.one_time_tokens.values_mut().find(|t| {
            t.token_hash == hash
                && t.purpose == purpose
                && t.used_at.is_none()
                && t.expires_at > now
        }) else {
            return Ok(None);
        };
        token.used_at = Some(now);
        Ok(Some(token.user_id))
    }

    async fn insert_invite(&self, invite: &InviteLink) -> Result<(), StorageError> {
        self.inner.write().invites.insert(invite.id, invite.clone());
        Ok(())
    }

    async fn invite_by_hash(&self, hash: &str) -> Result<Option<InviteLink>, StorageError> {
        Ok(self
            .inner
            .read()
            .invites
            .values()
            .find(|i| i.token_hash == hash)
            .cloned())
    }

    async fn insert_lens(&self, lens: &CalendarLens) -> Result<(), StorageError> {
        self.inner.write().lenses.insert(lens.id, lens.clone());
        Ok(())
    }

    async fn lens_by_id(&self, id: Uuid) -> Result<Option<CalendarLens>, StorageError> {
        Ok(self.inner.read().lenses.get(&id).cloned())
    }

    async fn lenses_for_project(
        &self,
        project_id: Uuid,
    ) -> Result<Vec<CalendarLens>, StorageError> {
        let mut lenses: Vec<CalendarLens> = self
            .inner
            .read()
            .lenses
            .values()
            .filter(|l| l.project_id == project_id)
            .cloned()
            .collect();
        lenses.sort_by_key(|l| (std::cmp::Reverse(l.is_default), l.created_at));
        Ok(lenses)
    }

    async fn update_lens(&self, lens: &CalendarLens) -> Result<(), StorageError> {
        let mut inner = self.inner.write();
        if !inner.lenses.contains_key(&lens.id) {
            return Err(StorageError::NotFound(format!("lens {}", lens.id)));
        }
        inner.lenses.insert(lens.id, lens.clone());
        Ok(())
    }

    async fn delete_lens(&self, id: Uuid) -> Result<(), StorageError> {
        self.inner.write().lenses.remove(&id);
        Ok(())
    }

    async fn clear_default_lens(&self, project_id: Uuid) -> Result<(), StorageError> {
        let mut inner = self.inner.write();
        for lens in inner.lenses.values_mut() {
            if lens.project_id == project_id {
                lens.is_default = false;
            }
        }
        Ok(())
    }

    async fn insert_entry(&self, entry: &EntryRecord) -> Result<(), StorageError> {
        self.inner.write().entries.insert(entry.id, entry.clone());
        Ok(())
    }

    async fn entry_by_id(&self, id: Uuid) -> Result<Option<EntryRecord>, StorageError> {
        Ok(self.inner.read().entries.get(&id).cloned())
    }

    async fn entries_for_project(
        &self,
        project_id: Uuid,
    ) -> Result<Vec<EntryRecord>, StorageError> {
        let mut entries: Vec<EntryRecord> = self
            .inner
            .read()
            .entries
            .values()
            .filter(|e| e.project_id == project_id && e.deleted_at.is_none())
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.created_at);
        Ok(entries)
    }

    async fn update_entry(&self, entry: &EntryRecord) -> Result<(), StorageError> {
        let mut inner = self.inner.write();
        if !inner.entries.contains_key(&entry.id) {
            return Err(StorageError::NotFound(format!("entry {}", entry.id)));
        }
        inner.entries.insert(entry.id, entry.clone());
        Ok(())
    }

    async fn hide_entries_for_lens(
        &self,
        project_id: Uuid,
        lens_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, StorageError> {
        let mut inner = self.inner.write();
        let mut hidden = 0;
        for entry in inner.entries.values_mut() {
            if entry.project_id == project_id
                && entry.lens_id == Some(lens_id)
                && entry.deleted_at.is_none()
            {
                entry.deleted_at = Some(now);
                hidden += 1;
            }
        }
        Ok(hidden)
    }
}
