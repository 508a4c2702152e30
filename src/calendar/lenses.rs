//! Lens lifecycle
//!
//! Creation, sharing-list edits, default promotion and deletion. Ownership
//! rules: anyone with access may share a lens further, but rename, removing
//! members and deletion belong to the creator alone. A project always keeps
//! at most one default lens, and deleting the default promotes the oldest
//! surviving lens in its place.

use crate::auth::{is_lens_owner, member_can_access_lens};
use crate::calendar::CalendarError;
use crate::channels::Channel;
use crate::live::{CalendarDeletedPayload, LiveBroker, LiveEvent, LiveEventKind};
use crate::storage::{AuthStore, CalendarLens, Member};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Wire shape of a lens.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LensView {
    pub id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    pub member_ids: Vec<Uuid>,
    pub is_default: bool,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&CalendarLens> for LensView {
    fn from(lens: &CalendarLens) -> Self {
        Self {
            id: lens.id,
            project_id: lens.project_id,
            name: lens.name.clone(),
            member_ids: lens.member_ids.clone(),
            is_default: lens.is_default,
            created_by: lens.created_by,
            created_at: lens.created_at,
            updated_at: lens.updated_at,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewLens {
    pub name: String,
    #[serde(default)]
    pub member_ids: Vec<Uuid>,
    #[serde(default)]
    pub is_default: bool,
}

/// Field mask for patching; absent fields are left untouched.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LensPatch {
    pub name: Option<String>,
    pub member_ids: Option<Vec<Uuid>>,
    pub is_default: Option<bool>,
}

pub struct LensService {
    store: Arc<dyn AuthStore>,
    broker: Arc<LiveBroker>,
}

impl LensService {
    pub fn new(store: Arc<dyn AuthStore>, broker: Arc<LiveBroker>) -> Self {
        Self { store, broker }
    }

    /// Lenses in the member's project the member may see.
    pub async fn list_visible(&self, member: &Member) -> Result<Vec<LensView>, CalendarError> {
        let lenses = self.store.lenses_for_project(member.project_id).await?;
        Ok(lenses
            .iter()
            .filter(|lens| member_can_access_lens(member, lens))
            .map(LensView::from)
            .collect())
    }

    pub async fn get(&self, member: &Member, lens_id: Uuid) -> Result<LensView, CalendarError> {
        let lens = self.accessible_lens(member, lens_id).await?;
        Ok(LensView::from(&lens))
    }

    pub async fn create(&self, member: &Member, new: NewLens) -> Result<LensView, CalendarError> {
        let name = new.name.trim();
        if name.is_empty() {
            return Err(CalendarError::Validation("Lens name must not be empty"));
        }
        let member_ids = self.validated_member_ids(member, new.member_ids).await?;

        if new.is_default {
            self.store.clear_default_lens(member.project_id).await?;
        }
        let now = Utc::now();
        let lens = CalendarLens {
            id: Uuid::new_v4(),
            project_id: member.project_id,
            name: name.to_string(),
            member_ids,
            is_default: new.is_default,
            created_by: member.user_id,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_lens(&lens).await?;

        self.publish_updated(&lens);
        Ok(LensView::from(&lens))
    }

    /// Apply a field mask. Rename and removing members require ownership;
    /// anyone with access may extend the sharing list or re-point the
    /// default flag.
    pub async fn patch(
        &self,
        member: &Member,
        lens_id: Uuid,
        patch: LensPatch,
    ) -> Result<LensView, CalendarError> {
        let mut lens = self.accessible_lens(member, lens_id).await?;

        if let Some(name) = patch.name {
            if !is_lens_owner(member, &lens) {
                return Err(CalendarError::Forbidden("Only the owner can rename a lens"));
            }
            let name = name.trim();
            if name.is_empty() {
                return Err(CalendarError::Validation("Lens name must not be empty"));
            }
            lens.name = name.to_string();
        }

        if let Some(member_ids) = patch.member_ids {
            let member_ids = self.validated_member_ids(member, member_ids).await?;
            let old: HashSet<Uuid> = lens.member_ids.iter().copied().collect();
            let removes_someone = old.iter().any(|id| !member_ids.contains(id));
            if removes_someone && !is_lens_owner(member, &lens) {
                return Err(CalendarError::Forbidden(
                    "Only the owner can remove members from a lens",
                ));
            }
            lens.member_ids = member_ids;
        }

        if let Some(is_default) = patch.is_default {
            if is_default && !lens.is_default {
                self.store.clear_default_lens(member.project_id).await?;
            }
            lens.is_default = is_default;
        }

        lens.updated_at = Utc::now();
        self.store.update_lens(&lens).await?;

        self.publish_updated(&lens);
        Ok(LensView::from(&lens))
    }

    /// Owner-only. Soft-hides the lens's entries, and when the default lens
    /// dies the oldest surviving lens is promoted so the project never loses
    /// its default view.
    pub async fn delete(&self, member: &Member, lens_id: Uuid) -> Result<(), CalendarError> {
        let lens = self.accessible_lens(member, lens_id).await?;
        if !is_lens_owner(member, &lens) {
            return Err(CalendarError::Forbidden("Only the owner can delete a lens"));
        }

        let now = Utc::now();
        let hidden = self
            .store
            .hide_entries_for_lens(member.project_id, lens.id, now)
            .await?;
        self.store.delete_lens(lens.id).await?;

        if lens.is_default {
            let mut remaining = self.store.lenses_for_project(member.project_id).await?;
            remaining.sort_by_key(|l| l.created_at);
            if let Some(mut oldest) = remaining.into_iter().next() {
                oldest.is_default = true;
                oldest.updated_at = now;
                self.store.update_lens(&oldest).await?;
                self.publish_updated(&oldest);
            }
        }

        info!(lens_id = %lens.id, hidden, "Lens deleted");
        let event = LiveEvent::new(
            lens.project_id,
            Some(lens.id),
            lens.id,
            LiveEventKind::CalendarDeleted(CalendarDeletedPayload {
                id: lens.id,
                project_id: lens.project_id,
            }),
            now,
        );
        self.broker
            .publish(&Channel::ProjectMeta(lens.project_id).key(), event.clone());
        self.broker.publish(&Channel::Calendar(lens.id).key(), event);
        Ok(())
    }

    async fn accessible_lens(
        &self,
        member: &Member,
        lens_id: Uuid,
    ) -> Result<CalendarLens, CalendarError> {
        let lens = self
            .store
            .lens_by_id(lens_id)
            .await?
            .ok_or(CalendarError::NotFound)?;
        if lens.project_id != member.project_id {
            return Err(CalendarError::NotFound);
        }
        if !member_can_access_lens(member, &lens) {
            return Err(CalendarError::Forbidden("No access to this lens"));
        }
        Ok(lens)
    }

    /// Sharing lists may only name members of the same project. Deduplicates
    /// while preserving first-seen order.
    async fn validated_member_ids(
        &self,
        member: &Member,
        ids: Vec<Uuid>,
    ) -> Result<Vec<Uuid>, CalendarError> {
        let known: HashSet<Uuid> = self
            .store
            .members_for_project(member.project_id)
            .await?
            .into_iter()
            .map(|m| m.id)
            .collect();
        let mut seen = HashSet::new();
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if !known.contains(&id) {
                return Err(CalendarError::Validation("Unknown member in sharing list"));
            }
            if seen.insert(id) {
                out.push(id);
            }
        }
        Ok(out)
    }

    fn publish_updated(&self, lens: &CalendarLens) {
        let payload = match serde_json::to_value(LensView::from(lens)) {
            Ok(v) => v,
            Err(_) => return,
        };
        let event = LiveEvent::new(
            lens.project_id,
            Some(lens.id),
            lens.id,
            LiveEventKind::CalendarUpdated(payload),
            lens.updated_at,
        );
        self.broker
            .publish(&Channel::ProjectMeta(lens.project_id).key(), event);
    }
}
