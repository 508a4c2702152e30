//! Calendar entries
//!
//! Minimal entry records with soft-hide deletion. Visibility follows the
//! lens: a lens-scoped entry is visible only to members who can see that
//! lens, an unscoped entry to the whole project. Mutations publish on the
//! project events channel and, for lens-scoped entries, on the lens's
//! calendar channel.

use crate::auth::member_can_access_lens;
use crate::calendar::CalendarError;
use crate::channels::Channel;
use crate::live::{LiveBroker, LiveEvent, LiveEventKind};
use crate::storage::{AuthStore, CalendarLens, EntryRecord, Member};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Wire shape of an entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryView {
    pub id: Uuid,
    pub project_id: Uuid,
    pub lens_id: Option<Uuid>,
    pub title: String,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&EntryRecord> for EntryView {
    fn from(entry: &EntryRecord) -> Self {
        Self {
            id: entry.id,
            project_id: entry.project_id,
            lens_id: entry.lens_id,
            title: entry.title.clone(),
            created_by: entry.created_by,
            created_at: entry.created_at,
            updated_at: entry.updated_at,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewEntry {
    pub title: String,
    pub lens_id: Option<Uuid>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryPatch {
    pub title: Option<String>,
}

pub struct EntryService {
    store: Arc<dyn AuthStore>,
    broker: Arc<LiveBroker>,
}

impl EntryService {
    pub fn new(store: Arc<dyn AuthStore>, broker: Arc<LiveBroker>) -> Self {
        Self { store, broker }
    }

    pub async fn create(&self, member: &Member, new: NewEntry) -> Result<EntryView, CalendarError> {
        let title = new.title.trim();
        if title.is_empty() {
            return Err(CalendarError::Validation("Entry title must not be empty"));
        }
        if let Some(lens_id) = new.lens_id {
            self.accessible_lens(member, lens_id).await?;
        }

        let now = Utc::now();
        let entry = EntryRecord {
            id: Uuid::new_v4(),
            project_id: member.project_id,
            lens_id: new.lens_id,
            title: title.to_string(),
            created_by: member.user_id,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        self.store.insert_entry(&entry).await?;

        self.publish(&entry, |payload| LiveEventKind::EntryCreated(payload));
        Ok(EntryView::from(&entry))
    }

    /// Entries visible to the member: unscoped ones plus those under lenses
    /// the member may see. Soft-hidden entries are already excluded by the
    /// store listing.
    pub async fn list_visible(&self, member: &Member) -> Result<Vec<EntryView>, CalendarError> {
        let entries = self.store.entries_for_project(member.project_id).await?;
        let lenses: HashMap<Uuid, CalendarLens> = self
            .store
            .lenses_for_project(member.project_id)
            .await?
            .into_iter()
            .map(|lens| (lens.id, lens))
            .collect();

        Ok(entries
            .iter()
            .filter(|entry| match entry.lens_id {
                None => true,
                Some(lens_id) => lenses
                    .get(&lens_id)
                    .is_some_and(|lens| member_can_access_lens(member, lens)),
            })
            .map(EntryView::from)
            .collect())
    }

    /// Fetch by id, soft-hidden or not. Hidden entries stay retrievable so
    /// a client holding an id can still resolve what it referred to.
    pub async fn get(&self, member: &Member, entry_id: Uuid) -> Result<EntryView, CalendarError> {
        let entry = self.visible_entry(member, entry_id).await?;
        Ok(EntryView::from(&entry))
    }

    pub async fn update(
        &self,
        member: &Member,
        entry_id: Uuid,
        patch: EntryPatch,
    ) -> Result<EntryView, CalendarError> {
        let mut entry = self.visible_entry(member, entry_id).await?;
        if let Some(title) = patch.title {
            let title = title.trim();
            if title.is_empty() {
                return Err(CalendarError::Validation("Entry title must not be empty"));
            }
            entry.title = title.to_string();
        }
        entry.updated_at = Utc::now();
        self.store.update_entry(&entry).await?;

        self.publish(&entry, |payload| LiveEventKind::EntryUpdated(payload));
        Ok(EntryView::from(&entry))
    }

    /// Soft-hide. Idempotent: deleting an already-hidden entry re-stamps it.
    pub async fn delete(&self, member: &Member, entry_id: Uuid) -> Result<(), CalendarError> {
        let mut entry = self.visible_entry(member, entry_id).await?;
        let now = Utc::now();
        entry.deleted_at = Some(now);
        entry.updated_at = now;
        self.store.update_entry(&entry).await?;

        let event = LiveEvent::new(
            entry.project_id,
            entry.lens_id,
            entry.id,
            LiveEventKind::EntryDeleted,
            now,
        );
        self.broker
            .publish(&Channel::ProjectEvents(entry.project_id).key(), event.clone());
        if let Some(lens_id) = entry.lens_id {
            self.broker.publish(&Channel::Calendar(lens_id).key(), event);
        }
        Ok(())
    }

    async fn visible_entry(
        &self,
        member: &Member,
        entry_id: Uuid,
    ) -> Result<EntryRecord, CalendarError> {
        let entry = self
            .store
            .entry_by_id(entry_id)
            .await?
            .ok_or(CalendarError::NotFound)?;
        if entry.project_id != member.project_id {
            return Err(CalendarError::NotFound);
        }
        if let Some(lens_id) = entry.lens_id {
            self.accessible_lens(member, lens_id).await?;
        }
        Ok(entry)
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

    fn publish(
        &self,
        entry: &EntryRecord,
        kind: impl FnOnce(serde_json::Value) -> LiveEventKind,
    ) {
        let payload = match serde_json::to_value(EntryView::from(entry)) {
            Ok(v) => v,
            Err(_) => return,
        };
        let event = LiveEvent::new(
            entry.project_id,
            entry.lens_id,
            entry.id,
            kind(payload),
            entry.updated_at,
        );
        self.broker
            .publish(&Channel::ProjectEvents(entry.project_id).key(), event.clone());
        if let Some(lens_id) = entry.lens_id {
            self.broker.publish(&Channel::Calendar(lens_id).key(), event);
        }
    }
}
