//! Live event wire model
//!
//! Every event delivered over a streaming connection is one envelope:
//! `{id, projectId, calendarId|null, type, entityId, payload, updatedAt}`.
//! The `type`/`payload` pair is a closed sum type — each kind declares the
//! payload shape it carries, there is no open dictionary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Event kind plus its payload. Serialized adjacently so the wire carries
/// a `type` string and an optional `payload` object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload")]
pub enum LiveEventKind {
    #[serde(rename = "event.created")]
    EntryCreated(serde_json::Value),
    #[serde(rename = "event.updated")]
    EntryUpdated(serde_json::Value),
    #[serde(rename = "event.deleted")]
    EntryDeleted,
    #[serde(rename = "event.started")]
    EntryStarted,
    #[serde(rename = "event.stopped")]
    EntryStopped,
    #[serde(rename = "comment.added")]
    CommentAdded(serde_json::Value),
    #[serde(rename = "calendar.updated")]
    CalendarUpdated(serde_json::Value),
    #[serde(rename = "calendar.deleted")]
    CalendarDeleted(CalendarDeletedPayload),
    #[serde(rename = "member.changed")]
    MemberChanged,
    #[serde(rename = "project.updated")]
    ProjectUpdated(serde_json::Value),
    #[serde(rename = "system.connected")]
    Connected(ConnectedPayload),
    #[serde(rename = "system.resync_required")]
    ResyncRequired,
    #[serde(rename = "system.ping")]
    Heartbeat,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CalendarDeletedPayload {
    pub id: Uuid,
    #[serde(rename = "projectId")]
    pub project_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectedPayload {
    /// Channel keys this connection was subscribed to.
    pub channels: Vec<String>,
}

/// An immutable state-change notification. Never persisted; delivery is
/// best-effort, at-most-once per subscriber queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LiveEvent {
    pub id: Uuid,
    #[serde(rename = "projectId")]
    pub project_id: Uuid,
    #[serde(rename = "calendarId")]
    pub calendar_id: Option<Uuid>,
    #[serde(flatten)]
    pub kind: LiveEventKind,
    #[serde(rename = "entityId")]
    pub entity_id: Uuid,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

impl LiveEvent {
    pub fn new(
        project_id: Uuid,
        calendar_id: Option<Uuid>,
        entity_id: Uuid,
        kind: LiveEventKind,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            project_id,
            calendar_id,
            kind,
            entity_id,
            updated_at,
        }
    }

    /// Synthetic marker telling a subscriber its queue was reset and it must
    /// refetch authoritative state.
    pub fn resync(project_id: Uuid, calendar_id: Option<Uuid>, entity_id: Uuid) -> Self {
        Self::new(
            project_id,
            calendar_id,
            entity_id,
            LiveEventKind::ResyncRequired,
            Utc::now(),
        )
    }

    pub fn heartbeat(project_id: Uuid, calendar_id: Option<Uuid>) -> Self {
        Self::new(
            project_id,
            calendar_id,
            project_id,
            LiveEventKind::Heartbeat,
            Utc::now(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_shape() {
        let project_id = Uuid::new_v4();
        let event = LiveEvent::new(
            project_id,
            None,
            project_id,
            LiveEventKind::Connected(ConnectedPayload {
                channels: vec![format!("project-events:{project_id}")],
            }),
            Utc::now(),
        );

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "system.connected");
        assert_eq!(value["projectId"], project_id.to_string());
        assert!(value["calendarId"].is_null());
        assert!(value["payload"]["channels"].is_array());
        assert!(value.get("updatedAt").is_some());
    }

    #[test]
    fn test_payloadless_kind() {
        let id = Uuid::new_v4();
        let event = LiveEvent::resync(id, None, id);
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "system.resync_required");
        assert!(value.get("payload").is_none());
    }

    #[test]
    fn test_roundtrip() {
        let id = Uuid::new_v4();
        let event = LiveEvent::new(
            id,
            Some(Uuid::new_v4()),
            Uuid::new_v4(),
            LiveEventKind::EntryCreated(serde_json::json!({"title": "dentist"})),
            Utc::now(),
        );
        let json = serde_json::to_string(&event).unwrap();
        let back: LiveEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }
}
