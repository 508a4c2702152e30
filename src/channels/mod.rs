//! Broadcast channel naming
//!
//! A channel is a string key partitioning live events into topics:
//! - `project-events:{project_id}` — entry activity visible to the whole project
//! - `project-meta:{project_id}`   — project/lens/member metadata changes
//! - `calendar:{lens_id}`          — activity scoped to one shareable calendar lens
//!
//! Channels have no persisted identity; they exist only as the set of queues
//! currently subscribed under their key in the [`LiveBroker`](crate::live::LiveBroker).

use std::fmt;
use thiserror::Error;
use uuid::Uuid;

const PROJECT_EVENTS_PREFIX: &str = "project-events:";
const PROJECT_META_PREFIX: &str = "project-meta:";
const CALENDAR_PREFIX: &str = "calendar:";

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("unknown channel prefix")]
    UnknownPrefix,

    #[error("invalid channel id: {0}")]
    InvalidId(String),
}

/// A validated broadcast channel name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Project-wide entry feed.
    ProjectEvents(Uuid),
    /// Project metadata feed (lenses, members, project settings).
    ProjectMeta(Uuid),
    /// Feed for a single calendar lens.
    Calendar(Uuid),
}

impl Channel {
    /// Parse a channel key back into its typed form.
    pub fn parse(key: &str) -> Result<Self, ChannelError> {
        let (variant, raw_id): (fn(Uuid) -> Channel, &str) =
            if let Some(rest) = key.strip_prefix(PROJECT_EVENTS_PREFIX) {
                (Channel::ProjectEvents, rest)
            } else if let Some(rest) = key.strip_prefix(PROJECT_META_PREFIX) {
                (Channel::ProjectMeta, rest)
            } else if let Some(rest) = key.strip_prefix(CALENDAR_PREFIX) {
                (Channel::Calendar, rest)
            } else {
                return Err(ChannelError::UnknownPrefix);
            };

        let id = Uuid::parse_str(raw_id).map_err(|_| ChannelError::InvalidId(raw_id.to_string()))?;
        Ok(variant(id))
    }

    /// The registry key this channel lives under.
    pub fn key(&self) -> String {
        self.to_string()
    }

    /// The project this channel belongs to, when the key carries one.
    pub fn project_id(&self) -> Option<Uuid> {
        match self {
            Channel::ProjectEvents(id) | Channel::ProjectMeta(id) => Some(*id),
            Channel::Calendar(_) => None,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::ProjectEvents(id) => write!(f, "{PROJECT_EVENTS_PREFIX}{id}"),
            Channel::ProjectMeta(id) => write!(f, "{PROJECT_META_PREFIX}{id}"),
            Channel::Calendar(id) => write!(f, "{CALENDAR_PREFIX}{id}"),
        }
    }
}
