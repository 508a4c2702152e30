//! Access resolution
//!
//! Maps an authenticated membership to the lenses and live channels it may
//! see. Channel checks re-read the lens at decision time, so a sharing
//! change takes effect on the next check rather than at some cached state.

use crate::channels::Channel;
use crate::storage::{AuthStore, CalendarLens, Member, StorageError};
use std::sync::Arc;
use uuid::Uuid;

/// Whether a member may see a lens: listed explicitly, or its creator.
pub fn member_can_access_lens(member: &Member, lens: &CalendarLens) -> bool {
    lens.member_ids.contains(&member.id) || lens.created_by == member.user_id
}

/// Whether a member owns a lens (rename, member removal and deletion are
/// owner-only).
pub fn is_lens_owner(member: &Member, lens: &CalendarLens) -> bool {
    lens.created_by == member.user_id
}

pub struct AccessResolver {
    store: Arc<dyn AuthStore>,
}

impl AccessResolver {
    pub fn new(store: Arc<dyn AuthStore>) -> Self {
        Self { store }
    }

    /// Authorize a live-channel subscription. Project-wide feeds need only
    /// the project to match; calendar channels also need lens access, and
    /// the lens must still exist.
    pub async fn can_access_channel(
        &self,
        member: &Member,
        channel: &Channel,
    ) -> Result<bool, StorageError> {
        match channel {
            Channel::ProjectEvents(project_id) | Channel::ProjectMeta(project_id) => {
                Ok(*project_id == member.project_id)
            }
            Channel::Calendar(lens_id) => {
                let Some(lens) = self.store.lens_by_id(*lens_id).await? else {
                    return Ok(false);
                };
                Ok(lens.project_id == member.project_id && member_can_access_lens(member, &lens))
            }
        }
    }

    /// Ids of every lens in the member's project the member may see, in
    /// storage order.
    pub async fn visible_calendar_ids(&self, member: &Member) -> Result<Vec<Uuid>, StorageError> {
        let lenses = self.store.lenses_for_project(member.project_id).await?;
        Ok(lenses
            .into_iter()
            .filter(|lens| member_can_access_lens(member, lens))
            .map(|lens| lens.id)
            .collect())
    }
}
