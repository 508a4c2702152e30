//! Calendar domain
//!
//! - Lenses: named, shareable filtered views over a project's entries
//! - Entries: minimal records with soft-hide semantics
//!
//! Every successful mutation publishes a live event: lens changes on the
//! project meta channel, entry changes on the project events channel and,
//! when lens-scoped, on the lens's own calendar channel.

mod entries;
mod lenses;

pub use entries::{EntryPatch, EntryService, EntryView, NewEntry};
pub use lenses::{LensPatch, LensService, LensView, NewLens};

use crate::storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CalendarError {
    #[error("not found")]
    NotFound,

    #[error("{0}")]
    Forbidden(&'static str),

    #[error("{0}")]
    Validation(&'static str),

    #[error(transparent)]
    Store(#[from] StorageError),
}
