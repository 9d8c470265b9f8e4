//! Registration history of a single data object.
//!
//! Every data object owns a [`RegistrationHistory`]: two time-sorted event logs
//! (transform events and parent-space events) plus a cached "current" value
//! selected through an [`igt_types::ActiveTime`] cursor.
//!
//! Objects that don't take part in the space graph use the shared
//! [`RegistrationHistory::null`] history, which ignores all mutation.

mod event;
mod history;
mod observers;
mod persistence;

pub use event::{ParentSpaceEvent, RegistrationKind, TransformEvent};
pub use history::{HistoryLog, RegistrationHistory};
pub use observers::{HistoryChanged, ObserverId};
pub use persistence::{
    HistoryDocument, ParentSpaceEventDocument, PersistenceError, TransformEventDocument,
};
