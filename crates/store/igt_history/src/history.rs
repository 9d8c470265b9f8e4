use igt_types::{ActiveTime, ObjectId, RegistrationTime, Transform};

use crate::event::{insert_sorted, latest_at, remove_at};
use crate::observers::HistoryObservers;
use crate::{HistoryChanged, ObserverId, ParentSpaceEvent, RegistrationKind, TransformEvent};

/// The shared history of everything that never takes part in registration.
static NULL_HISTORY: RegistrationHistory = RegistrationHistory::Null;

/// The registration history of one data object.
///
/// Either a real [`HistoryLog`], or the null history which stays at identity
/// without parent and silently ignores every mutation.
#[derive(Debug)]
pub enum RegistrationHistory {
    Null,
    Log(Box<HistoryLog>),
}

impl Default for RegistrationHistory {
    fn default() -> Self {
        Self::new()
    }
}

/// Both event logs of a tracked history plus the cached current state.
///
/// Invariant: the cache always equals the last event of each log visible through
/// `active_time`, or identity / no parent if there is none.
#[derive(Debug, Default)]
pub struct HistoryLog {
    transforms: Vec<TransformEvent>,
    parent_spaces: Vec<ParentSpaceEvent>,
    active_time: ActiveTime,

    current_transform: Transform,
    current_parent: Option<ObjectId>,

    observers: HistoryObservers,
}

impl HistoryLog {
    pub(crate) fn from_events(
        mut transforms: Vec<TransformEvent>,
        mut parent_spaces: Vec<ParentSpaceEvent>,
        active_time: ActiveTime,
    ) -> Self {
        // Stable, so equal timestamps keep their stored order.
        transforms.sort_by_key(|event| event.timestamp);
        parent_spaces.sort_by_key(|event| event.timestamp);

        let mut log = Self {
            transforms,
            parent_spaces,
            active_time,
            ..Default::default()
        };
        log.recompute();
        log
    }

    /// Re-selects the current state. Returns what changed.
    fn recompute(&mut self) -> HistoryChanged {
        let transform = latest_at(&self.transforms, self.active_time)
            .map_or(Transform::IDENTITY, |event| event.value);
        let parent = latest_at(&self.parent_spaces, self.active_time).and_then(|event| event.parent);

        let change = HistoryChanged {
            transform_changed: transform != self.current_transform,
            parent_changed: parent != self.current_parent,
        };

        self.current_transform = transform;
        self.current_parent = parent;

        change
    }

    fn recompute_and_notify(&mut self) {
        let change = self.recompute();
        if change.any() {
            igt_log::trace!(
                "Registration state changed: transform {}, parent {}",
                change.transform_changed,
                change.parent_changed
            );
            self.observers.notify(&change);
        }
    }
}

impl PartialEq for HistoryLog {
    /// Compares everything observable, but not the observers.
    fn eq(&self, other: &Self) -> bool {
        let Self {
            transforms,
            parent_spaces,
            active_time,
            current_transform,
            current_parent,
            observers: _,
        } = self;

        transforms == &other.transforms
            && parent_spaces == &other.parent_spaces
            && active_time == &other.active_time
            && current_transform == &other.current_transform
            && current_parent == &other.current_parent
    }
}

impl PartialEq for RegistrationHistory {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Log(a), Self::Log(b)) => a == b,
            (Self::Null, Self::Log(_)) | (Self::Log(_), Self::Null) => false,
        }
    }
}

impl RegistrationHistory {
    /// A new, empty, tracked history.
    pub fn new() -> Self {
        Self::Log(Box::default())
    }

    /// A tracked history that starts out at `value`.
    pub fn with_initial(value: Transform, timestamp: RegistrationTime) -> Self {
        let mut history = Self::new();
        history.add_transform(TransformEvent::new(value, timestamp, RegistrationKind::Initial));
        history
    }

    /// The one shared null history.
    #[inline]
    pub fn null() -> &'static Self {
        &NULL_HISTORY
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[inline]
    fn log(&self) -> Option<&HistoryLog> {
        match self {
            Self::Null => None,
            Self::Log(log) => Some(log),
        }
    }

    #[inline]
    fn log_mut(&mut self) -> Option<&mut HistoryLog> {
        match self {
            Self::Null => None,
            Self::Log(log) => Some(log),
        }
    }

    // ------------------------------------------------------------------------
    // Reads

    /// The reference-from-local transform at the active time.
    #[inline]
    pub fn current_transform(&self) -> Transform {
        self.log()
            .map_or(Transform::IDENTITY, |log| log.current_transform)
    }

    /// The parent frame at the active time. `None` means the reference space.
    #[inline]
    pub fn current_parent(&self) -> Option<ObjectId> {
        self.log().and_then(|log| log.current_parent)
    }

    /// All transform events, oldest first.
    pub fn transform_events(&self) -> &[TransformEvent] {
        self.log()
            .map(|log| log.transforms.as_slice())
            .unwrap_or_default()
    }

    /// All parent-space events, oldest first.
    pub fn parent_space_events(&self) -> &[ParentSpaceEvent] {
        self.log()
            .map(|log| log.parent_spaces.as_slice())
            .unwrap_or_default()
    }

    #[inline]
    pub fn active_time(&self) -> ActiveTime {
        self.log().map_or(ActiveTime::Latest, |log| log.active_time)
    }

    /// Timestamp of the newest event in either log.
    pub fn last_event_time(&self) -> Option<RegistrationTime> {
        let log = self.log()?;
        let last_transform = log.transforms.last().map(|event| event.timestamp);
        let last_parent = log.parent_spaces.last().map(|event| event.timestamp);
        last_transform.max(last_parent)
    }

    // ------------------------------------------------------------------------
    // Transform log

    /// Adds a transform event and makes the newest event current again.
    ///
    /// Exact duplicates (same value, timestamp and kind) are ignored.
    /// Returns whether the event was inserted.
    pub fn add_transform(&mut self, event: TransformEvent) -> bool {
        let Some(log) = self.log_mut() else {
            return false;
        };

        let (timestamp, kind) = (event.timestamp, event.kind.clone());
        if !insert_sorted(&mut log.transforms, event) {
            igt_log::trace!("Ignoring duplicate {kind} registration at {timestamp}");
            return false;
        }
        igt_log::debug!("Added {kind} registration at {timestamp}");

        log.active_time = ActiveTime::Latest;
        log.recompute_and_notify();
        true
    }

    /// Replaces the event of the same kind at `old_time`, or simply adds if there is none.
    ///
    /// Models "redo the registration done at `old_time`".
    pub fn update_transform(&mut self, old_time: Option<RegistrationTime>, event: TransformEvent) {
        let Some(log) = self.log_mut() else {
            return;
        };

        if let Some(old_time) = old_time {
            let removed = remove_at(&mut log.transforms, old_time, &event.kind);
            if removed > 0 {
                igt_log::debug!("Replacing {removed} {} registration(s) at {old_time}", event.kind);
            }
        }

        let (timestamp, kind) = (event.timestamp, event.kind.clone());
        if insert_sorted(&mut log.transforms, event) {
            igt_log::debug!("Added {kind} registration at {timestamp}");
        }

        log.active_time = ActiveTime::Latest;
        log.recompute_and_notify();
    }

    /// Throws away the whole transform log and starts over at `value`.
    pub fn set_transform(&mut self, value: Transform) {
        let Some(log) = self.log_mut() else {
            return;
        };

        log.transforms.clear();
        log.transforms.push(TransformEvent::new(
            value,
            RegistrationTime::now(),
            RegistrationKind::Set,
        ));

        log.active_time = ActiveTime::Latest;
        log.recompute_and_notify();
    }

    // ------------------------------------------------------------------------
    // Parent-space log

    /// See [`Self::add_transform`].
    pub fn add_parent_space(&mut self, event: ParentSpaceEvent) -> bool {
        let Some(log) = self.log_mut() else {
            return false;
        };

        if !insert_sorted(&mut log.parent_spaces, event) {
            return false;
        }

        log.active_time = ActiveTime::Latest;
        log.recompute_and_notify();
        true
    }

    /// See [`Self::update_transform`].
    pub fn update_parent_space(
        &mut self,
        old_time: Option<RegistrationTime>,
        event: ParentSpaceEvent,
    ) {
        let Some(log) = self.log_mut() else {
            return;
        };

        if let Some(old_time) = old_time {
            remove_at(&mut log.parent_spaces, old_time, &event.kind);
        }
        igt_log::debug!(
            "Parent space set to {:?} at {}",
            event.parent,
            event.timestamp
        );
        insert_sorted(&mut log.parent_spaces, event);

        log.active_time = ActiveTime::Latest;
        log.recompute_and_notify();
    }

    /// Throws away the whole parent-space log and starts over at `parent`.
    pub fn set_parent_space(&mut self, parent: Option<ObjectId>) {
        let Some(log) = self.log_mut() else {
            return;
        };

        log.parent_spaces.clear();
        log.parent_spaces.push(ParentSpaceEvent::new(
            parent,
            RegistrationTime::now(),
            RegistrationKind::Set,
        ));

        log.active_time = ActiveTime::Latest;
        log.recompute_and_notify();
    }

    // ------------------------------------------------------------------------
    // Time travel

    /// Deletes every event (in both logs) newer than `cutoff`.
    pub fn remove_newer_than(&mut self, cutoff: RegistrationTime) {
        let Some(log) = self.log_mut() else {
            return;
        };

        let before = log.transforms.len() + log.parent_spaces.len();
        log.transforms.retain(|event| event.timestamp <= cutoff);
        log.parent_spaces.retain(|event| event.timestamp <= cutoff);
        let removed = before - log.transforms.len() - log.parent_spaces.len();
        if removed > 0 {
            igt_log::debug!("Rolled back {removed} event(s) newer than {cutoff}");
        }

        log.recompute_and_notify();
    }

    /// Moves the read cursor. The logs themselves are left untouched.
    pub fn set_active_time(&mut self, active_time: ActiveTime) {
        let Some(log) = self.log_mut() else {
            return;
        };

        log.active_time = active_time;
        log.recompute_and_notify();
    }

    // ------------------------------------------------------------------------
    // Observers

    /// Calls `observer` after every change of the current transform or parent.
    ///
    /// Returns `None` for the null history, which never changes.
    pub fn subscribe(
        &mut self,
        observer: impl Fn(&HistoryChanged) + Send + Sync + 'static,
    ) -> Option<ObserverId> {
        self.log_mut()
            .map(|log| log.observers.subscribe(Box::new(observer)))
    }

    pub fn unsubscribe(&mut self, id: ObserverId) -> bool {
        self.log_mut()
            .is_some_and(|log| log.observers.unsubscribe(id))
    }

    pub fn num_observers(&self) -> usize {
        self.log().map_or(0, |log| log.observers.len())
    }
}
