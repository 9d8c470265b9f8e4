/// Passed to history observers whenever the cached current state changes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HistoryChanged {
    pub transform_changed: bool,
    pub parent_changed: bool,
}

impl HistoryChanged {
    #[inline]
    pub fn any(&self) -> bool {
        self.transform_changed || self.parent_changed
    }
}

/// Handle returned by [`crate::RegistrationHistory::subscribe`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

type ObserverFn = Box<dyn Fn(&HistoryChanged) + Send + Sync>;

/// Callback list owned by a single history.
///
/// Observers only ever see a [`HistoryChanged`] value, never the history itself,
/// so they cannot mutate it from inside a notification.
/// Anything that wants to react with a mutation has to queue it and apply it
/// once the current batch of notifications has been delivered.
#[derive(Default)]
pub(crate) struct HistoryObservers {
    next_id: u64,
    observers: Vec<(ObserverId, ObserverFn)>,
}

impl HistoryObservers {
    pub fn subscribe(&mut self, observer: ObserverFn) -> ObserverId {
        let id = ObserverId(self.next_id);
        self.next_id += 1;
        self.observers.push((id, observer));
        id
    }

    pub fn unsubscribe(&mut self, id: ObserverId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(existing, _)| *existing != id);
        self.observers.len() != before
    }

    pub fn notify(&self, change: &HistoryChanged) {
        for (_, observer) in &self.observers {
            observer(change);
        }
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }
}

impl std::fmt::Debug for HistoryObservers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryObservers")
            .field("num_observers", &self.observers.len())
            .finish()
    }
}
