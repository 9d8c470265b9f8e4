use crossbeam::channel::{Receiver, Sender};
use itertools::Itertools as _;
use nohash_hasher::IntMap;

use igt_history::{ObserverId, RegistrationHistory};
use igt_types::{ObjectId, ToolId, Transform};

use crate::{DataObject, InstrumentRegistry, Landmarks, ToolPose, TrackedInstrument};

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ModelError {
    #[error("no object ids left, the highest id in use is {0:?}")]
    IdsExhausted(ObjectId),
}

/// Something whose change may alter resolved transforms.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ChangedSource {
    /// The current transform or parent of a data object, or the object came or went.
    Data(ObjectId),

    /// The patient registration (`rMpr`).
    PatientRegistration,

    /// Pose, calibration or offset of an instrument, or the instrument came or went.
    Instrument(ToolId),

    /// Another instrument became dominant.
    DominantInstrument,
}

/// All spatially defined things of a session, owned in one place.
///
/// Data objects live in an arena keyed by stable [`ObjectId`]s; parent pointers are ids.
/// Every history owned by the model reports its changes into one channel,
/// drained with [`Self::drain_changes`] (usually by [`crate::SpaceResolver::process_changes`]).
pub struct SpatialModel {
    objects: IntMap<ObjectId, DataObject>,
    observers: IntMap<ObjectId, ObserverId>,
    /// One past the highest id ever used. Never reused, even after removal.
    next_id: u64,

    /// `rMpr`: patient reference to reference.
    patient_registration: RegistrationHistory,
    patient_observer: Option<ObserverId>,

    /// Landmarks sampled on the patient, in patient-reference coordinates.
    pub patient_landmarks: Landmarks,

    instruments: InstrumentRegistry,

    changes_tx: Sender<ChangedSource>,
    changes_rx: Receiver<ChangedSource>,
}

impl Default for SpatialModel {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SpatialModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpatialModel")
            .field("objects", &self.object_ids())
            .field("patient_registration", &self.reference_from_patient_ref())
            .field("instruments", &self.instruments)
            .finish_non_exhaustive()
    }
}

impl SpatialModel {
    pub fn new() -> Self {
        let (changes_tx, changes_rx) = crossbeam::channel::unbounded();
        let mut model = Self {
            objects: Default::default(),
            observers: Default::default(),
            next_id: 1,
            patient_registration: RegistrationHistory::new(),
            patient_observer: None,
            patient_landmarks: Landmarks::default(),
            instruments: InstrumentRegistry::default(),
            changes_tx,
            changes_rx,
        };
        model.patient_observer = model.watch_patient_registration();
        model
    }

    // ------------------------------------------------------------------------
    // Data objects

    /// Adds an object under a fresh id and returns that id.
    pub fn insert_data(&mut self, object: DataObject) -> Result<ObjectId, ModelError> {
        let id = u32::try_from(self.next_id)
            .map(ObjectId::new)
            .map_err(|_err| ModelError::IdsExhausted(ObjectId::new(u32::MAX)))?;
        self.insert_data_with_id(id, object);
        Ok(id)
    }

    /// Adds an object under a known id, e.g. when loading a session.
    ///
    /// Returns the object that previously had this id.
    pub fn insert_data_with_id(
        &mut self,
        id: ObjectId,
        mut object: DataObject,
    ) -> Option<DataObject> {
        self.next_id = self.next_id.max(u64::from(id.as_u32()) + 1);

        let previous = self.remove_data(id);

        object.set_id(id);
        if let Some(observer) = self.watch_history(id, object.history_mut()) {
            self.observers.insert(id, observer);
        }
        igt_log::debug!("Added {} {:?} ({id:?})", object.kind, object.name);
        self.objects.insert(id, object);
        self.notify(ChangedSource::Data(id));

        previous
    }

    /// Removes an object. Children pointing at it become roots.
    pub fn remove_data(&mut self, id: ObjectId) -> Option<DataObject> {
        let mut object = self.objects.remove(&id)?;
        if let Some(observer) = self.observers.remove(&id) {
            object.history_mut().unsubscribe(observer);
        }
        igt_log::debug!("Removed {:?} ({id:?})", object.name);
        self.notify(ChangedSource::Data(id));
        Some(object)
    }

    #[inline]
    pub fn data(&self, id: ObjectId) -> Option<&DataObject> {
        self.objects.get(&id)
    }

    /// Name and landmarks can be edited freely; the history goes through [`Self::history_mut`].
    #[inline]
    pub fn data_mut(&mut self, id: ObjectId) -> Option<&mut DataObject> {
        self.objects.get_mut(&id)
    }

    #[inline]
    pub fn contains_data(&self, id: ObjectId) -> bool {
        self.objects.contains_key(&id)
    }

    /// All objects, in no particular order.
    pub fn data_objects(&self) -> impl Iterator<Item = &DataObject> + '_ {
        self.objects.values()
    }

    /// All object ids, ascending.
    pub fn object_ids(&self) -> Vec<ObjectId> {
        self.objects.keys().copied().sorted().collect()
    }

    /// `(id, current parent)` for every object, ascending by id.
    pub fn parent_snapshot(&self) -> Vec<(ObjectId, Option<ObjectId>)> {
        self.objects
            .iter()
            .map(|(id, object)| (*id, object.current_parent()))
            .sorted()
            .collect()
    }

    pub fn history(&self, id: ObjectId) -> Option<&RegistrationHistory> {
        self.data(id).map(DataObject::history)
    }

    pub fn history_mut(&mut self, id: ObjectId) -> Option<&mut RegistrationHistory> {
        self.objects.get_mut(&id).map(DataObject::history_mut)
    }

    /// Swaps in a whole history, e.g. one loaded from disk. Returns the old one.
    pub fn replace_history(
        &mut self,
        id: ObjectId,
        mut history: RegistrationHistory,
    ) -> Option<RegistrationHistory> {
        let new_observer = self.watch_history(id, &mut history);
        let object = self.objects.get_mut(&id)?;

        let mut old = object.replace_history(history);
        if let Some(observer) = self.observers.remove(&id) {
            old.unsubscribe(observer);
        }
        if let Some(observer) = new_observer {
            self.observers.insert(id, observer);
        }
        self.notify(ChangedSource::Data(id));

        Some(old)
    }

    // ------------------------------------------------------------------------
    // Patient registration

    #[inline]
    pub fn patient_registration(&self) -> &RegistrationHistory {
        &self.patient_registration
    }

    #[inline]
    pub fn patient_registration_mut(&mut self) -> &mut RegistrationHistory {
        &mut self.patient_registration
    }

    /// `rMpr`.
    #[inline]
    pub fn reference_from_patient_ref(&self) -> Transform {
        self.patient_registration.current_transform()
    }

    pub fn replace_patient_registration(
        &mut self,
        history: RegistrationHistory,
    ) -> RegistrationHistory {
        let mut old = std::mem::replace(&mut self.patient_registration, history);
        if let Some(observer) = self.patient_observer.take() {
            old.unsubscribe(observer);
        }
        self.patient_observer = self.watch_patient_registration();
        self.notify(ChangedSource::PatientRegistration);
        old
    }

    // ------------------------------------------------------------------------
    // Instruments

    #[inline]
    pub fn instruments(&self) -> &InstrumentRegistry {
        &self.instruments
    }

    pub fn add_instrument(&mut self, instrument: TrackedInstrument) {
        let id = instrument.id();
        if self.instruments.insert(instrument).is_some() {
            igt_log::debug!("Replaced instrument {id:?}");
        }
        self.notify(ChangedSource::Instrument(id));
    }

    pub fn remove_instrument(&mut self, id: ToolId) -> Option<TrackedInstrument> {
        let was_dominant = self.instruments.dominant_id() == Some(id);
        let removed = self.instruments.remove(id)?;
        self.notify(ChangedSource::Instrument(id));
        if was_dominant {
            self.notify(ChangedSource::DominantInstrument);
        }
        Some(removed)
    }

    pub fn set_dominant_instrument(&mut self, id: Option<ToolId>) {
        if self.instruments.set_dominant(id) {
            igt_log::debug!("Dominant instrument is now {id:?}");
            self.notify(ChangedSource::DominantInstrument);
        }
    }

    /// Returns `false` for an unknown instrument.
    pub fn set_instrument_calibration(&mut self, id: ToolId, tool_from_sensor: Transform) -> bool {
        let Some(instrument) = self.instruments.get_mut(id) else {
            return false;
        };
        instrument.tool_from_sensor = tool_from_sensor;
        self.notify(ChangedSource::Instrument(id));
        true
    }

    /// Returns `false` for an unknown instrument.
    pub fn set_instrument_offset(&mut self, id: ToolId, offset: f64) -> bool {
        let Some(instrument) = self.instruments.get_mut(id) else {
            return false;
        };
        instrument.offset = offset;
        self.notify(ChangedSource::Instrument(id));
        true
    }

    /// Sets a pose directly instead of through a feed. Returns whether it advanced.
    pub fn set_instrument_pose(&mut self, id: ToolId, pose: ToolPose) -> bool {
        let advanced = self
            .instruments
            .get_mut(id)
            .is_some_and(|instrument| instrument.set_pose(pose));
        if advanced {
            self.notify(ChangedSource::Instrument(id));
        }
        advanced
    }

    /// Takes the newest pose of every instrument feed.
    ///
    /// Call this on the owning thread. Returns the instruments whose pose advanced.
    pub fn poll_instruments(&mut self) -> Vec<ToolId> {
        let advanced = self.instruments.poll_all();
        for id in &advanced {
            self.notify(ChangedSource::Instrument(*id));
        }
        advanced
    }

    // ------------------------------------------------------------------------
    // Changes

    /// Everything that changed since the last call, deduplicated and ordered.
    ///
    /// There is one change queue per model, so every change is handed out once.
    pub fn drain_changes(&self) -> Vec<ChangedSource> {
        self.changes_rx.try_iter().sorted().dedup().collect()
    }

    fn notify(&self, source: ChangedSource) {
        // We own the receiver, so this never fails.
        self.changes_tx.send(source).ok();
    }

    fn watch_history(
        &self,
        id: ObjectId,
        history: &mut RegistrationHistory,
    ) -> Option<ObserverId> {
        let tx = self.changes_tx.clone();
        history.subscribe(move |_| {
            tx.send(ChangedSource::Data(id)).ok();
        })
    }

    fn watch_patient_registration(&mut self) -> Option<ObserverId> {
        let tx = self.changes_tx.clone();
        self.patient_registration.subscribe(move |_| {
            tx.send(ChangedSource::PatientRegistration).ok();
        })
    }
}
