use std::collections::BTreeMap;

use glam::DVec3;

use igt_history::RegistrationHistory;
use igt_types::{ObjectId, Transform};

/// What a data object holds. Only used for display and logging.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DataKind {
    Image,
    Mesh,
    PointCloud,

    /// Point, distance and angle measurements.
    Metric,

    Other(String),
}

impl std::fmt::Display for DataKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Image => f.write_str("image"),
            Self::Mesh => f.write_str("mesh"),
            Self::PointCloud => f.write_str("point cloud"),
            Self::Metric => f.write_str("metric"),
            Self::Other(kind) => f.write_str(kind),
        }
    }
}

/// Named landmark points, in the local frame of whatever they belong to.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Landmarks(BTreeMap<String, DVec3>);

impl Landmarks {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, point: DVec3) {
        self.0.insert(name.into(), point);
    }

    pub fn remove(&mut self, name: &str) -> Option<DVec3> {
        self.0.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<DVec3> {
        self.0.get(name).copied()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// All landmarks, ordered by name.
    pub fn iter(&self) -> impl Iterator<Item = (&str, DVec3)> + '_ {
        self.0.iter().map(|(name, point)| (name.as_str(), *point))
    }

    /// Point pairs for every name present in both sets, ordered by name.
    ///
    /// The points of `self` are mapped through `self_transform`,
    /// the ones of `other` through `other_transform`.
    pub fn paired_with(
        &self,
        self_transform: &Transform,
        other: &Self,
        other_transform: &Transform,
    ) -> (Vec<DVec3>, Vec<DVec3>) {
        self.0
            .iter()
            .filter_map(|(name, point)| {
                let other_point = other.0.get(name)?;
                Some((
                    self_transform.transform_point(*point),
                    other_transform.transform_point(*other_point),
                ))
            })
            .unzip()
    }
}

impl<S: Into<String>> FromIterator<(S, DVec3)> for Landmarks {
    fn from_iter<T: IntoIterator<Item = (S, DVec3)>>(iter: T) -> Self {
        Self(iter.into_iter().map(|(name, point)| (name.into(), point)).collect())
    }
}

/// A piece of clinical data with a spatial definition.
///
/// The history is only reachable through [`crate::SpatialModel`] once the object has been
/// inserted, so that every change to it is seen by the model's change channel.
#[derive(Debug)]
pub struct DataObject {
    id: ObjectId,
    pub name: String,
    pub kind: DataKind,
    pub landmarks: Landmarks,
    history: RegistrationHistory,
}

impl DataObject {
    /// A new object with an empty, tracked history.
    pub fn new(name: impl Into<String>, kind: DataKind) -> Self {
        Self::with_history(name, kind, RegistrationHistory::new())
    }

    /// A new object that does not take part in registration.
    pub fn unregistered(name: impl Into<String>, kind: DataKind) -> Self {
        Self::with_history(name, kind, RegistrationHistory::Null)
    }

    pub fn with_history(
        name: impl Into<String>,
        kind: DataKind,
        history: RegistrationHistory,
    ) -> Self {
        Self {
            id: ObjectId::new(0),
            name: name.into(),
            kind,
            landmarks: Landmarks::default(),
            history,
        }
    }

    #[inline]
    pub fn with_landmarks(mut self, landmarks: Landmarks) -> Self {
        self.landmarks = landmarks;
        self
    }

    /// Assigned by the model on insertion.
    #[inline]
    pub fn id(&self) -> ObjectId {
        self.id
    }

    #[inline]
    pub fn history(&self) -> &RegistrationHistory {
        &self.history
    }

    /// The transform from this object's local frame to the reference frame (`rMd`).
    #[inline]
    pub fn current_transform(&self) -> Transform {
        self.history.current_transform()
    }

    #[inline]
    pub fn current_parent(&self) -> Option<ObjectId> {
        self.history.current_parent()
    }

    pub(crate) fn set_id(&mut self, id: ObjectId) {
        self.id = id;
    }

    pub(crate) fn history_mut(&mut self) -> &mut RegistrationHistory {
        &mut self.history
    }

    pub(crate) fn replace_history(&mut self, history: RegistrationHistory) -> RegistrationHistory {
        std::mem::replace(&mut self.history, history)
    }
}
