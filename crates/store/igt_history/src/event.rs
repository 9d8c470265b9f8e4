use igt_types::{ObjectId, RegistrationTime, Transform};

/// What produced a registration event.
///
/// Purely descriptive, except that [`crate::RegistrationHistory::update_transform`]
/// only replaces events of the same kind.
///
/// Kinds are compared by their tag, so `Custom("manual")` equals [`Self::Manual`].
#[derive(Clone, Debug)]
pub enum RegistrationKind {
    /// The pose an object was created or loaded with.
    Initial,
    Manual,
    Landmark,
    PatientLandmark,
    FastTranslation,
    FastOrientation,
    ImageToImage,
    Vessel,
    FromFile,

    /// A hard reset through [`crate::RegistrationHistory::set_transform`].
    Set,

    Custom(String),
}

impl RegistrationKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Initial => "initial",
            Self::Manual => "manual",
            Self::Landmark => "landmark",
            Self::PatientLandmark => "patient-landmark",
            Self::FastTranslation => "fast-translation",
            Self::FastOrientation => "fast-orientation",
            Self::ImageToImage => "image-to-image",
            Self::Vessel => "vessel",
            Self::FromFile => "from-file",
            Self::Set => "set",
            Self::Custom(tag) => tag,
        }
    }
}

impl From<&str> for RegistrationKind {
    fn from(tag: &str) -> Self {
        match tag {
            "initial" => Self::Initial,
            "manual" => Self::Manual,
            "landmark" => Self::Landmark,
            "patient-landmark" => Self::PatientLandmark,
            "fast-translation" => Self::FastTranslation,
            "fast-orientation" => Self::FastOrientation,
            "image-to-image" => Self::ImageToImage,
            "vessel" => Self::Vessel,
            "from-file" => Self::FromFile,
            "set" => Self::Set,
            custom => Self::Custom(custom.to_owned()),
        }
    }
}

impl PartialEq for RegistrationKind {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Eq for RegistrationKind {}

impl std::hash::Hash for RegistrationKind {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.as_str().hash(state);
    }
}

impl std::fmt::Display for RegistrationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The object's reference-from-local transform changed at `timestamp`.
#[derive(Clone, Debug, PartialEq)]
pub struct TransformEvent {
    /// Reference-from-local transform (`rMd`) valid from `timestamp` on.
    pub value: Transform,
    pub timestamp: RegistrationTime,
    pub kind: RegistrationKind,

    /// Provenance only: which object was held fixed.
    pub fixed: Option<ObjectId>,

    /// Provenance only: which object was moved.
    pub moving: Option<ObjectId>,
}

impl TransformEvent {
    pub fn new(value: Transform, timestamp: RegistrationTime, kind: RegistrationKind) -> Self {
        Self {
            value,
            timestamp,
            kind,
            fixed: None,
            moving: None,
        }
    }

    #[must_use]
    pub fn with_provenance(mut self, fixed: Option<ObjectId>, moving: Option<ObjectId>) -> Self {
        self.fixed = fixed;
        self.moving = moving;
        self
    }

    /// Same copy of the same event, ignoring provenance.
    #[inline]
    pub fn is_duplicate_of(&self, other: &Self) -> bool {
        self.timestamp == other.timestamp && self.kind == other.kind && self.value == other.value
    }
}

/// The object's frame became defined relative to `parent` (or to nothing) at `timestamp`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParentSpaceEvent {
    /// `None` means the frame hangs directly off the reference space.
    pub parent: Option<ObjectId>,
    pub timestamp: RegistrationTime,
    pub kind: RegistrationKind,
}

impl ParentSpaceEvent {
    pub fn new(parent: Option<ObjectId>, timestamp: RegistrationTime, kind: RegistrationKind) -> Self {
        Self {
            parent,
            timestamp,
            kind,
        }
    }

    #[inline]
    pub fn is_duplicate_of(&self, other: &Self) -> bool {
        self == other
    }
}

/// What both event logs have in common.
pub(crate) trait TimedEvent {
    fn timestamp(&self) -> RegistrationTime;
    fn kind(&self) -> &RegistrationKind;
    fn is_duplicate(&self, other: &Self) -> bool;
}

impl TimedEvent for TransformEvent {
    #[inline]
    fn timestamp(&self) -> RegistrationTime {
        self.timestamp
    }

    #[inline]
    fn kind(&self) -> &RegistrationKind {
        &self.kind
    }

    #[inline]
    fn is_duplicate(&self, other: &Self) -> bool {
        self.is_duplicate_of(other)
    }
}

impl TimedEvent for ParentSpaceEvent {
    #[inline]
    fn timestamp(&self) -> RegistrationTime {
        self.timestamp
    }

    #[inline]
    fn kind(&self) -> &RegistrationKind {
        &self.kind
    }

    #[inline]
    fn is_duplicate(&self, other: &Self) -> bool {
        self.is_duplicate_of(other)
    }
}

/// Inserts `event` after all events with the same or an earlier timestamp.
///
/// Returns `false` (and leaves `events` untouched) if an exact duplicate exists.
pub(crate) fn insert_sorted<E: TimedEvent>(events: &mut Vec<E>, event: E) -> bool {
    if events.iter().any(|existing| existing.is_duplicate(&event)) {
        return false;
    }
    let index = events.partition_point(|existing| existing.timestamp() <= event.timestamp());
    events.insert(index, event);
    true
}

/// Removes all events at exactly `timestamp` with the given kind. Returns the number removed.
pub(crate) fn remove_at<E: TimedEvent>(
    events: &mut Vec<E>,
    timestamp: RegistrationTime,
    kind: &RegistrationKind,
) -> usize {
    let before = events.len();
    events.retain(|event| !(event.timestamp() == timestamp && event.kind() == kind));
    before - events.len()
}

/// The last event visible through `active`, if any.
pub(crate) fn latest_at<E: TimedEvent>(
    events: &[E],
    active: igt_types::ActiveTime,
) -> Option<&E> {
    match active {
        igt_types::ActiveTime::Latest => events.last(),
        igt_types::ActiveTime::At(cursor) => {
            let visible = events.partition_point(|event| event.timestamp() <= cursor);
            visible.checked_sub(1).map(|index| &events[index])
        }
    }
}
