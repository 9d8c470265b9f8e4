//! Resolving transforms between coordinate spaces, and watching them change.

use igt_log::ResultExt as _;
use igt_types::{CoordinateSpace, ObjectId, ToolId, ToolSelector, Transform};

use crate::{ChangedSource, SpatialModel, TrackedInstrument};

/// Why a space could not be resolved.
///
/// Callers should treat this as "registration unavailable" and keep showing the last
/// valid transform, never fall back to identity.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("there is no data object {0:?}")]
    UnknownData(ObjectId),

    #[error("there is no instrument {0:?}")]
    UnknownInstrument(ToolId),

    #[error("no instrument is dominant")]
    NoDominantInstrument,

    #[error("instrument {0:?} has not been tracked yet")]
    NoPose(ToolId),
}

fn instrument(
    model: &SpatialModel,
    selector: ToolSelector,
) -> Result<&TrackedInstrument, ResolveError> {
    let id = match selector {
        ToolSelector::Dominant => model
            .instruments()
            .dominant_id()
            .ok_or(ResolveError::NoDominantInstrument)?,
        ToolSelector::Id(id) => id,
    };
    model
        .instruments()
        .get(id)
        .ok_or(ResolveError::UnknownInstrument(id))
}

/// `rMt = rMpr * prMt`
fn reference_from_tool(
    model: &SpatialModel,
    instrument: &TrackedInstrument,
) -> Result<Transform, ResolveError> {
    let pose = instrument
        .pose()
        .ok_or(ResolveError::NoPose(instrument.id()))?;
    Ok(model.reference_from_patient_ref() * pose.patient_ref_from_tool)
}

/// The transform from `space` to the reference frame.
pub fn reference_from_space(
    model: &SpatialModel,
    space: CoordinateSpace,
) -> Result<Transform, ResolveError> {
    match space {
        CoordinateSpace::Reference => Ok(Transform::IDENTITY),
        CoordinateSpace::PatientReference => Ok(model.reference_from_patient_ref()),
        CoordinateSpace::Data(id) => model
            .data(id)
            .map(|object| object.current_transform())
            .ok_or(ResolveError::UnknownData(id)),
        CoordinateSpace::Tool(selector) => {
            let instrument = instrument(model, selector)?;
            reference_from_tool(model, instrument)
        }
        CoordinateSpace::Sensor(selector) => {
            let instrument = instrument(model, selector)?;
            Ok(reference_from_tool(model, instrument)? * instrument.tool_from_sensor)
        }
        CoordinateSpace::ToolOffset(selector) => {
            let instrument = instrument(model, selector)?;
            Ok(reference_from_tool(model, instrument)? * instrument.tool_from_offset())
        }
    }
}

/// The transform that maps points given in `from` coordinates into `to` coordinates.
///
/// `to_from_reference * reference_from_from`
pub fn resolve(
    model: &SpatialModel,
    from: CoordinateSpace,
    to: CoordinateSpace,
) -> Result<Transform, ResolveError> {
    let reference_from_from = reference_from_space(model, from)?;
    let reference_from_to = reference_from_space(model, to)?;
    Ok(reference_from_to.inverse() * reference_from_from)
}

// ----------------------------------------------------------------------------

/// Handle returned by [`SpaceResolver::subscribe`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

/// Passed to a listener when the resolved transform of its space changed.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SpaceChanged {
    pub subscription: SubscriptionId,
    pub space: CoordinateSpace,
    pub reference_from_space: Transform,
}

type Listener = Box<dyn FnMut(&SpaceChanged) + Send>;

struct Subscription {
    space: CoordinateSpace,
    listener: Listener,

    /// What the listener was last told. Kept while the space is unresolvable.
    last_valid: Option<Transform>,

    /// The instrument the space currently follows.
    bound_tool: Option<ToolId>,
}

impl Subscription {
    fn depends_on(&self, source: ChangedSource) -> bool {
        match source {
            ChangedSource::Data(id) => self.space == CoordinateSpace::Data(id),
            ChangedSource::PatientRegistration => self.space.depends_on_patient_registration(),
            ChangedSource::Instrument(id) => self.bound_tool == Some(id),
            ChangedSource::DominantInstrument => {
                self.space.tool() == Some(ToolSelector::Dominant)
            }
        }
    }

    fn bind_tool(&mut self, model: &SpatialModel) {
        let bound_tool = match self.space.tool() {
            None => None,
            Some(ToolSelector::Id(id)) => Some(id),
            Some(ToolSelector::Dominant) => model.instruments().dominant_id(),
        };
        if bound_tool != self.bound_tool {
            igt_log::debug!("{} now follows {bound_tool:?}", self.space);
            self.bound_tool = bound_tool;
        }
    }

    /// Returns whether the listener was called.
    fn refresh(&mut self, id: SubscriptionId, model: &SpatialModel) -> bool {
        self.bind_tool(model);

        let Some(transform) = reference_from_space(model, self.space).warn_on_err_once(
            format!("Cannot resolve {}, keeping the last valid transform", self.space),
        ) else {
            return false;
        };
        if self.last_valid == Some(transform) {
            return false;
        }
        self.last_valid = Some(transform);
        (self.listener)(&SpaceChanged {
            subscription: id,
            space: self.space,
            reference_from_space: transform,
        });
        true
    }
}

/// Tells listeners when the resolved transform of their space changes.
///
/// Notifications are only delivered from [`Self::process_changes`], never from inside
/// a mutation of the model, so listeners may freely read the model.
///
/// Use one resolver per model: [`Self::process_changes`] consumes the model's changes,
/// so any other resolver only catches up through [`Self::refresh_all`].
#[derive(Default)]
pub struct SpaceResolver {
    next_id: u64,
    subscriptions: Vec<(SubscriptionId, Subscription)>,
}

impl std::fmt::Debug for SpaceResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.subscriptions.iter().map(|(id, sub)| (id, sub.space)))
            .finish()
    }
}

impl SpaceResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Calls `listener` whenever the transform from `space` to the reference frame changes.
    ///
    /// The current value is resolved right away (without calling the listener) and is
    /// available through [`Self::last_valid`].
    pub fn subscribe(
        &mut self,
        model: &SpatialModel,
        space: CoordinateSpace,
        listener: impl FnMut(&SpaceChanged) + Send + 'static,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;

        let mut subscription = Subscription {
            space,
            listener: Box::new(listener),
            last_valid: None,
            bound_tool: None,
        };
        subscription.bind_tool(model);
        subscription.last_valid = reference_from_space(model, space).ok();

        self.subscriptions.push((id, subscription));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let len_before = self.subscriptions.len();
        self.subscriptions.retain(|(sub_id, _)| *sub_id != id);
        self.subscriptions.len() != len_before
    }

    #[inline]
    pub fn num_subscriptions(&self) -> usize {
        self.subscriptions.len()
    }

    /// The last transform successfully resolved for this subscription.
    pub fn last_valid(&self, id: SubscriptionId) -> Option<Transform> {
        self.subscription(id).and_then(|sub| sub.last_valid)
    }

    /// The instrument a tool space currently follows.
    pub fn bound_tool(&self, id: SubscriptionId) -> Option<ToolId> {
        self.subscription(id).and_then(|sub| sub.bound_tool)
    }

    /// Drains the model's changes and notifies every listener whose transform changed.
    ///
    /// Returns how many listeners were called.
    pub fn process_changes(&mut self, model: &SpatialModel) -> usize {
        puffin::profile_function!();

        let changes = model.drain_changes();
        if changes.is_empty() {
            return 0;
        }
        igt_log::trace!("Processing {} change(s)", changes.len());

        let mut notified = 0;
        for (id, subscription) in &mut self.subscriptions {
            if changes.iter().any(|source| subscription.depends_on(*source))
                && subscription.refresh(*id, model)
            {
                notified += 1;
            }
        }
        notified
    }

    /// Re-resolves every subscription, changed or not.
    pub fn refresh_all(&mut self, model: &SpatialModel) -> usize {
        let mut notified = 0;
        for (id, subscription) in &mut self.subscriptions {
            if subscription.refresh(*id, model) {
                notified += 1;
            }
        }
        notified
    }

    fn subscription(&self, id: SubscriptionId) -> Option<&Subscription> {
        self.subscriptions
            .iter()
            .find_map(|(sub_id, sub)| (*sub_id == id).then_some(sub))
    }
}
