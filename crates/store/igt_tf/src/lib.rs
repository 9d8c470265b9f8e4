//! The spatial model of a registration session.
//!
//! * [`SpatialModel`]: arena of data objects, the patient registration and the tracked instruments.
//! * [`FrameForest`]: the parent/child tree over all data objects, rebuilt on demand.
//! * [`SpaceResolver`]: resolves transforms between [`igt_types::CoordinateSpace`]s
//!   and tells subscribers when a resolved transform changes.

mod data_object;
mod forest;
mod instruments;
mod model;
mod resolver;

pub use data_object::{DataKind, DataObject, Landmarks};
pub use forest::{BrokenCycle, ForestError, FrameForest};
pub use instruments::{
    InstrumentRegistry, PoseReceiver, PoseSender, ToolPose, TrackedInstrument, pose_channel,
};
pub use model::{ChangedSource, ModelError, SpatialModel};
pub use resolver::{
    ResolveError, SpaceChanged, SpaceResolver, SubscriptionId, reference_from_space, resolve,
};
