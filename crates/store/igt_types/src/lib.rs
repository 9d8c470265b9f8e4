//! Value types shared by the registration crates.
//!
//! * [`Transform`]: an immutable rigid/affine 4×4 transform.
//! * [`RegistrationTime`] and [`ActiveTime`]: when a registration happened, and which one is current.
//! * [`ObjectId`] and [`ToolId`]: stable identifiers for data objects and tracked instruments.
//! * [`CoordinateSpace`]: a named coordinate system.

mod error;
mod object_id;
mod space;
mod time;
mod transform;

pub use error::ParseError;
pub use object_id::{ObjectId, ToolId};
pub use space::{CoordinateSpace, ToolSelector};
pub use time::{ActiveTime, RegistrationTime};
pub use transform::Transform;

/// Default tolerance for [`Transform::approx_eq`] used throughout the registration crates.
pub const DEFAULT_TRANSFORM_TOLERANCE: f64 = 1e-6;

pub mod external {
    pub use glam;
}
