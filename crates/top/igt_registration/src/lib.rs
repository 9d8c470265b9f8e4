//! Rigid registration and its propagation.
//!
//! * [`register_points`]: closed-form rigid (or translation-only) fit of paired points.
//! * [`IcpRegistration`]: iterative closest point between two unpaired point clouds.
//! * [`RegistrationManager`]: turns a computed correction into history events on exactly
//!   the objects that move with the registered one.

mod error;
mod icp;
mod landmark;
mod manager;
mod settings;

pub use error::RegistrationError;
pub use icp::{IcpJob, IcpRegistration, IcpResult, IcpSettings, IcpStop};
pub use landmark::{LandmarkResult, MIN_RIGID_POINTS, MIN_TRANSLATION_POINTS, register_points};
pub use manager::{RegistrationManager, RegistrationOutcome, Reparenting};
pub use settings::RegistrationSettings;
