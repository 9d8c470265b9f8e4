use igt_types::DEFAULT_TRANSFORM_TOLERANCE;

use crate::{IcpSettings, MIN_RIGID_POINTS, RegistrationError};

/// Tunables of the registration engine.
///
/// Stored as RON. Missing fields take their default.
#[derive(Clone, Debug, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct RegistrationSettings {
    pub icp: IcpSettings,

    /// A correction is rejected unless it is rigid within this tolerance.
    pub rigid_tolerance: f64,

    /// Fewest landmark pairs accepted for a rigid landmark registration. Never below 3.
    pub min_landmarks: usize,
}

impl Default for RegistrationSettings {
    fn default() -> Self {
        Self {
            icp: IcpSettings::default(),
            rigid_tolerance: DEFAULT_TRANSFORM_TOLERANCE,
            min_landmarks: MIN_RIGID_POINTS,
        }
    }
}

impl RegistrationSettings {
    pub fn from_ron_str(text: &str) -> Result<Self, RegistrationError> {
        Ok(ron::from_str(text)?)
    }

    pub fn to_ron_string(&self) -> Result<String, RegistrationError> {
        Ok(ron::ser::to_string_pretty(
            self,
            ron::ser::PrettyConfig::default(),
        )?)
    }

    #[inline]
    pub fn min_rigid_landmarks(&self) -> usize {
        self.min_landmarks.max(MIN_RIGID_POINTS)
    }
}
