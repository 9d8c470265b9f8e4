use crate::{ObjectId, ParseError, ToolId};

/// Which instrument a tool-bound space refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ToolSelector {
    /// Whatever instrument is currently dominant. Follows dominance changes.
    Dominant,

    Id(ToolId),
}

impl std::fmt::Display for ToolSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dominant => f.write_str("active"),
            Self::Id(id) => id.fmt(f),
        }
    }
}

impl std::str::FromStr for ToolSelector {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "active" {
            Ok(Self::Dominant)
        } else {
            s.parse().map(Self::Id)
        }
    }
}

/// A named coordinate system.
///
/// Two spaces are equal iff both kind and id match.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CoordinateSpace {
    /// The common room/world frame everything resolves through.
    Reference,

    /// The frame of the patient reference marker, i.e. the tracking system's frame.
    PatientReference,

    /// The local frame of a data object.
    Data(ObjectId),

    /// The frame of a tracked instrument.
    Tool(ToolSelector),

    /// The frame of the sensor mounted on a tracked instrument.
    Sensor(ToolSelector),

    /// The tool frame moved along the tool axis by the instrument's tooltip offset.
    ToolOffset(ToolSelector),
}

impl CoordinateSpace {
    /// The instrument this space depends on, if any.
    #[inline]
    pub fn tool(&self) -> Option<ToolSelector> {
        match self {
            Self::Tool(tool) | Self::Sensor(tool) | Self::ToolOffset(tool) => Some(*tool),
            Self::Reference | Self::PatientReference | Self::Data(_) => None,
        }
    }

    /// Does resolving this space involve the patient registration?
    #[inline]
    pub fn depends_on_patient_registration(&self) -> bool {
        self.tool().is_some() || *self == Self::PatientReference
    }
}

impl std::fmt::Display for CoordinateSpace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Reference => f.write_str("reference"),
            Self::PatientReference => f.write_str("patient-reference"),
            Self::Data(id) => write!(f, "data/{id}"),
            Self::Tool(tool) => write!(f, "tool/{tool}"),
            Self::Sensor(tool) => write!(f, "sensor/{tool}"),
            Self::ToolOffset(tool) => write!(f, "tool-offset/{tool}"),
        }
    }
}

impl std::str::FromStr for CoordinateSpace {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unknown = || ParseError::UnknownSpace(s.to_owned());

        match s.split_once('/') {
            None => match s {
                "reference" => Ok(Self::Reference),
                "patient-reference" => Ok(Self::PatientReference),
                _ => Err(unknown()),
            },
            Some(("data", id)) => Ok(Self::Data(id.parse()?)),
            Some(("tool", tool)) => Ok(Self::Tool(tool.parse()?)),
            Some(("sensor", tool)) => Ok(Self::Sensor(tool.parse()?)),
            Some(("tool-offset", tool)) => Ok(Self::ToolOffset(tool.parse()?)),
            Some(_) => Err(unknown()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_round_trip() {
        let spaces = [
            CoordinateSpace::Reference,
            CoordinateSpace::PatientReference,
            CoordinateSpace::Data(ObjectId::new(7)),
            CoordinateSpace::Tool(ToolSelector::Dominant),
            CoordinateSpace::Sensor(ToolSelector::Id(ToolId::new(3))),
            CoordinateSpace::ToolOffset(ToolSelector::Id(ToolId::new(0))),
        ];
        for space in spaces {
            assert_eq!(space.to_string().parse::<CoordinateSpace>(), Ok(space));
        }
    }

    #[test]
    fn equality_needs_kind_and_id() {
        let tool = ToolSelector::Id(ToolId::new(1));
        assert_ne!(CoordinateSpace::Tool(tool), CoordinateSpace::Sensor(tool));
        assert_ne!(
            CoordinateSpace::Data(ObjectId::new(1)),
            CoordinateSpace::Data(ObjectId::new(2))
        );
    }

    #[test]
    fn unknown_spaces_are_rejected() {
        for text in ["", "world", "data/", "data/x", "volume/1", "tool/-1"] {
            assert!(text.parse::<CoordinateSpace>().is_err(), "{text:?}");
        }
    }
}
