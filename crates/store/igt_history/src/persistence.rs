//! Structured document form of a [`RegistrationHistory`].
//!
//! ```json
//! {
//!   "transforms": [
//!     { "timestamp": "20241016T101530_042", "kind": "landmark", "fixed": 1, "moving": 2,
//!       "matrix": "1 0 0 10\n0 1 0 0\n0 0 1 0\n0 0 0 1" }
//!   ],
//!   "parent_spaces": [
//!     { "timestamp": "20241016T101530_042", "kind": "landmark", "value": "1" }
//!   ],
//!   "current_time": null
//! }
//! ```

use igt_types::{ActiveTime, ObjectId, ParseError, RegistrationTime, Transform};

use crate::history::HistoryLog;
use crate::{ParentSpaceEvent, RegistrationHistory, RegistrationKind, TransformEvent};

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("transform event #{index}: {source}")]
    Matrix { index: usize, source: ParseError },

    #[error("parent space event #{index}: {source}")]
    Parent { index: usize, source: ParseError },

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TransformEventDocument {
    pub timestamp: RegistrationTime,
    pub kind: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixed: Option<ObjectId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub moving: Option<ObjectId>,

    /// See [`Transform::to_matrix_text`].
    pub matrix: String,
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ParentSpaceEventDocument {
    pub timestamp: RegistrationTime,
    pub kind: String,

    /// Parent object id, or empty for the reference space.
    pub value: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct HistoryDocument {
    #[serde(default)]
    pub transforms: Vec<TransformEventDocument>,

    #[serde(default)]
    pub parent_spaces: Vec<ParentSpaceEventDocument>,

    /// Active-time cursor at save time. `None` means "latest".
    #[serde(default)]
    pub current_time: Option<RegistrationTime>,
}

impl From<&TransformEvent> for TransformEventDocument {
    fn from(event: &TransformEvent) -> Self {
        Self {
            timestamp: event.timestamp,
            kind: event.kind.as_str().to_owned(),
            fixed: event.fixed,
            moving: event.moving,
            matrix: event.value.to_matrix_text(),
        }
    }
}

impl From<&ParentSpaceEvent> for ParentSpaceEventDocument {
    fn from(event: &ParentSpaceEvent) -> Self {
        Self {
            timestamp: event.timestamp,
            kind: event.kind.as_str().to_owned(),
            value: event.parent.map(|id| id.to_string()).unwrap_or_default(),
        }
    }
}

impl RegistrationHistory {
    /// The null history becomes an empty document.
    pub fn to_document(&self) -> HistoryDocument {
        HistoryDocument {
            transforms: self.transform_events().iter().map(Into::into).collect(),
            parent_spaces: self.parent_space_events().iter().map(Into::into).collect(),
            current_time: self.active_time().time(),
        }
    }

    /// Always creates a tracked history, even from an empty document.
    pub fn from_document(document: &HistoryDocument) -> Result<Self, PersistenceError> {
        let transforms = document
            .transforms
            .iter()
            .enumerate()
            .map(|(index, doc)| {
                let value = Transform::from_matrix_text(&doc.matrix)
                    .map_err(|source| PersistenceError::Matrix { index, source })?;
                Ok(TransformEvent {
                    value,
                    timestamp: doc.timestamp,
                    kind: RegistrationKind::from(doc.kind.as_str()),
                    fixed: doc.fixed,
                    moving: doc.moving,
                })
            })
            .collect::<Result<Vec<_>, PersistenceError>>()?;

        let parent_spaces = document
            .parent_spaces
            .iter()
            .enumerate()
            .map(|(index, doc)| {
                let value = doc.value.trim();
                let parent = if value.is_empty() {
                    None
                } else {
                    Some(
                        value
                            .parse::<ObjectId>()
                            .map_err(|source| PersistenceError::Parent { index, source })?,
                    )
                };
                Ok(ParentSpaceEvent::new(
                    parent,
                    doc.timestamp,
                    RegistrationKind::from(doc.kind.as_str()),
                ))
            })
            .collect::<Result<Vec<_>, PersistenceError>>()?;

        Ok(Self::Log(Box::new(HistoryLog::from_events(
            transforms,
            parent_spaces,
            ActiveTime::from(document.current_time),
        ))))
    }

    pub fn to_json_string(&self) -> Result<String, PersistenceError> {
        Ok(serde_json::to_string_pretty(&self.to_document())?)
    }

    pub fn from_json_str(json: &str) -> Result<Self, PersistenceError> {
        let document: HistoryDocument = serde_json::from_str(json)?;
        Self::from_document(&document)
    }
}
