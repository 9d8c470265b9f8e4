use igt_tf::ForestError;
use igt_types::ObjectId;

use crate::IcpStop;

#[derive(Debug, thiserror::Error)]
pub enum RegistrationError {
    #[error("need at least {needed} point pairs, got {got}")]
    InsufficientData { needed: usize, got: usize },

    #[error("got {source_len} source points but {target_len} target points")]
    MismatchedPoints { source_len: usize, target_len: usize },

    #[error("the computed transform is not a finite rigid transform")]
    Degenerate,

    #[error("there is no data object {0:?}")]
    UnknownData(ObjectId),

    #[error("no fixed data selected")]
    NoFixedData,

    #[error("no moving data selected")]
    NoMovingData,

    #[error("the dominant instrument is not tracked")]
    NoToolPose,

    #[error("ICP stopped ({0:?}) before aligning anything")]
    NotAligned(IcpStop),

    #[error("registration was cancelled")]
    Cancelled,

    #[error("registration worker failed: {0}")]
    Worker(String),

    #[error(transparent)]
    Forest(#[from] ForestError),

    #[error("failed to parse settings: {0}")]
    ParseSettings(#[from] ron::error::SpannedError),

    #[error("failed to write settings: {0}")]
    WriteSettings(#[from] ron::Error),
}
