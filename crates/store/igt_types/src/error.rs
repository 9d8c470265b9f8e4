/// Failure to parse one of the textual representations in this crate.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("expected 16 numbers in matrix text, found {0}")]
    MatrixLength(usize),

    #[error("invalid number {0:?} in matrix text")]
    InvalidNumber(String),

    #[error("matrix is not affine, bottom row is {0}")]
    NotAffine(String),

    #[error("invalid registration time {text:?}: {reason}")]
    InvalidTime { text: String, reason: String },

    #[error("invalid id {0:?}")]
    InvalidId(String),

    #[error("unknown coordinate space {0:?}")]
    UnknownSpace(String),
}
