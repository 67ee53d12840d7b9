use thiserror::Error;

pub type Result<T> = std::result::Result<T, RnnError>;

#[derive(Debug, Error)]
pub enum RnnError {
    /// The configuration asks for something this engine does not implement.
    /// Raised at initialization only, before anything is allocated.
    #[error("unimplemented rnn configuration: {reason}")]
    Unimplemented { reason: String },

    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("matrix multiply shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

impl RnnError {
    pub fn unimplemented(reason: impl Into<String>) -> Self {
        Self::Unimplemented {
            reason: reason.into(),
        }
    }
}
