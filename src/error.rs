use thiserror::Error;

// ---------------------------------------------------------------------------
// Error: top-level rollup
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum Error {
    /// A precondition on an argument was violated (non-container passed to
    /// `observe`, non-callable listener, empty keypath, ...).
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Two merge operands have kinds that cannot be combined.
    #[error("Incompatible types: cannot merge {right} into {left}")]
    IncompatibleTypes {
        left: &'static str,
        right: &'static str,
    },

    /// A user-supplied function or listener reported failure.
    #[error("Callback failed: {0}")]
    Callback(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    pub fn callback(message: impl Into<String>) -> Self {
        Self::Callback(message.into())
    }
}

/// Convenience alias; the default error type is [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
