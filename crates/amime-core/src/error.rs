//! Errors raised by step implementations.

use thiserror::Error;

/// Errors a step can return from [`Step::invoke`](crate::Step::invoke).
///
/// The engine never inspects these beyond reporting them; retry decisions
/// are made by the step itself through [`StepError::is_retryable`].
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum StepError {
    /// A key the step needs is not in the state.
    #[error("Missing state key: {0}")]
    MissingKey(String),

    /// A key is present but holds the wrong kind of value.
    #[error("State key '{key}' has an unexpected value, expected {expected}")]
    InvalidValue {
        /// The offending key.
        key: String,
        /// What the step expected to find.
        expected: &'static str,
    },

    /// The step's own work failed.
    #[error("{message}")]
    Failed {
        /// Details about the failure.
        message: String,
        /// Whether repeating the same work may succeed.
        retryable: bool,
    },

    /// Any other error bubbled up from the step's dependencies.
    #[error(transparent)]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl StepError {
    /// A failure that will not go away by trying again.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
            retryable: false,
        }
    }

    /// A transient failure worth retrying.
    pub fn retryable(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
            retryable: true,
        }
    }

    /// Wraps an arbitrary error.
    pub fn other<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Other(Box::new(error))
    }

    /// Returns `true` if the step classified this error as transient.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StepError::Failed {
                retryable: true,
                ..
            }
        )
    }
}
