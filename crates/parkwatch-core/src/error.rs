use thiserror::Error;

/// Outcome classification for a queued action that failed.
///
/// Every executor must tag its failure: [`ActionError::Retryable`] keeps
/// the action in the queue (within its retry budget) and demotes it to
/// the tail; [`ActionError::Permanent`] drops it immediately. There is
/// no untagged failure path, so "retry forever on any error" cannot
/// happen by accident.
#[derive(Debug, Clone, Error)]
pub enum ActionError {
    /// Transient failure (network blip, backend restart). Worth retrying.
    #[error("retryable failure: {0}")]
    Retryable(String),

    /// Terminal failure (rejected payload, auth failure). Retrying would
    /// fail identically, so the action is discarded.
    #[error("permanent failure: {0}")]
    Permanent(String),
}

impl ActionError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }
}

impl From<parkwatch_api::Error> for ActionError {
    fn from(e: parkwatch_api::Error) -> Self {
        if e.is_transient() {
            Self::Retryable(e.to_string())
        } else {
            Self::Permanent(e.to_string())
        }
    }
}
