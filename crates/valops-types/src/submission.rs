//! Per-attempt submission outcomes.

use std::fmt;

/// Terminal outcome of one submission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The node accepted the operation (or it was serialized/written locally).
    Success,
    /// The node actively rejected the operation.
    Rejected,
    /// The node could not be reached or the transfer failed.
    TransportError,
}

/// One result per submission attempt. Attempts are independent: results are
/// reported, never retried and never aggregated into shared mutable state.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmissionResult {
    pub outcome: Outcome,
    pub detail: String,
}

impl SubmissionResult {
    pub fn success(detail: impl Into<String>) -> Self {
        Self {
            outcome: Outcome::Success,
            detail: detail.into(),
        }
    }

    pub fn rejected(detail: impl Into<String>) -> Self {
        Self {
            outcome: Outcome::Rejected,
            detail: detail.into(),
        }
    }

    pub fn transport_error(detail: impl Into<String>) -> Self {
        Self {
            outcome: Outcome::TransportError,
            detail: detail.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Success
    }
}

impl fmt::Display for SubmissionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.outcome {
            Outcome::Success => write!(f, "{}", self.detail),
            Outcome::Rejected => write!(f, "rejected: {}", self.detail),
            Outcome::TransportError => write!(f, "transport error: {}", self.detail),
        }
    }
}
