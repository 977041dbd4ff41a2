//! Routing error types

use crate::forward::ErrorRecord;
use std::fmt;
use thiserror::Error;

/// Forwarding stage of the disposition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Forwarding to the configured destination
    Accept,
    /// Forwarding to the reject treatment
    RejectForward,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Accept => write!(f, "accept"),
            Stage::RejectForward => write!(f, "reject-forward"),
        }
    }
}

/// Error returned by the router.
///
/// [`RoutingError::Retryable`] is the signal that the whole message must be
/// delivered again later; the other variants are failures to run at all.
#[derive(Debug, Error)]
pub enum RoutingError {
    #[error("Setup error: {0}")]
    Setup(String),

    #[error("Store error: {0}")]
    Store(#[from] subroute_common::Error),

    #[error("Recoverable delivery failure during {stage}: {}", describe(.errors))]
    Retryable {
        stage: Stage,
        errors: Vec<ErrorRecord>,
    },
}

impl RoutingError {
    /// Whether the caller should try the message again later
    pub fn is_retryable(&self) -> bool {
        matches!(self, RoutingError::Retryable { .. } | RoutingError::Store(_))
    }
}

fn describe(errors: &[ErrorRecord]) -> String {
    errors
        .iter()
        .filter(|e| e.recoverable)
        .map(|e| format!("{}: {}", e.address, e.message))
        .collect::<Vec<_>>()
        .join("; ")
}
