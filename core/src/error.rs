//! Domain errors shared by the reducers.

use crate::availability::AvailabilityError;
use crate::split::SplitError;
use thiserror::Error;

/// Coarse classification used by the HTTP layer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caller may not perform the action
    Forbidden,
    /// Request data is invalid
    Validation,
    /// Entity is in the wrong state
    Conflict,
}

/// Rejection of an action by a reducer
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Status transition not in the allowed graph
    #[error("cannot move {entity} from {current} to {requested}")]
    InvalidTransition {
        /// Entity kind ("booking", "job", "quote")
        entity: &'static str,
        /// Current status
        current: String,
        /// Requested status or operation
        requested: String,
    },

    /// Actor lacks the ownership or role required
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Input failed validation
    #[error("{message}")]
    Validation {
        /// Machine-readable reason code
        code: &'static str,
        /// Human-readable message
        message: String,
    },

    /// Entity state prevents the action (duplicate, already pending)
    #[error("conflict: {0}")]
    Conflict(String),

    /// Split calculation rejected the amounts
    #[error(transparent)]
    Split(#[from] SplitError),

    /// Proposed slot failed availability validation
    #[error(transparent)]
    Unavailable(#[from] AvailabilityError),
}

impl DomainError {
    /// Illegal transition helper
    pub fn transition(
        entity: &'static str,
        current: impl ToString,
        requested: impl ToString,
    ) -> Self {
        Self::InvalidTransition {
            entity,
            current: current.to_string(),
            requested: requested.to_string(),
        }
    }

    /// Validation helper
    pub fn validation(code: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            code,
            message: message.into(),
        }
    }

    /// Forbidden helper
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden(message.into())
    }

    /// HTTP-facing classification
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidTransition { .. } | Self::Conflict(_) => ErrorKind::Conflict,
            Self::Forbidden(_) => ErrorKind::Forbidden,
            Self::Validation { .. } | Self::Split(_) | Self::Unavailable(_) => {
                ErrorKind::Validation
            }
        }
    }

    /// Machine-readable reason for validation failures
    #[must_use]
    pub const fn reason(&self) -> Option<&'static str> {
        match self {
            Self::Validation { code, .. } => Some(code),
            Self::Split(err) => Some(match err {
                SplitError::NonPositiveAmount { .. } => "non_positive_amount",
                SplitError::UnknownPlanTier(_) => "unknown_plan_tier",
                SplitError::RemainderExceedsJobTotal { .. } => "remainder_exceeds_job_total",
                SplitError::RefundExceedsCharge { .. } => "refund_exceeds_charge",
                SplitError::InvalidRate { .. } => "invalid_rate",
            }),
            Self::Unavailable(err) => Some(err.reason()),
            _ => None,
        }
    }
}
