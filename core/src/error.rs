//! Error taxonomy shared by the transition engine and the notification feed.
//!
//! Every failure resolves to a [`DeskError`]. None of them is fatal to the
//! session, and none of them leaves a partial transition behind.

use crate::reservation::ReservationStatus;
use crate::transition::TransitionKind;
use crate::types::{NotificationId, ReservationId, Role};
use std::fmt;
use thiserror::Error;

/// A transition payload is missing or malformed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Rejecting requires a non-empty reason.
    #[error("a rejection reason is required")]
    MissingRejectionReason,

    /// Completing requires a return condition.
    #[error("a return condition is required to complete a reservation")]
    MissingReturnCondition,

    /// A damaged return requires notes describing the damage.
    #[error("condition notes are required when an item is returned damaged")]
    MissingDamageNotes,

    /// Only rejected reservations carry a rejection reason.
    #[error("a rejection reason is only allowed on rejected reservations")]
    UnexpectedRejectionReason,

    /// Only completed reservations carry a return condition.
    #[error("a return condition is only allowed on completed reservations")]
    UnexpectedReturnCondition,

    /// A request must name the item it reserves.
    #[error("the reserved item must be identified")]
    MissingItemReference,
}

/// Kind of entity an operation could not find.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    /// A reservation record
    Reservation,
    /// A notification record
    Notification,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reservation => f.write_str("reservation"),
            Self::Notification => f.write_str("notification"),
        }
    }
}

/// Errors surfaced by reservation transitions and feed mutations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeskError {
    /// The transition payload is missing a required field. No state changed.
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// The reservation is no longer in the state the transition starts from.
    ///
    /// The caller should refresh and retry.
    #[error("reservation {id} is {actual}, transition requires {expected}")]
    InvalidState {
        /// Reservation the transition targeted
        id: ReservationId,
        /// Source state the transition requires
        expected: ReservationStatus,
        /// State the reservation is actually in
        actual: ReservationStatus,
    },

    /// The caller's role may not request this transition.
    #[error("role {role} may not {kind} reservations")]
    Permission {
        /// Role of the caller
        role: Role,
        /// Transition that was refused
        kind: TransitionKind,
    },

    /// The targeted reservation or notification does not exist.
    #[error("{entity} {id} not found")]
    NotFound {
        /// What kind of record was missing
        entity: EntityKind,
        /// Identifier that was looked up
        id: String,
    },

    /// The backing store could not be reached or failed.
    #[error("transport failure: {0}")]
    Transport(String),

    /// Another transition for the same reservation has not resolved yet.
    #[error("a transition for reservation {0} is already in flight")]
    TransitionInFlight(ReservationId),
}

impl DeskError {
    /// Build a `NotFound` error for a reservation.
    #[must_use]
    pub fn reservation_not_found(id: &ReservationId) -> Self {
        Self::NotFound {
            entity: EntityKind::Reservation,
            id: id.to_string(),
        }
    }

    /// Build a `NotFound` error for a notification.
    #[must_use]
    pub fn notification_not_found(id: &NotificationId) -> Self {
        Self::NotFound {
            entity: EntityKind::Notification,
            id: id.to_string(),
        }
    }

    /// Whether retrying the same request later can succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::TransitionInFlight(_))
    }

    /// Stable label for logs and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::InvalidState { .. } => "invalid_state",
            Self::Permission { .. } => "permission",
            Self::NotFound { .. } => "not_found",
            Self::Transport(_) => "transport",
            Self::TransitionInFlight(_) => "in_flight",
        }
    }
}

/// Result alias used throughout the crate.
pub type DeskResult<T> = Result<T, DeskError>;
