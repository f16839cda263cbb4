//! Reservation entity model.
//!
//! A reservation is created `pending`, moves through `approved` and `active`,
//! and ends in one of the terminal states `rejected` or `completed`. It is
//! never deleted.

use crate::error::ValidationError;
use crate::types::{ItemId, ReservationId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReservationStatus {
    /// Requested, awaiting an admin decision
    Pending,
    /// Approved, awaiting handoff
    Approved,
    /// Rejected by an admin (terminal)
    Rejected,
    /// Item handed over to the requester
    Active,
    /// Item returned (terminal)
    Completed,
}

impl ReservationStatus {
    /// Whether no further transition can leave this state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Rejected | Self::Completed)
    }

    /// Wire name of the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Active => "active",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Condition of an item when it comes back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReturnCondition {
    /// Returned without issues
    Good,
    /// Returned damaged; notes are mandatory
    Damage,
}

impl fmt::Display for ReturnCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Good => f.write_str("good"),
            Self::Damage => f.write_str("damage"),
        }
    }
}

/// A request to borrow an inventory item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reservation {
    /// Unique identifier
    pub id: ReservationId,
    /// Reserved item (referenced, owned by the item registry)
    pub item_id: ItemId,
    /// Display name of the reserved item
    pub item_name: String,
    /// Current lifecycle state
    pub status: ReservationStatus,
    /// Why the reservation was rejected; set iff `status == Rejected`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
    /// Condition reported on return; set only when completed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_condition: Option<ReturnCondition>,
    /// Notes about the returned item; mandatory for damaged returns
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_condition_on_return: Option<String>,
    /// User who requested the item
    pub requested_by: UserId,
    /// Admin who approved or rejected the request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_by: Option<UserId>,
    /// When the request was created
    pub created_at: DateTime<Utc>,
    /// When the record last changed
    pub updated_at: DateTime<Utc>,
}

impl Reservation {
    /// Create a fresh `pending` reservation from a request.
    #[must_use]
    pub fn pending(id: ReservationId, request: NewReservation, now: DateTime<Utc>) -> Self {
        Self {
            id,
            item_id: request.item_id,
            item_name: request.item_name,
            status: ReservationStatus::Pending,
            rejection_reason: None,
            return_condition: None,
            item_condition_on_return: None,
            requested_by: request.requested_by,
            decided_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Check the cross-field invariants of the record.
    ///
    /// - a rejection reason is present (and non-blank) iff the status is `rejected`
    /// - a return condition is present iff the status is `completed`
    /// - a damaged return carries non-blank condition notes
    ///
    /// # Errors
    ///
    /// Returns the first violated invariant.
    pub fn check_invariants(&self) -> Result<(), ValidationError> {
        let rejected = self.status == ReservationStatus::Rejected;
        match (&self.rejection_reason, rejected) {
            (Some(_), false) => return Err(ValidationError::UnexpectedRejectionReason),
            (None, true) => return Err(ValidationError::MissingRejectionReason),
            (Some(reason), true) if is_blank(reason) => {
                return Err(ValidationError::MissingRejectionReason);
            }
            _ => {}
        }

        let completed = self.status == ReservationStatus::Completed;
        match (self.return_condition, completed) {
            (Some(_), false) => Err(ValidationError::UnexpectedReturnCondition),
            (None, true) => Err(ValidationError::MissingReturnCondition),
            (Some(ReturnCondition::Damage), true)
                if self.item_condition_on_return.as_deref().is_none_or(is_blank) =>
            {
                Err(ValidationError::MissingDamageNotes)
            }
            _ => Ok(()),
        }
    }

    /// Apply an acknowledged patch to this record.
    ///
    /// Only the backing store calls this; the core never mutates a canonical
    /// record outside a transition.
    pub fn apply(&mut self, patch: &ReservationPatch) {
        self.status = patch.status;
        if let Some(reason) = &patch.rejection_reason {
            self.rejection_reason = Some(reason.clone());
        }
        if let Some(condition) = patch.return_condition {
            self.return_condition = Some(condition);
        }
        if let Some(notes) = &patch.item_condition_on_return {
            self.item_condition_on_return = Some(notes.clone());
        }
        if let Some(decided_by) = &patch.decided_by {
            self.decided_by = Some(decided_by.clone());
        }
        self.updated_at = patch.updated_at;
    }
}

/// Payload of a reservation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewReservation {
    /// Item to reserve
    pub item_id: ItemId,
    /// Display name of the item
    pub item_name: String,
    /// User asking for the item
    pub requested_by: UserId,
}

/// Partial update written atomically by a transition.
///
/// `None` fields are left untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationPatch {
    /// New status
    pub status: ReservationStatus,
    /// Rejection reason (reject only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
    /// Return condition (complete only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_condition: Option<ReturnCondition>,
    /// Return notes (complete only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_condition_on_return: Option<String>,
    /// Deciding admin (approve and reject)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_by: Option<UserId>,
    /// Modification time
    pub updated_at: DateTime<Utc>,
}

pub(crate) fn is_blank(text: &str) -> bool {
    text.trim().is_empty()
}
