//! Reservation transition planning.
//!
//! Planning is pure: given the current record, the caller's role and the
//! requested command, it either refuses with a [`DeskError`] or produces a
//! [`TransitionPlan`] holding the guarded patch and the single notification
//! the transition must emit. Executing the plan against the backing store is
//! the runtime's job.
//!
//! ```text
//! pending ──approve──▶ approved ──activate──▶ active ──complete──▶ completed
//!    │
//!    └──reject──▶ rejected
//! ```
//!
//! Checks run in a fixed order: permission, source state, payload.

use crate::error::{DeskError, DeskResult, ValidationError};
use crate::notification::{NotificationDraft, NotificationType, Recipient};
use crate::permission::can_transition;
use crate::reservation::{
    NewReservation, Reservation, ReservationPatch, ReservationStatus, ReturnCondition, is_blank,
};
use crate::types::{ReservationId, Role, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of lifecycle change a caller can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitionKind {
    /// Create a new `pending` reservation
    Request,
    /// `pending → approved`
    Approve,
    /// `pending → rejected`
    Reject,
    /// `approved → active` (item handed over)
    Activate,
    /// `active → completed` (item returned)
    Complete,
}

impl TransitionKind {
    /// State the reservation must be in for this transition, if any.
    #[must_use]
    pub const fn source(self) -> Option<ReservationStatus> {
        match self {
            Self::Request => None,
            Self::Approve | Self::Reject => Some(ReservationStatus::Pending),
            Self::Activate => Some(ReservationStatus::Approved),
            Self::Complete => Some(ReservationStatus::Active),
        }
    }

    /// State the reservation ends up in.
    #[must_use]
    pub const fn target(self) -> ReservationStatus {
        match self {
            Self::Request => ReservationStatus::Pending,
            Self::Approve => ReservationStatus::Approved,
            Self::Reject => ReservationStatus::Rejected,
            Self::Activate => ReservationStatus::Active,
            Self::Complete => ReservationStatus::Completed,
        }
    }

    /// Wire name of the transition.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::Approve => "approve",
            Self::Reject => "reject",
            Self::Activate => "activate",
            Self::Complete => "complete",
        }
    }
}

impl fmt::Display for TransitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input captured by the reject dialog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectPayload {
    /// Why the request is refused; must not be blank
    pub rejection_reason: String,
}

impl RejectPayload {
    /// Build a payload from dialog input.
    #[must_use]
    pub fn new(rejection_reason: impl Into<String>) -> Self {
        Self {
            rejection_reason: rejection_reason.into(),
        }
    }

    /// Validate and return the trimmed reason.
    ///
    /// # Errors
    ///
    /// [`ValidationError::MissingRejectionReason`] when the reason is blank.
    pub fn validate(&self) -> Result<String, ValidationError> {
        if is_blank(&self.rejection_reason) {
            return Err(ValidationError::MissingRejectionReason);
        }
        Ok(self.rejection_reason.trim().to_owned())
    }
}

/// Input captured by the return dialog.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletePayload {
    /// Condition of the returned item; required
    #[serde(default)]
    pub return_condition: Option<ReturnCondition>,
    /// Notes on the item; required and non-blank iff the condition is `damage`
    #[serde(default)]
    pub item_condition_on_return: Option<String>,
}

impl CompletePayload {
    /// Item came back fine.
    #[must_use]
    pub const fn good() -> Self {
        Self {
            return_condition: Some(ReturnCondition::Good),
            item_condition_on_return: None,
        }
    }

    /// Item came back damaged, with a description.
    #[must_use]
    pub fn damaged(notes: impl Into<String>) -> Self {
        Self {
            return_condition: Some(ReturnCondition::Damage),
            item_condition_on_return: Some(notes.into()),
        }
    }

    /// Validate and return the condition with trimmed notes.
    ///
    /// Blank notes on a good return are dropped.
    ///
    /// # Errors
    ///
    /// - [`ValidationError::MissingReturnCondition`] without a condition
    /// - [`ValidationError::MissingDamageNotes`] for a damaged return without notes
    pub fn validate(&self) -> Result<(ReturnCondition, Option<String>), ValidationError> {
        let condition = self
            .return_condition
            .ok_or(ValidationError::MissingReturnCondition)?;
        let notes = self
            .item_condition_on_return
            .as_deref()
            .map(str::trim)
            .filter(|notes| !notes.is_empty())
            .map(str::to_owned);

        if condition == ReturnCondition::Damage && notes.is_none() {
            return Err(ValidationError::MissingDamageNotes);
        }
        Ok((condition, notes))
    }
}

/// A lifecycle change requested for an existing reservation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TransitionCommand {
    /// Approve a pending request
    Approve,
    /// Reject a pending request
    Reject(RejectPayload),
    /// Confirm the item was handed over
    Activate,
    /// Mark the item returned
    Complete(CompletePayload),
}

impl TransitionCommand {
    /// Which transition this command asks for.
    #[must_use]
    pub const fn kind(&self) -> TransitionKind {
        match self {
            Self::Approve => TransitionKind::Approve,
            Self::Reject(_) => TransitionKind::Reject,
            Self::Activate => TransitionKind::Activate,
            Self::Complete(_) => TransitionKind::Complete,
        }
    }
}

/// Everything needed to execute one validated transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionPlan {
    /// Transition being applied
    pub kind: TransitionKind,
    /// Reservation to update
    pub reservation_id: ReservationId,
    /// Precondition: the store must still hold this status
    pub expected: ReservationStatus,
    /// Fields written together with the new status
    pub patch: ReservationPatch,
    /// The one notification this transition emits
    pub notification: NotificationDraft,
}

/// Validate a command against the current record and plan its effects.
///
/// # Errors
///
/// - [`DeskError::Permission`] when `role` may not request the transition
/// - [`DeskError::InvalidState`] when the record is not in the source state
/// - [`DeskError::Validation`] when the payload is incomplete
pub fn plan_transition(
    reservation: &Reservation,
    role: Role,
    actor: &UserId,
    command: &TransitionCommand,
    now: DateTime<Utc>,
) -> DeskResult<TransitionPlan> {
    let kind = command.kind();
    if !can_transition(role, kind) {
        return Err(DeskError::Permission { role, kind });
    }

    let expected = kind.source().unwrap_or(ReservationStatus::Pending);
    if reservation.status != expected {
        return Err(DeskError::InvalidState {
            id: reservation.id.clone(),
            expected,
            actual: reservation.status,
        });
    }

    let mut patch = ReservationPatch {
        status: kind.target(),
        rejection_reason: None,
        return_condition: None,
        item_condition_on_return: None,
        decided_by: None,
        updated_at: now,
    };

    let notification = match command {
        TransitionCommand::Approve => {
            patch.decided_by = Some(actor.clone());
            requester_notice(
                reservation,
                NotificationType::ReservationApproved,
                "Reservation approved",
                format!("Your reservation for {} was approved.", reservation.item_name),
            )
        }
        TransitionCommand::Reject(payload) => {
            let reason = payload.validate()?;
            let message = format!(
                "Your reservation for {} was rejected: {reason}",
                reservation.item_name
            );
            patch.rejection_reason = Some(reason);
            patch.decided_by = Some(actor.clone());
            requester_notice(
                reservation,
                NotificationType::ReservationRejected,
                "Reservation rejected",
                message,
            )
        }
        TransitionCommand::Activate => requester_notice(
            reservation,
            NotificationType::Other,
            "Item handed over",
            format!("{} has been handed over to you.", reservation.item_name),
        ),
        TransitionCommand::Complete(payload) => {
            let (condition, notes) = payload.validate()?;
            patch.return_condition = Some(condition);
            patch.item_condition_on_return.clone_from(&notes);
            match condition {
                ReturnCondition::Good => requester_notice(
                    reservation,
                    NotificationType::ReservationApproved,
                    "Reservation completed",
                    format!("Thanks for returning {}.", reservation.item_name),
                ),
                ReturnCondition::Damage => requester_notice(
                    reservation,
                    NotificationType::ItemDamaged,
                    "Item returned damaged",
                    format!(
                        "{} was returned damaged: {}",
                        reservation.item_name,
                        notes.as_deref().unwrap_or_default()
                    ),
                ),
            }
        }
    };

    Ok(TransitionPlan {
        kind,
        reservation_id: reservation.id.clone(),
        expected,
        patch,
        notification,
    })
}

/// Validate a new reservation request from `actor`.
///
/// Any role may request an item, but only for itself.
///
/// # Errors
///
/// - [`DeskError::Permission`] when requesting on behalf of someone else
/// - [`DeskError::Validation`] when the item reference is blank
pub fn validate_request(role: Role, actor: &UserId, request: &NewReservation) -> DeskResult<()> {
    if !can_transition(role, TransitionKind::Request) || &request.requested_by != actor {
        return Err(DeskError::Permission {
            role,
            kind: TransitionKind::Request,
        });
    }
    if is_blank(request.item_id.as_str()) || is_blank(&request.item_name) {
        return Err(ValidationError::MissingItemReference.into());
    }
    Ok(())
}

/// The notification announcing a new request to admins.
#[must_use]
pub fn request_notice(reservation: &Reservation) -> NotificationDraft {
    NotificationDraft {
        kind: NotificationType::ReservationRequest,
        title: "New reservation request".to_owned(),
        message: format!(
            "{} requested {}.",
            reservation.requested_by, reservation.item_name
        ),
        recipient: Recipient::Admins,
        reservation_id: Some(reservation.id.clone()),
    }
}

fn requester_notice(
    reservation: &Reservation,
    kind: NotificationType,
    title: &str,
    message: String,
) -> NotificationDraft {
    NotificationDraft {
        kind,
        title: title.to_owned(),
        message,
        recipient: Recipient::User(reservation.requested_by.clone()),
        reservation_id: Some(reservation.id.clone()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::ItemId;
    use proptest::prelude::*;

    fn reservation_in(status: ReservationStatus) -> Reservation {
        let mut reservation = Reservation::pending(
            ReservationId::new("R1"),
            NewReservation {
                item_id: ItemId::new("tripod-3"),
                item_name: "Tripod".into(),
                requested_by: UserId::new("alice"),
            },
            Utc::now(),
        );
        reservation.status = status;
        if status == ReservationStatus::Rejected {
            reservation.rejection_reason = Some("unavailable".into());
        }
        if status == ReservationStatus::Completed {
            reservation.return_condition = Some(ReturnCondition::Good);
        }
        reservation
    }

    fn admin() -> UserId {
        UserId::new("admin-1")
    }

    #[test]
    fn approve_pending_targets_requester() {
        let reservation = reservation_in(ReservationStatus::Pending);
        let plan = plan_transition(
            &reservation,
            Role::Admin,
            &admin(),
            &TransitionCommand::Approve,
            Utc::now(),
        )
        .unwrap();

        assert_eq!(plan.expected, ReservationStatus::Pending);
        assert_eq!(plan.patch.status, ReservationStatus::Approved);
        assert_eq!(plan.patch.decided_by, Some(admin()));
        assert_eq!(plan.notification.kind, NotificationType::ReservationApproved);
        assert_eq!(
            plan.notification.recipient,
            Recipient::User(UserId::new("alice"))
        );
    }

    #[test]
    fn reject_requires_reason() {
        let reservation = reservation_in(ReservationStatus::Pending);
        let result = plan_transition(
            &reservation,
            Role::Admin,
            &admin(),
            &TransitionCommand::Reject(RejectPayload::new("  ")),
            Utc::now(),
        );
        assert_eq!(
            result,
            Err(DeskError::Validation(ValidationError::MissingRejectionReason))
        );
    }

    #[test]
    fn reject_stores_trimmed_reason() {
        let reservation = reservation_in(ReservationStatus::Pending);
        let plan = plan_transition(
            &reservation,
            Role::Developer,
            &admin(),
            &TransitionCommand::Reject(RejectPayload::new("  booked out ")),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(plan.patch.rejection_reason.as_deref(), Some("booked out"));
        assert_eq!(plan.notification.kind, NotificationType::ReservationRejected);
    }

    #[test]
    fn reject_completed_is_invalid_state() {
        let reservation = reservation_in(ReservationStatus::Completed);
        let result = plan_transition(
            &reservation,
            Role::Admin,
            &admin(),
            &TransitionCommand::Reject(RejectPayload::new("late")),
            Utc::now(),
        );
        assert!(matches!(
            result,
            Err(DeskError::InvalidState {
                expected: ReservationStatus::Pending,
                actual: ReservationStatus::Completed,
                ..
            })
        ));
    }

    #[test]
    fn complete_pending_is_invalid_state() {
        let reservation = reservation_in(ReservationStatus::Pending);
        let result = plan_transition(
            &reservation,
            Role::Admin,
            &admin(),
            &TransitionCommand::Complete(CompletePayload::good()),
            Utc::now(),
        );
        assert!(matches!(result, Err(DeskError::InvalidState { .. })));
    }

    #[test]
    fn complete_damage_without_notes_fails_validation() {
        let reservation = reservation_in(ReservationStatus::Active);
        let result = plan_transition(
            &reservation,
            Role::Admin,
            &admin(),
            &TransitionCommand::Complete(CompletePayload::damaged("")),
            Utc::now(),
        );
        assert_eq!(
            result,
            Err(DeskError::Validation(ValidationError::MissingDamageNotes))
        );
    }

    #[test]
    fn complete_without_condition_fails_validation() {
        let reservation = reservation_in(ReservationStatus::Active);
        let result = plan_transition(
            &reservation,
            Role::Admin,
            &admin(),
            &TransitionCommand::Complete(CompletePayload::default()),
            Utc::now(),
        );
        assert_eq!(
            result,
            Err(DeskError::Validation(ValidationError::MissingReturnCondition))
        );
    }

    #[test]
    fn complete_good_notifies_with_approved_type() {
        let reservation = reservation_in(ReservationStatus::Active);
        let plan = plan_transition(
            &reservation,
            Role::Admin,
            &admin(),
            &TransitionCommand::Complete(CompletePayload::good()),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(plan.patch.return_condition, Some(ReturnCondition::Good));
        assert_eq!(plan.patch.item_condition_on_return, None);
        assert_eq!(plan.notification.kind, NotificationType::ReservationApproved);
        assert_eq!(plan.notification.recipient, Recipient::User(UserId::new("alice")));
    }

    #[test]
    fn complete_damage_notifies_with_item_damaged() {
        let reservation = reservation_in(ReservationStatus::Active);
        let plan = plan_transition(
            &reservation,
            Role::Admin,
            &admin(),
            &TransitionCommand::Complete(CompletePayload::damaged("bent leg")),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(plan.patch.return_condition, Some(ReturnCondition::Damage));
        assert_eq!(plan.patch.item_condition_on_return.as_deref(), Some("bent leg"));
        assert_eq!(plan.notification.kind, NotificationType::ItemDamaged);
    }

    #[test]
    fn user_cannot_approve() {
        let reservation = reservation_in(ReservationStatus::Pending);
        let result = plan_transition(
            &reservation,
            Role::User,
            &UserId::new("alice"),
            &TransitionCommand::Approve,
            Utc::now(),
        );
        assert_eq!(
            result,
            Err(DeskError::Permission {
                role: Role::User,
                kind: TransitionKind::Approve
            })
        );
    }

    #[test]
    fn permission_is_checked_before_state() {
        let reservation = reservation_in(ReservationStatus::Completed);
        let result = plan_transition(
            &reservation,
            Role::User,
            &UserId::new("alice"),
            &TransitionCommand::Approve,
            Utc::now(),
        );
        assert!(matches!(result, Err(DeskError::Permission { .. })));
    }

    #[test]
    fn request_only_for_self() {
        let request = NewReservation {
            item_id: ItemId::new("tripod-3"),
            item_name: "Tripod".into(),
            requested_by: UserId::new("alice"),
        };
        assert!(validate_request(Role::User, &UserId::new("alice"), &request).is_ok());
        assert!(matches!(
            validate_request(Role::Admin, &UserId::new("bob"), &request),
            Err(DeskError::Permission { .. })
        ));
    }

    #[test]
    fn request_notice_goes_to_admins() {
        let reservation = reservation_in(ReservationStatus::Pending);
        let draft = request_notice(&reservation);
        assert_eq!(draft.recipient, Recipient::Admins);
        assert_eq!(draft.kind, NotificationType::ReservationRequest);
    }

    fn arb_command() -> impl Strategy<Value = TransitionCommand> {
        let text = prop_oneof![Just(String::new()), Just("   ".to_owned()), "[a-z ]{1,12}"];
        prop_oneof![
            Just(TransitionCommand::Approve),
            Just(TransitionCommand::Activate),
            text.clone()
                .prop_map(|reason| TransitionCommand::Reject(RejectPayload::new(reason))),
            (
                prop_oneof![
                    Just(None),
                    Just(Some(ReturnCondition::Good)),
                    Just(Some(ReturnCondition::Damage))
                ],
                proptest::option::of(text),
            )
                .prop_map(|(return_condition, item_condition_on_return)| {
                    TransitionCommand::Complete(CompletePayload {
                        return_condition,
                        item_condition_on_return,
                    })
                }),
        ]
    }

    fn arb_role() -> impl Strategy<Value = Role> {
        prop_oneof![Just(Role::User), Just(Role::Admin), Just(Role::Developer)]
    }

    proptest! {
        #[test]
        fn invariants_hold_after_any_command_sequence(
            steps in proptest::collection::vec((arb_role(), arb_command()), 0..12)
        ) {
            let mut reservation = reservation_in(ReservationStatus::Pending);
            for (role, command) in steps {
                let before = reservation.clone();
                match plan_transition(&reservation, role, &admin(), &command, Utc::now()) {
                    Ok(plan) => {
                        prop_assert_eq!(plan.expected, reservation.status);
                        reservation.apply(&plan.patch);
                    }
                    Err(_) => prop_assert_eq!(&reservation, &before),
                }
                prop_assert!(reservation.check_invariants().is_ok());
                prop_assert_eq!(
                    reservation.rejection_reason.is_some(),
                    reservation.status == ReservationStatus::Rejected
                );
            }
        }
    }
}
