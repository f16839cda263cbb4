//! Ready-made records for tests.
//!
//! Every reservation built here satisfies `Reservation::check_invariants`.

use crate::mocks::test_clock;
use equipment_desk_core::environment::Clock;
use equipment_desk_core::notification::{Notification, NotificationType, Recipient};
use equipment_desk_core::reservation::{
    NewReservation, Reservation, ReservationStatus, ReturnCondition,
};
use equipment_desk_core::types::{ItemId, ReservationId, UserId};
use equipment_desk_core::{DateTime, Utc};

/// Request for a camera by `requested_by`.
#[must_use]
pub fn camera_request(requested_by: &str) -> NewReservation {
    NewReservation {
        item_id: ItemId::new("cam-01"),
        item_name: "Camera".to_owned(),
        requested_by: UserId::new(requested_by),
    }
}

/// Pending camera reservation `id` requested by `requested_by`.
#[must_use]
pub fn pending(id: &str, requested_by: &str) -> Reservation {
    Reservation::pending(
        ReservationId::new(id),
        camera_request(requested_by),
        test_clock().now(),
    )
}

/// Camera reservation in `status`, with whatever fields that status requires.
///
/// A completed reservation was returned in good condition.
#[must_use]
pub fn in_status(id: &str, requested_by: &str, status: ReservationStatus) -> Reservation {
    let mut reservation = pending(id, requested_by);
    reservation.status = status;
    if status != ReservationStatus::Pending {
        reservation.decided_by = Some(UserId::new("admin"));
    }
    match status {
        ReservationStatus::Rejected => {
            reservation.rejection_reason = Some("Item unavailable".to_owned());
        },
        ReservationStatus::Completed => {
            reservation.return_condition = Some(ReturnCondition::Good);
        },
        ReservationStatus::Pending | ReservationStatus::Approved | ReservationStatus::Active => {},
    }
    reservation
}

/// Unread notification `id` for user `recipient`, created at `created_at`.
#[must_use]
pub fn notification(id: &str, recipient: &str, created_at: DateTime<Utc>) -> Notification {
    Notification {
        id: id.into(),
        kind: NotificationType::Other,
        title: format!("Notification {id}"),
        message: "Something happened.".to_owned(),
        created_at,
        is_read: false,
        recipient_id: Recipient::User(UserId::new(recipient)),
        reservation_id: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_status_fixture_is_consistent() {
        for status in [
            ReservationStatus::Pending,
            ReservationStatus::Approved,
            ReservationStatus::Rejected,
            ReservationStatus::Active,
            ReservationStatus::Completed,
        ] {
            assert_eq!(in_status("R1", "alice", status).check_invariants(), Ok(()));
        }
    }
}
