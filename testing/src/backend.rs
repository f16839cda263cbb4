//! In-memory implementation of every collaborator trait.
//!
//! Behaves like the real backing store where it matters to the core:
//! guarded updates fail with `InvalidState` on a status mismatch, unknown
//! ids fail with `NotFound`, the store assigns notification ids and
//! timestamps, and `mark_all_notifications_read` honours its cutoff.
//!
//! Tests steer it with:
//! - [`InMemoryBackend::calls`] to count calls per [`Operation`]
//! - [`InMemoryBackend::fail_next`] / [`InMemoryBackend::fail_always`] for fault injection
//! - [`InMemoryBackend::gate`] to hold calls until the test releases them

use crate::mocks::FixedClock;
use equipment_desk_core::backend::{
    BackendFuture, NotificationBackend, PolicySource, ReservationBackend, RoleSource,
};
use equipment_desk_core::environment::Clock;
use equipment_desk_core::notification::{Notification, NotificationDraft, Recipient};
use equipment_desk_core::permission::AccessPolicy;
use equipment_desk_core::reservation::{Reservation, ReservationPatch, ReservationStatus};
use equipment_desk_core::types::{NotificationId, ReservationId, Role};
use equipment_desk_core::{DateTime, DeskError, DeskResult, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{Notify, Semaphore};

/// Backend call, for counters, faults and gates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// `ReservationBackend::fetch_reservation`
    FetchReservation,
    /// `ReservationBackend::create_reservation`
    CreateReservation,
    /// `ReservationBackend::update_reservation`
    UpdateReservation,
    /// `NotificationBackend::create_notification`
    CreateNotification,
    /// `NotificationBackend::list_notifications`
    ListNotifications,
    /// `NotificationBackend::mark_notification_read`
    MarkRead,
    /// `NotificationBackend::mark_all_notifications_read`
    MarkAllRead,
    /// `NotificationBackend::delete_notification`
    DeleteNotification,
    /// `RoleSource::current_role`
    CurrentRole,
    /// `PolicySource::fetch_policy`
    FetchPolicy,
}

#[derive(Debug, Clone)]
enum Fault {
    Once(DeskError),
    Always(DeskError),
}

/// Holds calls of one operation until released.
///
/// Calls entering a closed gate wait; [`Gate::entered`] resolves once a call
/// is waiting. Releasing opens the gate for good.
#[derive(Debug, Clone)]
pub struct Gate {
    permits: Arc<Semaphore>,
    entered: Arc<Notify>,
}

impl Gate {
    fn closed() -> Self {
        Self {
            permits: Arc::new(Semaphore::new(0)),
            entered: Arc::new(Notify::new()),
        }
    }

    /// Wait until a call is held at the gate.
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    /// Let every held and future call through.
    pub fn release(&self) {
        self.permits.close();
    }

    async fn pass(&self) {
        self.entered.notify_one();
        // Closed semaphore means released
        let _ = self.permits.acquire().await;
    }
}

#[derive(Debug)]
struct Inner {
    reservations: HashMap<ReservationId, Reservation>,
    notifications: Vec<Notification>,
    next_notification: u64,
    role: Role,
    policy: AccessPolicy,
    calls: HashMap<Operation, usize>,
    faults: HashMap<Operation, Fault>,
    gates: HashMap<Operation, Gate>,
}

/// In-memory backing store.
#[derive(Debug)]
pub struct InMemoryBackend {
    inner: Mutex<Inner>,
    clock: FixedClock,
}

impl InMemoryBackend {
    /// Empty store answering `current_role` with `user`. Notification
    /// timestamps come from `clock`.
    #[must_use]
    pub fn new(clock: FixedClock) -> Self {
        Self {
            inner: Mutex::new(Inner {
                reservations: HashMap::new(),
                notifications: Vec::new(),
                next_notification: 1,
                role: Role::User,
                policy: AccessPolicy::default(),
                calls: HashMap::new(),
                faults: HashMap::new(),
                gates: HashMap::new(),
            }),
            clock,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seed a reservation.
    pub fn insert_reservation(&self, reservation: Reservation) {
        self.lock()
            .reservations
            .insert(reservation.id.clone(), reservation);
    }

    /// Stored reservation, if any.
    #[must_use]
    pub fn reservation(&self, id: &ReservationId) -> Option<Reservation> {
        self.lock().reservations.get(id).cloned()
    }

    /// Every stored reservation.
    #[must_use]
    pub fn reservations(&self) -> Vec<Reservation> {
        self.lock().reservations.values().cloned().collect()
    }

    /// Seed a notification as-is.
    pub fn insert_notification(&self, notification: Notification) {
        self.lock().notifications.push(notification);
    }

    /// Every stored notification, in creation order.
    #[must_use]
    pub fn notifications(&self) -> Vec<Notification> {
        self.lock().notifications.clone()
    }

    /// Change the role answered by `current_role`.
    pub fn set_role(&self, role: Role) {
        self.lock().role = role;
    }

    /// Change the policy answered by `fetch_policy`.
    pub fn set_policy(&self, policy: AccessPolicy) {
        self.lock().policy = policy;
    }

    /// Number of calls made to `operation`, including failed ones.
    #[must_use]
    pub fn calls(&self, operation: Operation) -> usize {
        self.lock().calls.get(&operation).copied().unwrap_or(0)
    }

    /// Fail the next call to `operation` with `error`.
    pub fn fail_next(&self, operation: Operation, error: DeskError) {
        self.lock().faults.insert(operation, Fault::Once(error));
    }

    /// Fail every call to `operation` with `error` until cleared.
    pub fn fail_always(&self, operation: Operation, error: DeskError) {
        self.lock().faults.insert(operation, Fault::Always(error));
    }

    /// Remove every injected fault.
    pub fn clear_faults(&self) {
        self.lock().faults.clear();
    }

    /// Hold calls to `operation` until the returned gate is released.
    #[must_use]
    pub fn gate(&self, operation: Operation) -> Gate {
        let gate = Gate::closed();
        self.lock().gates.insert(operation, gate.clone());
        gate
    }

    /// Count the call, wait at its gate, then apply any injected fault.
    async fn enter(&self, operation: Operation) -> DeskResult<()> {
        let gate = {
            let mut inner = self.lock();
            *inner.calls.entry(operation).or_insert(0) += 1;
            inner.gates.get(&operation).cloned()
        };
        if let Some(gate) = gate {
            gate.pass().await;
        }

        let mut inner = self.lock();
        match inner.faults.get(&operation).cloned() {
            None => Ok(()),
            Some(Fault::Always(error)) => Err(error),
            Some(Fault::Once(error)) => {
                inner.faults.remove(&operation);
                Err(error)
            },
        }
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

impl ReservationBackend for InMemoryBackend {
    fn fetch_reservation(&self, id: ReservationId) -> BackendFuture<'_, Reservation> {
        Box::pin(async move {
            self.enter(Operation::FetchReservation).await?;
            self.lock()
                .reservations
                .get(&id)
                .cloned()
                .ok_or_else(|| DeskError::reservation_not_found(&id))
        })
    }

    fn create_reservation(&self, reservation: Reservation) -> BackendFuture<'_, Reservation> {
        Box::pin(async move {
            self.enter(Operation::CreateReservation).await?;
            reservation.check_invariants()?;
            self.lock()
                .reservations
                .insert(reservation.id.clone(), reservation.clone());
            Ok(reservation)
        })
    }

    fn update_reservation(
        &self,
        id: ReservationId,
        expected: ReservationStatus,
        patch: ReservationPatch,
    ) -> BackendFuture<'_, Reservation> {
        Box::pin(async move {
            self.enter(Operation::UpdateReservation).await?;
            let mut inner = self.lock();
            let stored = inner
                .reservations
                .get_mut(&id)
                .ok_or_else(|| DeskError::reservation_not_found(&id))?;
            if stored.status != expected {
                return Err(DeskError::InvalidState {
                    id,
                    expected,
                    actual: stored.status,
                });
            }

            // All or nothing
            let mut updated = stored.clone();
            updated.apply(&patch);
            updated.check_invariants()?;
            *stored = updated.clone();
            Ok(updated)
        })
    }
}

impl NotificationBackend for InMemoryBackend {
    fn create_notification(&self, draft: NotificationDraft) -> BackendFuture<'_, Notification> {
        Box::pin(async move {
            self.enter(Operation::CreateNotification).await?;
            let created_at = self.now();
            let mut inner = self.lock();
            let id = NotificationId::new(format!("n{}", inner.next_notification));
            inner.next_notification += 1;
            let notification = draft.into_notification(id, created_at);
            inner.notifications.push(notification.clone());
            Ok(notification)
        })
    }

    fn list_notifications(&self, recipient: Recipient) -> BackendFuture<'_, Vec<Notification>> {
        Box::pin(async move {
            self.enter(Operation::ListNotifications).await?;
            Ok(self
                .lock()
                .notifications
                .iter()
                .filter(|n| n.recipient_id == recipient)
                .cloned()
                .collect())
        })
    }

    fn mark_notification_read(&self, id: NotificationId) -> BackendFuture<'_, ()> {
        Box::pin(async move {
            self.enter(Operation::MarkRead).await?;
            let mut inner = self.lock();
            let entry = inner
                .notifications
                .iter_mut()
                .find(|n| n.id == id)
                .ok_or_else(|| DeskError::notification_not_found(&id))?;
            entry.is_read = true;
            Ok(())
        })
    }

    fn mark_all_notifications_read(
        &self,
        recipient: Recipient,
        up_to: DateTime<Utc>,
    ) -> BackendFuture<'_, usize> {
        Box::pin(async move {
            self.enter(Operation::MarkAllRead).await?;
            let mut inner = self.lock();
            let mut changed = 0;
            for entry in inner
                .notifications
                .iter_mut()
                .filter(|n| n.recipient_id == recipient && !n.is_read && n.created_at <= up_to)
            {
                entry.is_read = true;
                changed += 1;
            }
            Ok(changed)
        })
    }

    fn delete_notification(&self, id: NotificationId) -> BackendFuture<'_, ()> {
        Box::pin(async move {
            self.enter(Operation::DeleteNotification).await?;
            let mut inner = self.lock();
            let position = inner
                .notifications
                .iter()
                .position(|n| n.id == id)
                .ok_or_else(|| DeskError::notification_not_found(&id))?;
            inner.notifications.remove(position);
            Ok(())
        })
    }
}

impl RoleSource for InMemoryBackend {
    fn current_role(&self) -> BackendFuture<'_, Role> {
        Box::pin(async move {
            self.enter(Operation::CurrentRole).await?;
            Ok(self.lock().role)
        })
    }
}

impl PolicySource for InMemoryBackend {
    fn fetch_policy(&self) -> BackendFuture<'_, AccessPolicy> {
        Box::pin(async move {
            self.enter(Operation::FetchPolicy).await?;
            Ok(self.lock().policy.clone())
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::fixtures;
    use crate::mocks::test_clock;
    use equipment_desk_core::notification::NotificationType;

    fn backend() -> InMemoryBackend {
        InMemoryBackend::new(test_clock())
    }

    #[tokio::test]
    async fn guarded_update_checks_expected_status() {
        let backend = backend();
        let reservation = fixtures::pending("R1", "alice");
        backend.insert_reservation(reservation.clone());

        let patch = ReservationPatch {
            status: ReservationStatus::Active,
            rejection_reason: None,
            return_condition: None,
            item_condition_on_return: None,
            decided_by: None,
            updated_at: reservation.updated_at,
        };
        let err = backend
            .update_reservation("R1".into(), ReservationStatus::Approved, patch)
            .await
            .unwrap_err();
        assert!(matches!(err, DeskError::InvalidState { .. }));
        assert_eq!(
            backend.reservation(&"R1".into()).unwrap().status,
            ReservationStatus::Pending
        );
    }

    #[tokio::test]
    async fn unknown_ids_are_not_found() {
        let backend = backend();
        assert!(matches!(
            backend.fetch_reservation("nope".into()).await,
            Err(DeskError::NotFound { .. })
        ));
        assert!(matches!(
            backend.delete_notification("nope".into()).await,
            Err(DeskError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn store_assigns_ids_and_timestamps() {
        let backend = backend();
        let draft = NotificationDraft {
            kind: NotificationType::Other,
            title: "t".into(),
            message: "m".into(),
            recipient: Recipient::User("alice".into()),
            reservation_id: None,
        };
        let first = backend.create_notification(draft.clone()).await.unwrap();
        let second = backend.create_notification(draft).await.unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(first.created_at, test_clock().now());
        assert!(!first.is_read);
    }

    #[tokio::test]
    async fn faults_fire_once_or_always() {
        let backend = backend();
        backend.fail_next(Operation::CurrentRole, DeskError::Transport("down".into()));
        assert!(backend.current_role().await.is_err());
        assert!(backend.current_role().await.is_ok());

        backend.fail_always(Operation::CurrentRole, DeskError::Transport("down".into()));
        assert!(backend.current_role().await.is_err());
        assert!(backend.current_role().await.is_err());
        backend.clear_faults();
        assert!(backend.current_role().await.is_ok());
        assert_eq!(backend.calls(Operation::CurrentRole), 5);
    }

    #[tokio::test]
    async fn gate_holds_calls_until_released() {
        let backend = Arc::new(backend());
        let gate = backend.gate(Operation::CurrentRole);

        let call = tokio::spawn({
            let backend = Arc::clone(&backend);
            async move { backend.current_role().await }
        });
        gate.entered().await;
        assert!(!call.is_finished());

        gate.release();
        assert_eq!(call.await.unwrap().unwrap(), Role::User);
    }
}
