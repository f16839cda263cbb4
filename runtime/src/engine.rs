//! Reservation transition engine.
//!
//! The engine executes [`plan_transition`] plans against the backing store:
//!
//! 1. Look up the caller's role and check it against the [`AccessPolicy`]
//! 2. Fetch the reservation and plan the transition (state, then payload)
//! 3. Write the patch, guarded by the expected source status
//! 4. Create the one notification the transition emits
//! 5. Invalidate attached notification feeds
//!
//! Nothing is mutated locally before the store acknowledges the write; the
//! returned reservation is the stored record.
//!
//! Each transition runs on its own task. Dropping the caller's future does
//! not cancel it, and at most one transition per reservation is in flight.

use crate::feed::NotificationFeed;
use crate::metrics::{NOTIFICATIONS_LOST, TRANSITIONS_APPLIED, TRANSITIONS_REJECTED};
use equipment_desk_core::backend::{NotificationBackend, ReservationBackend, RoleSource};
use equipment_desk_core::environment::Clock;
use equipment_desk_core::notification::{Notification, NotificationDraft};
use equipment_desk_core::permission::AccessPolicy;
use equipment_desk_core::reservation::{NewReservation, Reservation};
use equipment_desk_core::transition::{
    CompletePayload, RejectPayload, TransitionCommand, TransitionKind, plan_transition,
    request_notice, validate_request,
};
use equipment_desk_core::types::{ReservationId, Role, UserId};
use equipment_desk_core::{DeskError, DeskResult};
use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

/// Result of a successful transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionOutcome {
    /// The reservation as acknowledged by the backing store
    pub reservation: Reservation,
    /// The notification created for it; `None` if that write failed after
    /// the reservation update committed
    pub notification: Option<Notification>,
}

/// Applies reservation transitions.
///
/// Cloning is cheap; clones share the in-flight guard.
#[derive(Clone)]
pub struct TransitionEngine {
    reservations: Arc<dyn ReservationBackend>,
    notifications: Arc<dyn NotificationBackend>,
    roles: Arc<dyn RoleSource>,
    clock: Arc<dyn Clock>,
    policy: AccessPolicy,
    feeds: Vec<NotificationFeed>,
    in_flight: Arc<Mutex<HashSet<ReservationId>>>,
}

impl TransitionEngine {
    /// Create an engine using the default [`AccessPolicy`].
    #[must_use]
    pub fn new(
        reservations: Arc<dyn ReservationBackend>,
        notifications: Arc<dyn NotificationBackend>,
        roles: Arc<dyn RoleSource>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            reservations,
            notifications,
            roles,
            clock,
            policy: AccessPolicy::default(),
            feeds: Vec::new(),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Use `policy` instead of the default.
    #[must_use]
    pub fn with_policy(mut self, policy: AccessPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Invalidate `feed` after every successful transition.
    #[must_use]
    pub fn with_feed(mut self, feed: NotificationFeed) -> Self {
        self.feeds.push(feed);
        self
    }

    /// The policy transitions are checked against.
    #[must_use]
    pub const fn policy(&self) -> &AccessPolicy {
        &self.policy
    }

    /// Whether a transition for `id` has been issued and not yet resolved.
    #[must_use]
    pub fn is_in_flight(&self, id: &ReservationId) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(id)
    }

    /// Apply `command` to reservation `id` on behalf of `actor`.
    ///
    /// # Errors
    ///
    /// - `TransitionInFlight`: another transition for `id` has not resolved
    /// - `Permission`: the caller's role may not request this transition
    /// - `NotFound`: no such reservation
    /// - `InvalidState`: the reservation is not in the source state, either
    ///   when fetched or by the time the write reached the store
    /// - `Validation`: the payload is incomplete
    /// - `Transport`: the store could not be reached
    #[tracing::instrument(skip(self, command), fields(kind = %command.kind()))]
    pub async fn apply(
        &self,
        id: ReservationId,
        actor: UserId,
        command: TransitionCommand,
    ) -> DeskResult<TransitionOutcome> {
        let kind = command.kind();
        let guard = InFlightGuard::acquire(&self.in_flight, &id)
            .inspect_err(|error| record_refusal(kind, error))?;

        let engine = self.clone();
        detached(async move {
            let _guard = guard;
            let result = engine.execute(id, actor, command).await;
            record(kind, &result);
            result
        })
        .await
    }

    /// Approve a pending reservation.
    ///
    /// # Errors
    ///
    /// See [`TransitionEngine::apply`].
    pub async fn approve(
        &self,
        id: ReservationId,
        actor: UserId,
    ) -> DeskResult<TransitionOutcome> {
        self.apply(id, actor, TransitionCommand::Approve).await
    }

    /// Reject a pending reservation with a reason.
    ///
    /// # Errors
    ///
    /// See [`TransitionEngine::apply`].
    pub async fn reject(
        &self,
        id: ReservationId,
        actor: UserId,
        rejection_reason: impl Into<String>,
    ) -> DeskResult<TransitionOutcome> {
        self.apply(id, actor, TransitionCommand::Reject(RejectPayload::new(rejection_reason)))
            .await
    }

    /// Confirm the handoff of an approved reservation.
    ///
    /// # Errors
    ///
    /// See [`TransitionEngine::apply`].
    pub async fn activate(
        &self,
        id: ReservationId,
        actor: UserId,
    ) -> DeskResult<TransitionOutcome> {
        self.apply(id, actor, TransitionCommand::Activate).await
    }

    /// Complete an active reservation, recording the return condition.
    ///
    /// # Errors
    ///
    /// See [`TransitionEngine::apply`].
    pub async fn complete(
        &self,
        id: ReservationId,
        actor: UserId,
        payload: CompletePayload,
    ) -> DeskResult<TransitionOutcome> {
        self.apply(id, actor, TransitionCommand::Complete(payload)).await
    }

    /// Create a new pending reservation for `actor` and notify the admins.
    ///
    /// # Errors
    ///
    /// - `Permission`: requesting on behalf of someone else, or the policy
    ///   forbids requests for this role
    /// - `Validation`: the item reference is blank
    /// - `Transport`: the store could not be reached
    #[tracing::instrument(skip(self, request), fields(item = %request.item_id))]
    pub async fn request(
        &self,
        actor: UserId,
        request: NewReservation,
    ) -> DeskResult<TransitionOutcome> {
        let engine = self.clone();
        detached(async move {
            let result = engine.execute_request(actor, request).await;
            record(TransitionKind::Request, &result);
            result
        })
        .await
    }

    async fn execute(
        &self,
        id: ReservationId,
        actor: UserId,
        command: TransitionCommand,
    ) -> DeskResult<TransitionOutcome> {
        let role = self.authorize(command.kind()).await?;
        let current = self.reservations.fetch_reservation(id.clone()).await?;
        let plan = plan_transition(&current, role, &actor, &command, self.clock.now())?;

        let reservation = self
            .reservations
            .update_reservation(plan.reservation_id, plan.expected, plan.patch)
            .await?;
        tracing::info!(
            reservation_id = %reservation.id,
            status = %reservation.status,
            "Transition applied"
        );

        let notification = self.deliver(plan.notification).await;
        self.invalidate_feeds().await;

        Ok(TransitionOutcome {
            reservation,
            notification,
        })
    }

    async fn execute_request(
        &self,
        actor: UserId,
        request: NewReservation,
    ) -> DeskResult<TransitionOutcome> {
        let role = self.authorize(TransitionKind::Request).await?;
        validate_request(role, &actor, &request)?;

        let pending = Reservation::pending(ReservationId::generate(), request, self.clock.now());
        let reservation = self.reservations.create_reservation(pending).await?;
        tracing::info!(reservation_id = %reservation.id, "Reservation requested");

        let notification = self.deliver(request_notice(&reservation)).await;
        self.invalidate_feeds().await;

        Ok(TransitionOutcome {
            reservation,
            notification,
        })
    }

    async fn authorize(&self, kind: TransitionKind) -> DeskResult<Role> {
        let role = self.roles.current_role().await?;
        if !self.policy.allows_transition(role, kind) {
            return Err(DeskError::Permission { role, kind });
        }
        Ok(role)
    }

    /// Create the notification; a failure is logged and counted, never retried.
    async fn deliver(&self, draft: NotificationDraft) -> Option<Notification> {
        let recipient = draft.recipient.clone();
        match self.notifications.create_notification(draft).await {
            Ok(notification) => Some(notification),
            Err(error) => {
                metrics::counter!(NOTIFICATIONS_LOST).increment(1);
                tracing::error!(
                    %recipient,
                    %error,
                    "Reservation updated but its notification was not created"
                );
                None
            },
        }
    }

    async fn invalidate_feeds(&self) {
        for feed in &self.feeds {
            if let Err(error) = feed.invalidate().await {
                tracing::debug!(recipient = %feed.recipient(), %error, "Feed not invalidated");
            }
        }
    }
}

impl std::fmt::Debug for TransitionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransitionEngine")
            .field("policy", &self.policy)
            .field("feeds", &self.feeds.len())
            .finish_non_exhaustive()
    }
}

/// Run `work` on its own task so dropping the caller does not cancel it.
async fn detached<F>(work: F) -> DeskResult<TransitionOutcome>
where
    F: Future<Output = DeskResult<TransitionOutcome>> + Send + 'static,
{
    tokio::spawn(work)
        .await
        .map_err(|e| DeskError::Transport(format!("transition task failed: {e}")))?
}

fn record(kind: TransitionKind, result: &DeskResult<TransitionOutcome>) {
    match result {
        Ok(_) => metrics::counter!(TRANSITIONS_APPLIED, "kind" => kind.as_str()).increment(1),
        Err(error) => record_refusal(kind, error),
    }
}

fn record_refusal(kind: TransitionKind, error: &DeskError) {
    metrics::counter!(
        TRANSITIONS_REJECTED,
        "kind" => kind.as_str(),
        "error" => error.kind()
    )
    .increment(1);
    tracing::warn!(%kind, %error, "Transition refused");
}

/// Marks a reservation as having a transition in flight until dropped.
struct InFlightGuard {
    in_flight: Arc<Mutex<HashSet<ReservationId>>>,
    id: ReservationId,
}

impl InFlightGuard {
    fn acquire(
        in_flight: &Arc<Mutex<HashSet<ReservationId>>>,
        id: &ReservationId,
    ) -> DeskResult<Self> {
        let mut ids = in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if !ids.insert(id.clone()) {
            return Err(DeskError::TransitionInFlight(id.clone()));
        }
        Ok(Self {
            in_flight: Arc::clone(in_flight),
            id: id.clone(),
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}
