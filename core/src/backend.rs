//! Collaborator contracts the core calls into.
//!
//! The backing store sits behind a request/response interface; these traits
//! describe it without committing to a transport.
//!
//! # Implementations
//!
//! - `InMemoryBackend` (in `equipment-desk-testing`): deterministic, with fault injection
//! - HTTP clients for the real service live with the application
//!
//! # Dyn Compatibility
//!
//! The traits return `Pin<Box<dyn Future>>` instead of using `async fn` so
//! they can be shared as `Arc<dyn ReservationBackend>` and captured by
//! effects.

use crate::error::DeskResult;
use crate::notification::{Notification, NotificationDraft, Recipient};
use crate::permission::AccessPolicy;
use crate::reservation::{Reservation, ReservationPatch, ReservationStatus};
use crate::types::{NotificationId, ReservationId, Role};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by every collaborator call.
pub type BackendFuture<'a, T> = Pin<Box<dyn Future<Output = DeskResult<T>> + Send + 'a>>;

/// Reservation records in the backing store.
pub trait ReservationBackend: Send + Sync {
    /// Load a reservation.
    ///
    /// # Errors
    ///
    /// - `NotFound`: no reservation with this id
    /// - `Transport`: the store could not be reached
    fn fetch_reservation(&self, id: ReservationId) -> BackendFuture<'_, Reservation>;

    /// Persist a new `pending` reservation and return the stored record.
    ///
    /// # Errors
    ///
    /// - `Transport`: the store could not be reached
    fn create_reservation(&self, reservation: Reservation) -> BackendFuture<'_, Reservation>;

    /// Apply `patch` atomically if the record is still in `expected`.
    ///
    /// Either every field of the patch is written or none is.
    ///
    /// # Errors
    ///
    /// - `InvalidState`: the stored status no longer matches `expected`
    /// - `NotFound`: no reservation with this id
    /// - `Transport`: the store could not be reached
    fn update_reservation(
        &self,
        id: ReservationId,
        expected: ReservationStatus,
        patch: ReservationPatch,
    ) -> BackendFuture<'_, Reservation>;
}

/// Notification records in the backing store.
pub trait NotificationBackend: Send + Sync {
    /// Create a notification from a draft; the store assigns id and timestamp.
    ///
    /// # Errors
    ///
    /// - `Transport`: the store could not be reached
    fn create_notification(&self, draft: NotificationDraft) -> BackendFuture<'_, Notification>;

    /// List the notifications addressed to `recipient`, in any order.
    ///
    /// # Errors
    ///
    /// - `Transport`: the store could not be reached
    fn list_notifications(&self, recipient: Recipient) -> BackendFuture<'_, Vec<Notification>>;

    /// Mark one notification read. Marking a read notification is a no-op.
    ///
    /// # Errors
    ///
    /// - `NotFound`: no notification with this id
    /// - `Transport`: the store could not be reached
    fn mark_notification_read(&self, id: NotificationId) -> BackendFuture<'_, ()>;

    /// Mark every unread notification of `recipient` created at or before
    /// `up_to` as read, returning how many changed.
    ///
    /// # Errors
    ///
    /// - `Transport`: the store could not be reached
    fn mark_all_notifications_read(
        &self,
        recipient: Recipient,
        up_to: DateTime<Utc>,
    ) -> BackendFuture<'_, usize>;

    /// Delete a notification.
    ///
    /// # Errors
    ///
    /// - `NotFound`: no notification with this id
    /// - `Transport`: the store could not be reached
    fn delete_notification(&self, id: NotificationId) -> BackendFuture<'_, ()>;
}

/// Source of the signed-in user's role (provided by the session layer).
pub trait RoleSource: Send + Sync {
    /// Role of the current user.
    ///
    /// # Errors
    ///
    /// - `Transport`: the session service could not be reached
    fn current_role(&self) -> BackendFuture<'_, Role>;
}

/// Source of the process-wide permission configuration.
pub trait PolicySource: Send + Sync {
    /// Fetch the current policy.
    ///
    /// # Errors
    ///
    /// - `Transport`: the configuration endpoint could not be reached
    fn fetch_policy(&self) -> BackendFuture<'_, AccessPolicy>;
}
