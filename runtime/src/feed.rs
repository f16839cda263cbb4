//! Notification feed synchronizer.
//!
//! [`NotificationFeed`] drives a [`FeedReducer`] through a [`Store`]: it
//! starts and stops the periodic poll, issues the read/delete mutations
//! against the backing store and invalidates the view after each of them.
//!
//! Observers follow the feed through [`FeedWatcher`], which wakes on every
//! state change and hands out a [`FeedSnapshot`].

use crate::metrics::{FEED_REFRESH_FAILURES, FEED_REFRESHES};
use crate::{EffectHandle, Store, StoreError, WeakStore};
use equipment_desk_core::backend::{BackendFuture, NotificationBackend};
use equipment_desk_core::environment::Clock;
use equipment_desk_core::feed::{FeedAction, FeedEnvironment, FeedReducer, FeedState};
use equipment_desk_core::notification::{Notification, NotificationDraft, Recipient};
use equipment_desk_core::types::NotificationId;
use equipment_desk_core::{DateTime, DeskError, DeskResult, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Store type behind a [`NotificationFeed`]
pub type FeedStore = Store<FeedState, FeedAction, FeedEnvironment, FeedReducer>;

/// Point-in-time view of the feed handed to observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedSnapshot {
    /// Current entries
    pub entries: Vec<Notification>,
    /// Entries whose read flag is falsy
    pub unread_count: usize,
    /// Error of the most recent failed refresh
    pub last_error: Option<DeskError>,
    /// When a refresh was last applied
    pub last_refreshed_at: Option<DateTime<Utc>>,
    /// Whether the periodic poll is running
    pub polling: bool,
}

impl FeedSnapshot {
    fn of(state: &FeedState) -> Self {
        Self {
            entries: state.entries().to_vec(),
            unread_count: state.unread_count(),
            last_error: state.last_error().cloned(),
            last_refreshed_at: state.last_refreshed_at(),
            polling: state.is_polling(),
        }
    }
}

/// Polled, invalidated view of one recipient's notifications.
///
/// Cloning is cheap; clones share the same view.
#[derive(Clone)]
pub struct NotificationFeed {
    recipient: Recipient,
    store: FeedStore,
    notifications: Arc<dyn NotificationBackend>,
    clock: Arc<dyn Clock>,
}

impl NotificationFeed {
    /// Create an idle feed for `recipient`. Call [`NotificationFeed::start`]
    /// to begin polling.
    #[must_use]
    pub fn new(recipient: Recipient, mut environment: FeedEnvironment) -> Self {
        let notifications: Arc<dyn NotificationBackend> = Arc::new(CountedRefreshes {
            inner: Arc::clone(&environment.notifications),
        });
        environment.notifications = Arc::clone(&notifications);
        let clock = Arc::clone(&environment.clock);

        Self {
            store: Store::new(FeedState::new(recipient.clone()), FeedReducer::new(), environment),
            recipient,
            notifications,
            clock,
        }
    }

    /// Whose notifications this feed shows.
    #[must_use]
    pub const fn recipient(&self) -> &Recipient {
        &self.recipient
    }

    /// Start the periodic poll. Refreshes immediately; the returned handle
    /// resolves once that first refresh is applied.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ShutdownInProgress`] after [`NotificationFeed::shutdown`].
    #[tracing::instrument(skip(self), fields(recipient = %self.recipient))]
    pub async fn start(&self) -> Result<EffectHandle, StoreError> {
        tracing::debug!("Starting feed polling");
        self.store.send(FeedAction::StartPolling).await
    }

    /// Stop the periodic poll. Pending timers fire into nothing.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ShutdownInProgress`] after [`NotificationFeed::shutdown`].
    #[tracing::instrument(skip(self), fields(recipient = %self.recipient))]
    pub async fn stop(&self) -> Result<(), StoreError> {
        tracing::debug!("Stopping feed polling");
        self.store.send(FeedAction::StopPolling).await.map(|_| ())
    }

    /// Stop polling and wait for in-flight refreshes.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ShutdownTimeout`] if refreshes are still running
    /// after `timeout`.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), StoreError> {
        if !self.store.is_shutting_down() {
            self.stop().await?;
        }
        self.store.shutdown(timeout).await
    }

    /// Refresh now without waiting for the result.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ShutdownInProgress`] after [`NotificationFeed::shutdown`].
    pub async fn invalidate(&self) -> Result<EffectHandle, StoreError> {
        self.store.send(FeedAction::Refresh).await
    }

    /// Refresh now and wait until the result is applied.
    ///
    /// A failed fetch is not an error here; it is recorded in
    /// [`FeedSnapshot::last_error`].
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ShutdownInProgress`] after [`NotificationFeed::shutdown`].
    pub async fn refresh(&self) -> Result<(), StoreError> {
        let mut handle = self.invalidate().await?;
        handle.wait().await;
        Ok(())
    }

    /// Mark one notification read.
    ///
    /// Idempotent: marking an entry already observed read makes no backend
    /// call and triggers no refresh.
    ///
    /// # Errors
    ///
    /// - `NotFound`: the store has no such notification
    /// - `Transport`: the store could not be reached
    #[tracing::instrument(skip(self), fields(recipient = %self.recipient))]
    pub async fn mark_as_read(&self, id: NotificationId) -> DeskResult<()> {
        if self.store.state(|s| s.is_read(&id)).await {
            tracing::debug!("Already read, nothing to do");
            return Ok(());
        }

        self.notifications.mark_notification_read(id.clone()).await?;
        self.dispatch(FeedAction::MarkedRead { id }).await;
        self.invalidate_quietly().await;
        Ok(())
    }

    /// Mark every unread notification of this recipient created up to now
    /// as read. Notifications created after the call stay unread.
    ///
    /// The cutoff is taken from the feed's clock and compared with the
    /// store's `created_at` stamps, so the clock must agree with the store.
    /// A clock running ahead also marks notifications created in the gap.
    ///
    /// Returns how many notifications the store changed.
    ///
    /// # Errors
    ///
    /// - `Transport`: the store could not be reached
    #[tracing::instrument(skip(self), fields(recipient = %self.recipient))]
    pub async fn mark_all_as_read(&self) -> DeskResult<usize> {
        let up_to = self.clock.now();
        let changed = self
            .notifications
            .mark_all_notifications_read(self.recipient.clone(), up_to)
            .await?;
        tracing::debug!(changed, %up_to, "Marked notifications read");

        self.dispatch(FeedAction::MarkedAllRead { up_to }).await;
        self.invalidate_quietly().await;
        Ok(changed)
    }

    /// Delete a notification.
    ///
    /// # Errors
    ///
    /// - `NotFound`: the store has no such notification; the feed is
    ///   refreshed anyway and keeps working
    /// - `Transport`: the store could not be reached
    #[tracing::instrument(skip(self), fields(recipient = %self.recipient))]
    pub async fn delete(&self, id: NotificationId) -> DeskResult<()> {
        match self.notifications.delete_notification(id.clone()).await {
            Ok(()) => {
                self.dispatch(FeedAction::Removed { id }).await;
                self.invalidate_quietly().await;
                Ok(())
            },
            Err(error) => {
                if matches!(error, DeskError::NotFound { .. }) {
                    self.invalidate_quietly().await;
                }
                Err(error)
            },
        }
    }

    /// Current view of the feed.
    pub async fn snapshot(&self) -> FeedSnapshot {
        self.store.state(FeedSnapshot::of).await
    }

    /// Number of unread entries.
    pub async fn unread_count(&self) -> usize {
        self.store.state(FeedState::unread_count).await
    }

    /// Follow the feed as it changes.
    ///
    /// The watcher does not keep the feed alive.
    #[must_use]
    pub fn watch(&self) -> FeedWatcher {
        FeedWatcher {
            versions: self.store.subscribe(),
            store: self.store.downgrade(),
        }
    }

    async fn dispatch(&self, action: FeedAction) {
        if let Err(error) = self.store.send(action).await {
            tracing::debug!(%error, "Feed is shut down, dropping local update");
        }
    }

    async fn invalidate_quietly(&self) {
        if let Err(error) = self.invalidate().await {
            tracing::debug!(%error, "Feed is shut down, skipping invalidation");
        }
    }
}

impl std::fmt::Debug for NotificationFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationFeed")
            .field("recipient", &self.recipient)
            .finish_non_exhaustive()
    }
}

/// Observer of a [`NotificationFeed`].
pub struct FeedWatcher {
    versions: watch::Receiver<u64>,
    store: WeakStore<FeedState, FeedAction, FeedEnvironment, FeedReducer>,
}

impl FeedWatcher {
    /// Wait for the next change and return the resulting snapshot.
    ///
    /// Returns `None` once every handle to the feed has been dropped.
    pub async fn changed(&mut self) -> Option<FeedSnapshot> {
        self.versions.changed().await.ok()?;
        self.current().await
    }

    /// Current snapshot without waiting, or `None` if the feed is gone.
    pub async fn current(&self) -> Option<FeedSnapshot> {
        let store = self.store.upgrade()?;
        Some(store.state(FeedSnapshot::of).await)
    }
}

/// Counts and logs feed fetches; every other call passes through.
struct CountedRefreshes {
    inner: Arc<dyn NotificationBackend>,
}

impl NotificationBackend for CountedRefreshes {
    fn create_notification(&self, draft: NotificationDraft) -> BackendFuture<'_, Notification> {
        self.inner.create_notification(draft)
    }

    fn list_notifications(&self, recipient: Recipient) -> BackendFuture<'_, Vec<Notification>> {
        Box::pin(async move {
            let result = self.inner.list_notifications(recipient.clone()).await;
            match &result {
                Ok(entries) => {
                    metrics::counter!(FEED_REFRESHES).increment(1);
                    tracing::trace!(%recipient, count = entries.len(), "Feed fetched");
                },
                Err(error) => {
                    metrics::counter!(FEED_REFRESH_FAILURES).increment(1);
                    tracing::warn!(
                        %recipient,
                        %error,
                        "Feed refresh failed, keeping previous entries"
                    );
                },
            }
            result
        })
    }

    fn mark_notification_read(&self, id: NotificationId) -> BackendFuture<'_, ()> {
        self.inner.mark_notification_read(id)
    }

    fn mark_all_notifications_read(
        &self,
        recipient: Recipient,
        up_to: DateTime<Utc>,
    ) -> BackendFuture<'_, usize> {
        self.inner.mark_all_notifications_read(recipient, up_to)
    }

    fn delete_notification(&self, id: NotificationId) -> BackendFuture<'_, ()> {
        self.inner.delete_notification(id)
    }
}
