//! Notification feed reducer.
//!
//! The feed is a read-mostly, eventually consistent view of one recipient's
//! notifications. Two things make it refresh: a periodic poll and explicit
//! invalidation after a local mutation. Both are plain "refresh now"
//! triggers.
//!
//! # Consistency rules
//!
//! - Each refresh is stamped with a generation. A result older than the one
//!   already applied is dropped, so overlapping refreshes collapse to the
//!   latest (last write wins on the local view).
//! - Read state is sticky: once a notification has been observed read it
//!   stays read in every later refresh that still returns it. Entries that
//!   disappear upstream are forgotten.
//! - A failed refresh keeps the previous entries and records the error; the
//!   next poll is the retry.
//! - Poll ticks carry the polling epoch, so stopping and restarting never
//!   leaves two poll loops running.

use crate::backend::NotificationBackend;
use crate::effect::Effect;
use crate::environment::Clock;
use crate::error::DeskError;
use crate::notification::{Notification, Recipient, unread_count};
use crate::reducer::Reducer;
use crate::types::NotificationId;
use chrono::{DateTime, Utc};
use smallvec::{SmallVec, smallvec};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Default interval between polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Local view of a recipient's notifications.
#[derive(Debug, Clone)]
pub struct FeedState {
    recipient: Recipient,
    entries: Vec<Notification>,
    read_ids: HashSet<NotificationId>,
    requested_generation: u64,
    applied_generation: u64,
    polling: bool,
    polling_epoch: u64,
    last_error: Option<DeskError>,
    last_refreshed_at: Option<DateTime<Utc>>,
}

impl FeedState {
    /// Empty feed for `recipient`.
    #[must_use]
    pub fn new(recipient: Recipient) -> Self {
        Self {
            recipient,
            entries: Vec::new(),
            read_ids: HashSet::new(),
            requested_generation: 0,
            applied_generation: 0,
            polling: false,
            polling_epoch: 0,
            last_error: None,
            last_refreshed_at: None,
        }
    }

    /// Whose notifications this feed shows.
    #[must_use]
    pub const fn recipient(&self) -> &Recipient {
        &self.recipient
    }

    /// Current entries, in the order the store returned them.
    #[must_use]
    pub fn entries(&self) -> &[Notification] {
        &self.entries
    }

    /// Look up one entry.
    #[must_use]
    pub fn get(&self, id: &NotificationId) -> Option<&Notification> {
        self.entries.iter().find(|n| &n.id == id)
    }

    /// Whether `id` has been observed read.
    #[must_use]
    pub fn is_read(&self, id: &NotificationId) -> bool {
        self.read_ids.contains(id)
    }

    /// Number of unread entries.
    #[must_use]
    pub fn unread_count(&self) -> usize {
        unread_count(&self.entries)
    }

    /// Error of the most recent failed refresh, cleared by the next success.
    #[must_use]
    pub const fn last_error(&self) -> Option<&DeskError> {
        self.last_error.as_ref()
    }

    /// When a refresh result was last applied.
    #[must_use]
    pub const fn last_refreshed_at(&self) -> Option<DateTime<Utc>> {
        self.last_refreshed_at
    }

    /// Whether the periodic poll is running.
    #[must_use]
    pub const fn is_polling(&self) -> bool {
        self.polling
    }

    /// Generation of the last applied refresh (0 before the first one).
    #[must_use]
    pub const fn applied_generation(&self) -> u64 {
        self.applied_generation
    }

    /// Generation of the last requested refresh.
    #[must_use]
    pub const fn requested_generation(&self) -> u64 {
        self.requested_generation
    }

    fn mark_read(&mut self, id: &NotificationId) {
        self.read_ids.insert(id.clone());
        if let Some(entry) = self.entries.iter_mut().find(|n| &n.id == id) {
            entry.is_read = true;
        }
    }

    fn merge(&mut self, mut incoming: Vec<Notification>) {
        for notification in &mut incoming {
            if self.read_ids.contains(&notification.id) {
                notification.is_read = true;
            } else if notification.is_read {
                self.read_ids.insert(notification.id.clone());
            }
        }
        // Entries gone upstream no longer need their read flag remembered
        let present: HashSet<&NotificationId> = incoming.iter().map(|n| &n.id).collect();
        self.read_ids.retain(|id| present.contains(id));
        self.entries = incoming;
    }
}

/// Inputs to the feed reducer.
#[derive(Debug, Clone)]
pub enum FeedAction {
    /// Start the periodic poll (refreshes immediately)
    StartPolling,
    /// Stop the periodic poll
    StopPolling,
    /// Poll timer fired
    PollTick {
        /// Epoch the timer was scheduled in
        epoch: u64,
    },
    /// Refresh now (invalidation)
    Refresh,
    /// A refresh returned
    Refreshed {
        /// Generation of the refresh
        generation: u64,
        /// Entries returned by the store
        notifications: Vec<Notification>,
    },
    /// A refresh failed
    RefreshFailed {
        /// Generation of the refresh
        generation: u64,
        /// Why it failed
        error: DeskError,
    },
    /// The store acknowledged marking one entry read
    MarkedRead {
        /// Entry that was marked
        id: NotificationId,
    },
    /// The store acknowledged marking everything up to a point read
    MarkedAllRead {
        /// Cutoff the call was issued with
        up_to: DateTime<Utc>,
    },
    /// The store acknowledged deleting an entry
    Removed {
        /// Entry that was deleted
        id: NotificationId,
    },
}

/// Dependencies of the feed reducer.
#[derive(Clone)]
pub struct FeedEnvironment {
    /// Notification store
    pub notifications: Arc<dyn NotificationBackend>,
    /// Clock for refresh timestamps
    pub clock: Arc<dyn Clock>,
    /// Interval between polls
    pub poll_interval: Duration,
}

impl FeedEnvironment {
    /// Environment polling every [`DEFAULT_POLL_INTERVAL`].
    #[must_use]
    pub fn new(notifications: Arc<dyn NotificationBackend>, clock: Arc<dyn Clock>) -> Self {
        Self {
            notifications,
            clock,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Override the poll interval.
    #[must_use]
    pub const fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

/// Reducer maintaining a [`FeedState`].
#[derive(Debug, Clone, Copy, Default)]
pub struct FeedReducer;

impl FeedReducer {
    /// Create a new `FeedReducer`
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Issue a new refresh generation and describe the fetch.
    fn refresh(state: &mut FeedState, env: &FeedEnvironment) -> Effect<FeedAction> {
        state.requested_generation += 1;
        let generation = state.requested_generation;
        let recipient = state.recipient.clone();
        let notifications = Arc::clone(&env.notifications);

        Effect::Future(Box::pin(async move {
            Some(match notifications.list_notifications(recipient).await {
                Ok(notifications) => FeedAction::Refreshed {
                    generation,
                    notifications,
                },
                Err(error) => FeedAction::RefreshFailed { generation, error },
            })
        }))
    }

    fn schedule_poll(state: &FeedState, env: &FeedEnvironment) -> Effect<FeedAction> {
        Effect::Delay {
            duration: env.poll_interval,
            action: Box::new(FeedAction::PollTick {
                epoch: state.polling_epoch,
            }),
        }
    }
}

impl Reducer for FeedReducer {
    type State = FeedState;
    type Action = FeedAction;
    type Environment = FeedEnvironment;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        match action {
            FeedAction::StartPolling => {
                if state.polling {
                    return SmallVec::new();
                }
                state.polling = true;
                state.polling_epoch += 1;
                smallvec![Self::refresh(state, env), Self::schedule_poll(state, env)]
            }

            FeedAction::StopPolling => {
                state.polling = false;
                state.polling_epoch += 1;
                SmallVec::new()
            }

            FeedAction::PollTick { epoch } => {
                // Stale timer from an earlier polling session
                if !state.polling || epoch != state.polling_epoch {
                    return SmallVec::new();
                }
                smallvec![Self::refresh(state, env), Self::schedule_poll(state, env)]
            }

            FeedAction::Refresh => smallvec![Self::refresh(state, env)],

            FeedAction::Refreshed {
                generation,
                notifications,
            } => {
                if generation <= state.applied_generation {
                    return SmallVec::new();
                }
                state.merge(notifications);
                state.applied_generation = generation;
                state.last_error = None;
                state.last_refreshed_at = Some(env.clock.now());
                SmallVec::new()
            }

            FeedAction::RefreshFailed { generation, error } => {
                if generation > state.applied_generation {
                    state.last_error = Some(error);
                }
                SmallVec::new()
            }

            FeedAction::MarkedRead { id } => {
                state.mark_read(&id);
                SmallVec::new()
            }

            FeedAction::MarkedAllRead { up_to } => {
                let covered: Vec<NotificationId> = state
                    .entries
                    .iter()
                    .filter(|n| n.created_at <= up_to)
                    .map(|n| n.id.clone())
                    .collect();
                for id in &covered {
                    state.mark_read(id);
                }
                SmallVec::new()
            }

            FeedAction::Removed { id } => {
                state.entries.retain(|n| n.id != id);
                state.read_ids.remove(&id);
                SmallVec::new()
            }
        }
    }
}
