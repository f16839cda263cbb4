//! # Equipment Desk Runtime
//!
//! The imperative shell around `equipment-desk-core`.
//!
//! This crate provides:
//! - The [`Store`](store::Store): owns reducer state and executes the effects reducers return
//! - [`TransitionEngine`]: applies reservation transitions against the backing store
//! - [`NotificationFeed`]: the polled, invalidated notification view
//! - Configuration, tracing setup and metric names
//!
//! ## Example
//!
//! ```ignore
//! use equipment_desk_runtime::{DeskConfig, NotificationFeed, TransitionEngine};
//!
//! let config = DeskConfig::from_env()?;
//! equipment_desk_runtime::telemetry::init_tracing(&config.logging)?;
//!
//! let environment = config.feed.environment(notifications.clone(), clock.clone());
//! let feed = NotificationFeed::new(recipient, environment);
//! feed.start().await?;
//!
//! let engine = TransitionEngine::new(reservations, notifications, roles, clock)
//!     .with_feed(feed.clone());
//! let outcome = engine.approve(reservation_id, admin_id).await?;
//! ```

use equipment_desk_core::{effect::Effect, reducer::Reducer};
use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{RwLock, watch};

pub mod config;
pub mod engine;
pub mod feed;
pub mod metrics;
pub mod telemetry;

pub use config::{ConfigError, DeskConfig, FeedConfig, LogFormat, LoggingConfig};
pub use engine::{TransitionEngine, TransitionOutcome};
pub use feed::{FeedSnapshot, NotificationFeed};

/// Error types for the Store runtime
pub mod error {
    use thiserror::Error;

    /// Errors that can occur in the Store runtime
    #[derive(Error, Debug)]
    pub enum StoreError {
        /// Store is shutting down and not accepting new actions
        #[error("Store is shutting down")]
        ShutdownInProgress,

        /// Shutdown timed out waiting for effects to complete
        #[error("Shutdown timed out with {0} effects still running")]
        ShutdownTimeout(usize),

        /// Timed out waiting for effects of an action
        #[error("Timeout waiting for effects")]
        Timeout,
    }
}

pub use error::StoreError;

/// Handle for waiting on the effects of one action.
///
/// `wait()` returns once every `Effect::Future` produced by the action has
/// finished and the action it fed back has been reduced. Delayed actions
/// (poll timers) run detached and are not waited on.
///
/// # Example
///
/// ```ignore
/// let mut handle = store.send(FeedAction::Refresh).await?;
/// handle.wait().await;
/// // the refresh result is applied
/// ```
#[derive(Clone)]
pub struct EffectHandle {
    effects: Arc<AtomicUsize>,
    completion: watch::Receiver<()>,
}

impl EffectHandle {
    fn new() -> (Self, EffectTracking) {
        let counter = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = watch::channel(());

        let handle = Self {
            effects: Arc::clone(&counter),
            completion: rx,
        };
        let tracking = EffectTracking {
            counter,
            notifier: Arc::new(tx),
        };

        (handle, tracking)
    }

    /// Create a handle that's already complete
    #[must_use]
    pub fn completed() -> Self {
        let (_tx, rx) = watch::channel(());
        Self {
            effects: Arc::new(AtomicUsize::new(0)),
            completion: rx,
        }
    }

    /// Wait for all tracked effects to complete
    pub async fn wait(&mut self) {
        while self.effects.load(Ordering::SeqCst) > 0 {
            if self.completion.changed().await.is_err() {
                // Every tracker is gone, so nothing is left to wait for
                break;
            }
        }
    }

    /// Wait for all tracked effects with a timeout
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Timeout`] if the effects are still running when
    /// `timeout` elapses.
    pub async fn wait_with_timeout(&mut self, timeout: Duration) -> Result<(), StoreError> {
        tokio::time::timeout(timeout, self.wait())
            .await
            .map_err(|_| StoreError::Timeout)
    }
}

impl std::fmt::Debug for EffectHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectHandle")
            .field("pending_effects", &self.effects.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

/// Internal: effect counter shared between a handle and the effects it tracks
#[derive(Clone)]
struct EffectTracking {
    counter: Arc<AtomicUsize>,
    notifier: Arc<watch::Sender<()>>,
}

impl EffectTracking {
    fn increment(&self) {
        self.counter.fetch_add(1, Ordering::SeqCst);
    }

    fn decrement(&self) {
        if self.counter.fetch_sub(1, Ordering::SeqCst) == 1 {
            let _ = self.notifier.send(());
        }
    }
}

/// Internal: decrements the effect counter on drop, even if the effect panics
struct DecrementGuard(EffectTracking);

impl Drop for DecrementGuard {
    fn drop(&mut self) {
        self.0.decrement();
    }
}

/// Guard that decrements an atomic counter on drop (for shutdown tracking)
struct AtomicCounterGuard(Arc<AtomicUsize>);

impl Drop for AtomicCounterGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Store module - the runtime for reducers
pub mod store {
    use super::{
        Arc, AtomicBool, AtomicCounterGuard, AtomicUsize, DecrementGuard, Duration, Effect,
        EffectHandle, EffectTracking, Ordering, Reducer, RwLock, StoreError, Weak, watch,
    };
    use crate::metrics::STORE_EFFECTS;

    /// The Store - runtime coordinator for a reducer
    ///
    /// The Store:
    /// 1. Holds state behind a `RwLock`
    /// 2. Runs the reducer under the write lock, one action at a time
    /// 3. Executes the returned effects on the tokio runtime
    /// 4. Feeds actions produced by effects back into the reducer
    ///
    /// Every reduce bumps a version number observers can watch via
    /// [`Store::subscribe`].
    pub struct Store<S, A, E, R>
    where
        R: Reducer<State = S, Action = A, Environment = E>,
    {
        state: Arc<RwLock<S>>,
        reducer: R,
        environment: E,
        shutdown: Arc<AtomicBool>,
        pending_effects: Arc<AtomicUsize>,
        version: Arc<watch::Sender<u64>>,
    }

    impl<S, A, E, R> Store<S, A, E, R>
    where
        R: Reducer<State = S, Action = A, Environment = E> + Clone + Send + Sync + 'static,
        A: Send + 'static,
        S: Send + Sync + 'static,
        E: Clone + Send + Sync + 'static,
    {
        /// Create a new store with initial state, reducer, and environment
        #[must_use]
        pub fn new(initial_state: S, reducer: R, environment: E) -> Self {
            let (version, _) = watch::channel(0);

            Self {
                state: Arc::new(RwLock::new(initial_state)),
                reducer,
                environment,
                shutdown: Arc::new(AtomicBool::new(false)),
                pending_effects: Arc::new(AtomicUsize::new(0)),
                version: Arc::new(version),
            }
        }

        /// Send an action to the store
        ///
        /// Reduces the action and starts its effects. Returns as soon as the
        /// effects are started; use the returned handle to wait for them.
        ///
        /// # Errors
        ///
        /// Returns [`StoreError::ShutdownInProgress`] once [`Store::shutdown`]
        /// has been called.
        #[tracing::instrument(skip(self, action), name = "store_send")]
        pub async fn send(&self, action: A) -> Result<EffectHandle, StoreError> {
            if self.shutdown.load(Ordering::Acquire) {
                tracing::debug!("Rejected action: store is shutting down");
                return Err(StoreError::ShutdownInProgress);
            }

            let (handle, tracking) = EffectHandle::new();

            let effects = {
                let mut state = self.state.write().await;
                let effects = self.reducer.reduce(&mut *state, action, &self.environment);
                tracing::trace!("Reducer completed, returned {} effects", effects.len());
                effects
            };
            self.version.send_modify(|version| *version += 1);

            for effect in effects {
                self.execute_effect(effect, tracking.clone());
            }

            Ok(handle)
        }

        /// Read current state via a closure
        ///
        /// ```ignore
        /// let unread = store.state(|s| s.unread_count()).await;
        /// ```
        pub async fn state<F, T>(&self, f: F) -> T
        where
            F: FnOnce(&S) -> T,
        {
            let state = self.state.read().await;
            f(&*state)
        }

        /// Watch the state version, bumped after every reduce
        #[must_use]
        pub fn subscribe(&self) -> watch::Receiver<u64> {
            self.version.subscribe()
        }

        /// Number of `Effect::Future` effects still running
        #[must_use]
        pub fn pending_effects(&self) -> usize {
            self.pending_effects.load(Ordering::SeqCst)
        }

        /// Whether [`Store::shutdown`] has been called
        #[must_use]
        pub fn is_shutting_down(&self) -> bool {
            self.shutdown.load(Ordering::Acquire)
        }

        /// Stop accepting actions and wait for running effects
        ///
        /// Detached timers fire into a closed store and are dropped.
        ///
        /// # Errors
        ///
        /// Returns [`StoreError::ShutdownTimeout`] if effects are still
        /// running when `timeout` elapses.
        pub async fn shutdown(&self, timeout: Duration) -> Result<(), StoreError> {
            tracing::info!("Initiating store shutdown");
            self.shutdown.store(true, Ordering::Release);

            let drained = tokio::time::timeout(timeout, async {
                while self.pending_effects.load(Ordering::SeqCst) > 0 {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            })
            .await;

            match drained {
                Ok(()) => Ok(()),
                Err(_) => {
                    let remaining = self.pending_effects.load(Ordering::SeqCst);
                    tracing::warn!(remaining, "Shutdown timed out");
                    Err(StoreError::ShutdownTimeout(remaining))
                },
            }
        }

        /// Handle that does not keep the store alive
        ///
        /// The store is gone once every [`Store`] clone has been dropped;
        /// after that [`WeakStore::upgrade`] returns `None`.
        #[must_use]
        pub fn downgrade(&self) -> WeakStore<S, A, E, R> {
            WeakStore {
                state: Arc::downgrade(&self.state),
                version: Arc::downgrade(&self.version),
                reducer: self.reducer.clone(),
                environment: self.environment.clone(),
                shutdown: Arc::clone(&self.shutdown),
                pending_effects: Arc::clone(&self.pending_effects),
            }
        }

        fn execute_effect(&self, effect: Effect<A>, tracking: EffectTracking) {
            metrics::counter!(STORE_EFFECTS, "type" => effect.label()).increment(1);

            match effect {
                Effect::None => {},
                Effect::Future(fut) => {
                    tracking.increment();
                    self.pending_effects.fetch_add(1, Ordering::SeqCst);
                    let pending_guard = AtomicCounterGuard(Arc::clone(&self.pending_effects));
                    let store = self.clone();
                    tokio::spawn(async move {
                        let _guard = DecrementGuard(tracking);
                        let _pending_guard = pending_guard;
                        if let Some(action) = fut.await {
                            // Reduce before the guard drops so `wait()` covers the feedback
                            if let Ok(mut handle) = store.send(action).await {
                                handle.wait().await;
                            }
                        }
                    });
                },
                Effect::Delay { duration, action } => {
                    // Timers must not keep the store alive, or a poll loop outlives its owner
                    let store = self.downgrade();
                    tokio::spawn(async move {
                        tokio::time::sleep(duration).await;
                        let Some(store) = store.upgrade() else {
                            tracing::trace!("Delayed action dropped: store is gone");
                            return;
                        };
                        if store.send(*action).await.is_err() {
                            tracing::trace!("Delayed action dropped: store is shutting down");
                        }
                    });
                },
                Effect::Parallel(effects) => {
                    for effect in effects {
                        self.execute_effect(effect, tracking.clone());
                    }
                },
            }
        }
    }

    /// Non-owning handle to a [`Store`], obtained from [`Store::downgrade`]
    pub struct WeakStore<S, A, E, R>
    where
        R: Reducer<State = S, Action = A, Environment = E>,
    {
        state: Weak<RwLock<S>>,
        version: Weak<watch::Sender<u64>>,
        reducer: R,
        environment: E,
        shutdown: Arc<AtomicBool>,
        pending_effects: Arc<AtomicUsize>,
    }

    impl<S, A, E, R> WeakStore<S, A, E, R>
    where
        R: Reducer<State = S, Action = A, Environment = E> + Clone,
        E: Clone,
    {
        /// The store, if any [`Store`] clone is still alive
        #[must_use]
        pub fn upgrade(&self) -> Option<Store<S, A, E, R>> {
            Some(Store {
                state: self.state.upgrade()?,
                version: self.version.upgrade()?,
                reducer: self.reducer.clone(),
                environment: self.environment.clone(),
                shutdown: Arc::clone(&self.shutdown),
                pending_effects: Arc::clone(&self.pending_effects),
            })
        }
    }

    impl<S, A, E, R> Clone for WeakStore<S, A, E, R>
    where
        R: Reducer<State = S, Action = A, Environment = E> + Clone,
        E: Clone,
    {
        fn clone(&self) -> Self {
            Self {
                state: Weak::clone(&self.state),
                version: Weak::clone(&self.version),
                reducer: self.reducer.clone(),
                environment: self.environment.clone(),
                shutdown: Arc::clone(&self.shutdown),
                pending_effects: Arc::clone(&self.pending_effects),
            }
        }
    }

    impl<S, A, E, R> Clone for Store<S, A, E, R>
    where
        R: Reducer<State = S, Action = A, Environment = E> + Clone,
        E: Clone,
    {
        fn clone(&self) -> Self {
            Self {
                state: Arc::clone(&self.state),
                reducer: self.reducer.clone(),
                environment: self.environment.clone(),
                shutdown: Arc::clone(&self.shutdown),
                pending_effects: Arc::clone(&self.pending_effects),
                version: Arc::clone(&self.version),
            }
        }
    }
}

pub use store::{Store, WeakStore};
