//! # Equipment Desk Testing
//!
//! Testing utilities for the Equipment Desk crates.
//!
//! This crate provides:
//! - [`FixedClock`]: deterministic, manually advanced time
//! - [`ReducerTest`]: Given-When-Then harness for reducers
//! - [`InMemoryBackend`]: every collaborator trait over in-memory maps, with
//!   call counters, fault injection and gates for holding calls mid-flight
//! - [`fixtures`]: consistent reservations and notifications in any status
//!
//! ## Example
//!
//! ```ignore
//! use equipment_desk_testing::{InMemoryBackend, fixtures, test_clock};
//!
//! #[tokio::test]
//! async fn approve_notifies_requester() {
//!     let clock = Arc::new(test_clock());
//!     let backend = Arc::new(InMemoryBackend::new(clock.clone()));
//!     backend.insert_reservation(fixtures::pending("R1", "alice"));
//!
//!     let engine = TransitionEngine::new(backend.clone(), backend.clone(), admin(), clock);
//!     engine.approve("R1".into(), "admin".into()).await?;
//!
//!     assert_eq!(backend.notifications().len(), 1);
//! }
//! ```

use chrono::{DateTime, Utc};
use equipment_desk_core::environment::Clock;

pub mod backend;
pub mod fixtures;
pub mod reducer_test;

/// Mock implementations of environment traits
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use equipment_desk_core::backend::{BackendFuture, PolicySource, RoleSource};
    use equipment_desk_core::permission::AccessPolicy;
    use equipment_desk_core::types::Role;
    use std::sync::{Arc, Mutex, PoisonError};

    /// Clock for deterministic tests
    ///
    /// Returns the same time until moved with [`FixedClock::advance`] or
    /// [`FixedClock::set`]. Clones share the same time.
    ///
    /// # Example
    ///
    /// ```
    /// use equipment_desk_testing::mocks::FixedClock;
    /// use equipment_desk_core::environment::Clock;
    /// use chrono::{Duration, Utc};
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// assert_eq!(time1, clock.now());
    ///
    /// clock.advance(Duration::seconds(5));
    /// assert_eq!(clock.now() - time1, Duration::seconds(5));
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: Arc<Mutex<DateTime<Utc>>>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(Mutex::new(time)),
            }
        }

        /// Move the clock forward
        pub fn advance(&self, by: chrono::Duration) {
            let mut time = self.time.lock().unwrap_or_else(PoisonError::into_inner);
            *time += by;
        }

        /// Jump to `time`
        pub fn set(&self, time: DateTime<Utc>) {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner) = time;
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(DateTime::<Utc>::from_timestamp(1_735_689_600, 0).unwrap_or_default())
    }

    /// Role source that always answers with the same role
    #[derive(Debug, Clone, Copy)]
    pub struct StaticRole(pub Role);

    impl RoleSource for StaticRole {
        fn current_role(&self) -> BackendFuture<'_, Role> {
            let role = self.0;
            Box::pin(async move { Ok(role) })
        }
    }

    /// Policy source returning a fixed policy, or failing
    #[derive(Debug, Clone)]
    pub enum StaticPolicy {
        /// Serve this policy
        Serve(AccessPolicy),
        /// Fail with a transport error
        Unreachable,
    }

    impl PolicySource for StaticPolicy {
        fn fetch_policy(&self) -> BackendFuture<'_, AccessPolicy> {
            Box::pin(async move {
                match self {
                    Self::Serve(policy) => Ok(policy.clone()),
                    Self::Unreachable => Err(equipment_desk_core::DeskError::Transport(
                        "policy endpoint unreachable".to_owned(),
                    )),
                }
            })
        }
    }
}

/// Install a tracing subscriber that writes through the test harness.
///
/// Safe to call from every test; only the first call installs.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

// Re-export commonly used items
pub use backend::{Gate, InMemoryBackend, Operation};
pub use mocks::{FixedClock, StaticPolicy, StaticRole, test_clock};
pub use reducer_test::{ReducerTest, assertions, resolve_effects};

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use equipment_desk_core::backend::RoleSource;
    use equipment_desk_core::types::Role;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        let time1 = clock.now();
        let time2 = clock.now();
        assert_eq!(time1, time2);
        assert_eq!(time1.to_rfc3339(), "2025-01-01T00:00:00+00:00");
    }

    #[test]
    fn clones_share_time() {
        let clock = test_clock();
        let other = clock.clone();
        clock.advance(chrono::Duration::minutes(1));
        assert_eq!(clock.now(), other.now());
    }

    #[tokio::test]
    async fn static_role_answers() {
        assert_eq!(StaticRole(Role::Admin).current_role().await.unwrap(), Role::Admin);
    }
}
