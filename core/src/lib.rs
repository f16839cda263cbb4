//! # Equipment Desk Core
//!
//! Domain core of the Equipment Desk reservation client.
//!
//! Users reserve inventory items, admins approve, reject, hand over and
//! complete those reservations, and every status change lands in the
//! requester's notification feed. This crate holds the parts of that flow
//! with real invariants; it performs no I/O.
//!
//! ## Core Concepts
//!
//! - **Reservation**: a request to borrow an item, tracked through a bounded lifecycle
//! - **Transition**: a validated status change, atomic with its payload fields
//! - **Notification**: a recipient-addressed side effect of a transition
//! - **Feed**: a polled, eventually consistent view of one recipient's notifications
//! - **Reducer / Effect**: pure state updates that describe, but never run, I/O
//!
//! ## Architecture Principles
//!
//! - Functional core, imperative shell (see `equipment-desk-runtime`)
//! - Collaborators injected as traits ([`backend`])
//! - The permission gate is advisory; the backing store is the real gate
//!
//! ## Example
//!
//! ```
//! use equipment_desk_core::reservation::{NewReservation, Reservation, ReservationStatus};
//! use equipment_desk_core::transition::{plan_transition, CompletePayload, TransitionCommand};
//! use equipment_desk_core::types::{ItemId, ReservationId, Role, UserId};
//! use equipment_desk_core::{DeskError, Utc};
//!
//! let reservation = Reservation::pending(
//!     ReservationId::new("R1"),
//!     NewReservation {
//!         item_id: ItemId::new("cam-01"),
//!         item_name: "Camera".into(),
//!         requested_by: UserId::new("alice"),
//!     },
//!     Utc::now(),
//! );
//!
//! // Completing a reservation that was never handed over is refused
//! let result = plan_transition(
//!     &reservation,
//!     Role::Admin,
//!     &UserId::new("admin"),
//!     &TransitionCommand::Complete(CompletePayload::good()),
//!     Utc::now(),
//! );
//! assert!(matches!(result, Err(DeskError::InvalidState { .. })));
//! assert_eq!(reservation.status, ReservationStatus::Pending);
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};
pub use smallvec::{SmallVec, smallvec};

pub mod backend;
pub mod error;
pub mod feed;
pub mod notification;
pub mod permission;
pub mod reservation;
pub mod transition;
pub mod types;

pub use error::{DeskError, DeskResult, ValidationError};

/// Reducer module - state updates that return effect descriptions
pub mod reducer {
    use super::effect::Effect;
    use smallvec::SmallVec;

    /// Pure `(State, Action, Environment) → (State, Effects)` update.
    ///
    /// Reducers validate the action, update state in place and return the
    /// effects the runtime should execute. They never perform I/O themselves.
    pub trait Reducer {
        /// The state type this reducer operates on
        type State;

        /// The action type this reducer processes
        type Action;

        /// The environment type with injected dependencies
        type Environment;

        /// Reduce an action into state changes and effects
        fn reduce(
            &self,
            state: &mut Self::State,
            action: Self::Action,
            env: &Self::Environment,
        ) -> SmallVec<[Effect<Self::Action>; 4]>;
    }
}

/// Effect module - side effect descriptions
pub mod effect {
    use std::future::Future;
    use std::pin::Pin;
    use std::time::Duration;

    /// A side effect for the runtime to execute.
    ///
    /// Effects are values. Returning one from a reducer does nothing until
    /// the store runs it; any action it produces is fed back into the same
    /// reducer.
    pub enum Effect<Action> {
        /// No-op effect
        None,

        /// Run effects concurrently
        Parallel(Vec<Effect<Action>>),

        /// Dispatch an action after a delay (poll timers)
        Delay {
            /// How long to wait
            duration: Duration,
            /// Action to dispatch after the delay
            action: Box<Action>,
        },

        /// Arbitrary async computation (backend calls)
        ///
        /// If it resolves to `Some(action)`, the action is fed back into the reducer.
        Future(Pin<Box<dyn Future<Output = Option<Action>> + Send>>),
    }

    // Manual Debug implementation since Future doesn't implement Debug
    impl<Action> std::fmt::Debug for Effect<Action>
    where
        Action: std::fmt::Debug,
    {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                Effect::None => write!(f, "Effect::None"),
                Effect::Parallel(effects) => {
                    f.debug_tuple("Effect::Parallel").field(effects).finish()
                },
                Effect::Delay { duration, action } => f
                    .debug_struct("Effect::Delay")
                    .field("duration", duration)
                    .field("action", action)
                    .finish(),
                Effect::Future(_) => write!(f, "Effect::Future(<future>)"),
            }
        }
    }

    impl<Action> Effect<Action> {
        /// Combine effects to run concurrently
        #[must_use]
        pub const fn merge(effects: Vec<Effect<Action>>) -> Effect<Action> {
            Effect::Parallel(effects)
        }

        /// Short label for logs and metrics.
        #[must_use]
        pub const fn label(&self) -> &'static str {
            match self {
                Effect::None => "none",
                Effect::Parallel(_) => "parallel",
                Effect::Delay { .. } => "delay",
                Effect::Future(_) => "future",
            }
        }
    }
}

/// Environment module - time abstraction
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// Production code uses [`SystemClock`]; tests use a fixed clock so
    /// timestamps and cutoffs are deterministic.
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall-clock time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::effect::Effect;
    use std::time::Duration;

    #[test]
    fn effect_debug_hides_future_body() {
        let effect: Effect<u8> = Effect::Future(Box::pin(async { Some(1) }));
        assert_eq!(format!("{effect:?}"), "Effect::Future(<future>)");
    }

    #[test]
    fn effect_labels() {
        let delay: Effect<u8> = Effect::Delay {
            duration: Duration::from_secs(10),
            action: Box::new(1),
        };
        assert_eq!(delay.label(), "delay");
        assert_eq!(Effect::<u8>::merge(vec![Effect::None]).label(), "parallel");
    }
}
