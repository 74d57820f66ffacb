//! # Marketplace Core
//!
//! Pure domain core for the local-services marketplace.
//!
//! This crate holds every business rule that decides money or status:
//!
//! - **Split calculator** ([`split`]): total charge, platform fee and provider
//!   payout for a payment phase, plus refund proration
//! - **Booking lifecycle** ([`booking`]): the booking state machine as a reducer
//! - **Job quotes** ([`job`]): open-marketplace jobs with deposit/remainder payments
//! - **Availability** ([`availability`]): reschedule slot validation
//! - **Ports** ([`ports`]): traits for the store, payment processor, cache and notifier
//!
//! Nothing here performs I/O. Reducers mutate state and return effect
//! descriptions; the server crate executes those effects (processor calls
//! first, then a single store transaction).
//!
//! ## Architecture
//!
//! ```text
//! Request ─▶ Actor + Action ─▶ Reducer ─▶ (new state, effects)
//!                                            │
//!                 ┌──────────────────────────┴───────────────┐
//!                 ▼                                          ▼
//!       PaymentProcessor calls                      Notifier (best effort)
//!       (idempotency keys)
//!                 │
//!                 ▼
//!       MarketplaceStore::commit_* (one transaction)
//! ```

pub mod actor;
pub mod availability;
pub mod booking;
pub mod earnings;
pub mod effect;
pub mod error;
pub mod ids;
pub mod job;
pub mod money;
pub mod payment;
pub mod ports;
pub mod split;

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use smallvec::{smallvec, SmallVec};

/// Reducer module - the core trait for business logic
///
/// Reducers are pure functions: `(State, Action, Environment) → Result<Effects, Error>`.
/// They contain all business rules and are deterministic and testable.
pub mod reducer {
    use smallvec::SmallVec;

    /// The Reducer trait - core abstraction for business logic
    ///
    /// # Contract
    ///
    /// When `reduce` returns `Err`, `state` must be exactly as it was before the
    /// call. Implementations validate first and mutate last.
    ///
    /// # Example
    ///
    /// ```ignore
    /// impl Reducer for BookingReducer {
    ///     type State = Booking;
    ///     type Action = BookingAction;
    ///     type Environment = MarketEnvironment;
    ///     type Effect = MarketEffect;
    ///     type Error = DomainError;
    ///
    ///     fn reduce(&self, state: &mut Booking, action: BookingAction, env: &MarketEnvironment)
    ///         -> Result<SmallVec<[MarketEffect; 4]>, DomainError>
    ///     {
    ///         // Business logic here
    ///         Ok(SmallVec::new())
    ///     }
    /// }
    /// ```
    pub trait Reducer {
        /// The state type this reducer operates on
        type State;

        /// The action type this reducer processes
        type Action;

        /// The environment type with injected dependencies
        type Environment;

        /// Effect descriptions returned to the caller for execution
        type Effect;

        /// Rejection type for illegal actions
        type Error;

        /// Reduce an action into state changes and effects
        ///
        /// # Errors
        ///
        /// Returns `Self::Error` when the action is not allowed for the
        /// current state or actor. The state is left untouched in that case.
        fn reduce(
            &self,
            state: &mut Self::State,
            action: Self::Action,
            env: &Self::Environment,
        ) -> Result<SmallVec<[Self::Effect; 4]>, Self::Error>;
    }
}

/// Environment module - dependency injection traits
pub mod environment {
    use crate::split::FeePolicy;
    use chrono::{DateTime, Utc};
    use std::sync::Arc;

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```ignore
    /// // Test - fixed time for deterministic tests
    /// struct FixedClock { time: DateTime<Utc> }
    /// impl Clock for FixedClock {
    ///     fn now(&self) -> DateTime<Utc> {
    ///         self.time
    ///     }
    /// }
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }

    /// Dependencies shared by the booking and job reducers
    #[derive(Clone)]
    pub struct MarketEnvironment {
        /// Time source
        pub clock: Arc<dyn Clock>,
        /// Fee policy in force for this action
        pub policy: FeePolicy,
    }

    impl MarketEnvironment {
        /// Create an environment
        #[must_use]
        pub fn new(clock: Arc<dyn Clock>, policy: FeePolicy) -> Self {
            Self { clock, policy }
        }
    }
}
