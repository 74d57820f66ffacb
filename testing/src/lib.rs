//! # Marketplace Testing
//!
//! Testing utilities and helpers for the services marketplace.
//!
//! This crate provides:
//! - [`ReducerTest`], a Given-When-Then builder for the booking and job reducers
//! - In-memory implementations of every port ([`InMemoryStore`],
//!   [`MockPaymentProcessor`], [`InMemoryCache`], [`RecordingNotifier`])
//! - A fixed clock and fixtures for common entity states
//! - `proptest` strategies for domain values
//!
//! ## Example
//!
//! ```ignore
//! use marketplace_testing::{fixtures, ReducerTest};
//!
//! #[test]
//! fn provider_accepts() {
//!     let booking = fixtures::requested_booking();
//!     ReducerTest::new(BookingReducer)
//!         .with_env(fixtures::test_env())
//!         .given_state(booking.clone())
//!         .when_action(BookingAction::Accept { actor: Actor::provider(booking.provider_id) })
//!         .then_state(|b| assert_eq!(b.status, BookingStatus::Accepted))
//!         .run();
//! }
//! ```

use chrono::{DateTime, Utc};
use marketplace_core::environment::Clock;
use std::sync::{Arc, Mutex};

pub mod cache;
pub mod notify;
pub mod payments;
pub mod reducer_test;
pub mod store;

/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Arc, Clock, DateTime, Mutex, Utc};

    /// Fixed clock for deterministic tests
    ///
    /// Returns the same time until [`FixedClock::advance`] moves it. Clones
    /// share the same time, so a test can advance the clock held by a
    /// service.
    ///
    /// # Example
    ///
    /// ```
    /// use marketplace_testing::mocks::FixedClock;
    /// use marketplace_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
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
            if let Ok(mut time) = self.time.lock() {
                *time += by;
            }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
                .lock()
                .map(|time| *time)
                .unwrap_or(DateTime::<Utc>::MIN_UTC)
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// Entity fixtures in common states
#[allow(clippy::expect_used)]
pub mod fixtures {
    use super::mocks::test_clock;
    use chrono::{NaiveTime, TimeZone, Utc, Weekday};
    use marketplace_core::availability::ScheduleWindow;
    use marketplace_core::booking::{Booking, BookingRequest, BookingStatus};
    use marketplace_core::environment::{Clock, MarketEnvironment};
    use marketplace_core::ids::{PaymentId, ServiceId, UserId};
    use marketplace_core::job::{JobPosting, JobRequest};
    use marketplace_core::money::{Currency, Money};
    use marketplace_core::payment::PaymentRecord;
    use marketplace_core::ports::ProviderProfile;
    use marketplace_core::split::{FeePolicy, PaymentPhase, PaymentSplit, PlanTier};
    use std::sync::Arc;

    /// Reducer environment on the test clock with the default fee policy
    #[must_use]
    pub fn test_env() -> MarketEnvironment {
        MarketEnvironment::new(Arc::new(test_clock()), FeePolicy::default())
    }

    /// A 10_000 cent starter-tier split (1_000 fee, 9_000 provider)
    #[must_use]
    pub const fn starter_split() -> PaymentSplit {
        PaymentSplit {
            total_charge: Money::from_cents(10_000),
            platform_fee: Money::from_cents(1_000),
            provider_amount: Money::from_cents(9_000),
            currency: Currency::Nzd,
        }
    }

    /// A 10_000 cent booking for Monday 2025-01-06 10:00 UTC, one hour
    ///
    /// # Panics
    ///
    /// Never; the request is valid on the test clock.
    #[must_use]
    pub fn requested_booking() -> Booking {
        Booking::request(
            BookingRequest {
                customer_id: UserId::new(),
                provider_id: UserId::new(),
                service_id: ServiceId::new(),
                scheduled_start: Utc
                    .with_ymd_and_hms(2025, 1, 6, 10, 0, 0)
                    .single()
                    .expect("valid fixture date"),
                duration_minutes: 60,
                price: Money::from_cents(10_000),
            },
            test_clock().now(),
        )
        .expect("fixture booking is valid")
    }

    /// A booking forced into `status`, with a captured payment for every
    /// status at or beyond `paid`
    #[must_use]
    pub fn booking_in(status: BookingStatus) -> Booking {
        let mut booking = requested_booking();
        booking.status = status;
        if !matches!(
            status,
            BookingStatus::Requested
                | BookingStatus::Accepted
                | BookingStatus::CanceledCustomer
                | BookingStatus::CanceledProvider
        ) {
            booking.payment = Some(PaymentRecord {
                id: PaymentId::new(),
                subject: booking.subject(),
                phase: PaymentPhase::Full,
                charge_ref: "pi_fixture".to_string(),
                split: starter_split(),
                refunded: Money::ZERO,
                refunded_fee: Money::ZERO,
                captured_at: test_clock().now(),
            });
        }
        booking.earnings_recorded = matches!(
            status,
            BookingStatus::CompletedByProvider | BookingStatus::Completed | BookingStatus::Reviewed
        );
        booking
    }

    /// An open job
    ///
    /// # Panics
    ///
    /// Never; the posting is valid.
    #[must_use]
    pub fn open_job() -> JobRequest {
        JobRequest::post(
            JobPosting {
                customer_id: UserId::new(),
                title: "Repaint the deck".to_string(),
                description: "About 20 square metres".to_string(),
            },
            test_clock().now(),
        )
        .expect("fixture job is valid")
    }

    /// Starter-tier provider working 09:00-17:00 UTC on weekdays with a
    /// payout account
    ///
    /// # Panics
    ///
    /// Never; the times are valid.
    #[must_use]
    pub fn weekday_provider(provider_id: UserId) -> ProviderProfile {
        let nine = NaiveTime::from_hms_opt(9, 0, 0).expect("valid time");
        let five = NaiveTime::from_hms_opt(17, 0, 0).expect("valid time");
        ProviderProfile {
            provider_id,
            plan_tier: PlanTier::Starter,
            payout_account: Some(format!("acct_{}", provider_id.as_uuid().simple())),
            utc_offset_minutes: 0,
            weekly: [Weekday::Mon, Weekday::Tue, Weekday::Wed, Weekday::Thu, Weekday::Fri]
                .into_iter()
                .map(|weekday| ScheduleWindow {
                    weekday,
                    start: nine,
                    end: five,
                })
                .collect(),
            time_off: Vec::new(),
        }
    }
}

/// Property-based testing utilities using proptest.
pub mod properties {
    use marketplace_core::money::Money;
    use marketplace_core::split::{FeePolicy, PlanTier};
    use proptest::prelude::*;

    /// Any plan tier
    pub fn plan_tier() -> impl Strategy<Value = PlanTier> {
        prop_oneof![Just(PlanTier::Starter), Just(PlanTier::Pro), Just(PlanTier::Elite)]
    }

    /// Amounts from the default minimum charge up to 1,000,000.00
    pub fn chargeable_amount() -> impl Strategy<Value = Money> {
        (100u64..=100_000_000).prop_map(Money::from_cents)
    }

    /// Fee policies with any valid starter rate
    pub fn fee_policy() -> impl Strategy<Value = FeePolicy> {
        (0u32..=10_000, 0u32..=10_000).prop_map(|(starter_fee_bps, gst_bps)| FeePolicy {
            starter_fee_bps,
            gst_bps,
            ..FeePolicy::default()
        })
    }
}

/// Install a tracing subscriber for test output (`RUST_LOG` honoured)
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
pub use cache::InMemoryCache;
pub use mocks::{FixedClock, test_clock};
pub use notify::RecordingNotifier;
pub use payments::MockPaymentProcessor;
pub use reducer_test::{assertions, ReducerTest};
pub use store::InMemoryStore;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        let time1 = clock.now();
        let time2 = clock.now();
        assert_eq!(time1, time2);
    }

    #[test]
    fn advancing_a_clone_moves_the_original() {
        let clock = test_clock();
        let start = clock.now();
        clock.clone().advance(chrono::Duration::hours(1));
        assert_eq!(clock.now() - start, chrono::Duration::hours(1));
    }
}
