//! Relational store port.
//!
//! A transition is persisted with one `commit_*` call. Implementations must
//! apply the whole commit atomically (entity row, payment rows, earnings
//! upserts, refund inserts) and must reject it with
//! [`StoreError::Conflict`] when the stored status or version no longer
//! equals `expected_status` / `expected_version`. Every commit bumps the
//! version, so two transitions computed from the same snapshot cannot both
//! land even when neither changes the status.

use super::PortFuture;
use crate::availability::{ProviderAvailability, ScheduleWindow, TimeOff};
use crate::booking::{Booking, BookingStatus};
use crate::earnings::{ProviderEarnings, Subject};
use crate::ids::{BookingId, EarningsId, JobId, UserId};
use crate::job::{JobRequest, JobStatus};
use crate::payment::{AuditEntry, RefundRecord};
use crate::split::{FeePolicy, PlanTier};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Store failures
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// No such row
    #[error("{entity} {id} not found")]
    NotFound {
        /// Entity kind
        entity: &'static str,
        /// Requested ID
        id: String,
    },

    /// Optimistic concurrency check failed
    #[error("{entity} {id} was modified concurrently: expected {expected}, found {actual}")]
    Conflict {
        /// Entity kind
        entity: &'static str,
        /// Entity ID
        id: String,
        /// Status (or version) the commit was computed from
        expected: String,
        /// Status (or version) found in the store
        actual: String,
    },

    /// Insert would violate a uniqueness rule
    #[error("duplicate {0}")]
    Duplicate(String),

    /// Connection or query failure
    #[error("database error: {0}")]
    Database(String),

    /// Row could not be decoded
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    /// Not-found helper
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

/// Everything written when a booking transition commits
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BookingCommit {
    /// New booking state, including its payment record
    pub booking: Booking,
    /// Status the transition was computed from
    pub expected_status: BookingStatus,
    /// Version the transition was computed from; `booking.version` is the next one
    pub expected_version: u64,
    /// Earnings rows to insert or update
    pub earnings: Vec<ProviderEarnings>,
    /// Refunds issued by this transition
    pub refunds: Vec<RefundRecord>,
}

/// Everything written when a job transition commits
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobCommit {
    /// New job state, including quotes and payment records
    pub job: JobRequest,
    /// Status the transition was computed from
    pub expected_status: JobStatus,
    /// Version the transition was computed from; `job.version` is the next one
    pub expected_version: u64,
    /// Earnings rows to insert or update
    pub earnings: Vec<ProviderEarnings>,
    /// Refunds issued by this transition
    pub refunds: Vec<RefundRecord>,
}

/// Provider settings relevant to payments and scheduling
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderProfile {
    /// Provider
    pub provider_id: UserId,
    /// Subscription tier
    pub plan_tier: PlanTier,
    /// Processor connected account for payouts
    pub payout_account: Option<String>,
    /// Offset from UTC in minutes
    pub utc_offset_minutes: i32,
    /// Weekly working hours
    pub weekly: Vec<ScheduleWindow>,
    /// Time-off blocks
    pub time_off: Vec<TimeOff>,
}

/// Persistence for bookings, jobs, earnings and admin settings
pub trait MarketplaceStore: Send + Sync {
    /// Insert a new booking
    fn insert_booking(&self, booking: Booking) -> PortFuture<'_, (), StoreError>;

    /// Load a booking with its payment record
    fn load_booking(&self, id: BookingId) -> PortFuture<'_, Booking, StoreError>;

    /// Atomically persist a booking transition
    ///
    /// Fails with [`StoreError::Conflict`] unless the stored booking still has
    /// the expected status and version.
    fn commit_booking(&self, commit: BookingCommit) -> PortFuture<'_, (), StoreError>;

    /// Bookings in `completed_by_provider` last updated before `before`
    fn bookings_awaiting_confirmation(
        &self,
        before: DateTime<Utc>,
        limit: u32,
    ) -> PortFuture<'_, Vec<BookingId>, StoreError>;

    /// Insert a new job
    fn insert_job(&self, job: JobRequest) -> PortFuture<'_, (), StoreError>;

    /// Load a job with its quotes and payments
    fn load_job(&self, id: JobId) -> PortFuture<'_, JobRequest, StoreError>;

    /// Atomically persist a job transition
    ///
    /// Fails with [`StoreError::Conflict`] unless the stored job still has
    /// the expected status and version.
    fn commit_job(&self, commit: JobCommit) -> PortFuture<'_, (), StoreError>;

    /// Earnings rows of a booking or job
    fn earnings_for_subject(&self, subject: Subject) -> PortFuture<'_, Vec<ProviderEarnings>, StoreError>;

    /// A provider's earnings, newest first
    fn earnings_for_provider(&self, provider_id: UserId) -> PortFuture<'_, Vec<ProviderEarnings>, StoreError>;

    /// Rows in `awaiting_payout` with fewer than `max_attempts` attempts
    fn earnings_due_for_payout(
        &self,
        max_attempts: u32,
        limit: u32,
    ) -> PortFuture<'_, Vec<ProviderEarnings>, StoreError>;

    /// Load one earnings row
    fn load_earnings(&self, id: EarningsId) -> PortFuture<'_, ProviderEarnings, StoreError>;

    /// Find the earnings row paid by a transfer
    fn find_earnings_by_transfer(
        &self,
        transfer_ref: String,
    ) -> PortFuture<'_, Option<ProviderEarnings>, StoreError>;

    /// Update a single earnings row outside a transition (payout sweep)
    fn save_earnings(&self, earnings: ProviderEarnings) -> PortFuture<'_, (), StoreError>;

    /// Plan tier, payout account and schedule of a provider
    fn load_provider_profile(&self, provider_id: UserId) -> PortFuture<'_, ProviderProfile, StoreError>;

    /// Create or replace a provider profile
    fn save_provider_profile(&self, profile: ProviderProfile) -> PortFuture<'_, (), StoreError>;

    /// Schedule, time off and occupied slots of a provider
    fn provider_availability(&self, provider_id: UserId) -> PortFuture<'_, ProviderAvailability, StoreError>;

    /// Record a processor webhook event; `false` if it was seen before
    fn record_webhook_event(&self, event_id: String, event_type: String) -> PortFuture<'_, bool, StoreError>;

    /// The persisted fee policy, if an admin ever set one
    fn load_fee_policy(&self) -> PortFuture<'_, Option<FeePolicy>, StoreError>;

    /// Persist the fee policy
    fn save_fee_policy(&self, policy: FeePolicy) -> PortFuture<'_, (), StoreError>;

    /// Append an audit entry
    fn append_audit(&self, entry: AuditEntry) -> PortFuture<'_, (), StoreError>;

    /// Connectivity check for readiness probes
    fn ping(&self) -> PortFuture<'_, (), StoreError>;
}
