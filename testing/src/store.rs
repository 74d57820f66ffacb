//! In-memory marketplace store.

use marketplace_core::availability::{BusySlot, ProviderAvailability};
use marketplace_core::booking::{Booking, BookingStatus};
use marketplace_core::earnings::{PayoutStatus, ProviderEarnings, Subject};
use marketplace_core::ids::{BookingId, EarningsId, JobId, UserId};
use marketplace_core::job::JobRequest;
use marketplace_core::payment::{AuditEntry, RefundRecord};
use marketplace_core::ports::{
    BookingCommit, JobCommit, MarketplaceStore, PortFuture, ProviderProfile, StoreError,
};
use marketplace_core::split::FeePolicy;
use marketplace_core::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
struct Inner {
    bookings: HashMap<BookingId, Booking>,
    jobs: HashMap<JobId, JobRequest>,
    earnings: HashMap<EarningsId, ProviderEarnings>,
    refunds: Vec<RefundRecord>,
    profiles: HashMap<UserId, ProviderProfile>,
    webhook_events: HashSet<String>,
    fee_policy: Option<FeePolicy>,
    audit: Vec<AuditEntry>,
}

/// In-memory [`MarketplaceStore`] for tests
///
/// One mutex guards everything, so a commit is atomic with respect to
/// every other call.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<Mutex<Inner>>,
    fail_audit: Arc<AtomicBool>,
}

impl InMemoryStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Database("Mutex lock failed".into()))
    }

    /// Make subsequent audit writes fail
    pub fn fail_audit_writes(&self, fail: bool) {
        self.fail_audit.store(fail, Ordering::SeqCst);
    }

    /// Every refund recorded so far
    #[must_use]
    pub fn refunds(&self) -> Vec<RefundRecord> {
        self.lock().map(|inner| inner.refunds.clone()).unwrap_or_default()
    }

    /// Every audit entry recorded so far
    #[must_use]
    pub fn audit_entries(&self) -> Vec<AuditEntry> {
        self.lock().map(|inner| inner.audit.clone()).unwrap_or_default()
    }

    /// Every earnings row
    #[must_use]
    pub fn all_earnings(&self) -> Vec<ProviderEarnings> {
        self.lock()
            .map(|inner| inner.earnings.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Overwrite a booking directly, bypassing the concurrency check
    pub fn put_booking(&self, booking: Booking) {
        if let Ok(mut inner) = self.lock() {
            inner.bookings.insert(booking.id, booking);
        }
    }

    fn upsert_rows(inner: &mut Inner, earnings: Vec<ProviderEarnings>, refunds: Vec<RefundRecord>) {
        for row in earnings {
            inner.earnings.insert(row.id, row);
        }
        inner.refunds.extend(refunds);
    }
}

/// Reject a commit computed from a stale status or version
fn conflict_check<S: PartialEq + std::fmt::Display>(
    entity: &'static str,
    id: &dyn std::fmt::Display,
    stored: (S, u64),
    expected: (S, u64),
) -> Result<(), StoreError> {
    let (expected, actual) = if stored.0 != expected.0 {
        (expected.0.to_string(), stored.0.to_string())
    } else if stored.1 != expected.1 {
        (format!("version {}", expected.1), format!("version {}", stored.1))
    } else {
        return Ok(());
    };
    Err(StoreError::Conflict {
        entity,
        id: id.to_string(),
        expected,
        actual,
    })
}

impl MarketplaceStore for InMemoryStore {
    fn insert_booking(&self, booking: Booking) -> PortFuture<'_, (), StoreError> {
        Box::pin(async move {
            let mut inner = self.lock()?;
            if inner.bookings.contains_key(&booking.id) {
                return Err(StoreError::Duplicate(format!("booking {}", booking.id)));
            }
            inner.bookings.insert(booking.id, booking);
            Ok(())
        })
    }

    fn load_booking(&self, id: BookingId) -> PortFuture<'_, Booking, StoreError> {
        Box::pin(async move {
            self.lock()?
                .bookings
                .get(&id)
                .cloned()
                .ok_or_else(|| StoreError::not_found("booking", id))
        })
    }

    fn commit_booking(&self, commit: BookingCommit) -> PortFuture<'_, (), StoreError> {
        Box::pin(async move {
            let mut inner = self.lock()?;
            let id = commit.booking.id;
            let stored = inner
                .bookings
                .get(&id)
                .ok_or_else(|| StoreError::not_found("booking", id))?;
            conflict_check(
                "booking",
                &id,
                (stored.status, stored.version),
                (commit.expected_status, commit.expected_version),
            )?;
            inner.bookings.insert(id, commit.booking);
            Self::upsert_rows(&mut inner, commit.earnings, commit.refunds);
            tracing::debug!(booking_id = %id, "In-memory booking commit");
            Ok(())
        })
    }

    fn bookings_awaiting_confirmation(
        &self,
        before: DateTime<Utc>,
        limit: u32,
    ) -> PortFuture<'_, Vec<BookingId>, StoreError> {
        Box::pin(async move {
            let inner = self.lock()?;
            let mut due: Vec<&Booking> = inner
                .bookings
                .values()
                .filter(|b| b.status == BookingStatus::CompletedByProvider && b.updated_at < before)
                .collect();
            due.sort_by_key(|b| b.updated_at);
            Ok(due.into_iter().take(limit as usize).map(|b| b.id).collect())
        })
    }

    fn insert_job(&self, job: JobRequest) -> PortFuture<'_, (), StoreError> {
        Box::pin(async move {
            let mut inner = self.lock()?;
            if inner.jobs.contains_key(&job.id) {
                return Err(StoreError::Duplicate(format!("job {}", job.id)));
            }
            inner.jobs.insert(job.id, job);
            Ok(())
        })
    }

    fn load_job(&self, id: JobId) -> PortFuture<'_, JobRequest, StoreError> {
        Box::pin(async move {
            self.lock()?
                .jobs
                .get(&id)
                .cloned()
                .ok_or_else(|| StoreError::not_found("job", id))
        })
    }

    fn commit_job(&self, commit: JobCommit) -> PortFuture<'_, (), StoreError> {
        Box::pin(async move {
            let mut inner = self.lock()?;
            let id = commit.job.id;
            let stored = inner.jobs.get(&id).ok_or_else(|| StoreError::not_found("job", id))?;
            conflict_check(
                "job",
                &id,
                (stored.status, stored.version),
                (commit.expected_status, commit.expected_version),
            )?;
            inner.jobs.insert(id, commit.job);
            Self::upsert_rows(&mut inner, commit.earnings, commit.refunds);
            Ok(())
        })
    }

    fn earnings_for_subject(&self, subject: Subject) -> PortFuture<'_, Vec<ProviderEarnings>, StoreError> {
        Box::pin(async move {
            let inner = self.lock()?;
            let mut rows: Vec<_> = inner
                .earnings
                .values()
                .filter(|e| e.subject == subject)
                .cloned()
                .collect();
            rows.sort_by_key(|e| e.created_at);
            Ok(rows)
        })
    }

    fn earnings_for_provider(&self, provider_id: UserId) -> PortFuture<'_, Vec<ProviderEarnings>, StoreError> {
        Box::pin(async move {
            let inner = self.lock()?;
            let mut rows: Vec<_> = inner
                .earnings
                .values()
                .filter(|e| e.provider_id == provider_id)
                .cloned()
                .collect();
            rows.sort_by_key(|e| std::cmp::Reverse(e.created_at));
            Ok(rows)
        })
    }

    fn earnings_due_for_payout(
        &self,
        max_attempts: u32,
        limit: u32,
    ) -> PortFuture<'_, Vec<ProviderEarnings>, StoreError> {
        Box::pin(async move {
            let inner = self.lock()?;
            let mut rows: Vec<_> = inner
                .earnings
                .values()
                .filter(|e| e.is_due_for_retry(max_attempts))
                .cloned()
                .collect();
            rows.sort_by_key(|e| e.updated_at);
            rows.truncate(limit as usize);
            Ok(rows)
        })
    }

    fn load_earnings(&self, id: EarningsId) -> PortFuture<'_, ProviderEarnings, StoreError> {
        Box::pin(async move {
            self.lock()?
                .earnings
                .get(&id)
                .cloned()
                .ok_or_else(|| StoreError::not_found("earnings", id))
        })
    }

    fn find_earnings_by_transfer(
        &self,
        transfer_ref: String,
    ) -> PortFuture<'_, Option<ProviderEarnings>, StoreError> {
        Box::pin(async move {
            Ok(self
                .lock()?
                .earnings
                .values()
                .find(|e| e.transfer_ref.as_deref() == Some(transfer_ref.as_str()))
                .cloned())
        })
    }

    fn save_earnings(&self, earnings: ProviderEarnings) -> PortFuture<'_, (), StoreError> {
        Box::pin(async move {
            let mut inner = self.lock()?;
            if let Some(stored) = inner.earnings.get(&earnings.id) {
                if stored.status == PayoutStatus::PaidOut && earnings.status != PayoutStatus::PaidOut {
                    return Err(StoreError::Conflict {
                        entity: "earnings",
                        id: earnings.id.to_string(),
                        expected: earnings.status.to_string(),
                        actual: stored.status.to_string(),
                    });
                }
            }
            inner.earnings.insert(earnings.id, earnings);
            Ok(())
        })
    }

    fn load_provider_profile(&self, provider_id: UserId) -> PortFuture<'_, ProviderProfile, StoreError> {
        Box::pin(async move {
            Ok(self
                .lock()?
                .profiles
                .get(&provider_id)
                .cloned()
                .unwrap_or_else(|| ProviderProfile {
                    provider_id,
                    ..ProviderProfile::default()
                }))
        })
    }

    fn save_provider_profile(&self, profile: ProviderProfile) -> PortFuture<'_, (), StoreError> {
        Box::pin(async move {
            self.lock()?.profiles.insert(profile.provider_id, profile);
            Ok(())
        })
    }

    fn provider_availability(&self, provider_id: UserId) -> PortFuture<'_, ProviderAvailability, StoreError> {
        Box::pin(async move {
            let inner = self.lock()?;
            let profile = inner.profiles.get(&provider_id).cloned().unwrap_or_default();
            let booked = inner
                .bookings
                .values()
                .filter(|b| b.provider_id == provider_id && b.status.occupies_slot())
                .map(|b| BusySlot {
                    booking_id: b.id,
                    start: b.scheduled_start,
                    end: b.scheduled_end(),
                })
                .collect();
            Ok(ProviderAvailability {
                utc_offset_minutes: profile.utc_offset_minutes,
                weekly: profile.weekly,
                time_off: profile.time_off,
                booked,
            })
        })
    }

    fn record_webhook_event(&self, event_id: String, _event_type: String) -> PortFuture<'_, bool, StoreError> {
        Box::pin(async move { Ok(self.lock()?.webhook_events.insert(event_id)) })
    }

    fn load_fee_policy(&self) -> PortFuture<'_, Option<FeePolicy>, StoreError> {
        Box::pin(async move { Ok(self.lock()?.fee_policy) })
    }

    fn save_fee_policy(&self, policy: FeePolicy) -> PortFuture<'_, (), StoreError> {
        Box::pin(async move {
            self.lock()?.fee_policy = Some(policy);
            Ok(())
        })
    }

    fn append_audit(&self, entry: AuditEntry) -> PortFuture<'_, (), StoreError> {
        Box::pin(async move {
            if self.fail_audit.load(Ordering::SeqCst) {
                return Err(StoreError::Database("audit table unavailable".into()));
            }
            self.lock()?.audit.push(entry);
            Ok(())
        })
    }

    fn ping(&self) -> PortFuture<'_, (), StoreError> {
        Box::pin(async move { self.lock().map(|_| ()) })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::fixtures;

    #[tokio::test]
    async fn stale_commit_is_a_conflict() {
        let store = InMemoryStore::new();
        let booking = fixtures::requested_booking();
        store.insert_booking(booking.clone()).await.unwrap();

        let mut accepted = booking.clone();
        accepted.status = BookingStatus::Accepted;
        accepted.version = 1;
        store
            .commit_booking(BookingCommit {
                booking: accepted.clone(),
                expected_status: BookingStatus::Requested,
                expected_version: 0,
                earnings: Vec::new(),
                refunds: Vec::new(),
            })
            .await
            .unwrap();

        let err = store
            .commit_booking(BookingCommit {
                booking: accepted,
                expected_status: BookingStatus::Requested,
                expected_version: 0,
                earnings: Vec::new(),
                refunds: Vec::new(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
    }

    #[tokio::test]
    async fn same_status_commit_from_a_stale_version_is_a_conflict() {
        let store = InMemoryStore::new();
        let mut booking = fixtures::requested_booking();
        booking.status = BookingStatus::Accepted;
        store.insert_booking(booking.clone()).await.unwrap();

        // Two writers load version 0; both keep the booking accepted
        let mut quoted = booking.clone();
        quoted.provider_quoted_price = Some(marketplace_core::money::Money::from_cents(12_000));
        quoted.version = 1;
        let mut retried = booking.clone();
        retried.charge_attempts = 1;
        retried.version = 1;

        store
            .commit_booking(BookingCommit {
                booking: quoted.clone(),
                expected_status: BookingStatus::Accepted,
                expected_version: 0,
                earnings: Vec::new(),
                refunds: Vec::new(),
            })
            .await
            .unwrap();
        let err = store
            .commit_booking(BookingCommit {
                booking: retried,
                expected_status: BookingStatus::Accepted,
                expected_version: 0,
                earnings: Vec::new(),
                refunds: Vec::new(),
            })
            .await
            .unwrap_err();
        let StoreError::Conflict { expected, actual, .. } = err else {
            panic!("expected a conflict, got {err:?}");
        };
        assert_eq!(expected, "version 0");
        assert_eq!(actual, "version 1");
        assert_eq!(store.load_booking(booking.id).await.unwrap(), quoted);
    }

    #[tokio::test]
    async fn webhook_events_are_recorded_once() {
        let store = InMemoryStore::new();
        assert!(store.record_webhook_event("evt_1".into(), "x".into()).await.unwrap());
        assert!(!store.record_webhook_event("evt_1".into(), "x".into()).await.unwrap());
    }

    #[tokio::test]
    async fn availability_includes_occupied_slots() {
        let store = InMemoryStore::new();
        let mut booking = fixtures::requested_booking();
        booking.status = BookingStatus::Paid;
        let provider_id = booking.provider_id;
        store.insert_booking(booking.clone()).await.unwrap();

        let availability = store.provider_availability(provider_id).await.unwrap();
        assert_eq!(availability.booked.len(), 1);
        assert_eq!(availability.booked[0].booking_id, booking.id);
    }
}
