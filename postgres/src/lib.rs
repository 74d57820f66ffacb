//! PostgreSQL store for the services marketplace.
//!
//! [`PgMarketplaceStore`] implements [`MarketplaceStore`] on a `sqlx` pool.
//! Each `commit_*` call runs in one transaction: the entity row is updated
//! with an optimistic status and version check, then payment, quote,
//! earnings and refund rows are upserted. If the check fails nothing is
//! written.
//!
//! Queries are checked at runtime, so building this crate does not need a
//! live database.
//!
//! # Example
//!
//! ```ignore
//! let store = PgMarketplaceStore::connect("postgres://localhost/marketplace").await?;
//! store.migrate().await?;
//! let booking = store.load_booking(booking_id).await?;
//! ```

use chrono::{DateTime, Utc};
use marketplace_core::availability::{slot_end, BusySlot, ProviderAvailability};
use marketplace_core::booking::Booking;
use marketplace_core::earnings::{PayoutStatus, ProviderEarnings, Subject};
use marketplace_core::ids::{BookingId, EarningsId, JobId, UserId};
use marketplace_core::job::{JobQuote, JobRequest};
use marketplace_core::payment::{AuditEntry, PaymentRecord, RefundRecord};
use marketplace_core::ports::{
    BookingCommit, JobCommit, MarketplaceStore, PortFuture, ProviderProfile, StoreError,
};
use marketplace_core::split::FeePolicy;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool, Row};

mod rows;

use rows::{cents, db_error, int, version};

/// Bookings, jobs and earnings stored in PostgreSQL
#[derive(Clone, Debug)]
pub struct PgMarketplaceStore {
    pool: PgPool,
}

impl PgMarketplaceStore {
    /// Wrap an existing pool
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool against `database_url`
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the connection fails.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(20)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Database(format!("Failed to connect: {e}")))?;
        Ok(Self::new(pool))
    }

    /// Apply the bundled migrations
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("Migration failed: {e}")))?;
        Ok(())
    }

    /// The underlying pool
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn payments_for(
        &self,
        kind: &str,
        id: uuid::Uuid,
    ) -> Result<Vec<PaymentRecord>, StoreError> {
        sqlx::query(
            r"
            SELECT * FROM payments
            WHERE subject_kind = $1 AND subject_id = $2
            ORDER BY captured_at
            ",
        )
        .bind(kind)
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?
        .iter()
        .map(rows::payment)
        .collect()
    }

    async fn query_earnings(
        &self,
        query: sqlx::query::Query<'_, sqlx::Postgres, sqlx::postgres::PgArguments>,
    ) -> Result<Vec<ProviderEarnings>, StoreError> {
        query
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?
            .iter()
            .map(rows::earnings)
            .collect()
    }
}

/// Explain a guarded update that touched no rows
async fn missing_or_conflict(
    conn: &mut PgConnection,
    table: &'static str,
    entity: &'static str,
    id: uuid::Uuid,
    expected_status: String,
    expected_version: u64,
) -> StoreError {
    let sql = format!("SELECT status, version FROM {table} WHERE id = $1");
    match sqlx::query_as::<_, (String, i64)>(&sql)
        .bind(id)
        .fetch_optional(conn)
        .await
    {
        Ok(Some((status, stored_version))) => {
            let (expected, actual) = if status == expected_status {
                (
                    format!("version {expected_version}"),
                    format!("version {stored_version}"),
                )
            } else {
                (expected_status, status)
            };
            metrics::counter!("marketplace_store_conflicts_total", "entity" => entity).increment(1);
            tracing::warn!(entity, %id, %expected, %actual, "Optimistic concurrency conflict");
            StoreError::Conflict {
                entity,
                id: id.to_string(),
                expected,
                actual,
            }
        }
        Ok(None) => StoreError::not_found(entity, id),
        Err(e) => db_error(e),
    }
}

async fn upsert_payment(conn: &mut PgConnection, payment: &PaymentRecord) -> Result<(), StoreError> {
    sqlx::query(
        r"
        INSERT INTO payments
            (id, subject_kind, subject_id, phase, charge_ref, total_charge, platform_fee,
             provider_amount, currency, refunded, refunded_fee, captured_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        ON CONFLICT (id) DO UPDATE
        SET refunded = EXCLUDED.refunded,
            refunded_fee = EXCLUDED.refunded_fee
        ",
    )
    .bind(payment.id.as_uuid())
    .bind(payment.subject.kind())
    .bind(payment.subject.uuid())
    .bind(payment.phase.as_str())
    .bind(&payment.charge_ref)
    .bind(cents(payment.split.total_charge)?)
    .bind(cents(payment.split.platform_fee)?)
    .bind(cents(payment.split.provider_amount)?)
    .bind(payment.split.currency.code())
    .bind(cents(payment.refunded)?)
    .bind(cents(payment.refunded_fee)?)
    .bind(payment.captured_at)
    .execute(conn)
    .await
    .map_err(db_error)?;
    Ok(())
}

/// Insert or update an earnings row; a paid-out row is never moved back
async fn upsert_earnings(conn: &mut PgConnection, row: &ProviderEarnings) -> Result<(), StoreError> {
    let result = sqlx::query(
        r"
        INSERT INTO provider_earnings
            (id, provider_id, payment_id, subject_kind, subject_id, gross, platform_fee, gst,
             net, reversed_amount, status, transfer_ref, attempts, last_error, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
        ON CONFLICT (id) DO UPDATE
        SET net = EXCLUDED.net,
            reversed_amount = EXCLUDED.reversed_amount,
            status = EXCLUDED.status,
            transfer_ref = EXCLUDED.transfer_ref,
            attempts = EXCLUDED.attempts,
            last_error = EXCLUDED.last_error,
            updated_at = EXCLUDED.updated_at
        WHERE provider_earnings.status <> 'paid_out' OR EXCLUDED.status = 'paid_out'
        ",
    )
    .bind(row.id.as_uuid())
    .bind(row.provider_id.as_uuid())
    .bind(row.payment_id.as_uuid())
    .bind(row.subject.kind())
    .bind(row.subject.uuid())
    .bind(cents(row.gross)?)
    .bind(cents(row.platform_fee)?)
    .bind(cents(row.gst)?)
    .bind(cents(row.net)?)
    .bind(cents(row.reversed_amount)?)
    .bind(row.status.as_str())
    .bind(row.transfer_ref.as_deref())
    .bind(int(row.attempts)?)
    .bind(row.last_error.as_deref())
    .bind(row.created_at)
    .bind(row.updated_at)
    .execute(conn)
    .await
    .map_err(db_error)?;

    if result.rows_affected() == 0 {
        return Err(StoreError::Conflict {
            entity: "earnings",
            id: row.id.to_string(),
            expected: row.status.to_string(),
            actual: PayoutStatus::PaidOut.to_string(),
        });
    }
    Ok(())
}

async fn insert_refund(conn: &mut PgConnection, refund: &RefundRecord) -> Result<(), StoreError> {
    sqlx::query(
        r"
        INSERT INTO refunds
            (id, payment_id, refund_ref, refund_amount, platform_fee, provider_amount, reason, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ",
    )
    .bind(refund.id.as_uuid())
    .bind(refund.payment_id.as_uuid())
    .bind(&refund.refund_ref)
    .bind(cents(refund.split.refund_amount)?)
    .bind(cents(refund.split.platform_fee)?)
    .bind(cents(refund.split.provider_amount)?)
    .bind(&refund.reason)
    .bind(refund.created_at)
    .execute(conn)
    .await
    .map_err(db_error)?;
    Ok(())
}

async fn upsert_quote(conn: &mut PgConnection, quote: &JobQuote) -> Result<(), StoreError> {
    sqlx::query(
        r"
        INSERT INTO job_quotes
            (id, job_id, provider_id, amount, deposit, message, status, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ON CONFLICT (id) DO UPDATE
        SET status = EXCLUDED.status,
            updated_at = EXCLUDED.updated_at
        ",
    )
    .bind(quote.id.as_uuid())
    .bind(quote.job_id.as_uuid())
    .bind(quote.provider_id.as_uuid())
    .bind(cents(quote.amount)?)
    .bind(quote.deposit.map(cents).transpose()?)
    .bind(quote.message.as_deref())
    .bind(quote.status.as_str())
    .bind(quote.created_at)
    .bind(quote.updated_at)
    .execute(conn)
    .await
    .map_err(db_error)?;
    Ok(())
}

async fn write_rows(
    conn: &mut PgConnection,
    earnings: &[ProviderEarnings],
    refunds: &[RefundRecord],
) -> Result<(), StoreError> {
    for row in earnings {
        upsert_earnings(conn, row).await?;
    }
    for refund in refunds {
        insert_refund(conn, refund).await?;
    }
    Ok(())
}

impl MarketplaceStore for PgMarketplaceStore {
    fn insert_booking(&self, booking: Booking) -> PortFuture<'_, (), StoreError> {
        Box::pin(async move {
            sqlx::query(
                r"
                INSERT INTO bookings
                    (id, customer_id, provider_id, service_id, status, scheduled_start,
                     duration_minutes, price_at_booking, provider_quoted_price, earnings_recorded,
                     pending_charge, charge_attempts, version, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
                ",
            )
            .bind(booking.id.as_uuid())
            .bind(booking.customer_id.as_uuid())
            .bind(booking.provider_id.as_uuid())
            .bind(booking.service_id.as_uuid())
            .bind(booking.status.as_str())
            .bind(booking.scheduled_start)
            .bind(int(booking.duration_minutes)?)
            .bind(cents(booking.price_at_booking)?)
            .bind(booking.provider_quoted_price.map(cents).transpose()?)
            .bind(booking.earnings_recorded)
            .bind(booking.pending_charge.as_ref().map(Json))
            .bind(int(booking.charge_attempts)?)
            .bind(version(booking.version)?)
            .bind(booking.created_at)
            .bind(booking.updated_at)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

            tracing::debug!(booking_id = %booking.id, "Booking inserted");
            Ok(())
        })
    }

    fn load_booking(&self, id: BookingId) -> PortFuture<'_, Booking, StoreError> {
        Box::pin(async move {
            let row = sqlx::query("SELECT * FROM bookings WHERE id = $1")
                .bind(id.as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(db_error)?
                .ok_or_else(|| StoreError::not_found("booking", id))?;
            let payment = self.payments_for("booking", *id.as_uuid()).await?.into_iter().next();
            rows::booking(&row, payment)
        })
    }

    fn commit_booking(&self, commit: BookingCommit) -> PortFuture<'_, (), StoreError> {
        Box::pin(async move {
            let BookingCommit {
                booking,
                expected_status,
                expected_version,
                earnings,
                refunds,
            } = commit;
            let mut tx = self.pool.begin().await.map_err(db_error)?;

            let updated = sqlx::query(
                r"
                UPDATE bookings
                SET status = $2,
                    scheduled_start = $3,
                    provider_quoted_price = $4,
                    earnings_recorded = $5,
                    reschedule = $6,
                    review = $7,
                    dispute = $8,
                    cancellation_reason = $9,
                    pending_charge = $10,
                    charge_attempts = $11,
                    version = $12,
                    updated_at = $13
                WHERE id = $1 AND status = $14 AND version = $15
                ",
            )
            .bind(booking.id.as_uuid())
            .bind(booking.status.as_str())
            .bind(booking.scheduled_start)
            .bind(booking.provider_quoted_price.map(cents).transpose()?)
            .bind(booking.earnings_recorded)
            .bind(booking.reschedule.map(Json))
            .bind(booking.review.as_ref().map(Json))
            .bind(booking.dispute.as_ref().map(Json))
            .bind(booking.cancellation_reason.as_deref())
            .bind(booking.pending_charge.as_ref().map(Json))
            .bind(int(booking.charge_attempts)?)
            .bind(version(booking.version)?)
            .bind(booking.updated_at)
            .bind(expected_status.as_str())
            .bind(version(expected_version)?)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

            if updated.rows_affected() == 0 {
                return Err(missing_or_conflict(
                    &mut tx,
                    "bookings",
                    "booking",
                    *booking.id.as_uuid(),
                    expected_status.to_string(),
                    expected_version,
                )
                .await);
            }

            if let Some(payment) = &booking.payment {
                upsert_payment(&mut tx, payment).await?;
            }
            write_rows(&mut tx, &earnings, &refunds).await?;
            tx.commit().await.map_err(db_error)?;

            metrics::counter!(
                "marketplace_store_commits_total",
                "entity" => "booking",
                "status" => booking.status.as_str()
            )
            .increment(1);
            tracing::debug!(
                booking_id = %booking.id,
                from = %expected_status,
                to = %booking.status,
                earnings = earnings.len(),
                refunds = refunds.len(),
                "Booking commit applied"
            );
            Ok(())
        })
    }

    fn bookings_awaiting_confirmation(
        &self,
        before: DateTime<Utc>,
        limit: u32,
    ) -> PortFuture<'_, Vec<BookingId>, StoreError> {
        Box::pin(async move {
            let ids: Vec<uuid::Uuid> = sqlx::query_scalar(
                r"
                SELECT id FROM bookings
                WHERE status = 'completed_by_provider' AND updated_at < $1
                ORDER BY updated_at
                LIMIT $2
                ",
            )
            .bind(before)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;
            Ok(ids.into_iter().map(BookingId::from_uuid).collect())
        })
    }

    fn insert_job(&self, job: JobRequest) -> PortFuture<'_, (), StoreError> {
        Box::pin(async move {
            sqlx::query(
                r"
                INSERT INTO jobs
                    (id, customer_id, title, description, status, cancellation_reason,
                     pending_charge, charge_attempts, version, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                ",
            )
            .bind(job.id.as_uuid())
            .bind(job.customer_id.as_uuid())
            .bind(&job.title)
            .bind(&job.description)
            .bind(job.status.as_str())
            .bind(job.cancellation_reason.as_deref())
            .bind(job.pending_charge.as_ref().map(Json))
            .bind(int(job.charge_attempts)?)
            .bind(version(job.version)?)
            .bind(job.created_at)
            .bind(job.updated_at)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

            tracing::debug!(job_id = %job.id, "Job inserted");
            Ok(())
        })
    }

    fn load_job(&self, id: JobId) -> PortFuture<'_, JobRequest, StoreError> {
        Box::pin(async move {
            let row = sqlx::query("SELECT * FROM jobs WHERE id = $1")
                .bind(id.as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(db_error)?
                .ok_or_else(|| StoreError::not_found("job", id))?;
            let quotes = sqlx::query("SELECT * FROM job_quotes WHERE job_id = $1 ORDER BY created_at, id")
                .bind(id.as_uuid())
                .fetch_all(&self.pool)
                .await
                .map_err(db_error)?
                .iter()
                .map(rows::quote)
                .collect::<Result<Vec<_>, _>>()?;
            let payments = self.payments_for("job", *id.as_uuid()).await?;
            rows::job(&row, quotes, payments)
        })
    }

    fn commit_job(&self, commit: JobCommit) -> PortFuture<'_, (), StoreError> {
        Box::pin(async move {
            let JobCommit {
                job,
                expected_status,
                expected_version,
                earnings,
                refunds,
            } = commit;
            let mut tx = self.pool.begin().await.map_err(db_error)?;

            let updated = sqlx::query(
                r"
                UPDATE jobs
                SET status = $2,
                    cancellation_reason = $3,
                    pending_charge = $4,
                    charge_attempts = $5,
                    version = $6,
                    updated_at = $7
                WHERE id = $1 AND status = $8 AND version = $9
                ",
            )
            .bind(job.id.as_uuid())
            .bind(job.status.as_str())
            .bind(job.cancellation_reason.as_deref())
            .bind(job.pending_charge.as_ref().map(Json))
            .bind(int(job.charge_attempts)?)
            .bind(version(job.version)?)
            .bind(job.updated_at)
            .bind(expected_status.as_str())
            .bind(version(expected_version)?)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

            if updated.rows_affected() == 0 {
                return Err(missing_or_conflict(
                    &mut tx,
                    "jobs",
                    "job",
                    *job.id.as_uuid(),
                    expected_status.to_string(),
                    expected_version,
                )
                .await);
            }

            for quote in &job.quotes {
                upsert_quote(&mut tx, quote).await?;
            }
            for payment in &job.payments {
                upsert_payment(&mut tx, payment).await?;
            }
            write_rows(&mut tx, &earnings, &refunds).await?;
            tx.commit().await.map_err(db_error)?;

            metrics::counter!(
                "marketplace_store_commits_total",
                "entity" => "job",
                "status" => job.status.as_str()
            )
            .increment(1);
            tracing::debug!(
                job_id = %job.id,
                from = %expected_status,
                to = %job.status,
                "Job commit applied"
            );
            Ok(())
        })
    }

    fn earnings_for_subject(&self, subject: Subject) -> PortFuture<'_, Vec<ProviderEarnings>, StoreError> {
        Box::pin(async move {
            self.query_earnings(
                sqlx::query(
                    r"
                    SELECT * FROM provider_earnings
                    WHERE subject_kind = $1 AND subject_id = $2
                    ORDER BY created_at
                    ",
                )
                .bind(subject.kind())
                .bind(*subject.uuid()),
            )
            .await
        })
    }

    fn earnings_for_provider(&self, provider_id: UserId) -> PortFuture<'_, Vec<ProviderEarnings>, StoreError> {
        Box::pin(async move {
            self.query_earnings(
                sqlx::query(
                    r"
                    SELECT * FROM provider_earnings
                    WHERE provider_id = $1
                    ORDER BY created_at DESC
                    ",
                )
                .bind(*provider_id.as_uuid()),
            )
            .await
        })
    }

    fn earnings_due_for_payout(
        &self,
        max_attempts: u32,
        limit: u32,
    ) -> PortFuture<'_, Vec<ProviderEarnings>, StoreError> {
        Box::pin(async move {
            self.query_earnings(
                sqlx::query(
                    r"
                    SELECT * FROM provider_earnings
                    WHERE status = 'awaiting_payout'
                      AND transfer_ref IS NULL
                      AND attempts < $1
                    ORDER BY updated_at
                    LIMIT $2
                    ",
                )
                .bind(i64::from(max_attempts))
                .bind(i64::from(limit)),
            )
            .await
        })
    }

    fn load_earnings(&self, id: EarningsId) -> PortFuture<'_, ProviderEarnings, StoreError> {
        Box::pin(async move {
            let row = sqlx::query("SELECT * FROM provider_earnings WHERE id = $1")
                .bind(id.as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(db_error)?
                .ok_or_else(|| StoreError::not_found("earnings", id))?;
            rows::earnings(&row)
        })
    }

    fn find_earnings_by_transfer(
        &self,
        transfer_ref: String,
    ) -> PortFuture<'_, Option<ProviderEarnings>, StoreError> {
        Box::pin(async move {
            sqlx::query("SELECT * FROM provider_earnings WHERE transfer_ref = $1")
                .bind(transfer_ref)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_error)?
                .as_ref()
                .map(rows::earnings)
                .transpose()
        })
    }

    fn save_earnings(&self, earnings: ProviderEarnings) -> PortFuture<'_, (), StoreError> {
        Box::pin(async move {
            let mut conn = self.pool.acquire().await.map_err(db_error)?;
            upsert_earnings(&mut conn, &earnings).await?;
            metrics::counter!("marketplace_earnings_updates_total", "status" => earnings.status.as_str())
                .increment(1);
            Ok(())
        })
    }

    fn load_provider_profile(&self, provider_id: UserId) -> PortFuture<'_, ProviderProfile, StoreError> {
        Box::pin(async move {
            let row = sqlx::query("SELECT * FROM provider_profiles WHERE provider_id = $1")
                .bind(provider_id.as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(db_error)?;
            match row {
                Some(row) => rows::profile(&row),
                None => Ok(ProviderProfile {
                    provider_id,
                    ..ProviderProfile::default()
                }),
            }
        })
    }

    fn save_provider_profile(&self, profile: ProviderProfile) -> PortFuture<'_, (), StoreError> {
        Box::pin(async move {
            sqlx::query(
                r"
                INSERT INTO provider_profiles
                    (provider_id, plan_tier, payout_account, utc_offset_minutes, weekly, time_off, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, now())
                ON CONFLICT (provider_id) DO UPDATE
                SET plan_tier = EXCLUDED.plan_tier,
                    payout_account = EXCLUDED.payout_account,
                    utc_offset_minutes = EXCLUDED.utc_offset_minutes,
                    weekly = EXCLUDED.weekly,
                    time_off = EXCLUDED.time_off,
                    updated_at = now()
                ",
            )
            .bind(profile.provider_id.as_uuid())
            .bind(profile.plan_tier.as_str())
            .bind(profile.payout_account.as_deref())
            .bind(profile.utc_offset_minutes)
            .bind(Json(&profile.weekly))
            .bind(Json(&profile.time_off))
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
            Ok(())
        })
    }

    fn provider_availability(&self, provider_id: UserId) -> PortFuture<'_, ProviderAvailability, StoreError> {
        Box::pin(async move {
            let profile = self.load_provider_profile(provider_id).await?;
            let booked = sqlx::query(
                r"
                SELECT id, scheduled_start, duration_minutes FROM bookings
                WHERE provider_id = $1 AND status IN ('accepted', 'paid')
                ",
            )
            .bind(provider_id.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?
            .iter()
            .map(|row| {
                let start: DateTime<Utc> = row.try_get("scheduled_start").map_err(db_error)?;
                let minutes: i32 = row.try_get("duration_minutes").map_err(db_error)?;
                let minutes = u32::try_from(minutes)
                    .map_err(|e| StoreError::Serialization(format!("column duration_minutes: {e}")))?;
                Ok(BusySlot {
                    booking_id: BookingId::from_uuid(row.try_get("id").map_err(db_error)?),
                    start,
                    end: slot_end(start, minutes).unwrap_or(DateTime::<Utc>::MAX_UTC),
                })
            })
            .collect::<Result<Vec<_>, StoreError>>()?;

            Ok(ProviderAvailability {
                utc_offset_minutes: profile.utc_offset_minutes,
                weekly: profile.weekly,
                time_off: profile.time_off,
                booked,
            })
        })
    }

    fn record_webhook_event(&self, event_id: String, event_type: String) -> PortFuture<'_, bool, StoreError> {
        Box::pin(async move {
            let result = sqlx::query(
                r"
                INSERT INTO webhook_events (event_id, event_type)
                VALUES ($1, $2)
                ON CONFLICT (event_id) DO NOTHING
                ",
            )
            .bind(&event_id)
            .bind(&event_type)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

            let first = result.rows_affected() == 1;
            if !first {
                tracing::debug!(event_id, event_type, "Webhook event already recorded");
            }
            Ok(first)
        })
    }

    fn load_fee_policy(&self) -> PortFuture<'_, Option<FeePolicy>, StoreError> {
        Box::pin(async move {
            sqlx::query("SELECT * FROM fee_policy WHERE id = 1")
                .fetch_optional(&self.pool)
                .await
                .map_err(db_error)?
                .as_ref()
                .map(rows::fee_policy)
                .transpose()
        })
    }

    fn save_fee_policy(&self, policy: FeePolicy) -> PortFuture<'_, (), StoreError> {
        Box::pin(async move {
            let rate = |bps: u32| {
                i32::try_from(bps).map_err(|e| StoreError::Serialization(format!("fee rate {bps}: {e}")))
            };
            sqlx::query(
                r"
                INSERT INTO fee_policy (id, starter_fee_bps, gst_bps, minimum_charge, currency, updated_at)
                VALUES (1, $1, $2, $3, $4, now())
                ON CONFLICT (id) DO UPDATE
                SET starter_fee_bps = EXCLUDED.starter_fee_bps,
                    gst_bps = EXCLUDED.gst_bps,
                    minimum_charge = EXCLUDED.minimum_charge,
                    currency = EXCLUDED.currency,
                    updated_at = now()
                ",
            )
            .bind(rate(policy.starter_fee_bps)?)
            .bind(rate(policy.gst_bps)?)
            .bind(cents(policy.minimum_charge)?)
            .bind(policy.currency.code())
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

            tracing::info!(
                starter_fee_bps = policy.starter_fee_bps,
                gst_bps = policy.gst_bps,
                minimum_charge = %policy.minimum_charge,
                "Fee policy saved"
            );
            Ok(())
        })
    }

    fn append_audit(&self, entry: AuditEntry) -> PortFuture<'_, (), StoreError> {
        Box::pin(async move {
            sqlx::query(
                r"
                INSERT INTO audit_log (actor_id, actor_role, subject_kind, subject_id, action, detail, at)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ",
            )
            .bind(entry.actor.user_id.as_uuid())
            .bind(entry.actor.role.as_str())
            .bind(entry.subject.kind())
            .bind(entry.subject.uuid())
            .bind(&entry.action)
            .bind(Json(&entry.detail))
            .bind(entry.at)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
            Ok(())
        })
    }

    fn ping(&self) -> PortFuture<'_, (), StoreError> {
        Box::pin(async move {
            sqlx::query("SELECT 1")
                .execute(&self.pool)
                .await
                .map_err(db_error)?;
            Ok(())
        })
    }
}
