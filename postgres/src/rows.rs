//! Row decoding and column conversions.
//!
//! Queries are runtime-checked, so every column is read with `try_get` and
//! converted to a domain type here. Decoding failures surface as
//! [`StoreError::Serialization`].

use marketplace_core::availability::{ScheduleWindow, TimeOff};
use marketplace_core::booking::{Booking, Dispute, RescheduleProposal, Review};
use marketplace_core::earnings::{ProviderEarnings, Subject};
use marketplace_core::ids::{BookingId, EarningsId, JobId, PaymentId, QuoteId, ServiceId, UserId};
use marketplace_core::job::{JobQuote, JobRequest};
use marketplace_core::money::{Currency, Money};
use marketplace_core::payment::{PaymentRecord, PendingCharge};
use marketplace_core::ports::{ProviderProfile, StoreError};
use marketplace_core::split::{FeePolicy, PaymentSplit};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{Postgres, Row};
use std::fmt::Display;
use std::str::FromStr;
use uuid::Uuid;

/// Map a driver error, turning unique violations into [`StoreError::Duplicate`]
pub(crate) fn db_error(error: sqlx::Error) -> StoreError {
    if let Some(db) = error.as_database_error() {
        if db.code().as_deref() == Some("23505") {
            return StoreError::Duplicate(db.message().to_string());
        }
    }
    StoreError::Database(error.to_string())
}

fn column<'r, T>(row: &'r PgRow, name: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(name)
        .map_err(|e| StoreError::Serialization(format!("column {name}: {e}")))
}

fn parsed<T>(row: &PgRow, name: &str) -> Result<T, StoreError>
where
    T: FromStr,
    T::Err: Display,
{
    let raw: String = column(row, name)?;
    raw.parse()
        .map_err(|e| StoreError::Serialization(format!("column {name}: {e}")))
}

fn money(row: &PgRow, name: &str) -> Result<Money, StoreError> {
    let cents: i64 = column(row, name)?;
    Money::from_i64(cents)
        .ok_or_else(|| StoreError::Serialization(format!("column {name}: negative amount {cents}")))
}

fn optional_money(row: &PgRow, name: &str) -> Result<Option<Money>, StoreError> {
    let cents: Option<i64> = column(row, name)?;
    cents
        .map(|c| {
            Money::from_i64(c)
                .ok_or_else(|| StoreError::Serialization(format!("column {name}: negative amount {c}")))
        })
        .transpose()
}

fn count(row: &PgRow, name: &str) -> Result<u32, StoreError> {
    let value: i32 = column(row, name)?;
    u32::try_from(value).map_err(|e| StoreError::Serialization(format!("column {name}: {e}")))
}

/// Money as a `BIGINT` bind value
pub(crate) fn cents(amount: Money) -> Result<i64, StoreError> {
    amount
        .to_i64()
        .ok_or_else(|| StoreError::Serialization(format!("amount {amount} exceeds BIGINT")))
}

/// `u32` counter as an `INTEGER` bind value
pub(crate) fn int(value: u32) -> Result<i32, StoreError> {
    i32::try_from(value).map_err(|e| StoreError::Serialization(format!("{value} exceeds INTEGER: {e}")))
}

/// Row version as a `BIGINT` bind value
pub(crate) fn version(value: u64) -> Result<i64, StoreError> {
    i64::try_from(value).map_err(|e| StoreError::Serialization(format!("version {value} exceeds BIGINT: {e}")))
}

fn stored_version(row: &PgRow) -> Result<u64, StoreError> {
    let value: i64 = column(row, "version")?;
    u64::try_from(value).map_err(|e| StoreError::Serialization(format!("column version: {e}")))
}

fn pending_charge(row: &PgRow) -> Result<Option<PendingCharge>, StoreError> {
    let pending: Option<Json<PendingCharge>> = column(row, "pending_charge")?;
    Ok(pending.map(|Json(p)| p))
}

/// Decode a `(subject_kind, subject_id)` column pair
pub(crate) fn subject(kind: &str, id: Uuid) -> Result<Subject, StoreError> {
    match kind {
        "booking" => Ok(Subject::Booking(BookingId::from_uuid(id))),
        "job" => Ok(Subject::Job(JobId::from_uuid(id))),
        other => Err(StoreError::Serialization(format!("unknown subject kind: {other}"))),
    }
}

fn subject_columns(row: &PgRow) -> Result<Subject, StoreError> {
    let kind: String = column(row, "subject_kind")?;
    subject(&kind, column(row, "subject_id")?)
}

/// Decode a `payments` row
pub(crate) fn payment(row: &PgRow) -> Result<PaymentRecord, StoreError> {
    Ok(PaymentRecord {
        id: PaymentId::from_uuid(column(row, "id")?),
        subject: subject_columns(row)?,
        phase: parsed(row, "phase")?,
        charge_ref: column(row, "charge_ref")?,
        split: PaymentSplit {
            total_charge: money(row, "total_charge")?,
            platform_fee: money(row, "platform_fee")?,
            provider_amount: money(row, "provider_amount")?,
            currency: parsed::<Currency>(row, "currency")?,
        },
        refunded: money(row, "refunded")?,
        refunded_fee: money(row, "refunded_fee")?,
        captured_at: column(row, "captured_at")?,
    })
}

/// Decode a `bookings` row; the payment is loaded separately
pub(crate) fn booking(row: &PgRow, payment: Option<PaymentRecord>) -> Result<Booking, StoreError> {
    let reschedule: Option<Json<RescheduleProposal>> = column(row, "reschedule")?;
    let review: Option<Json<Review>> = column(row, "review")?;
    let dispute: Option<Json<Dispute>> = column(row, "dispute")?;
    Ok(Booking {
        id: BookingId::from_uuid(column(row, "id")?),
        customer_id: UserId::from_uuid(column(row, "customer_id")?),
        provider_id: UserId::from_uuid(column(row, "provider_id")?),
        service_id: ServiceId::from_uuid(column(row, "service_id")?),
        status: parsed(row, "status")?,
        scheduled_start: column(row, "scheduled_start")?,
        duration_minutes: count(row, "duration_minutes")?,
        price_at_booking: money(row, "price_at_booking")?,
        provider_quoted_price: optional_money(row, "provider_quoted_price")?,
        payment,
        pending_charge: pending_charge(row)?,
        charge_attempts: count(row, "charge_attempts")?,
        earnings_recorded: column(row, "earnings_recorded")?,
        reschedule: reschedule.map(|Json(r)| r),
        review: review.map(|Json(r)| r),
        dispute: dispute.map(|Json(d)| d),
        cancellation_reason: column(row, "cancellation_reason")?,
        created_at: column(row, "created_at")?,
        updated_at: column(row, "updated_at")?,
        version: stored_version(row)?,
    })
}

/// Decode a `job_quotes` row
pub(crate) fn quote(row: &PgRow) -> Result<JobQuote, StoreError> {
    Ok(JobQuote {
        id: QuoteId::from_uuid(column(row, "id")?),
        job_id: JobId::from_uuid(column(row, "job_id")?),
        provider_id: UserId::from_uuid(column(row, "provider_id")?),
        amount: money(row, "amount")?,
        deposit: optional_money(row, "deposit")?,
        message: column(row, "message")?,
        status: parsed(row, "status")?,
        created_at: column(row, "created_at")?,
        updated_at: column(row, "updated_at")?,
    })
}

/// Decode a `jobs` row with its quotes and payments
pub(crate) fn job(
    row: &PgRow,
    quotes: Vec<JobQuote>,
    payments: Vec<PaymentRecord>,
) -> Result<JobRequest, StoreError> {
    Ok(JobRequest {
        id: JobId::from_uuid(column(row, "id")?),
        customer_id: UserId::from_uuid(column(row, "customer_id")?),
        title: column(row, "title")?,
        description: column(row, "description")?,
        status: parsed(row, "status")?,
        quotes,
        payments,
        pending_charge: pending_charge(row)?,
        charge_attempts: count(row, "charge_attempts")?,
        cancellation_reason: column(row, "cancellation_reason")?,
        created_at: column(row, "created_at")?,
        updated_at: column(row, "updated_at")?,
        version: stored_version(row)?,
    })
}

/// Decode a `provider_earnings` row
pub(crate) fn earnings(row: &PgRow) -> Result<ProviderEarnings, StoreError> {
    Ok(ProviderEarnings {
        id: EarningsId::from_uuid(column(row, "id")?),
        provider_id: UserId::from_uuid(column(row, "provider_id")?),
        payment_id: PaymentId::from_uuid(column(row, "payment_id")?),
        subject: subject_columns(row)?,
        gross: money(row, "gross")?,
        platform_fee: money(row, "platform_fee")?,
        gst: money(row, "gst")?,
        net: money(row, "net")?,
        reversed_amount: money(row, "reversed_amount")?,
        status: parsed(row, "status")?,
        transfer_ref: column(row, "transfer_ref")?,
        attempts: count(row, "attempts")?,
        last_error: column(row, "last_error")?,
        created_at: column(row, "created_at")?,
        updated_at: column(row, "updated_at")?,
    })
}

/// Decode a `provider_profiles` row
pub(crate) fn profile(row: &PgRow) -> Result<ProviderProfile, StoreError> {
    let Json(weekly): Json<Vec<ScheduleWindow>> = column(row, "weekly")?;
    let Json(time_off): Json<Vec<TimeOff>> = column(row, "time_off")?;
    Ok(ProviderProfile {
        provider_id: UserId::from_uuid(column(row, "provider_id")?),
        plan_tier: parsed(row, "plan_tier")?,
        payout_account: column(row, "payout_account")?,
        utc_offset_minutes: column(row, "utc_offset_minutes")?,
        weekly,
        time_off,
    })
}

/// Decode the `fee_policy` row
pub(crate) fn fee_policy(row: &PgRow) -> Result<FeePolicy, StoreError> {
    let starter: i32 = column(row, "starter_fee_bps")?;
    let gst: i32 = column(row, "gst_bps")?;
    let rate = |bps: i32| {
        u32::try_from(bps).map_err(|e| StoreError::Serialization(format!("fee rate {bps}: {e}")))
    };
    Ok(FeePolicy {
        starter_fee_bps: rate(starter)?,
        gst_bps: rate(gst)?,
        minimum_charge: money(row, "minimum_charge")?,
        currency: parsed(row, "currency")?,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn subject_kinds_decode() {
        let id = Uuid::new_v4();
        assert_eq!(
            subject("booking", id).unwrap(),
            Subject::Booking(BookingId::from_uuid(id))
        );
        assert_eq!(subject("job", id).unwrap(), Subject::Job(JobId::from_uuid(id)));
        assert!(matches!(
            subject("invoice", id),
            Err(StoreError::Serialization(_))
        ));
    }

    #[test]
    fn amounts_above_bigint_are_rejected() {
        assert_eq!(cents(Money::from_cents(12_345)).unwrap(), 12_345);
        assert!(cents(Money::from_cents(u64::MAX)).is_err());
    }

    #[test]
    fn counters_convert_to_integer() {
        assert_eq!(int(5).unwrap(), 5);
        assert!(int(u32::MAX).is_err());
    }

    #[test]
    fn versions_convert_to_bigint() {
        assert_eq!(version(7).unwrap(), 7);
        assert!(version(u64::MAX).is_err());
    }

    #[test]
    fn non_database_errors_are_not_duplicates() {
        assert!(matches!(
            db_error(sqlx::Error::RowNotFound),
            StoreError::Database(_)
        ));
    }
}
