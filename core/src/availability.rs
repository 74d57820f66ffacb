//! Provider availability and reschedule slot validation.
//!
//! A slot `[start, start + duration)` is available when:
//!
//! 1. it is not in the past and starts within [`MAX_HORIZON_DAYS`] of now
//! 2. it lies inside one weekly schedule window for its (provider-local) weekday
//! 3. it overlaps no time-off block
//! 4. it overlaps no other accepted or paid booking of the provider
//!
//! All intervals are half-open, so back-to-back bookings do not overlap.

use crate::ids::BookingId;
use chrono::{DateTime, Datelike, Duration, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a slot is not available
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AvailabilityError {
    /// Slot starts before now
    #[error("proposed start {0} is in the past")]
    InPast(DateTime<Utc>),

    /// Slot starts beyond the booking horizon
    #[error("proposed start {0} is too far in the future")]
    OutOfRange(DateTime<Utc>),

    /// Zero or absurd duration
    #[error("invalid duration of {0} minutes")]
    InvalidDuration(u32),

    /// No schedule window covers the slot
    #[error("slot is outside the provider's working hours")]
    OutsideSchedule,

    /// Slot overlaps a time-off block
    #[error("slot overlaps provider time off from {start} to {end}")]
    TimeOff {
        /// Block start
        start: DateTime<Utc>,
        /// Block end
        end: DateTime<Utc>,
    },

    /// Slot overlaps another booking
    #[error("slot overlaps booking {0}")]
    Overlap(BookingId),
}

impl AvailabilityError {
    /// Machine-readable reason code
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::InPast(_) => "slot_in_past",
            Self::OutOfRange(_) => "slot_out_of_range",
            Self::InvalidDuration(_) => "invalid_duration",
            Self::OutsideSchedule => "outside_schedule",
            Self::TimeOff { .. } => "time_off",
            Self::Overlap(_) => "slot_overlap",
        }
    }
}

/// Longest bookable slot
pub const MAX_DURATION_MINUTES: u32 = 24 * 60;

/// How far ahead a slot may start
pub const MAX_HORIZON_DAYS: i64 = 730;

/// Latest start a slot may have at `now`
#[must_use]
pub fn horizon(now: DateTime<Utc>) -> DateTime<Utc> {
    now.checked_add_signed(Duration::days(MAX_HORIZON_DAYS))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// End of a slot, or `None` if it falls outside the representable range
#[must_use]
pub fn slot_end(start: DateTime<Utc>, duration_minutes: u32) -> Option<DateTime<Utc>> {
    start.checked_add_signed(Duration::minutes(i64::from(duration_minutes)))
}

/// Recurring weekly working hours, in provider-local time
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleWindow {
    /// Day of week
    pub weekday: Weekday,
    /// Local start time
    pub start: NaiveTime,
    /// Local end time (exclusive)
    pub end: NaiveTime,
}

/// A one-off unavailable period
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeOff {
    /// Block start
    pub start: DateTime<Utc>,
    /// Block end (exclusive)
    pub end: DateTime<Utc>,
}

/// An existing accepted or paid booking occupying the provider
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusySlot {
    /// The occupying booking
    pub booking_id: BookingId,
    /// Slot start
    pub start: DateTime<Utc>,
    /// Slot end (exclusive)
    pub end: DateTime<Utc>,
}

/// Everything needed to validate a slot for one provider
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderAvailability {
    /// Provider's offset from UTC, in minutes
    pub utc_offset_minutes: i32,
    /// Weekly working windows
    pub weekly: Vec<ScheduleWindow>,
    /// Time-off blocks
    pub time_off: Vec<TimeOff>,
    /// Other accepted/paid bookings
    pub booked: Vec<BusySlot>,
}

impl ProviderAvailability {
    /// Validate a slot, ignoring the booking identified by `exclude`
    ///
    /// # Errors
    ///
    /// Returns the first rule the slot fails, checked in the order listed in
    /// the module docs.
    pub fn check(
        &self,
        start: DateTime<Utc>,
        duration_minutes: u32,
        exclude: Option<BookingId>,
        now: DateTime<Utc>,
    ) -> Result<(), AvailabilityError> {
        if duration_minutes == 0 || duration_minutes > MAX_DURATION_MINUTES {
            return Err(AvailabilityError::InvalidDuration(duration_minutes));
        }
        if start < now {
            return Err(AvailabilityError::InPast(start));
        }
        if start > horizon(now) {
            return Err(AvailabilityError::OutOfRange(start));
        }
        let end = slot_end(start, duration_minutes).ok_or(AvailabilityError::OutOfRange(start))?;

        if !self.within_schedule(start, end) {
            return Err(AvailabilityError::OutsideSchedule);
        }

        if let Some(block) = self
            .time_off
            .iter()
            .find(|block| overlaps(start, end, block.start, block.end))
        {
            return Err(AvailabilityError::TimeOff {
                start: block.start,
                end: block.end,
            });
        }

        if let Some(slot) = self
            .booked
            .iter()
            .filter(|slot| Some(slot.booking_id) != exclude)
            .find(|slot| overlaps(start, end, slot.start, slot.end))
        {
            return Err(AvailabilityError::Overlap(slot.booking_id));
        }

        Ok(())
    }

    fn within_schedule(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        let offset = Duration::minutes(i64::from(self.utc_offset_minutes));
        let (Some(local_start), Some(local_end)) = (
            start.naive_utc().checked_add_signed(offset),
            end.naive_utc().checked_add_signed(offset),
        ) else {
            return false;
        };
        let weekday = local_start.weekday();

        // Slots crossing local midnight only fit a window ending at 00:00,
        // which NaiveTime cannot express; treat them as outside.
        if local_end.date() != local_start.date() {
            return false;
        }

        self.weekly.iter().any(|window| {
            window.weekday == weekday
                && window.start <= local_start.time()
                && local_end.time() <= window.end
        })
    }
}

fn overlaps(
    a_start: DateTime<Utc>,
    a_end: DateTime<Utc>,
    b_start: DateTime<Utc>,
    b_end: DateTime<Utc>,
) -> bool {
    a_start < b_end && b_start < a_end
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
        // 2030-01-07 is a Monday
        Utc.with_ymd_and_hms(2030, 1, day, hour, minute, 0).unwrap()
    }

    fn time(hour: u32, minute: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(hour, minute, 0).unwrap()
    }

    fn weekday_nine_to_five() -> ProviderAvailability {
        ProviderAvailability {
            utc_offset_minutes: 0,
            weekly: [Weekday::Mon, Weekday::Tue, Weekday::Wed, Weekday::Thu, Weekday::Fri]
                .into_iter()
                .map(|weekday| ScheduleWindow {
                    weekday,
                    start: time(9, 0),
                    end: time(17, 0),
                })
                .collect(),
            time_off: Vec::new(),
            booked: Vec::new(),
        }
    }

    fn now() -> DateTime<Utc> {
        at(1, 0, 0)
    }

    #[test]
    fn slot_inside_window_is_available() {
        let availability = weekday_nine_to_five();
        assert_eq!(availability.check(at(7, 10, 0), 60, None, now()), Ok(()));
        // ends exactly at window end
        assert_eq!(availability.check(at(7, 16, 0), 60, None, now()), Ok(()));
    }

    #[test]
    fn slot_outside_working_hours_is_rejected() {
        let availability = weekday_nine_to_five();
        assert_eq!(
            availability.check(at(7, 16, 30), 60, None, now()),
            Err(AvailabilityError::OutsideSchedule)
        );
        // Saturday
        assert_eq!(
            availability.check(at(12, 10, 0), 60, None, now()),
            Err(AvailabilityError::OutsideSchedule)
        );
    }

    #[test]
    fn provider_offset_shifts_the_window() {
        let availability = ProviderAvailability {
            utc_offset_minutes: 13 * 60,
            ..weekday_nine_to_five()
        };
        // Sunday 21:00 UTC is Monday 10:00 at +13:00
        assert_eq!(availability.check(at(6, 21, 0), 60, None, now()), Ok(()));
    }

    #[test]
    fn time_off_blocks_the_slot() {
        let mut availability = weekday_nine_to_five();
        availability.time_off.push(TimeOff {
            start: at(7, 12, 0),
            end: at(7, 14, 0),
        });
        assert!(matches!(
            availability.check(at(7, 11, 30), 60, None, now()),
            Err(AvailabilityError::TimeOff { .. })
        ));
        assert_eq!(availability.check(at(7, 14, 0), 60, None, now()), Ok(()));
    }

    #[test]
    fn other_bookings_block_but_the_rescheduled_one_does_not() {
        let mut availability = weekday_nine_to_five();
        let other = BookingId::new();
        let own = BookingId::new();
        availability.booked.push(BusySlot {
            booking_id: other,
            start: at(8, 10, 0),
            end: at(8, 11, 0),
        });
        availability.booked.push(BusySlot {
            booking_id: own,
            start: at(8, 13, 0),
            end: at(8, 14, 0),
        });

        assert_eq!(
            availability.check(at(8, 10, 30), 60, Some(own), now()),
            Err(AvailabilityError::Overlap(other))
        );
        assert_eq!(availability.check(at(8, 13, 30), 60, Some(own), now()), Ok(()));
        // back to back is fine
        assert_eq!(availability.check(at(8, 11, 0), 60, Some(own), now()), Ok(()));
    }

    #[test]
    fn past_and_zero_length_slots_are_rejected() {
        let availability = weekday_nine_to_five();
        assert_eq!(
            availability.check(at(7, 10, 0), 60, None, at(8, 0, 0)),
            Err(AvailabilityError::InPast(at(7, 10, 0)))
        );
        assert_eq!(
            availability.check(at(7, 10, 0), 0, None, now()),
            Err(AvailabilityError::InvalidDuration(0))
        );
    }

    #[test]
    fn starts_beyond_the_horizon_are_rejected() {
        let availability = weekday_nine_to_five();
        let far = DateTime::<Utc>::MAX_UTC - Duration::minutes(1);
        assert_eq!(
            availability.check(far, 60, None, now()),
            Err(AvailabilityError::OutOfRange(far))
        );
        assert_eq!(
            availability.check(DateTime::<Utc>::MAX_UTC, MAX_DURATION_MINUTES, None, now()),
            Err(AvailabilityError::OutOfRange(DateTime::<Utc>::MAX_UTC))
        );

        // Monday 2032-01-05 is past the two-year horizon
        let beyond = Utc.with_ymd_and_hms(2032, 1, 5, 10, 0, 0).unwrap();
        assert_eq!(availability.check(beyond, 60, None, now()).unwrap_err().reason(), "slot_out_of_range");
    }

    #[test]
    fn slot_end_does_not_overflow() {
        assert_eq!(slot_end(DateTime::<Utc>::MAX_UTC, 1), None);
        assert_eq!(slot_end(at(7, 10, 0), 90), Some(at(7, 11, 30)));
    }
}
