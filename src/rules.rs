//! Booking-type configuration, the legal transition graph, and policy
//! constants. Everything here is pure and safe to call from any thread.

use chrono::{Days, NaiveDate, NaiveTime, TimeDelta};
use serde::Serialize;

use crate::engine::EngineError;
use crate::model::{Amount, BookingType, Status};

/// Fixed deposit that moves a hold past `pending_payment`.
pub const DEPOSIT_AMOUNT: Amount = 3_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DurationUnit {
    /// Check-out on the last day of the stay (a 1-day booking is same-day).
    Days,
    /// Check-out the morning after each night.
    Nights,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BookingConfig {
    pub check_in_hour: u32,
    pub check_out_hour: u32,
    pub duration_unit: DurationUnit,
    pub base_price: Amount,
    pub bond: Amount,
    pub min_duration: u32,
    pub max_duration: u32,
}

impl BookingConfig {
    pub fn check_in_time(&self) -> NaiveTime {
        NaiveTime::from_hms_opt(self.check_in_hour, 0, 0).unwrap_or_default()
    }

    pub fn check_out_time(&self) -> NaiveTime {
        NaiveTime::from_hms_opt(self.check_out_hour, 0, 0).unwrap_or_default()
    }

    pub fn validate_duration(&self, duration: u32) -> Result<(), EngineError> {
        if duration < self.min_duration || duration > self.max_duration {
            return Err(EngineError::InvalidRequest(format!(
                "duration must be between {} and {}",
                self.min_duration, self.max_duration
            )));
        }
        Ok(())
    }

    /// Check-out date for a stay of `duration` units starting on `check_in`.
    pub fn check_out_for(&self, check_in: NaiveDate, duration: u32) -> Option<NaiveDate> {
        let span = match self.duration_unit {
            DurationUnit::Days => duration.checked_sub(1)?,
            DurationUnit::Nights => duration,
        };
        check_in.checked_add_days(Days::new(u64::from(span)))
    }

    pub fn price_for(&self, duration: u32) -> Amount {
        self.base_price.saturating_mul(Amount::from(duration))
    }
}

const fn cfg(
    check_in_hour: u32,
    check_out_hour: u32,
    duration_unit: DurationUnit,
    base_price: Amount,
    bond: Amount,
    max_duration: u32,
) -> BookingConfig {
    BookingConfig {
        check_in_hour,
        check_out_hour,
        duration_unit,
        base_price,
        bond,
        min_duration: 1,
        max_duration,
    }
}

pub fn config_for(booking_type: BookingType) -> BookingConfig {
    const DAYS: DurationUnit = DurationUnit::Days;
    const NIGHTS: DurationUnit = DurationUnit::Nights;
    match booking_type {
        BookingType::Daytime => cfg(8, 17, DAYS, 6_000, 1_000, 7),
        BookingType::Nighttime => cfg(19, 7, NIGHTS, 8_000, 1_000, 7),
        BookingType::TwentyTwoHours => cfg(14, 12, NIGHTS, 12_000, 1_000, 7),
        BookingType::VenueDaytime => cfg(8, 17, DAYS, 15_000, 3_000, 3),
        BookingType::VenueNighttime => cfg(19, 7, NIGHTS, 18_000, 3_000, 3),
        BookingType::VenueTwentyTwoHours => cfg(14, 12, NIGHTS, 25_000, 3_000, 3),
    }
}

/// Lookup by wire key, e.g. `"venue-22hours"`.
pub fn config_for_key(key: &str) -> Result<BookingConfig, EngineError> {
    Ok(config_for(key.parse()?))
}

// ── Transition graph ─────────────────────────────────────────────

pub const TRANSITIONS: &[(Status, Status)] = &[
    (Status::PendingPayment, Status::PendingConfirmation),
    (Status::PendingPayment, Status::Cancelled),
    (Status::PendingPayment, Status::Expired),
    (Status::PendingConfirmation, Status::Confirmed),
    (Status::PendingConfirmation, Status::Cancelled),
    (Status::Confirmed, Status::CheckedIn),
    (Status::Confirmed, Status::Cancelled),
    (Status::Confirmed, Status::NoShow),
    (Status::Confirmed, Status::Rebooked),
    (Status::CheckedIn, Status::Completed),
    (Status::Expired, Status::PendingPayment),
    (Status::Rebooked, Status::Confirmed),
    (Status::Rebooked, Status::Cancelled),
];

pub fn is_legal(from: Status, to: Status) -> bool {
    TRANSITIONS.contains(&(from, to))
}

pub fn next_statuses(from: Status) -> impl Iterator<Item = Status> {
    TRANSITIONS
        .iter()
        .filter(move |(f, _)| *f == from)
        .map(|(_, t)| *t)
}

// ── Policy ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Policy {
    /// How long an unpaid `pending_payment` hold lives.
    pub hold_expiry: TimeDelta,
    /// Minimum whole days between today and the current check-in for a rebooking request.
    pub rebooking_lead_days: i64,
    /// Furthest a rebooking may move the stay, in calendar months from today.
    pub rebooking_horizon_months: u32,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            hold_expiry: TimeDelta::hours(24),
            rebooking_lead_days: 7,
            rebooking_horizon_months: 3,
        }
    }
}
