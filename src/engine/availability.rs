use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use serde::Serialize;

use crate::model::*;

// ── Availability Algorithm ────────────────────────────────────────
//
// Hard lock: a same-type reservation that holds its date (verified deposit
// or `date_locked`, in a holding status) and whose inclusive stay covers the
// day. Soft contention: live unpaid `pending_payment` holds on the day. Many
// holds may coexist; the first deposit verified turns into the hard lock.

/// Statuses a scan must load to evaluate a day.
pub const SCAN_STATUSES: [Status; 5] = [
    Status::PendingPayment,
    Status::PendingConfirmation,
    Status::Confirmed,
    Status::CheckedIn,
    Status::Rebooked,
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Availability {
    pub date: NaiveDate,
    pub booking_type: BookingType,
    pub available: bool,
    /// True when another reservation holds the date.
    pub locked: bool,
    /// Live unpaid holds competing for the date.
    pub pending_count: usize,
    pub holder: Option<BookingRef>,
    pub message: String,
}

/// An unpaid hold still inside its expiry window. Stale holds are ignored
/// even before the reaper has expired them.
pub fn is_live_hold(r: &Reservation, now: DateTime<Utc>, hold_expiry: TimeDelta) -> bool {
    r.status == Status::PendingPayment
        && !r.deposit.is_verified()
        && r
            .hold_started_at
            .checked_add_signed(hold_expiry)
            .is_none_or(|deadline| deadline > now)
}

/// The reservation holding `date` for `booking_type`, if any.
pub fn lock_holder<'a>(
    rows: &'a [Reservation],
    date: NaiveDate,
    booking_type: BookingType,
    exclude: Option<&BookingRef>,
) -> Option<&'a Reservation> {
    rows.iter()
        .filter(|r| r.booking_type == booking_type && Some(&r.id) != exclude)
        .filter(|r| r.holds_date())
        .find(|r| r.covers(date))
}

pub fn evaluate(
    rows: &[Reservation],
    date: NaiveDate,
    booking_type: BookingType,
    exclude: Option<&BookingRef>,
    now: DateTime<Utc>,
    hold_expiry: TimeDelta,
) -> Availability {
    if let Some(holder) = lock_holder(rows, date, booking_type, exclude) {
        return Availability {
            date,
            booking_type,
            available: false,
            locked: true,
            pending_count: 0,
            holder: Some(holder.id.clone()),
            message: "This date is already booked and confirmed".into(),
        };
    }

    let pending_count = rows
        .iter()
        .filter(|r| r.booking_type == booking_type && Some(&r.id) != exclude)
        .filter(|r| is_live_hold(r, now, hold_expiry))
        .filter(|r| r.covers(date))
        .count();

    let message = match pending_count {
        0 => "This date is available".to_string(),
        1 => "Available, but 1 other guest has an unpaid hold on this date; the first to pay the deposit secures it".to_string(),
        n => format!("Available, but {n} other guests have unpaid holds on this date; the first to pay the deposit secures it"),
    };
    Availability {
        date,
        booking_type,
        available: true,
        locked: false,
        pending_count,
        holder: None,
        message,
    }
}

/// Evaluate every day of a prospective stay. The result describes the first
/// locked day if there is one, otherwise the most contested day.
pub fn evaluate_stay(
    rows: &[Reservation],
    booking_type: BookingType,
    check_in: NaiveDate,
    check_out: NaiveDate,
    exclude: Option<&BookingRef>,
    now: DateTime<Utc>,
    hold_expiry: TimeDelta,
) -> Availability {
    let mut best: Option<Availability> = None;
    for date in stay_dates(check_in, check_out) {
        let day = evaluate(rows, date, booking_type, exclude, now, hold_expiry);
        if day.locked {
            return day;
        }
        if best.as_ref().is_none_or(|b| day.pending_count > b.pending_count) {
            best = Some(day);
        }
    }
    best.unwrap_or_else(|| evaluate(rows, check_in, booking_type, exclude, now, hold_expiry))
}
