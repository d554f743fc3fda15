use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::limits::*;
use crate::model::*;
use crate::rules::{config_for, DEPOSIT_AMOUNT};
use crate::store::StoreError;

use super::availability::Availability;
use super::{Engine, EngineError};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BookingRequest {
    pub guest: GuestInfo,
    pub booking_type: BookingType,
    pub check_in_date: NaiveDate,
    pub duration: u32,
}

/// The new hold plus the contention it was created under, so the guest can
/// be told how many others are racing to pay for the same dates.
#[derive(Debug, Clone, Serialize)]
pub struct BookingOutcome {
    pub reservation: Reservation,
    pub availability: Availability,
}

fn validate_guest(g: &GuestInfo) -> Result<(), EngineError> {
    if g.name.trim().is_empty() {
        return Err(EngineError::invalid("guest name is required"));
    }
    if g.name.len() > MAX_GUEST_FIELD_LEN || g.email.len() > MAX_GUEST_FIELD_LEN {
        return Err(EngineError::invalid("guest field too long"));
    }
    if !g.email.contains('@') {
        return Err(EngineError::invalid("guest email is not valid"));
    }
    if g.phone.as_ref().is_some_and(|p| p.len() > MAX_GUEST_FIELD_LEN) {
        return Err(EngineError::invalid("guest field too long"));
    }
    if g.party_size == 0 || g.party_size > MAX_PARTY_SIZE {
        return Err(EngineError::invalid(format!(
            "party size must be between 1 and {MAX_PARTY_SIZE}"
        )));
    }
    Ok(())
}

impl Engine {
    /// Open a `pending_payment` hold. Other unpaid holds on the same dates
    /// do not block it; a locked date does.
    pub async fn create_reservation(
        &self,
        req: BookingRequest,
        actor: &Actor,
    ) -> Result<BookingOutcome, EngineError> {
        validate_guest(&req.guest)?;
        let config = config_for(req.booking_type);
        config.validate_duration(req.duration)?;

        let today = self.today();
        if req.check_in_date < today {
            return Err(EngineError::invalid("check-in date is in the past"));
        }
        if (req.check_in_date - today).num_days() > MAX_BOOKING_AHEAD_DAYS {
            return Err(EngineError::invalid(format!(
                "bookings open at most {MAX_BOOKING_AHEAD_DAYS} days ahead"
            )));
        }
        let check_out_date = config
            .check_out_for(req.check_in_date, req.duration)
            .ok_or_else(|| EngineError::invalid("check-out date out of range"))?;

        let _lease = self
            .lease_stay(req.booking_type, req.check_in_date, check_out_date)
            .await?;
        let availability = self
            .ensure_free(req.booking_type, req.check_in_date, check_out_date, None)
            .await?;

        let now = self.now();
        let total_amount = config.price_for(req.duration);
        let deposit_amount = DEPOSIT_AMOUNT.min(total_amount);
        let mut row = Reservation {
            id: BookingRef::generate(now.date_naive()),
            version: 0,
            guest: req.guest,
            booking_type: req.booking_type,
            check_in_date: req.check_in_date,
            check_out_date,
            duration: req.duration,
            status: Status::PendingPayment,
            total_amount,
            deposit_amount,
            remaining_balance: total_amount - deposit_amount,
            deposit: PaymentRecord::default(),
            full_payment: PaymentRecord::default(),
            date_locked: false,
            rebooking: None,
            cancellation_reason: None,
            admin_notes: String::new(),
            arrival: None,
            departure: None,
            hold_started_at: now,
            created_at: now,
            updated_at: now,
            history: Vec::new(),
        };

        for _ in 0..MAX_REF_ATTEMPTS {
            match self.store.create(row.clone()).await {
                Ok(written) => {
                    info!(
                        "{} created for {} {}..{} by {} ({} competing holds)",
                        written.id,
                        written.booking_type,
                        written.check_in_date,
                        written.check_out_date,
                        actor,
                        availability.pending_count
                    );
                    return Ok(BookingOutcome {
                        reservation: written,
                        availability,
                    });
                }
                Err(StoreError::AlreadyExists(_)) => {
                    row.id = BookingRef::generate(now.date_naive());
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(EngineError::Store(StoreError::Unavailable(
            "could not allocate a unique booking reference".into(),
        )))
    }
}
