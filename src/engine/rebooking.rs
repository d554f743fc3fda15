use chrono::{Months, NaiveDate};
use tracing::info;

use crate::limits::{MAX_NOTE_LEN, MAX_REASON_LEN};
use crate::model::*;
use crate::rules::{config_for, Policy};

use super::availability::evaluate_stay;
use super::lifecycle::{apply_transition, TransitionContext};
use super::{Engine, EngineError, RebookingBlock};

/// Whether `r` may ask to move its dates as of `today`.
pub fn can_rebook(r: &Reservation, today: NaiveDate, policy: &Policy) -> Result<(), RebookingBlock> {
    if r.status == Status::CheckedIn || r.arrival.is_some() {
        return Err(RebookingBlock::AlreadyCheckedIn);
    }
    if !matches!(
        r.status,
        Status::Confirmed | Status::PendingConfirmation | Status::Rebooked
    ) {
        return Err(RebookingBlock::Status(r.status));
    }
    if !r.deposit.is_verified() {
        return Err(RebookingBlock::DepositUnverified);
    }
    if r.rebooking_pending() {
        return Err(RebookingBlock::PendingRequestExists);
    }
    if (r.check_in_date - today).num_days() < policy.rebooking_lead_days {
        return Err(RebookingBlock::LeadTime);
    }
    Ok(())
}

impl Engine {
    pub async fn can_rebook(&self, id: &BookingRef) -> Result<(), EngineError> {
        let r = self.get(id).await?;
        can_rebook(&r, self.today(), self.policy()).map_err(EngineError::RebookingNotAllowed)
    }

    /// Record a request to move the stay to `new_check_in`. Dates and status
    /// stay as they are until an operator decides.
    pub async fn request_rebooking(
        &self,
        id: &BookingRef,
        new_check_in: NaiveDate,
        reason: &str,
        actor: &Actor,
    ) -> Result<Reservation, EngineError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(EngineError::invalid("a reason is required to rebook"));
        }
        if reason.len() > MAX_REASON_LEN {
            return Err(EngineError::invalid("reason too long"));
        }

        let current = self.get(id).await?;
        let today = self.today();
        can_rebook(&current, today, self.policy()).map_err(EngineError::RebookingNotAllowed)?;

        let months = self.policy().rebooking_horizon_months;
        let horizon = today
            .checked_add_months(Months::new(months))
            .ok_or_else(|| EngineError::invalid("rebooking horizon out of range"))?;
        if new_check_in <= today || new_check_in > horizon {
            return Err(EngineError::invalid(format!(
                "the new date must be after today and within {months} months"
            )));
        }
        if new_check_in == current.check_in_date {
            return Err(EngineError::invalid("the new date is the current check-in date"));
        }
        let new_check_out = config_for(current.booking_type)
            .check_out_for(new_check_in, current.duration)
            .ok_or_else(|| EngineError::invalid("new check-out date out of range"))?;

        self.ensure_free(current.booking_type, new_check_in, new_check_out, Some(id))
            .await?;

        let now = self.now();
        let mut next = current.clone();
        next.rebooking = Some(RebookingRequest {
            new_check_in,
            new_check_out,
            reason: reason.to_string(),
            requested_at: now,
            requested_by: actor.id.clone(),
            original_check_in: current.check_in_date,
            original_check_out: current.check_out_date,
            decision: None,
        });
        next.updated_at = now;
        let written = self.commit(&current, next).await?;
        info!("{} rebooking to {} requested by {}", written.id, new_check_in, actor);
        Ok(written)
    }

    /// Operator decision on a pending request. Approval re-checks the new
    /// stay under its lease and swaps the dates in the same write that logs
    /// `confirmed -> rebooked -> confirmed`.
    pub async fn decide_rebooking(
        &self,
        id: &BookingRef,
        approve: bool,
        actor: &Actor,
        note: Option<String>,
    ) -> Result<Reservation, EngineError> {
        if !actor.is_operator() {
            return Err(EngineError::invalid("only staff can decide rebooking requests"));
        }
        if note.as_ref().is_some_and(|n| n.len() > MAX_NOTE_LEN) {
            return Err(EngineError::invalid("note too long"));
        }

        let current = self.get(id).await?;
        let request = pending_request(&current)?;
        let decision = RebookingDecision {
            approved: approve,
            decided_at: self.now(),
            decided_by: actor.id.clone(),
            note: note.clone(),
        };

        if !approve {
            let mut next = current.clone();
            if let Some(req) = next.rebooking.as_mut() {
                req.decision = Some(decision);
            }
            next.updated_at = self.now();
            let written = self.commit(&current, next).await?;
            info!("{} rebooking rejected by {}", written.id, actor);
            return Ok(written);
        }

        let _lease = self
            .lease_stay(current.booking_type, request.new_check_in, request.new_check_out)
            .await?;
        let current = self.get(id).await?;
        let request = pending_request(&current)?;
        if request.new_check_in <= self.today() {
            return Err(EngineError::invalid(
                "the requested date has already passed; reject the request",
            ));
        }
        match current.status {
            Status::Confirmed | Status::PendingConfirmation | Status::Rebooked => {}
            Status::CheckedIn => {
                return Err(EngineError::RebookingNotAllowed(RebookingBlock::AlreadyCheckedIn));
            }
            other => return Err(EngineError::RebookingNotAllowed(RebookingBlock::Status(other))),
        }

        let rows = self
            .scan(current.booking_type, request.new_check_in, request.new_check_out)
            .await?;
        let now = self.now();
        let fresh = evaluate_stay(
            &rows,
            current.booking_type,
            request.new_check_in,
            request.new_check_out,
            Some(id),
            now,
            self.policy().hold_expiry,
        );
        if fresh.locked {
            return Err(EngineError::DateNoLongerAvailable {
                date: fresh.date,
                booking_type: current.booking_type,
            });
        }

        let mut next = current.clone();
        let ctx = TransitionContext::new(actor.clone());
        if next.status == Status::Confirmed {
            let moving = format!(
                "rebooking {} -> {}",
                request.original_check_in, request.new_check_in
            );
            apply_transition(&mut next, Status::Rebooked, &ctx.clone().with_note(moving), now)?;
        }
        next.check_in_date = request.new_check_in;
        next.check_out_date = request.new_check_out;
        if let Some(req) = next.rebooking.as_mut() {
            req.decision = Some(RebookingDecision { decided_at: now, ..decision });
        }
        if next.status == Status::Rebooked {
            let ctx = match note {
                Some(n) => ctx.with_note(n),
                None => ctx,
            };
            apply_transition(&mut next, Status::Confirmed, &ctx, now)?;
        }
        next.updated_at = now;

        let written = self.commit(&current, next).await?;
        info!(
            "{} rebooked to {}..{} by {}",
            written.id, written.check_in_date, written.check_out_date, actor
        );
        Ok(written)
    }
}

fn pending_request(r: &Reservation) -> Result<RebookingRequest, EngineError> {
    r.rebooking
        .clone()
        .filter(|req| req.decision.is_none())
        .ok_or_else(|| EngineError::invalid("there is no pending rebooking request"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::*;

    fn confirmed() -> Reservation {
        let mut r = reservation(BookingType::Daytime, "2025-12-04", "2025-12-04");
        r.status = Status::Confirmed;
        r.deposit.submission = Some(submission("proof"));
        r.deposit.verification = Some(verification());
        r.date_locked = true;
        r
    }

    fn today() -> NaiveDate {
        date("2025-11-01")
    }

    #[test]
    fn confirmed_with_lead_time_may_rebook() {
        assert_eq!(can_rebook(&confirmed(), today(), &Policy::default()), Ok(()));
    }

    #[test]
    fn lead_time_boundary() {
        let mut r = confirmed();
        r.check_in_date = date("2025-11-08");
        r.check_out_date = r.check_in_date;
        assert_eq!(can_rebook(&r, today(), &Policy::default()), Ok(()));

        r.check_in_date = date("2025-11-07");
        r.check_out_date = r.check_in_date;
        assert_eq!(
            can_rebook(&r, today(), &Policy::default()),
            Err(RebookingBlock::LeadTime)
        );
    }

    #[test]
    fn blocked_reasons() {
        let policy = Policy::default();

        let mut r = confirmed();
        r.status = Status::CheckedIn;
        assert_eq!(can_rebook(&r, today(), &policy), Err(RebookingBlock::AlreadyCheckedIn));

        let mut r = confirmed();
        r.deposit.verification = None;
        assert_eq!(can_rebook(&r, today(), &policy), Err(RebookingBlock::DepositUnverified));

        let mut r = confirmed();
        r.status = Status::Cancelled;
        assert_eq!(
            can_rebook(&r, today(), &policy),
            Err(RebookingBlock::Status(Status::Cancelled))
        );

        let mut r = confirmed();
        r.rebooking = Some(RebookingRequest {
            new_check_in: date("2025-12-10"),
            new_check_out: date("2025-12-10"),
            reason: "typhoon".into(),
            requested_at: at("2025-11-01T00:00:00Z"),
            requested_by: "maria".into(),
            original_check_in: date("2025-12-04"),
            original_check_out: date("2025-12-04"),
            decision: None,
        });
        assert_eq!(
            can_rebook(&r, today(), &policy),
            Err(RebookingBlock::PendingRequestExists)
        );
        assert!(pending_request(&r).is_ok());
    }

    #[test]
    fn custom_lead_time() {
        let policy = Policy {
            rebooking_lead_days: 60,
            ..Policy::default()
        };
        assert_eq!(can_rebook(&confirmed(), today(), &policy), Err(RebookingBlock::LeadTime));
    }
}
