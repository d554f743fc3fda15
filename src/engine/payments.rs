use tracing::info;

use crate::limits::MAX_PROOF_REF_LEN;
use crate::model::*;

use super::lifecycle::TransitionContext;
use super::{Engine, EngineError};

fn record_for(r: &mut Reservation, kind: PaymentKind) -> &mut PaymentRecord {
    match kind {
        PaymentKind::Deposit => &mut r.deposit,
        PaymentKind::Full => &mut r.full_payment,
    }
}

fn accepts_full_payment(status: Status) -> bool {
    matches!(
        status,
        Status::PendingConfirmation | Status::Confirmed | Status::CheckedIn
    )
}

fn require_operator(actor: &Actor) -> Result<(), EngineError> {
    if actor.is_operator() {
        Ok(())
    } else {
        Err(EngineError::invalid("only staff can verify payments"))
    }
}

impl Engine {
    /// Attach payment proof. A deposit moves the hold to
    /// `pending_confirmation`; a full payment changes no status.
    pub async fn record_payment(
        &self,
        id: &BookingRef,
        kind: PaymentKind,
        proof_ref: &str,
        actor: &Actor,
    ) -> Result<Reservation, EngineError> {
        if proof_ref.trim().is_empty() {
            return Err(EngineError::invalid("payment proof reference is empty"));
        }
        if proof_ref.len() > MAX_PROOF_REF_LEN {
            return Err(EngineError::invalid("payment proof reference too long"));
        }

        let submission = |now| PaymentSubmission {
            proof_ref: proof_ref.to_string(),
            submitted_at: now,
            submitted_by: actor.id.clone(),
        };

        match kind {
            PaymentKind::Deposit => {
                let now = self.now();
                let ctx = TransitionContext::new(actor.clone()).with_note("deposit proof submitted");
                let written = self
                    .transition_with(id, Status::PendingConfirmation, ctx, |r| {
                        if r.deposit.is_paid() {
                            return Err(EngineError::AlreadyRecorded(PaymentKind::Deposit));
                        }
                        r.deposit.submission = Some(submission(now));
                        Ok(())
                    })
                    .await?;
                info!("{} deposit proof recorded by {}", written.id, actor);
                Ok(written)
            }
            PaymentKind::Full => {
                let current = self.get(id).await?;
                if current.full_payment.is_paid() {
                    return Err(EngineError::AlreadyRecorded(PaymentKind::Full));
                }
                if !accepts_full_payment(current.status) {
                    return Err(EngineError::invalid(format!(
                        "full payment cannot be recorded for a {} reservation",
                        current.status
                    )));
                }
                let now = self.now();
                let mut next = current.clone();
                next.full_payment.submission = Some(submission(now));
                next.updated_at = now;
                let written = self.commit(&current, next).await?;
                info!("{} full payment proof recorded by {}", written.id, actor);
                Ok(written)
            }
        }
    }

    /// Operator confirmation of a submitted payment. Verifying a deposit
    /// confirms the reservation and locks its dates.
    pub async fn verify_payment(
        &self,
        id: &BookingRef,
        kind: PaymentKind,
        actor: &Actor,
    ) -> Result<Reservation, EngineError> {
        require_operator(actor)?;
        let check = move |r: &Reservation| {
            let record = match kind {
                PaymentKind::Deposit => &r.deposit,
                PaymentKind::Full => &r.full_payment,
            };
            if !record.is_paid() {
                return Err(EngineError::NothingToVerify(kind));
            }
            if record.is_verified() {
                return Err(EngineError::AlreadyRecorded(kind));
            }
            Ok(())
        };

        match kind {
            PaymentKind::Deposit => {
                let ctx = TransitionContext::new(actor.clone()).with_note("deposit verified");
                self.transition_with(id, Status::Confirmed, ctx, |r| check(&*r)).await
            }
            PaymentKind::Full => {
                let current = self.get(id).await?;
                check(&current)?;
                if !accepts_full_payment(current.status) {
                    return Err(EngineError::invalid(format!(
                        "full payment cannot be verified for a {} reservation",
                        current.status
                    )));
                }
                let now = self.now();
                let mut next = current.clone();
                record_for(&mut next, kind).verification = Some(Verification {
                    verified_at: now,
                    verified_by: actor.id.clone(),
                });
                next.remaining_balance = 0;
                next.updated_at = now;
                let written = self.commit(&current, next).await?;
                info!("{} paid in full, verified by {}", written.id, actor);
                Ok(written)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::reservation;

    #[test]
    fn record_for_picks_the_right_slot() {
        let mut r = reservation(BookingType::Daytime, "2025-12-04", "2025-12-04");
        record_for(&mut r, PaymentKind::Full).submission = Some(crate::model::fixtures::submission("x"));
        assert!(r.full_payment.is_paid());
        assert!(!r.deposit.is_paid());
    }

    #[test]
    fn guests_cannot_verify() {
        assert!(require_operator(&Actor::guest("maria")).is_err());
        assert!(require_operator(&Actor::staff("jun")).is_ok());
    }
}
