use chrono::{DateTime, TimeDelta, Utc};
use serde::Deserialize;

use crate::limits::*;
use crate::model::*;
use crate::rules::is_legal;
use crate::store::Filter;

use super::{Engine, EngineError};

/// Who is acting and any transition-specific inputs.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TransitionContext {
    pub actor: Actor,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub bond_collected: bool,
    #[serde(default)]
    pub overtime_charge: Amount,
    #[serde(default)]
    pub damage_charge: Amount,
    #[serde(default)]
    pub bond_returned: bool,
}

impl TransitionContext {
    pub fn new(actor: Actor) -> Self {
        Self {
            actor,
            reason: None,
            note: None,
            bond_collected: false,
            overtime_charge: 0,
            damage_charge: 0,
            bond_returned: false,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn with_bond_collected(mut self, collected: bool) -> Self {
        self.bond_collected = collected;
        self
    }

    pub fn with_departure(mut self, overtime: Amount, damage: Amount, bond_returned: bool) -> Self {
        self.overtime_charge = overtime;
        self.damage_charge = damage;
        self.bond_returned = bond_returned;
        self
    }

    fn validate(&self) -> Result<(), EngineError> {
        if self.reason.as_ref().is_some_and(|r| r.len() > MAX_REASON_LEN) {
            return Err(EngineError::invalid("reason too long"));
        }
        if self.note.as_ref().is_some_and(|n| n.len() > MAX_NOTE_LEN) {
            return Err(EngineError::invalid("note too long"));
        }
        Ok(())
    }
}

/// Statuses only staff (or the system) may move a reservation into.
fn operator_only(to: Status) -> bool {
    matches!(
        to,
        Status::Confirmed
            | Status::Rebooked
            | Status::CheckedIn
            | Status::Completed
            | Status::NoShow
            | Status::Expired
    )
}

/// Transitions that make the reservation compete for its dates again.
fn acquires_date(to: Status) -> bool {
    matches!(
        to,
        Status::PendingPayment | Status::PendingConfirmation | Status::Confirmed
    )
}

fn is_stale_hold(r: &Reservation, now: DateTime<Utc>, expiry: TimeDelta) -> bool {
    r.status == Status::PendingPayment
        && !r.deposit.is_paid()
        && r
            .hold_started_at
            .checked_add_signed(expiry)
            .is_some_and(|deadline| deadline <= now)
}

/// Validate `r.status -> to` and apply its field changes in place.
/// Pure: the caller decides whether the result gets written.
pub fn apply_transition(
    r: &mut Reservation,
    to: Status,
    ctx: &TransitionContext,
    now: DateTime<Utc>,
) -> Result<TransitionRecord, EngineError> {
    let from = r.status;
    let refuse = |reason| EngineError::InvalidTransition { from, to, reason };
    if !is_legal(from, to) {
        return Err(refuse(None));
    }
    if operator_only(to) && !ctx.actor.is_operator() {
        return Err(refuse(Some("only staff can make this change")));
    }

    match to {
        Status::Cancelled if r.deposit.is_verified() && !ctx.actor.is_operator() => {
            return Err(refuse(Some("request a rebooking instead")));
        }
        Status::PendingConfirmation | Status::Confirmed if !r.deposit.is_paid() => {
            return Err(EngineError::NothingToVerify(PaymentKind::Deposit));
        }
        Status::PendingPayment if r.deposit.is_verified() => {
            return Err(refuse(Some("the deposit is already verified")));
        }
        _ => {}
    }

    match to {
        Status::Confirmed => {
            if r.deposit.verification.is_none() {
                r.deposit.verification = Some(Verification {
                    verified_at: now,
                    verified_by: ctx.actor.id.clone(),
                });
            }
            r.date_locked = true;
        }
        Status::Cancelled => {
            r.date_locked = false;
            r.cancellation_reason = ctx.reason.clone();
        }
        Status::Expired => r.date_locked = false,
        Status::PendingPayment => r.hold_started_at = now,
        Status::CheckedIn => {
            r.arrival = Some(Arrival {
                at: now,
                by: ctx.actor.id.clone(),
                bond_collected: ctx.bond_collected,
            });
        }
        Status::Completed => {
            r.departure = Some(Departure {
                at: now,
                by: ctx.actor.id.clone(),
                overtime_charge: ctx.overtime_charge,
                damage_charge: ctx.damage_charge,
                bond_returned: ctx.bond_returned,
            });
        }
        Status::PendingConfirmation | Status::NoShow | Status::Rebooked => {}
    }

    let record = TransitionRecord {
        at: now,
        actor: ctx.actor.clone(),
        from,
        to,
        note: ctx.note.clone(),
    };
    r.status = to;
    r.updated_at = now;
    r.history.push(record.clone());
    Ok(record)
}

impl Engine {
    pub async fn transition_to(
        &self,
        id: &BookingRef,
        to: Status,
        ctx: TransitionContext,
    ) -> Result<Reservation, EngineError> {
        self.transition_with(id, to, ctx, |_| Ok(())).await
    }

    /// Shared path for every status change. `prepare` sees the row as read
    /// under the stay's lease (when one is taken) and may refuse or amend it
    /// before the transition applies, so preconditions and availability are
    /// judged on the same snapshot that gets written.
    pub(super) async fn transition_with(
        &self,
        id: &BookingRef,
        to: Status,
        ctx: TransitionContext,
        prepare: impl FnOnce(&mut Reservation) -> Result<(), EngineError>,
    ) -> Result<Reservation, EngineError> {
        ctx.validate()?;
        let mut current = self.get(id).await?;

        let _lease = if acquires_date(to) {
            let lease = self
                .lease_stay(current.booking_type, current.check_in_date, current.check_out_date)
                .await?;
            current = self.get(id).await?;
            if lease.slots() != current.slots().as_slice() {
                return Err(EngineError::ConcurrentModification(id.clone()));
            }
            Some(lease)
        } else {
            None
        };

        let now = self.now();
        let mut next = current.clone();
        prepare(&mut next)?;
        apply_transition(&mut next, to, &ctx, now)?;

        if acquires_date(to) {
            self.ensure_free(
                current.booking_type,
                current.check_in_date,
                current.check_out_date,
                Some(id),
            )
            .await?;
        }
        self.commit(&current, next).await
    }

    // ── Convenience operations ───────────────────────────────

    pub async fn cancel(
        &self,
        id: &BookingRef,
        actor: Actor,
        reason: Option<String>,
    ) -> Result<Reservation, EngineError> {
        let mut ctx = TransitionContext::new(actor);
        ctx.reason = reason;
        self.transition_to(id, Status::Cancelled, ctx).await
    }

    pub async fn check_in(
        &self,
        id: &BookingRef,
        actor: Actor,
        bond_collected: bool,
    ) -> Result<Reservation, EngineError> {
        let ctx = TransitionContext::new(actor).with_bond_collected(bond_collected);
        self.transition_to(id, Status::CheckedIn, ctx).await
    }

    pub async fn check_out(
        &self,
        id: &BookingRef,
        actor: Actor,
        overtime_charge: Amount,
        damage_charge: Amount,
        bond_returned: bool,
    ) -> Result<Reservation, EngineError> {
        let ctx = TransitionContext::new(actor).with_departure(
            overtime_charge,
            damage_charge,
            bond_returned,
        );
        self.transition_to(id, Status::Completed, ctx).await
    }

    pub async fn mark_no_show(&self, id: &BookingRef, actor: Actor) -> Result<Reservation, EngineError> {
        self.transition_to(id, Status::NoShow, TransitionContext::new(actor))
            .await
    }

    /// Re-open an expired hold with a fresh expiry window.
    pub async fn restart_hold(&self, id: &BookingRef, actor: Actor) -> Result<Reservation, EngineError> {
        let ctx = TransitionContext::new(actor).with_note("hold restarted");
        self.transition_to(id, Status::PendingPayment, ctx).await
    }

    /// Unpaid holds whose expiry window has run out as of now.
    pub async fn collect_expired_holds(&self) -> Result<Vec<BookingRef>, EngineError> {
        let now = self.now();
        let expiry = self.policy().hold_expiry;
        let filter = Filter::default().with_statuses(&[Status::PendingPayment]);
        Ok(self
            .store
            .query(&filter)
            .await?
            .into_iter()
            .filter(|r| is_stale_hold(r, now, expiry))
            .map(|r| r.id)
            .collect())
    }

    /// Move one stale hold to `expired`. Re-checked on the row being written,
    /// so a deposit or restart that lands first wins.
    pub async fn expire_hold(&self, id: &BookingRef) -> Result<Reservation, EngineError> {
        let now = self.now();
        let expiry = self.policy().hold_expiry;
        let ctx = TransitionContext::new(Actor::system()).with_note("hold expired unpaid");
        self.transition_with(id, Status::Expired, ctx, |r| {
            if is_stale_hold(r, now, expiry) {
                Ok(())
            } else {
                Err(EngineError::invalid("hold is not stale"))
            }
        })
        .await
    }

    /// Append to the operator notes log. No status change, no event.
    pub async fn add_admin_note(
        &self,
        id: &BookingRef,
        actor: &Actor,
        note: &str,
    ) -> Result<Reservation, EngineError> {
        if !actor.is_operator() {
            return Err(EngineError::invalid("only staff can add admin notes"));
        }
        let note = note.trim();
        if note.is_empty() {
            return Err(EngineError::invalid("note is empty"));
        }
        if note.len() > MAX_NOTE_LEN {
            return Err(EngineError::invalid("note too long"));
        }
        let current = self.get(id).await?;
        let now = self.now();
        let mut next = current.clone();
        next.append_admin_note(now, actor, note);
        if next.admin_notes.len() > MAX_ADMIN_NOTES_LEN {
            return Err(EngineError::invalid("admin notes are full"));
        }
        next.updated_at = now;
        self.commit(&current, next).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::*;
    use crate::rules::TRANSITIONS;

    fn now() -> DateTime<Utc> {
        at("2025-11-02T08:00:00Z")
    }

    /// A row that satisfies the preconditions for entering `to`.
    fn ready_for(from: Status) -> Reservation {
        let mut r = reservation(BookingType::Daytime, "2025-12-04", "2025-12-04");
        r.status = from;
        if !matches!(from, Status::PendingPayment | Status::Expired) {
            r.deposit.submission = Some(submission("proof"));
        }
        r
    }

    #[test]
    fn closure_over_all_status_pairs() {
        let ctx = TransitionContext::new(Actor::admin("ana"));
        for from in Status::ALL {
            for to in Status::ALL {
                let mut r = ready_for(from);
                if from == Status::PendingPayment && to == Status::PendingConfirmation {
                    r.deposit.submission = Some(submission("proof"));
                }
                let before = r.clone();
                let result = apply_transition(&mut r, to, &ctx, now());
                if TRANSITIONS.contains(&(from, to)) {
                    let record = result.unwrap_or_else(|e| panic!("{from} -> {to}: {e}"));
                    assert_eq!((record.from, record.to), (from, to));
                    assert_eq!(r.status, to);
                    assert_eq!(r.history.len(), 1);
                } else {
                    assert!(
                        matches!(result, Err(EngineError::InvalidTransition { reason: None, .. })),
                        "{from} -> {to} should be refused"
                    );
                    assert_eq!(r, before);
                }
            }
        }
    }

    #[test]
    fn confirming_verifies_deposit_and_locks_date() {
        let mut r = ready_for(Status::PendingConfirmation);
        let ctx = TransitionContext::new(Actor::admin("ana"));
        apply_transition(&mut r, Status::Confirmed, &ctx, now()).unwrap();
        assert!(r.date_locked);
        let v = r.deposit.verification.as_ref().unwrap();
        assert_eq!(v.verified_by, "ana");
        assert_eq!(v.verified_at, now());
        assert!(r.holds_date());
    }

    #[test]
    fn confirming_without_submission_is_refused() {
        let mut r = ready_for(Status::PendingConfirmation);
        r.deposit.submission = None;
        let ctx = TransitionContext::new(Actor::admin("ana"));
        assert!(matches!(
            apply_transition(&mut r, Status::Confirmed, &ctx, now()),
            Err(EngineError::NothingToVerify(PaymentKind::Deposit))
        ));
        assert_eq!(r.status, Status::PendingConfirmation);
    }

    #[test]
    fn guest_cannot_cancel_after_verification() {
        let mut r = ready_for(Status::PendingConfirmation);
        let admin = TransitionContext::new(Actor::admin("ana"));
        apply_transition(&mut r, Status::Confirmed, &admin, now()).unwrap();

        let guest = TransitionContext::new(Actor::guest("maria")).with_reason("changed plans");
        let err = apply_transition(&mut r, Status::Cancelled, &guest, now()).unwrap_err();
        assert!(matches!(
            err,
            EngineError::InvalidTransition { reason: Some(_), .. }
        ));
        assert!(r.date_locked);

        let admin = TransitionContext::new(Actor::admin("ana")).with_reason("guest called");
        apply_transition(&mut r, Status::Cancelled, &admin, now()).unwrap();
        assert!(!r.date_locked);
        assert_eq!(r.cancellation_reason.as_deref(), Some("guest called"));
    }

    #[test]
    fn guests_cannot_drive_operator_transitions() {
        let guest = TransitionContext::new(Actor::guest("maria"));
        for (from, to) in [
            (Status::PendingConfirmation, Status::Confirmed),
            (Status::Confirmed, Status::Rebooked),
            (Status::Confirmed, Status::CheckedIn),
            (Status::Confirmed, Status::NoShow),
            (Status::CheckedIn, Status::Completed),
            (Status::PendingPayment, Status::Expired),
        ] {
            let mut r = ready_for(from);
            let before = r.clone();
            let err = apply_transition(&mut r, to, &guest, now()).unwrap_err();
            assert!(
                matches!(err, EngineError::InvalidTransition { reason: Some(_), .. }),
                "{from} -> {to} should need staff"
            );
            assert_eq!(r, before);
        }
    }

    #[test]
    fn guest_can_cancel_unverified_hold() {
        let mut r = ready_for(Status::PendingConfirmation);
        let guest = TransitionContext::new(Actor::guest("maria"));
        apply_transition(&mut r, Status::Cancelled, &guest, now()).unwrap();
        assert_eq!(r.status, Status::Cancelled);
    }

    #[test]
    fn check_in_and_out_record_details() {
        let mut r = ready_for(Status::Confirmed);
        let staff = TransitionContext::new(Actor::staff("jun")).with_bond_collected(true);
        apply_transition(&mut r, Status::CheckedIn, &staff, now()).unwrap();
        let arrival = r.arrival.clone().unwrap();
        assert!(arrival.bond_collected);
        assert_eq!(arrival.by, "jun");

        let out = TransitionContext::new(Actor::staff("jun")).with_departure(500, 0, true);
        apply_transition(&mut r, Status::Completed, &out, now()).unwrap();
        let departure = r.departure.unwrap();
        assert_eq!(departure.overtime_charge, 500);
        assert!(departure.bond_returned);
        assert!(r.status.is_terminal());
    }

    #[test]
    fn restart_resets_hold_clock() {
        let mut r = ready_for(Status::PendingPayment);
        let system = TransitionContext::new(Actor::system());
        apply_transition(&mut r, Status::Expired, &system, now()).unwrap();
        assert!(!r.date_locked);

        let later = now() + chrono::TimeDelta::hours(30);
        let guest = TransitionContext::new(Actor::guest("maria"));
        apply_transition(&mut r, Status::PendingPayment, &guest, later).unwrap();
        assert_eq!(r.hold_started_at, later);
        assert_eq!(r.history.len(), 2);
    }

    #[test]
    fn history_records_actor_and_note() {
        let mut r = ready_for(Status::Confirmed);
        let ctx = TransitionContext::new(Actor::staff("jun")).with_note("never arrived");
        apply_transition(&mut r, Status::NoShow, &ctx, now()).unwrap();
        let rec = r.history.last().unwrap();
        assert_eq!(rec.actor, Actor::staff("jun"));
        assert_eq!(rec.note.as_deref(), Some("never arrived"));
        assert_eq!(rec.at, now());
    }
}
