mod availability;
mod booking;
mod error;
mod lifecycle;
mod payments;
mod rebooking;

pub use availability::{evaluate, evaluate_stay, is_live_hold, lock_holder, Availability, SCAN_STATUSES};
pub use booking::{BookingOutcome, BookingRequest};
pub use error::{EngineError, RebookingBlock};
pub use lifecycle::{apply_transition, TransitionContext};
pub use rebooking::can_rebook;

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use tracing::info;

use crate::clock::Clock;
use crate::limits::MAX_LIST_RESULTS;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::observability;
use crate::rules::Policy;
use crate::store::{Filter, ReservationStore, SlotLease};

/// Reservation lifecycle engine. Holds no reservation state of its own:
/// every read goes to the store and every write is one compare-and-swap.
pub struct Engine {
    store: Arc<dyn ReservationStore>,
    clock: Arc<dyn Clock>,
    pub notify: Arc<NotifyHub>,
    policy: Policy,
}

impl Engine {
    pub fn new(
        store: Arc<dyn ReservationStore>,
        clock: Arc<dyn Clock>,
        notify: Arc<NotifyHub>,
        policy: Policy,
    ) -> Self {
        Self {
            store,
            clock,
            notify,
            policy,
        }
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    pub async fn get(&self, id: &BookingRef) -> Result<Reservation, EngineError> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| EngineError::NotFound(id.clone()))
    }

    /// Rows matching `filter`, oldest first, capped at `MAX_LIST_RESULTS`.
    pub async fn list(&self, filter: &Filter) -> Result<Vec<Reservation>, EngineError> {
        let mut rows = self.store.query(filter).await?;
        rows.truncate(MAX_LIST_RESULTS);
        Ok(rows)
    }

    pub async fn history(&self, id: &BookingRef) -> Result<Vec<TransitionRecord>, EngineError> {
        Ok(self.get(id).await?.history)
    }

    // ── Availability ─────────────────────────────────────────

    /// Same-type rows that could lock or contend for any day in `[from, to]`.
    pub(super) async fn scan(
        &self,
        booking_type: BookingType,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Reservation>, EngineError> {
        let filter = Filter::for_type(booking_type)
            .with_statuses(&SCAN_STATUSES)
            .touching(from, to);
        Ok(self.store.query(&filter).await?)
    }

    pub async fn check_availability(
        &self,
        date: NaiveDate,
        booking_type: BookingType,
        exclude: Option<&BookingRef>,
    ) -> Result<Availability, EngineError> {
        let rows = self.scan(booking_type, date, date).await?;
        let a = evaluate(&rows, date, booking_type, exclude, self.now(), self.policy.hold_expiry);
        record_check(&a);
        Ok(a)
    }

    /// Evaluate every day of a prospective stay.
    pub async fn check_range(
        &self,
        booking_type: BookingType,
        check_in: NaiveDate,
        check_out: NaiveDate,
        exclude: Option<&BookingRef>,
    ) -> Result<Availability, EngineError> {
        if check_out < check_in {
            return Err(EngineError::invalid("check-out date is before check-in date"));
        }
        let rows = self.scan(booking_type, check_in, check_out).await?;
        let a = evaluate_stay(
            &rows,
            booking_type,
            check_in,
            check_out,
            exclude,
            self.now(),
            self.policy.hold_expiry,
        );
        record_check(&a);
        Ok(a)
    }

    /// `check_range`, failing with `DateUnavailable` on the first locked day.
    /// Callers hold the stay's lease so the answer stays true until they write.
    pub(super) async fn ensure_free(
        &self,
        booking_type: BookingType,
        check_in: NaiveDate,
        check_out: NaiveDate,
        exclude: Option<&BookingRef>,
    ) -> Result<Availability, EngineError> {
        let a = self.check_range(booking_type, check_in, check_out, exclude).await?;
        match a.holder {
            Some(holder) if a.locked => Err(EngineError::DateUnavailable {
                date: a.date,
                booking_type,
                holder,
            }),
            _ => Ok(a),
        }
    }

    pub(super) async fn lease_stay(
        &self,
        booking_type: BookingType,
        check_in: NaiveDate,
        check_out: NaiveDate,
    ) -> Result<SlotLease, EngineError> {
        Ok(self
            .store
            .lease(stay_slots(booking_type, check_in, check_out))
            .await?)
    }

    // ── Commit ───────────────────────────────────────────────

    /// Write `next` over `prev` and announce every transition record it added.
    pub(super) async fn commit(
        &self,
        prev: &Reservation,
        next: Reservation,
    ) -> Result<Reservation, EngineError> {
        let added = next.history.get(prev.history.len()..).unwrap_or_default().to_vec();
        let written = self.store.update(next, prev.version).await?;
        for record in &added {
            self.announce(&written, record);
        }
        Ok(written)
    }

    fn announce(&self, r: &Reservation, record: &TransitionRecord) {
        metrics::counter!(
            observability::TRANSITIONS_TOTAL,
            "from" => record.from.as_str(),
            "to" => record.to.as_str()
        )
        .increment(1);
        info!(
            "{} {} -> {} by {}",
            r.id, record.from, record.to, record.actor
        );
        self.notify.send(&TransitionEvent {
            reservation_id: r.id.clone(),
            booking_type: r.booking_type,
            from: record.from,
            to: record.to,
            actor: record.actor.clone(),
            at: record.at,
        });
    }
}

fn record_check(a: &Availability) {
    let result = match (a.locked, a.pending_count) {
        (true, _) => "locked",
        (false, 0) => "free",
        (false, _) => "contested",
    };
    metrics::counter!(observability::AVAILABILITY_CHECKS_TOTAL, "result" => result).increment(1);
}
