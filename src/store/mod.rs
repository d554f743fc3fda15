mod log;

pub use log::LogStore;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use tokio::sync::OwnedMutexGuard;

use crate::model::*;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("reservation not found: {0}")]
    NotFound(BookingRef),
    #[error("reservation already exists: {0}")]
    AlreadyExists(BookingRef),
    #[error("stale write on {id}: expected version {expected}, found {found}")]
    VersionConflict {
        id: BookingRef,
        expected: u64,
        found: u64,
    },
    /// Uniqueness backstop: another row already holds this slot.
    #[error("slot {slot} is already held by {holder}")]
    SlotTaken { slot: SlotKey, holder: BookingRef },
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Row filter for scans. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Filter {
    pub booking_type: Option<BookingType>,
    pub statuses: Option<Vec<Status>>,
    /// Inclusive `[from, to]` range the stay must touch.
    pub touching: Option<(NaiveDate, NaiveDate)>,
    pub guest_email: Option<String>,
}

impl Filter {
    pub fn for_type(booking_type: BookingType) -> Self {
        Self {
            booking_type: Some(booking_type),
            ..Self::default()
        }
    }

    pub fn with_statuses(mut self, statuses: &[Status]) -> Self {
        self.statuses = Some(statuses.to_vec());
        self
    }

    pub fn touching(mut self, from: NaiveDate, to: NaiveDate) -> Self {
        self.touching = Some((from, to));
        self
    }

    pub fn matches(&self, r: &Reservation) -> bool {
        if self.booking_type.is_some_and(|t| t != r.booking_type) {
            return false;
        }
        if let Some(statuses) = &self.statuses
            && !statuses.contains(&r.status) {
                return false;
            }
        if let Some((from, to)) = self.touching
            && (r.check_out_date < from || r.check_in_date > to) {
                return false;
            }
        if let Some(email) = &self.guest_email
            && !r.guest.email.eq_ignore_ascii_case(email) {
                return false;
            }
        true
    }
}

/// Exclusive hold over a set of slots. Released on drop.
pub struct SlotLease {
    slots: Vec<SlotKey>,
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl SlotLease {
    pub fn new(slots: Vec<SlotKey>, guards: Vec<OwnedMutexGuard<()>>) -> Self {
        Self {
            slots,
            _guards: guards,
        }
    }

    pub fn slots(&self) -> &[SlotKey] {
        &self.slots
    }
}

/// The engine's only shared mutable state.
///
/// Implementations must make `update` a compare-and-swap on `version`, must
/// reject any write that would leave two rows holding the same slot, and must
/// serialize holders of overlapping leases.
#[async_trait]
pub trait ReservationStore: Send + Sync {
    async fn get(&self, id: &BookingRef) -> Result<Option<Reservation>, StoreError>;

    /// Insert a new row at version 1.
    async fn create(&self, reservation: Reservation) -> Result<Reservation, StoreError>;

    /// Replace the row if its stored version still equals `expected_version`.
    /// Returns the row as written, with its version bumped.
    async fn update(
        &self,
        next: Reservation,
        expected_version: u64,
    ) -> Result<Reservation, StoreError>;

    async fn query(&self, filter: &Filter) -> Result<Vec<Reservation>, StoreError>;

    /// Acquire every slot in `slots`, waiting for current holders.
    async fn lease(&self, slots: Vec<SlotKey>) -> Result<SlotLease, StoreError>;
}
