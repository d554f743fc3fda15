use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::engine::EngineError;

/// Money in whole currency units.
pub type Amount = u64;

// ── Identity ─────────────────────────────────────────────────────

/// Human-readable reservation identity, e.g. `BK-20251204-7Q3XK9`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BookingRef(String);

impl BookingRef {
    pub const PREFIX: &'static str = "BK";

    /// Prefix, creation date, and the last six characters of a fresh ULID
    /// (which come from its random component).
    pub fn generate(created_on: NaiveDate) -> Self {
        let ulid = Ulid::new().to_string();
        let suffix = &ulid[ulid.len() - 6..];
        Self(format!(
            "{}-{}-{}",
            Self::PREFIX,
            created_on.format("%Y%m%d"),
            suffix
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BookingRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BookingRef {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for BookingRef {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// ── Vocabularies ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BookingType {
    #[serde(rename = "daytime")]
    Daytime,
    #[serde(rename = "nighttime")]
    Nighttime,
    #[serde(rename = "22hours")]
    TwentyTwoHours,
    #[serde(rename = "venue-daytime")]
    VenueDaytime,
    #[serde(rename = "venue-nighttime")]
    VenueNighttime,
    #[serde(rename = "venue-22hours")]
    VenueTwentyTwoHours,
}

impl BookingType {
    pub const ALL: [BookingType; 6] = [
        BookingType::Daytime,
        BookingType::Nighttime,
        BookingType::TwentyTwoHours,
        BookingType::VenueDaytime,
        BookingType::VenueNighttime,
        BookingType::VenueTwentyTwoHours,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            BookingType::Daytime => "daytime",
            BookingType::Nighttime => "nighttime",
            BookingType::TwentyTwoHours => "22hours",
            BookingType::VenueDaytime => "venue-daytime",
            BookingType::VenueNighttime => "venue-nighttime",
            BookingType::VenueTwentyTwoHours => "venue-22hours",
        }
    }

    pub fn is_venue(self) -> bool {
        matches!(
            self,
            BookingType::VenueDaytime | BookingType::VenueNighttime | BookingType::VenueTwentyTwoHours
        )
    }
}

impl fmt::Display for BookingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingType {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BookingType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| EngineError::UnknownBookingType(s.to_string()))
    }
}

/// Reservation status. Terminal: `Completed`, `Cancelled`, `NoShow`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    PendingPayment,
    PendingConfirmation,
    Confirmed,
    CheckedIn,
    Completed,
    Cancelled,
    NoShow,
    Expired,
    Rebooked,
}

impl Status {
    pub const ALL: [Status; 9] = [
        Status::PendingPayment,
        Status::PendingConfirmation,
        Status::Confirmed,
        Status::CheckedIn,
        Status::Completed,
        Status::Cancelled,
        Status::NoShow,
        Status::Expired,
        Status::Rebooked,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Status::PendingPayment => "pending_payment",
            Status::PendingConfirmation => "pending_confirmation",
            Status::Confirmed => "confirmed",
            Status::CheckedIn => "checked_in",
            Status::Completed => "completed",
            Status::Cancelled => "cancelled",
            Status::NoShow => "no_show",
            Status::Expired => "expired",
            Status::Rebooked => "rebooked",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Completed | Status::Cancelled | Status::NoShow)
    }

    /// Statuses under which a verified or locked reservation blocks its dates.
    pub fn can_hold_date(self) -> bool {
        matches!(
            self,
            Status::PendingConfirmation | Status::Confirmed | Status::CheckedIn | Status::Rebooked
        )
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Status::ALL
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| EngineError::InvalidRequest(format!("unknown status: {s}")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Guest,
    Admin,
    Staff,
    System,
}

/// Who performed a mutation. Used only for audit attribution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    pub role: Role,
}

impl Actor {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self { id: id.into(), role }
    }

    pub fn guest(id: impl Into<String>) -> Self {
        Self::new(id, Role::Guest)
    }

    pub fn admin(id: impl Into<String>) -> Self {
        Self::new(id, Role::Admin)
    }

    pub fn staff(id: impl Into<String>) -> Self {
        Self::new(id, Role::Staff)
    }

    pub fn system() -> Self {
        Self::new("system", Role::System)
    }

    pub fn is_operator(&self) -> bool {
        matches!(self.role, Role::Admin | Role::Staff | Role::System)
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let role = match self.role {
            Role::Guest => "guest",
            Role::Admin => "admin",
            Role::Staff => "staff",
            Role::System => "system",
        };
        write!(f, "{}:{}", role, self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentKind {
    Deposit,
    Full,
}

impl fmt::Display for PaymentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PaymentKind::Deposit => "deposit",
            PaymentKind::Full => "full payment",
        })
    }
}

// ── Reservation parts ────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestInfo {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub party_size: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentSubmission {
    /// Opaque reference into the payment-proof store, kept verbatim.
    pub proof_ref: String,
    pub submitted_at: DateTime<Utc>,
    pub submitted_by: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verification {
    pub verified_at: DateTime<Utc>,
    pub verified_by: String,
}

/// Paid = submission present; verified = verification present.
/// Verification is only ever written next to an existing submission.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub submission: Option<PaymentSubmission>,
    pub verification: Option<Verification>,
}

impl PaymentRecord {
    pub fn is_paid(&self) -> bool {
        self.submission.is_some()
    }

    pub fn is_verified(&self) -> bool {
        self.verification.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebookingDecision {
    pub approved: bool,
    pub decided_at: DateTime<Utc>,
    pub decided_by: String,
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebookingRequest {
    pub new_check_in: NaiveDate,
    pub new_check_out: NaiveDate,
    pub reason: String,
    pub requested_at: DateTime<Utc>,
    pub requested_by: String,
    pub original_check_in: NaiveDate,
    pub original_check_out: NaiveDate,
    /// `None` while pending.
    pub decision: Option<RebookingDecision>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Arrival {
    pub at: DateTime<Utc>,
    pub by: String,
    pub bond_collected: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Departure {
    pub at: DateTime<Utc>,
    pub by: String,
    pub overtime_charge: Amount,
    pub damage_charge: Amount,
    pub bond_returned: bool,
}

/// One audit entry per status change. Never rewritten.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub at: DateTime<Utc>,
    pub actor: Actor,
    pub from: Status,
    pub to: Status,
    pub note: Option<String>,
}

/// One bookable unit: a calendar date for one booking type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SlotKey {
    pub booking_type: BookingType,
    pub date: NaiveDate,
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.booking_type, self.date)
    }
}

/// Every calendar day in the inclusive range `[check_in, check_out]`.
/// A same-day stay yields exactly one date.
pub fn stay_dates(check_in: NaiveDate, check_out: NaiveDate) -> impl Iterator<Item = NaiveDate> {
    check_in.iter_days().take_while(move |d| *d <= check_out)
}

/// Slots for a stay, sorted by date.
pub fn stay_slots(booking_type: BookingType, check_in: NaiveDate, check_out: NaiveDate) -> Vec<SlotKey> {
    stay_dates(check_in, check_out)
        .map(|date| SlotKey { booking_type, date })
        .collect()
}

// ── Reservation ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: BookingRef,
    /// Bumped by the store on every write; used for compare-and-swap.
    pub version: u64,
    pub guest: GuestInfo,
    pub booking_type: BookingType,
    pub check_in_date: NaiveDate,
    pub check_out_date: NaiveDate,
    pub duration: u32,
    pub status: Status,
    pub total_amount: Amount,
    pub deposit_amount: Amount,
    pub remaining_balance: Amount,
    pub deposit: PaymentRecord,
    pub full_payment: PaymentRecord,
    pub date_locked: bool,
    pub rebooking: Option<RebookingRequest>,
    pub cancellation_reason: Option<String>,
    pub admin_notes: String,
    pub arrival: Option<Arrival>,
    pub departure: Option<Departure>,
    /// Start of the current unpaid hold; the expiry window counts from here.
    pub hold_started_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub history: Vec<TransitionRecord>,
}

impl Reservation {
    pub fn stay_dates(&self) -> impl Iterator<Item = NaiveDate> {
        stay_dates(self.check_in_date, self.check_out_date)
    }

    pub fn slots(&self) -> Vec<SlotKey> {
        stay_slots(self.booking_type, self.check_in_date, self.check_out_date)
    }

    /// Day-by-day containment check over the inclusive stay.
    pub fn covers(&self, date: NaiveDate) -> bool {
        self.stay_dates().any(|d| d == date)
    }

    /// True when this reservation excludes every other one from its slots.
    pub fn holds_date(&self) -> bool {
        self.status.can_hold_date() && (self.deposit.is_verified() || self.date_locked)
    }

    pub fn rebooking_requested(&self) -> bool {
        self.rebooking.is_some()
    }

    /// `None` = pending (or never requested), `Some(true)` approved, `Some(false)` rejected.
    pub fn rebooking_approved(&self) -> Option<bool> {
        self.rebooking
            .as_ref()
            .and_then(|r| r.decision.as_ref())
            .map(|d| d.approved)
    }

    pub fn rebooking_pending(&self) -> bool {
        self.rebooking.as_ref().is_some_and(|r| r.decision.is_none())
    }

    pub fn append_admin_note(&mut self, at: DateTime<Utc>, actor: &Actor, note: &str) {
        if !self.admin_notes.is_empty() {
            self.admin_notes.push('\n');
        }
        self.admin_notes
            .push_str(&format!("[{}] {}: {}", at.format("%Y-%m-%d %H:%M"), actor, note));
    }
}

// ── Events ───────────────────────────────────────────────────────

/// WAL record format. Each record carries the full row after the write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    Created(Reservation),
    Updated(Reservation),
}

impl Event {
    pub fn reservation(&self) -> &Reservation {
        match self {
            Event::Created(r) | Event::Updated(r) => r,
        }
    }
}

/// Published after every committed status change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionEvent {
    pub reservation_id: BookingRef,
    pub booking_type: BookingType,
    pub from: Status,
    pub to: Status,
    pub actor: Actor,
    pub at: DateTime<Utc>,
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    pub fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    pub fn guest() -> GuestInfo {
        GuestInfo {
            name: "Maria Santos".into(),
            email: "maria@example.com".into(),
            phone: Some("+63 917 000 0000".into()),
            party_size: 6,
        }
    }

    /// A bare `pending_payment` row for pure-function tests.
    pub fn reservation(booking_type: BookingType, check_in: &str, check_out: &str) -> Reservation {
        let now = at("2025-11-01T09:00:00Z");
        Reservation {
            id: BookingRef::generate(now.date_naive()),
            version: 1,
            guest: guest(),
            booking_type,
            check_in_date: date(check_in),
            check_out_date: date(check_out),
            duration: 1,
            status: Status::PendingPayment,
            total_amount: 6_000,
            deposit_amount: 3_000,
            remaining_balance: 3_000,
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
        }
    }

    pub fn submission(proof: &str) -> PaymentSubmission {
        PaymentSubmission {
            proof_ref: proof.into(),
            submitted_at: at("2025-11-01T10:00:00Z"),
            submitted_by: "maria".into(),
        }
    }

    pub fn verification() -> Verification {
        Verification {
            verified_at: at("2025-11-01T11:00:00Z"),
            verified_by: "admin".into(),
        }
    }
}
