use chrono::NaiveDate;
use serde::Serialize;

use crate::model::{BookingRef, BookingType, PaymentKind, Status};
use crate::store::StoreError;

/// Why a rebooking request is refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RebookingBlock {
    LeadTime,
    AlreadyCheckedIn,
    PendingRequestExists,
    DepositUnverified,
    /// Terminal or otherwise non-rebookable status.
    Status(Status),
}

impl std::fmt::Display for RebookingBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RebookingBlock::LeadTime => {
                f.write_str("it is too close to the check-in date to rebook")
            }
            RebookingBlock::AlreadyCheckedIn => f.write_str("the guest has already checked in"),
            RebookingBlock::PendingRequestExists => {
                f.write_str("a rebooking request is already awaiting a decision")
            }
            RebookingBlock::DepositUnverified => {
                f.write_str("the deposit must be verified before rebooking")
            }
            RebookingBlock::Status(s) => write!(f, "a {s} reservation cannot be rebooked"),
        }
    }
}

/// Expected business failures, each with a stable `kind()` code and a
/// display message meant for the person who made the request.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("unknown booking type: {0}")]
    UnknownBookingType(String),
    #[error("cannot move reservation from {from} to {to}{}", .reason.map(|r| format!(": {r}")).unwrap_or_default())]
    InvalidTransition {
        from: Status,
        to: Status,
        reason: Option<&'static str>,
    },
    #[error("{date} is already booked and confirmed for {booking_type}")]
    DateUnavailable {
        date: NaiveDate,
        booking_type: BookingType,
        holder: BookingRef,
    },
    #[error("{date} was taken for {booking_type} after the rebooking was requested; reject the request")]
    DateNoLongerAvailable {
        date: NaiveDate,
        booking_type: BookingType,
    },
    #[error("the {0} has already been recorded")]
    AlreadyRecorded(PaymentKind),
    #[error("no {0} has been submitted yet")]
    NothingToVerify(PaymentKind),
    #[error("rebooking not allowed: {0}")]
    RebookingNotAllowed(RebookingBlock),
    #[error("reservation {0} was changed by someone else; reload and try again")]
    ConcurrentModification(BookingRef),
    #[error("reservation {0} not found")]
    NotFound(BookingRef),
    #[error("{0}")]
    InvalidRequest(String),
    /// The only fatal kind: the store itself failed.
    #[error("reservation store failure: {0}")]
    Store(StoreError),
}

impl EngineError {
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::UnknownBookingType(_) => "unknown_booking_type",
            EngineError::InvalidTransition { .. } => "invalid_transition",
            EngineError::DateUnavailable { .. } => "date_unavailable",
            EngineError::DateNoLongerAvailable { .. } => "date_no_longer_available",
            EngineError::AlreadyRecorded(_) => "already_recorded",
            EngineError::NothingToVerify(_) => "nothing_to_verify",
            EngineError::RebookingNotAllowed(_) => "rebooking_not_allowed",
            EngineError::ConcurrentModification(_) => "concurrent_modification",
            EngineError::NotFound(_) => "not_found",
            EngineError::InvalidRequest(_) => "invalid_request",
            EngineError::Store(_) => "store_failure",
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::Store(_))
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        EngineError::InvalidRequest(msg.into())
    }
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => EngineError::NotFound(id),
            StoreError::VersionConflict { id, .. } | StoreError::AlreadyExists(id) => {
                EngineError::ConcurrentModification(id)
            }
            StoreError::SlotTaken { slot, holder } => EngineError::DateUnavailable {
                date: slot.date,
                booking_type: slot.booking_type,
                holder,
            },
            other @ StoreError::Unavailable(_) => EngineError::Store(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::date;
    use crate::model::SlotKey;

    #[test]
    fn messages_are_human_readable() {
        let e = EngineError::InvalidTransition {
            from: Status::Confirmed,
            to: Status::Cancelled,
            reason: Some("request a rebooking instead"),
        };
        assert_eq!(
            e.to_string(),
            "cannot move reservation from confirmed to cancelled: request a rebooking instead"
        );
        assert_eq!(e.kind(), "invalid_transition");

        let plain = EngineError::InvalidTransition {
            from: Status::Completed,
            to: Status::Confirmed,
            reason: None,
        };
        assert_eq!(plain.to_string(), "cannot move reservation from completed to confirmed");

        let e = EngineError::RebookingNotAllowed(RebookingBlock::LeadTime);
        assert!(e.to_string().contains("too close to the check-in date"));
    }

    #[test]
    fn store_errors_map_to_business_kinds() {
        let holder = BookingRef::from("BK-20251101-AAAAAA");
        let e: EngineError = StoreError::SlotTaken {
            slot: SlotKey {
                booking_type: BookingType::Daytime,
                date: date("2025-12-04"),
            },
            holder: holder.clone(),
        }
        .into();
        assert!(matches!(&e, EngineError::DateUnavailable { holder: h, .. } if *h == holder));
        assert_eq!(
            e.to_string(),
            "2025-12-04 is already booked and confirmed for daytime"
        );

        let e: EngineError = StoreError::VersionConflict {
            id: holder.clone(),
            expected: 1,
            found: 2,
        }
        .into();
        assert_eq!(e.kind(), "concurrent_modification");

        let e: EngineError = StoreError::Unavailable("disk full".into()).into();
        assert!(e.is_fatal());
    }
}
