//! Input bounds. Anything longer is rejected before it reaches the store.

pub const MAX_GUEST_FIELD_LEN: usize = 200;
pub const MAX_PARTY_SIZE: u32 = 500;
pub const MAX_PROOF_REF_LEN: usize = 1024;
pub const MAX_REASON_LEN: usize = 1000;
pub const MAX_NOTE_LEN: usize = 2000;
/// Total size of the append-only admin notes log on one reservation.
pub const MAX_ADMIN_NOTES_LEN: usize = 64 * 1024;
/// Longest booking-ahead horizon for new reservations, in days.
pub const MAX_BOOKING_AHEAD_DAYS: i64 = 730;
/// Attempts at generating an unused booking reference.
pub const MAX_REF_ATTEMPTS: usize = 5;
/// Longest accepted wire request line, in bytes.
pub const MAX_LINE_LEN: usize = 64 * 1024;
/// Most rows returned by a single `list` query.
pub const MAX_LIST_RESULTS: usize = 1000;
