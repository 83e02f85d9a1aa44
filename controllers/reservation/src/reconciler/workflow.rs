//! Site status workflow
//!
//! Each status has at most one status it can move to. Whether the move
//! happens on a given pass is decided by the handler of the target status.

use booking_client::Status;

/// Next status a site in `current` may move to, if any
///
/// `stopping` is transient and owned by the booking service, `stopped` is
/// terminal, and unknown statuses are left alone.
pub fn target(current: &Status) -> Option<Status> {
    match current {
        Status::Waiting => Some(Status::Created),
        Status::Created => Some(Status::Starting),
        Status::Starting => Some(Status::Running),
        Status::Running => Some(Status::Stopped),
        Status::Cancel => Some(Status::Stopped),
        Status::Stopping | Status::Stopped | Status::Unknown(_) => None,
    }
}
