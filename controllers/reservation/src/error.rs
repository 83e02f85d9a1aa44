//! Controller-specific error types.
//!
//! Booking service and configuration errors abort the pass. Everything else
//! is scoped to one reservation site: the poll loop logs it and moves on.

use booking_client::BookingError;
use provisioning::{DescriptorError, ProvisionError};
use thiserror::Error;

/// Errors that can occur in the Reservation Controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Booking service error
    #[error("Booking service error: {0}")]
    Booking(#[from] BookingError),

    /// Descriptor directory error
    #[error("Descriptor error: {0}")]
    Descriptor(#[from] DescriptorError),

    /// Remote provisioning error
    #[error("Provisioning error: {0}")]
    Provision(#[from] ProvisionError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The booking service has no description for a reservation site
    #[error("No site description for reservation {reservation_id} site {site_id}")]
    MissingSiteDescription {
        reservation_id: String,
        site_id: String,
    },

    /// Notification could not be delivered
    #[error("Notification failed: {0}")]
    Notification(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ControllerError {
    /// Whether the error must abort the whole pass
    pub fn is_fatal(&self) -> bool {
        matches!(self, ControllerError::Booking(_) | ControllerError::InvalidConfig(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_booking_and_config_errors_are_fatal() {
        assert!(ControllerError::Booking(BookingError::Api("down".to_string())).is_fatal());
        assert!(ControllerError::InvalidConfig("no url".to_string()).is_fatal());
        assert!(!ControllerError::Provision(ProvisionError::ClusterNotAllocated("1".to_string())).is_fatal());
        assert!(!ControllerError::Notification("sendmail".to_string()).is_fatal());
    }
}
