//! BookingClient trait for mocking
//!
//! This trait abstracts the BookingClient to enable mocking in unit tests.
//! The concrete BookingClient implements this trait, and tests can use mock implementations.

use crate::error::BookingError;
use crate::models::*;

/// Trait for booking service operations
///
/// The session obtained by [`authenticate`](Self::authenticate) is held by
/// the implementation and attached to every later call.
#[async_trait::async_trait]
pub trait BookingClientTrait: Send + Sync {
    /// Get the base URL
    fn base_url(&self) -> &str;

    /// Exchange the configured credentials for a session
    async fn authenticate(&self) -> Result<(), BookingError>;

    /// Fetch every current and future reservation
    async fn fetch_all_reservations(&self) -> Result<Vec<Reservation>, BookingError>;

    /// Fetch the profile of a booking service user
    async fn fetch_user(&self, username: &str) -> Result<UserData, BookingError>;

    /// Fetch the provisioning parameters of one reservation site
    ///
    /// Returns `Ok(None)` when the service has no description for the site.
    async fn fetch_site_description(
        &self,
        reservation_id: &str,
        site_id: &str,
    ) -> Result<Option<SiteDescription>, BookingError>;

    /// Record a new status for a reservation site
    async fn update_status(
        &self,
        reservation: &Reservation,
        site: &Site,
        status: &Status,
        note: Option<&str>,
    ) -> Result<StatusUpdate, BookingError>;
}
