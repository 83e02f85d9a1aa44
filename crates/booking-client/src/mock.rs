//! Mock BookingClient for unit testing
//!
//! This module provides a mock implementation of BookingClientTrait that can be used
//! in unit tests without requiring a running booking service.

use crate::error::BookingError;
use crate::models::*;
use crate::booking_trait::BookingClientTrait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// A status update received by the mock
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedUpdate {
    pub reservation_id: String,
    pub site_id: String,
    pub status: Status,
    pub note: Option<String>,
}

/// Mock BookingClient for testing
///
/// This mock stores reservations in memory and applies accepted status
/// updates to them, so a second poll sees the result of the first.
#[derive(Debug, Clone)]
pub struct MockBookingClient {
    base_url: String,
    reservations: Arc<Mutex<Vec<Reservation>>>,
    users: Arc<Mutex<HashMap<String, UserData>>>,
    site_descriptions: Arc<Mutex<HashMap<(String, String), SiteDescription>>>,
    updates: Arc<Mutex<Vec<RecordedUpdate>>>,
    site_description_requests: Arc<Mutex<usize>>,
    sign_ins: Arc<Mutex<usize>>,
    reject_updates: Arc<Mutex<bool>>,
    fail_updates: Arc<Mutex<bool>>,
}

impl MockBookingClient {
    /// Create a new mock client
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            reservations: Arc::new(Mutex::new(Vec::new())),
            users: Arc::new(Mutex::new(HashMap::new())),
            site_descriptions: Arc::new(Mutex::new(HashMap::new())),
            updates: Arc::new(Mutex::new(Vec::new())),
            site_description_requests: Arc::new(Mutex::new(0)),
            sign_ins: Arc::new(Mutex::new(0)),
            reject_updates: Arc::new(Mutex::new(false)),
            fail_updates: Arc::new(Mutex::new(false)),
        }
    }

    /// Add a reservation to the mock store (for test setup)
    pub fn add_reservation(&self, reservation: Reservation) {
        self.reservations.lock().unwrap().push(reservation);
    }

    /// Add a user to the mock store (for test setup)
    pub fn add_user(&self, username: impl Into<String>, user: UserData) {
        self.users.lock().unwrap().insert(username.into(), user);
    }

    /// Add a site description to the mock store (for test setup)
    pub fn set_site_description(&self, reservation_id: &str, site_id: &str, desc: SiteDescription) {
        self.site_descriptions
            .lock()
            .unwrap()
            .insert((reservation_id.to_string(), site_id.to_string()), desc);
    }

    /// Answer every status update with `result = False`
    pub fn reject_updates(&self, reject: bool) {
        *self.reject_updates.lock().unwrap() = reject;
    }

    /// Fail every status update with an API error
    pub fn fail_updates(&self, fail: bool) {
        *self.fail_updates.lock().unwrap() = fail;
    }

    /// Status updates received so far
    pub fn updates(&self) -> Vec<RecordedUpdate> {
        self.updates.lock().unwrap().clone()
    }

    /// Current stored copy of a reservation
    pub fn reservation(&self, reservation_id: &str) -> Option<Reservation> {
        self.reservations
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.reservation_id == reservation_id)
            .cloned()
    }

    /// Number of site description lookups served
    pub fn site_description_requests(&self) -> usize {
        *self.site_description_requests.lock().unwrap()
    }

    /// Number of sign-ins served
    pub fn sign_ins(&self) -> usize {
        *self.sign_ins.lock().unwrap()
    }
}

#[async_trait::async_trait]
impl BookingClientTrait for MockBookingClient {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn authenticate(&self) -> Result<(), BookingError> {
        *self.sign_ins.lock().unwrap() += 1;
        Ok(())
    }

    async fn fetch_all_reservations(&self) -> Result<Vec<Reservation>, BookingError> {
        Ok(self.reservations.lock().unwrap().clone())
    }

    async fn fetch_user(&self, username: &str) -> Result<UserData, BookingError> {
        self.users
            .lock()
            .unwrap()
            .get(username)
            .cloned()
            .ok_or_else(|| BookingError::NotFound(format!("User {} not found", username)))
    }

    async fn fetch_site_description(
        &self,
        reservation_id: &str,
        site_id: &str,
    ) -> Result<Option<SiteDescription>, BookingError> {
        *self.site_description_requests.lock().unwrap() += 1;
        Ok(self
            .site_descriptions
            .lock()
            .unwrap()
            .get(&(reservation_id.to_string(), site_id.to_string()))
            .cloned())
    }

    async fn update_status(
        &self,
        reservation: &Reservation,
        site: &Site,
        status: &Status,
        note: Option<&str>,
    ) -> Result<StatusUpdate, BookingError> {
        self.updates.lock().unwrap().push(RecordedUpdate {
            reservation_id: reservation.reservation_id.clone(),
            site_id: site.site_id.clone(),
            status: status.clone(),
            note: note.map(|n| n.to_string()),
        });

        if *self.fail_updates.lock().unwrap() {
            return Err(BookingError::Api(
                "Problem querying updateReservationStatus.py: 500 Internal Server Error".to_string(),
            ));
        }

        if *self.reject_updates.lock().unwrap() {
            return Ok(StatusUpdate {
                accepted: false,
                reservation: reservation.clone(),
            });
        }

        let mut stored = self.reservations.lock().unwrap();
        let updated = match stored.iter_mut().find(|r| r.reservation_id == reservation.reservation_id) {
            Some(existing) => {
                apply_status(existing, &site.site_id, status, note);
                existing.clone()
            }
            None => {
                let mut copy = reservation.clone();
                apply_status(&mut copy, &site.site_id, status, note);
                copy
            }
        };

        Ok(StatusUpdate {
            accepted: true,
            reservation: updated,
        })
    }
}

fn apply_status(reservation: &mut Reservation, site_id: &str, status: &Status, note: Option<&str>) {
    if let Some(site) = reservation.sites.iter_mut().find(|s| s.site_id == site_id) {
        site.status = status.clone();
        if let Some(note) = note {
            site.admin_description = Some(note.to_string());
        }
    }
}
