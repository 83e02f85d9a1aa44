//! Booking service client
//!
//! Implements the booking service REST API used by the reservation
//! controller: sign-in, reservation listing, user and site lookups, and
//! status updates.

use crate::common::HttpClient;
use crate::error::BookingError;
use crate::models::*;
use crate::booking_trait::BookingClientTrait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info, warn};

const SIGN_IN: &str = "signIn.py";
const GET_ALL_RESERVATIONS: &str = "pccGetAllReservations.py";
const GET_USER_DATA: &str = "getUserData.py";
const GET_SITE_DESCRIPTION: &str = "GetSiteDescription.py";
const UPDATE_RESERVATION_STATUS: &str = "updateReservationStatus.py";

/// Booking service API client
pub struct BookingClient {
    http: HttpClient,
    username: String,
    password: String,
    session_id: Mutex<Option<String>>,
}

impl std::fmt::Debug for BookingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BookingClient")
            .field("base_url", &self.http.base_url())
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl BookingClient {
    /// Create a new booking client
    ///
    /// # Arguments
    /// * `base_url` - URL of the booking service API scripts (e.g., "https://booking.example.org/api")
    /// * `username` / `password` - credentials exchanged for a session by [`authenticate`](Self::authenticate)
    /// * `accept_invalid_certs` - accept self-signed certificates on the booking host
    pub fn new(
        base_url: String,
        username: String,
        password: String,
        accept_invalid_certs: bool,
    ) -> Result<Self, BookingError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .danger_accept_invalid_certs(accept_invalid_certs)
            .build()
            .map_err(BookingError::Http)?;

        Ok(Self {
            http: HttpClient::new(client, base_url),
            username,
            password,
            session_id: Mutex::new(None),
        })
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        self.http.base_url()
    }

    /// Exchange username/password for a session id
    pub async fn authenticate(&self) -> Result<(), BookingError> {
        info!("Authenticating to booking service at {}", self.http.base_url());
        let session: SessionResponse = self.http
            .post_form(
                SIGN_IN,
                &[("username", self.username.as_str()), ("password", self.password.as_str())],
            )
            .await?;

        if session.session_id.is_empty() {
            return Err(BookingError::Authentication(
                "booking service returned an empty session id".to_string(),
            ));
        }

        *self.session_id.lock().unwrap_or_else(|e| e.into_inner()) = Some(session.session_id);
        debug!("Booking session established");
        Ok(())
    }

    fn current_session(&self) -> Option<String> {
        self.session_id.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Call a booking service function with the session attached
    ///
    /// An unauthorized answer re-establishes the session once and retries.
    async fn query<T: DeserializeOwned>(
        &self,
        function: &str,
        params: &[(&str, &str)],
    ) -> Result<T, BookingError> {
        let session = match self.current_session() {
            Some(session) => session,
            None => {
                self.authenticate().await?;
                self.current_session().ok_or_else(|| {
                    BookingError::Authentication("no session after sign-in".to_string())
                })?
            }
        };

        match self.http.post_form(function, &with_session(params, &session)).await {
            Err(BookingError::Authentication(msg)) => {
                warn!("Session rejected by {} ({}), re-authenticating", function, msg);
                self.authenticate().await?;
                let session = self.current_session().ok_or_else(|| {
                    BookingError::Authentication("no session after sign-in".to_string())
                })?;
                self.http.post_form(function, &with_session(params, &session)).await
            }
            other => other,
        }
    }

    /// Fetch every current and future reservation
    pub async fn fetch_all_reservations(&self) -> Result<Vec<Reservation>, BookingError> {
        debug!("Reading current and future reservations");
        let list: ReservationList = self.query(GET_ALL_RESERVATIONS, &[]).await?;
        Ok(list.into_reservations())
    }

    /// Fetch the profile of a booking service user
    pub async fn fetch_user(&self, username: &str) -> Result<UserData, BookingError> {
        debug!("Fetching user data for {}", username);
        self.query(GET_USER_DATA, &[("username", username)]).await
    }

    /// Fetch the provisioning parameters of one reservation site
    pub async fn fetch_site_description(
        &self,
        reservation_id: &str,
        site_id: &str,
    ) -> Result<Option<SiteDescription>, BookingError> {
        debug!("Fetching site description for reservation {} site {}", reservation_id, site_id);
        let response: SiteDescriptionResponse = self
            .query(
                GET_SITE_DESCRIPTION,
                &[("reservation_id", reservation_id), ("site_id", site_id)],
            )
            .await?;
        Ok(response.site)
    }

    /// Record a new status for a reservation site
    ///
    /// # Returns
    /// * `Ok(StatusUpdate)` - `accepted` tells whether the service took the new status;
    ///   when accepted, `reservation` is the refreshed snapshot returned by the service
    /// * `Err(BookingError)` - If the request fails
    pub async fn update_status(
        &self,
        reservation: &Reservation,
        site: &Site,
        status: &Status,
        note: Option<&str>,
    ) -> Result<StatusUpdate, BookingError> {
        let mut params = vec![
            ("status", status.as_str()),
            ("reservation_id", reservation.reservation_id.as_str()),
            ("site_id", site.site_id.as_str()),
        ];
        if let Some(note) = note {
            params.push(("description", note));
        }

        let response: UpdateStatusResponse = self.query(UPDATE_RESERVATION_STATUS, &params).await?;
        debug!(
            "Server response for reservation {} site {} -> {}: {}",
            reservation.reservation_id, site.site_id, status, response.result
        );

        if response.result {
            Ok(StatusUpdate {
                accepted: true,
                reservation: response.reservation.unwrap_or_else(|| reservation.clone()),
            })
        } else {
            Ok(StatusUpdate {
                accepted: false,
                reservation: reservation.clone(),
            })
        }
    }
}

fn with_session<'a>(params: &[(&'a str, &'a str)], session: &'a str) -> Vec<(&'a str, &'a str)> {
    let mut all = params.to_vec();
    all.push(("session_id", session));
    all
}

#[async_trait::async_trait]
impl BookingClientTrait for BookingClient {
    fn base_url(&self) -> &str {
        self.base_url()
    }

    async fn authenticate(&self) -> Result<(), BookingError> {
        self.authenticate().await
    }

    async fn fetch_all_reservations(&self) -> Result<Vec<Reservation>, BookingError> {
        self.fetch_all_reservations().await
    }

    async fn fetch_user(&self, username: &str) -> Result<UserData, BookingError> {
        self.fetch_user(username).await
    }

    async fn fetch_site_description(
        &self,
        reservation_id: &str,
        site_id: &str,
    ) -> Result<Option<SiteDescription>, BookingError> {
        self.fetch_site_description(reservation_id, site_id).await
    }

    async fn update_status(
        &self,
        reservation: &Reservation,
        site: &Site,
        status: &Status,
        note: Option<&str>,
    ) -> Result<StatusUpdate, BookingError> {
        self.update_status(reservation, site, status, note).await
    }
}
