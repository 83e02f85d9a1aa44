//! Booking Service Client
//!
//! A Rust client library for the reservation booking service.
//! Provides type-safe models and methods for the reservation workflow:
//! sign-in, reservation listing, user/site lookups, and status updates.
//!
//! # Example
//!
//! ```no_run
//! use booking_client::{BookingClient, Status};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = BookingClient::new(
//!     "https://booking.example.org/api".to_string(),
//!     "scheduler".to_string(),
//!     "secret".to_string(),
//!     false,
//! )?;
//! client.authenticate().await?;
//!
//! for reservation in client.fetch_all_reservations().await? {
//!     for site in &reservation.sites {
//!         if site.status == Status::Waiting {
//!             client.update_status(&reservation, site, &Status::Created, None).await?;
//!         }
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - **Session handling**: Unauthorized answers re-establish the session once
//! - **Loose decoding**: Ids and sizes accept JSON numbers or strings
//! - **Mocking**: `MockBookingClient` behind the `test-util` feature

pub mod client;
pub mod common;
pub mod error;
pub mod models;
#[path = "trait.rs"]
pub mod booking_trait;
#[cfg(feature = "test-util")]
pub mod mock;

pub use client::BookingClient;
pub use common::HttpClient;
pub use error::BookingError;
pub use models::*;
pub use booking_trait::BookingClientTrait;
#[cfg(feature = "test-util")]
pub use mock::MockBookingClient;
