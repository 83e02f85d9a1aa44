//! Booking client errors

use thiserror::Error;

/// Errors that can occur when interacting with the booking service
#[derive(Debug, Error)]
pub enum BookingError {
    /// HTTP request/response error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Booking service returned a non-success response
    #[error("Booking API error: {0}")]
    Api(String),

    /// Response body or record could not be decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Authentication failed (bad credentials, expired session, etc.)
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),
}
