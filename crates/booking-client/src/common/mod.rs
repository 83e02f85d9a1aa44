//! Common utilities for the booking service client
//!
//! The booking service exposes one script per function, each taking a
//! form-encoded POST body and answering with JSON.

use crate::error::BookingError;
use reqwest::Client;
use serde::de::DeserializeOwned;
use tracing::debug;

/// HTTP client wrapper bound to a booking service base URL
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    base_url: String,
}

impl HttpClient {
    /// Create a new HTTP client wrapper
    pub fn new(client: Client, base_url: String) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build a full URL for a booking service function
    pub fn build_url(&self, function: &str) -> String {
        if function.starts_with("http") {
            function.to_string()
        } else {
            format!("{}/{}", self.base_url, function.trim_start_matches('/'))
        }
    }

    /// POST form parameters to a booking service function and decode the JSON answer
    ///
    /// 401/403 responses map to [`BookingError::Authentication`] so callers
    /// can re-establish the session; every other non-2xx status is an
    /// [`BookingError::Api`] error.
    pub async fn post_form<T: DeserializeOwned>(
        &self,
        function: &str,
        params: &[(&str, &str)],
    ) -> Result<T, BookingError> {
        let url = self.build_url(function);
        debug!("Sending API call: POST {}", url);

        let response = self.client
            .post(&url)
            .header("Accept", "application/json")
            .form(params)
            .send()
            .await
            .map_err(BookingError::Http)?;

        let status = response.status();
        if status == 401 || status == 403 {
            let body = response.text().await.unwrap_or_default();
            return Err(BookingError::Authentication(format!(
                "{} rejected session: {} - {}",
                function, status, body
            )));
        }

        if status == 404 {
            let body = response.text().await.unwrap_or_default();
            return Err(BookingError::NotFound(format!(
                "{} not found: {}",
                function, body
            )));
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BookingError::Api(format!(
                "Problem querying {}: {} - {}",
                function, status, body
            )));
        }

        let response_text = response.text().await?;
        serde_json::from_str(&response_text).map_err(|e| {
            debug!(
                "Undecodable {} response (first 500 chars): {}",
                function,
                response_text.chars().take(500).collect::<String>()
            );
            BookingError::Serialization(e)
        })
    }
}
