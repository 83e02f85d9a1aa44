//! Booking service API models
//!
//! These models match the JSON documents returned by the booking service
//! scripts (`pccGetAllReservations.py`, `GetSiteDescription.py`, ...).
//! The service is loose about numeric types, so ids and sizes accept either
//! JSON numbers or strings.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use tracing::warn;

use crate::error::BookingError;

/// Timestamp format used by the booking service (UTC)
pub const BOOKING_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Number of significant characters in a booking timestamp
const BOOKING_TIME_LENGTH: usize = 19;

/// Parse a booking service timestamp.
///
/// Only the first 19 characters are significant; fractional seconds and
/// offsets after that are ignored. An RFC 3339 `T` separator is accepted.
pub fn parse_booking_time(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    let significant: String = raw
        .trim()
        .chars()
        .take(BOOKING_TIME_LENGTH)
        .map(|c| if c == 'T' { ' ' } else { c })
        .collect();
    NaiveDateTime::parse_from_str(&significant, BOOKING_TIME_FORMAT).map(|naive| naive.and_utc())
}

/// Workflow status of a reservation site
///
/// Any status string the controller does not know is preserved as
/// `Unknown` so that it can be logged and left untouched.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Status {
    /// Booked, not yet acknowledged by the scheduler
    Waiting,
    /// Acknowledged; waiting for the reservation window to open
    Created,
    /// Provisioning tool launched; cluster not yet reachable
    Starting,
    /// Cluster is up and reachable
    Running,
    /// Teardown in progress
    Stopping,
    /// Cluster torn down
    Stopped,
    /// Cancelled by the user or an administrator
    Cancel,
    /// Status string not known to the controller
    Unknown(String),
}

impl Status {
    /// Wire representation of the status
    pub fn as_str(&self) -> &str {
        match self {
            Status::Waiting => "waiting",
            Status::Created => "created",
            Status::Starting => "starting",
            Status::Running => "running",
            Status::Stopping => "stopping",
            Status::Stopped => "stopped",
            Status::Cancel => "cancel",
            Status::Unknown(raw) => raw,
        }
    }
}

impl From<&str> for Status {
    fn from(raw: &str) -> Self {
        match raw {
            "waiting" => Status::Waiting,
            "created" => Status::Created,
            "starting" => Status::Starting,
            "running" => Status::Running,
            "stopping" => Status::Stopping,
            "stopped" => Status::Stopped,
            "cancel" => Status::Cancel,
            other => Status::Unknown(other.to_string()),
        }
    }
}

impl From<String> for Status {
    fn from(raw: String) -> Self {
        Status::from(raw.as_str())
    }
}

impl From<Status> for String {
    fn from(status: Status) -> Self {
        status.as_str().to_string()
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A booked, time-bounded allocation of one or more sites for a user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reservation {
    #[serde(deserialize_with = "string_or_number")]
    pub reservation_id: String,
    /// Booking service user name of the owner
    #[serde(default)]
    pub owner: String,
    #[serde(with = "booking_time")]
    pub begin: DateTime<Utc>,
    #[serde(with = "booking_time")]
    pub end: DateTime<Utc>,
    #[serde(default, deserialize_with = "string_or_null")]
    pub title: String,
    #[serde(default, deserialize_with = "string_or_null")]
    pub description: String,
    /// Virtual cluster image requested by the user
    #[serde(default, deserialize_with = "string_or_null")]
    pub image_type: String,
    #[serde(default)]
    pub sites: Vec<Site>,
}

impl Reservation {
    /// A reservation window must open before it closes
    pub fn is_well_formed(&self) -> bool {
        self.begin < self.end
    }

    /// Find a site of this reservation by id
    pub fn site(&self, site_id: &str) -> Option<&Site> {
        self.sites.iter().find(|s| s.site_id == site_id)
    }
}

/// A single resource allocation (virtual cluster target) within a reservation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Site {
    #[serde(deserialize_with = "string_or_number")]
    pub site_id: String,
    #[serde(default, deserialize_with = "string_or_null")]
    pub site_name: String,
    /// Number of CPUs (compute nodes) requested
    #[serde(rename = "CPU", default, deserialize_with = "optional_u64")]
    pub cpu: Option<u64>,
    /// Total memory requested, in GB
    #[serde(default, deserialize_with = "optional_u64")]
    pub memory: Option<u64>,
    pub status: Status,
    #[serde(default, deserialize_with = "optional_string")]
    pub admin_description: Option<String>,
}

/// Provisioning parameters for a site, resolved by the booking service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SiteDescription {
    /// Host the provisioning tool runs on
    #[serde(default, deserialize_with = "optional_string")]
    pub site_hostname: Option<String>,
    /// Installation prefix of the provisioning tool
    #[serde(default, deserialize_with = "optional_string")]
    pub pragma_boot_path: Option<String>,
    #[serde(default, deserialize_with = "optional_string")]
    pub pragma_boot_version: Option<String>,
    /// Interpreter used to run the tool, if not the remote default
    #[serde(default, deserialize_with = "optional_string")]
    pub python_path: Option<String>,
    /// Remote working-directory root
    #[serde(default, deserialize_with = "optional_string")]
    pub temp_dir: Option<String>,
    /// Account used on the remote host
    #[serde(default, deserialize_with = "optional_string")]
    pub username: Option<String>,
}

/// Booking service user profile
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserData {
    #[serde(default, deserialize_with = "string_or_null")]
    pub firstname: String,
    #[serde(default, deserialize_with = "string_or_null")]
    pub email_address: String,
    /// OpenSSH public key installed on the virtual cluster front-end
    #[serde(default, deserialize_with = "string_or_null")]
    pub public_key: String,
}

/// Result of a status update request
#[derive(Debug, Clone)]
pub struct StatusUpdate {
    /// Whether the booking service accepted the new status
    pub accepted: bool,
    /// Reservation snapshot returned by the service (or the caller's copy if rejected)
    pub reservation: Reservation,
}

/// Response of `signIn.py`
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct SessionResponse {
    pub session_id: String,
}

/// Response of `pccGetAllReservations.py`
///
/// Records stay raw until [`into_reservations`](Self::into_reservations) so
/// one undecodable reservation does not hide the others.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ReservationList {
    #[serde(default)]
    pub result: Vec<serde_json::Value>,
}

impl ReservationList {
    /// Decode every record, skipping the ones that do not parse
    pub(crate) fn into_reservations(self) -> Vec<Reservation> {
        self.result
            .into_iter()
            .filter_map(|raw| {
                let id = raw
                    .get("reservation_id")
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "without id".to_string());
                match serde_json::from_value::<Reservation>(raw) {
                    Ok(reservation) => Some(reservation),
                    Err(e) => {
                        warn!(
                            "Skipping reservation {}: {}",
                            id,
                            BookingError::Serialization(e)
                        );
                        None
                    }
                }
            })
            .collect()
    }
}

/// Response of `GetSiteDescription.py`
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct SiteDescriptionResponse {
    #[serde(default)]
    pub site: Option<SiteDescription>,
}

/// Response of `updateReservationStatus.py`
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct UpdateStatusResponse {
    #[serde(deserialize_with = "truthy")]
    pub result: bool,
    #[serde(default)]
    pub reservation: Option<Reservation>,
}

mod booking_time {
    use super::{BOOKING_TIME_FORMAT, parse_booking_time};
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer, de};

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.format(BOOKING_TIME_FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse_booking_time(&raw)
            .map_err(|e| de::Error::custom(format!("invalid booking timestamp '{}': {}", raw, e)))
    }
}

fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {}",
            other
        ))),
    }
}

fn string_or_null<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(optional_string(deserializer)?.unwrap_or_default())
}

fn optional_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Null => Ok(None),
        serde_json::Value::String(s) => Ok(Some(s)),
        serde_json::Value::Number(n) => Ok(Some(n.to_string())),
        serde_json::Value::Bool(b) => Ok(Some(b.to_string())),
        other => Err(serde::de::Error::custom(format!(
            "expected string, got {}",
            other
        ))),
    }
}

fn optional_u64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Null => Ok(None),
        serde_json::Value::Number(n) => Ok(n.as_u64()),
        serde_json::Value::String(s) if s.trim().is_empty() => Ok(None),
        serde_json::Value::String(s) => s
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|e| serde::de::Error::custom(format!("invalid number '{}': {}", s, e))),
        other => Err(serde::de::Error::custom(format!(
            "expected number, got {}",
            other
        ))),
    }
}

// The service answers "True"/"False" as strings
fn truthy<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Bool(b) => Ok(b),
        serde_json::Value::String(s) => Ok(s.eq_ignore_ascii_case("true")),
        _ => Ok(false),
    }
}
