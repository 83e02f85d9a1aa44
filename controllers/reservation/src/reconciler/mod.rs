//! Reservation site state machine.
//!
//! One call to [`Reconciler::advance`] moves a single reservation site at most
//! one step along the workflow:
//!
//! - `waiting` -> `created`: acknowledged immediately
//! - `created` -> `starting`: once the reservation has begun; writes the
//!   descriptor and launches provisioning (`start`)
//! - `starting` -> `running`: once the probe reports every cluster up (`converge`)
//! - `running`/`cancel` -> `stopped`: near the reservation end, or on
//!   cancellation; tears the cluster down first (`stop`)
//!
//! The booking service is only told about a new status after the side
//! effect for it succeeded.

mod converge;
mod start;
mod stop;
pub mod workflow;

use crate::error::ControllerError;
use booking_client::{BookingClientTrait, Reservation, Site, SiteDescription, Status, UserData};
use chrono::{DateTime, Duration, Utc};
use provisioning::{ClusterProvisioner, DescriptorWriter, StatusProbe};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of advancing one site
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    /// Status of the site after this pass
    pub status: Status,
    /// Note sent along with the status update
    pub note: Option<String>,
    /// Snapshot returned by an accepted status update; newer than the caller's copy
    pub reservation: Option<Reservation>,
}

impl Transition {
    pub(crate) fn unchanged(status: &Status) -> Self {
        Self {
            status: status.clone(),
            note: None,
            reservation: None,
        }
    }
}

/// Drives reservation sites through their lifecycle.
pub struct Reconciler {
    pub(crate) booking: Box<dyn BookingClientTrait>,
    pub(crate) provisioner: Arc<dyn ClusterProvisioner>,
    pub(crate) probe: Arc<dyn StatusProbe>,
    pub(crate) writer: DescriptorWriter,
    /// Stop clusters this long before the reservation ends
    shutdown_lead: Duration,
    /// Warn about sites still starting this long after the reservation began
    starting_alert: Duration,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("booking", &self.booking.base_url())
            .field("writer", &self.writer)
            .field("shutdown_lead", &self.shutdown_lead)
            .field("starting_alert", &self.starting_alert)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    pub fn new(
        booking: impl BookingClientTrait + 'static,
        provisioner: Arc<dyn ClusterProvisioner>,
        probe: Arc<dyn StatusProbe>,
        writer: DescriptorWriter,
        shutdown_lead: Duration,
        starting_alert: Duration,
    ) -> Self {
        Self {
            booking: Box::new(booking),
            provisioner,
            probe,
            writer,
            shutdown_lead,
            starting_alert,
        }
    }

    /// Advance one reservation site by at most one workflow step.
    ///
    /// # Arguments
    /// * `reservation` - latest known snapshot of the reservation
    /// * `user` - reservation owner
    /// * `site` - the site to advance
    /// * `site_description` - provisioning parameters; only needed to start a site
    /// * `now` - current time (UTC)
    ///
    /// # Returns
    /// * `Ok(Transition)` - the site's status after this pass (unchanged when
    ///   a guard did not hold or the booking service declined the update)
    /// * `Err(ControllerError)` - a side effect failed; the status is unchanged
    pub async fn advance(
        &self,
        reservation: &Reservation,
        user: &UserData,
        site: &Site,
        site_description: Option<&SiteDescription>,
        now: DateTime<Utc>,
    ) -> Result<Transition, ControllerError> {
        let Some(target) = workflow::target(&site.status) else {
            match &site.status {
                Status::Unknown(raw) => warn!(
                    "Reservation {} site {}: unknown status '{}', leaving it alone",
                    reservation.reservation_id, site.site_name, raw
                ),
                status => debug!(
                    "Reservation {} site {} is {}, nothing to do",
                    reservation.reservation_id, site.site_name, status
                ),
            }
            return Ok(Transition::unchanged(&site.status));
        };

        debug!(
            "Reservation {} site {} ({}): {} -> {}?",
            reservation.reservation_id, site.site_name, site.site_id, site.status, target
        );

        match target {
            Status::Created => self.commit(reservation, site, Status::Created, None).await,
            Status::Starting => self.start(reservation, user, site, site_description, now).await,
            Status::Running => self.converge(reservation, site, now).await,
            Status::Stopped => self.stop(reservation, site, now).await,
            _ => Ok(Transition::unchanged(&site.status)),
        }
    }

    /// Record `status` with the booking service
    pub(crate) async fn commit(
        &self,
        reservation: &Reservation,
        site: &Site,
        status: Status,
        note: Option<String>,
    ) -> Result<Transition, ControllerError> {
        let update = self
            .booking
            .update_status(reservation, site, &status, note.as_deref())
            .await?;

        if update.accepted {
            info!(
                "Reservation {} site {}: {} -> {}",
                reservation.reservation_id, site.site_name, site.status, status
            );
            Ok(Transition {
                status,
                note,
                reservation: Some(update.reservation),
            })
        } else {
            warn!(
                "Booking service declined update of reservation {} site {} to {}",
                reservation.reservation_id, site.site_name, status
            );
            Ok(Transition::unchanged(&site.status))
        }
    }

    pub(crate) fn shutdown_lead(&self) -> Duration {
        self.shutdown_lead
    }

    pub(crate) fn starting_alert(&self) -> Duration {
        self.starting_alert
    }
}
