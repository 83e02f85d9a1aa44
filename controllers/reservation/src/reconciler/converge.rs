//! starting -> running

use super::{Reconciler, Transition};
use crate::error::ControllerError;
use booking_client::{Reservation, Site, Status};
use chrono::{DateTime, Utc};
use tracing::{info, warn};

impl Reconciler {
    /// Mark the site running once every cluster of the reservation is up.
    ///
    /// The probe's login summary is sent along as the site note.
    pub(crate) async fn converge(
        &self,
        reservation: &Reservation,
        site: &Site,
        now: DateTime<Utc>,
    ) -> Result<Transition, ControllerError> {
        let dag = self.writer.dir_for(&reservation.reservation_id)?;
        match self.probe.check(&dag, &site.site_id).await? {
            Some(report) => {
                info!(
                    "Reservation {} site {} is up at {}",
                    reservation.reservation_id,
                    site.site_name,
                    report.endpoint.as_deref().unwrap_or("unknown address")
                );
                self.commit(reservation, site, Status::Running, Some(report.summary))
                    .await
            }
            None => {
                let since_begin = now - reservation.begin;
                if since_begin > self.starting_alert() {
                    warn!(
                        "Reservation {} site {} has been starting for {} minutes",
                        reservation.reservation_id,
                        site.site_name,
                        since_begin.num_minutes()
                    );
                } else {
                    info!(
                        "Reservation {} site {} is not running yet",
                        reservation.reservation_id, site.site_name
                    );
                }
                Ok(Transition::unchanged(&site.status))
            }
        }
    }
}
