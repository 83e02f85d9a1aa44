//! running / cancel -> stopped

use super::{Reconciler, Transition};
use crate::error::ControllerError;
use booking_client::{Reservation, Site, Status};
use chrono::{DateTime, Utc};
use tracing::{debug, info};

impl Reconciler {
    /// Tear the cluster down when the reservation is about to end or was cancelled.
    ///
    /// A failed teardown leaves the status alone so the next pass retries it.
    pub(crate) async fn stop(
        &self,
        reservation: &Reservation,
        site: &Site,
        now: DateTime<Utc>,
    ) -> Result<Transition, ControllerError> {
        if site.status == Status::Running {
            let until_end = reservation.end - now;
            if until_end > self.shutdown_lead() {
                debug!(
                    "Reservation {} site {} ends in {} seconds",
                    reservation.reservation_id,
                    site.site_name,
                    until_end.num_seconds()
                );
                return Ok(Transition::unchanged(&site.status));
            }
            info!(
                "Reservation {} site {} is ending, shutting down",
                reservation.reservation_id, site.site_name
            );
        } else {
            info!(
                "Reservation {} site {} was cancelled, shutting down",
                reservation.reservation_id, site.site_name
            );
        }

        let dag = self.writer.dir_for(&reservation.reservation_id)?;
        self.provisioner.stop(&dag, &site.site_id).await?;

        self.commit(reservation, site, Status::Stopped, None).await
    }
}
