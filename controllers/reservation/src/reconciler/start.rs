//! created -> starting

use super::{Reconciler, Transition};
use crate::error::ControllerError;
use booking_client::{Reservation, Site, SiteDescription, Status, UserData};
use chrono::{DateTime, Utc};
use tracing::{debug, info};

impl Reconciler {
    /// Write the descriptor and launch provisioning once the reservation has begun.
    pub(crate) async fn start(
        &self,
        reservation: &Reservation,
        user: &UserData,
        site: &Site,
        site_description: Option<&SiteDescription>,
        now: DateTime<Utc>,
    ) -> Result<Transition, ControllerError> {
        let until_begin = reservation.begin - now;
        if until_begin > chrono::Duration::zero() {
            debug!(
                "Reservation {} site {} begins in {} seconds",
                reservation.reservation_id,
                site.site_name,
                until_begin.num_seconds()
            );
            return Ok(Transition::unchanged(&site.status));
        }

        let description =
            site_description.ok_or_else(|| ControllerError::MissingSiteDescription {
                reservation_id: reservation.reservation_id.clone(),
                site_id: site.site_id.clone(),
            })?;

        let dag = self.writer.write(reservation, user, site, description)?;
        info!(
            "Starting reservation {} site {} from {}",
            reservation.reservation_id,
            site.site_name,
            dag.path().display()
        );
        self.provisioner.start(&dag, &site.site_id).await?;

        self.commit(reservation, site, Status::Starting, None).await
    }
}
