//! Main controller implementation.
//!
//! This module contains the `Controller` struct that runs one polling pass:
//! sign in, read every current and future reservation, advance each site
//! once, and notify owners whose reservations changed.

use crate::config::Config;
use crate::error::ControllerError;
use crate::notify::{self, Notifier, SendmailNotifier, SiteChange};
use crate::reconciler::Reconciler;
use booking_client::{BookingClient, Reservation, SiteDescription, Status, UserData};
use chrono::{DateTime, Duration, Utc};
use provisioning::{DescriptorWriter, OpenSshShell, PragmaBoot};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Outcome of one polling pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassSummary {
    /// Reservations examined
    pub reservations: usize,
    /// Sites whose status changed
    pub transitions: usize,
    /// Sites whose processing failed
    pub failures: usize,
    /// Notifications handed to the notifier
    pub notifications: usize,
}

/// Main controller for reservation lifecycle management.
pub struct Controller {
    reconciler: Reconciler,
    notifier: Option<Box<dyn Notifier>>,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("reconciler", &self.reconciler)
            .field("notify", &self.notifier.is_some())
            .finish()
    }
}

impl Controller {
    pub fn new(reconciler: Reconciler, notifier: Option<Box<dyn Notifier>>) -> Self {
        Self { reconciler, notifier }
    }

    /// Build the controller and its clients from the configuration.
    pub fn from_config(config: &Config) -> Result<Self, ControllerError> {
        info!("Initializing Reservation Controller");

        let booking = BookingClient::new(
            config.server.base_url.clone(),
            config.authentication.username.clone(),
            config.authentication.password.clone(),
            config.server.accept_invalid_certs,
        )?;

        let provisioning = &config.provisioning;
        let shell = OpenSshShell::locate(
            provisioning.ssh_binary.clone(),
            provisioning.scp_binary.clone(),
            provisioning.connect_timeout(),
            provisioning.reachability_timeout(),
        )?;
        let pragma = Arc::new(PragmaBoot::new(Arc::new(shell), provisioning.settle_delay()));

        let reconciler = Reconciler::new(
            booking,
            pragma.clone(),
            pragma,
            DescriptorWriter::new(&config.server.dag_dir, &provisioning.operator_public_key),
            Duration::seconds(config.stopping.reservation_secs_left),
            Duration::seconds(provisioning.starting_alert_secs),
        );

        let notifier: Option<Box<dyn Notifier>> = if config.notification.enabled {
            Some(Box::new(SendmailNotifier::new(
                config.notification.sendmail.clone(),
                config.mail_from(),
            )))
        } else {
            info!("Notifications disabled");
            None
        };

        Ok(Self::new(reconciler, notifier))
    }

    /// Run one polling pass.
    ///
    /// # Returns
    /// * `Ok(PassSummary)` - the pass completed; per-site failures are counted, not returned
    /// * `Err(ControllerError)` - the booking service failed; the pass was aborted
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<PassSummary, ControllerError> {
        let booking = self.reconciler.booking.as_ref();
        booking.authenticate().await?;

        debug!("Reading current and future reservations");
        let reservations = booking.fetch_all_reservations().await?;
        info!("Found {} reservations", reservations.len());

        let mut summary = PassSummary::default();
        let mut descriptions: HashMap<(String, String), Option<SiteDescription>> = HashMap::new();

        for reservation in reservations {
            summary.reservations += 1;
            if !reservation.is_well_formed() {
                warn!(
                    "Skipping reservation {}: it ends ({}) before it begins ({})",
                    reservation.reservation_id, reservation.end, reservation.begin
                );
                continue;
            }

            let user = booking.fetch_user(&reservation.owner).await?;

            self.reconcile_reservation(reservation, &user, now, &mut descriptions, &mut summary)
                .await?;
        }

        info!(
            "Pass complete: {} reservations, {} transitions, {} failures",
            summary.reservations, summary.transitions, summary.failures
        );
        Ok(summary)
    }

    async fn reconcile_reservation(
        &self,
        reservation: Reservation,
        user: &UserData,
        now: DateTime<Utc>,
        descriptions: &mut HashMap<(String, String), Option<SiteDescription>>,
        summary: &mut PassSummary,
    ) -> Result<(), ControllerError> {
        let site_ids: Vec<String> = reservation.sites.iter().map(|s| s.site_id.clone()).collect();
        let mut current = reservation;
        let mut changes: HashMap<String, SiteChange> = HashMap::new();

        for site_id in site_ids {
            let Some(site) = current.site(&site_id).cloned() else {
                warn!(
                    "Site {} disappeared from reservation {}",
                    site_id, current.reservation_id
                );
                continue;
            };

            // only a `created` site can need its descriptor written
            let description = if site.status == Status::Created && current.begin <= now {
                self.site_description(&current.reservation_id, &site_id, descriptions)
                    .await?
            } else {
                None
            };

            match self
                .reconciler
                .advance(&current, user, &site, description.as_ref(), now)
                .await
            {
                Ok(transition) => {
                    if transition.status != site.status {
                        summary.transitions += 1;
                        changes.insert(
                            site_id.clone(),
                            SiteChange {
                                was: site.status.clone(),
                                now: transition.status.clone(),
                            },
                        );
                    }
                    if let Some(refreshed) = transition.reservation {
                        current = refreshed;
                    }
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    summary.failures += 1;
                    error!(
                        "Error processing reservation {} site {} ({}): {}",
                        current.reservation_id, site.site_name, site_id, e
                    );
                }
            }
        }

        if !changes.is_empty() {
            self.notify(&current, user, &changes, summary).await;
        }
        Ok(())
    }

    /// Site description, fetched at most once per pass
    async fn site_description(
        &self,
        reservation_id: &str,
        site_id: &str,
        cache: &mut HashMap<(String, String), Option<SiteDescription>>,
    ) -> Result<Option<SiteDescription>, ControllerError> {
        let key = (reservation_id.to_string(), site_id.to_string());
        if let Some(cached) = cache.get(&key) {
            return Ok(cached.clone());
        }
        let description = self
            .reconciler
            .booking
            .fetch_site_description(reservation_id, site_id)
            .await?;
        cache.insert(key, description.clone());
        Ok(description)
    }

    async fn notify(
        &self,
        reservation: &Reservation,
        user: &UserData,
        changes: &HashMap<String, SiteChange>,
        summary: &mut PassSummary,
    ) {
        let Some(notifier) = &self.notifier else {
            return;
        };
        let result = match notify::compose(reservation, user, changes) {
            Ok(notification) => notifier.send(&notification).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => summary.notifications += 1,
            Err(e) => warn!(
                "Could not notify {} about reservation {}: {}",
                user.email_address, reservation.reservation_id, e
            ),
        }
    }

    /// Read-only listing of every reservation and the status of each site
    pub async fn list(&self) -> Result<String, ControllerError> {
        let booking = self.reconciler.booking.as_ref();
        booking.authenticate().await?;
        let reservations = booking.fetch_all_reservations().await?;
        Ok(render_listing(&reservations))
    }
}

/// Render reservations as a plain-text table
pub fn render_listing(reservations: &[Reservation]) -> String {
    let mut out = String::new();
    for reservation in reservations {
        let _ = writeln!(
            out,
            "#{} {} ({}) {} -> {}",
            reservation.reservation_id,
            reservation.title,
            reservation.owner,
            reservation.begin.format(booking_client::BOOKING_TIME_FORMAT),
            reservation.end.format(booking_client::BOOKING_TIME_FORMAT)
        );
        for site in &reservation.sites {
            let _ = writeln!(out, "    {:<24} {}", site.site_name, site.status);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::Notification;
    use crate::test_utils::*;
    use std::sync::Mutex;

    #[derive(Debug, Clone, Default)]
    struct RecordingNotifier {
        sent: Arc<Mutex<Vec<Notification>>>,
    }

    #[async_trait::async_trait]
    impl Notifier for RecordingNotifier {
        async fn send(&self, notification: &Notification) -> Result<(), ControllerError> {
            self.sent.lock().unwrap().push(notification.clone());
            Ok(())
        }
    }

    struct Fixture {
        controller: Controller,
        notifier: RecordingNotifier,
        harness_booking: booking_client::MockBookingClient,
        provisioner: Arc<FakeProvisioner>,
        _tmp: tempfile::TempDir,
    }

    fn fixture(h: TestHarness) -> Fixture {
        let TestHarness {
            reconciler,
            booking,
            provisioner,
            tmp,
            ..
        } = h;
        let notifier = RecordingNotifier::default();
        Fixture {
            controller: Controller::new(reconciler, Some(Box::new(notifier.clone()))),
            notifier,
            harness_booking: booking,
            provisioner,
            _tmp: tmp,
        }
    }

    #[tokio::test]
    async fn test_pass_advances_each_site_and_notifies_once() {
        let h = create_test_harness();
        h.booking.add_reservation(create_test_reservation(vec![
            create_test_site("1", Status::Waiting),
            create_test_site("2", Status::Created),
        ]));
        h.booking.set_site_description("42", "2", create_test_site_description());
        let f = fixture(h);

        let summary = f.controller.run_once(test_begin() + Duration::seconds(5)).await.unwrap();

        assert_eq!(summary.reservations, 1);
        assert_eq!(summary.transitions, 2);
        assert_eq!(summary.failures, 0);
        assert_eq!(f.provisioner.starts(), 1);
        let stored = f.harness_booking.reservation("42").unwrap();
        assert_eq!(stored.sites[0].status, Status::Created);
        assert_eq!(stored.sites[1].status, Status::Starting);

        let sent = f.notifier.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].body.contains("Status: created (was waiting)"));
        assert!(sent[0].body.contains("Status: starting (was created)"));
    }

    #[tokio::test]
    async fn test_site_failure_does_not_stop_the_pass() {
        let h = create_test_harness();
        h.booking.add_reservation(create_test_reservation(vec![
            create_test_site("1", Status::Created),
            create_test_site("2", Status::Waiting),
        ]));
        // no site description for site 1
        let f = fixture(h);

        let summary = f.controller.run_once(test_begin()).await.unwrap();

        assert_eq!(summary.failures, 1);
        assert_eq!(summary.transitions, 1);
        assert_eq!(f.provisioner.starts(), 0);
        assert_eq!(f.harness_booking.updates().len(), 1);
        assert_eq!(f.notifier.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_quiet_pass_sends_nothing() {
        let h = create_test_harness();
        h.booking.add_reservation(create_test_reservation(vec![create_test_site("1", Status::Created)]));
        let f = fixture(h);

        let summary = f.controller.run_once(test_begin() - Duration::hours(2)).await.unwrap();

        assert_eq!(summary.transitions, 0);
        assert!(f.notifier.sent.lock().unwrap().is_empty());
        assert_eq!(f.harness_booking.site_description_requests(), 0);
        assert_eq!(f.harness_booking.sign_ins(), 1);
    }

    #[tokio::test]
    async fn test_booking_failure_aborts_the_pass() {
        let h = create_test_harness();
        h.booking.add_reservation(create_test_reservation(vec![create_test_site("1", Status::Waiting)]));
        h.booking.fail_updates(true);
        let f = fixture(h);

        let err = f.controller.run_once(test_begin()).await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_unknown_owner_aborts_the_pass() {
        let h = create_test_harness();
        let mut reservation = create_test_reservation(vec![create_test_site("1", Status::Waiting)]);
        reservation.owner = "mallory".to_string();
        h.booking.add_reservation(reservation);
        let f = fixture(h);

        let err = f.controller.run_once(test_begin()).await.unwrap_err();

        assert!(matches!(err, ControllerError::Booking(booking_client::BookingError::NotFound(_))));
        assert!(err.is_fatal());
        assert!(f.harness_booking.updates().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_reservation_skipped() {
        let h = create_test_harness();
        let mut reservation = create_test_reservation(vec![create_test_site("1", Status::Waiting)]);
        reservation.end = reservation.begin - Duration::hours(1);
        h.booking.add_reservation(reservation);
        let f = fixture(h);

        let summary = f.controller.run_once(test_begin()).await.unwrap();

        assert_eq!(summary.reservations, 1);
        assert_eq!(summary.transitions, 0);
        assert!(f.harness_booking.updates().is_empty());
    }

    #[test]
    fn test_render_listing() {
        let listing = render_listing(&[create_test_reservation(vec![
            create_test_site("1", Status::Running),
            create_test_site("2", Status::Cancel),
        ])]);
        let lines: Vec<&str> = listing.lines().collect();
        assert_eq!(lines[0], "#42 Genomics workshop (alice) 2016-05-01 10:00:00 -> 2016-05-02 10:00:00");
        assert!(lines[1].trim_start().starts_with("site-1"));
        assert!(lines[1].ends_with("running"));
        assert!(lines[2].ends_with("cancel"));
    }
}
