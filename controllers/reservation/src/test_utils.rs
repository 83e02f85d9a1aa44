//! Test utilities for unit testing the reconciler and poll loop
//!
//! This module provides helpers for creating test data and a reconciler
//! wired to in-memory booking, provisioning and probe fakes.

#[cfg(test)]
use crate::reconciler::Reconciler;
#[cfg(test)]
use booking_client::{MockBookingClient, Reservation, Site, SiteDescription, Status, UserData};
#[cfg(test)]
use chrono::{DateTime, Duration, TimeZone, Utc};
#[cfg(test)]
use provisioning::{
    ClusterProvisioner, DescriptorDir, DescriptorWriter, ProvisionError, RemoteStatusReport,
    StatusProbe,
};
#[cfg(test)]
use std::sync::{Arc, Mutex};
#[cfg(test)]
use tempfile::TempDir;

#[cfg(test)]
pub const RESERVATION_ID: &str = "42";
#[cfg(test)]
pub const OWNER: &str = "alice";
#[cfg(test)]
pub const SHUTDOWN_LEAD_SECS: i64 = 1800;

/// Reservation window start used by the test reservation
#[cfg(test)]
pub fn test_begin() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2016, 5, 1, 10, 0, 0).unwrap()
}

/// Reservation window end used by the test reservation
#[cfg(test)]
pub fn test_end() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2016, 5, 2, 10, 0, 0).unwrap()
}

#[cfg(test)]
pub fn create_test_site(site_id: &str, status: Status) -> Site {
    Site {
        site_id: site_id.to_string(),
        site_name: format!("site-{}", site_id),
        cpu: Some(2),
        memory: Some(8),
        status,
        admin_description: None,
    }
}

#[cfg(test)]
pub fn create_test_reservation(sites: Vec<Site>) -> Reservation {
    Reservation {
        reservation_id: RESERVATION_ID.to_string(),
        owner: OWNER.to_string(),
        begin: test_begin(),
        end: test_end(),
        title: "Genomics workshop".to_string(),
        description: "Hands-on session".to_string(),
        image_type: "centos7".to_string(),
        sites,
    }
}

#[cfg(test)]
pub fn create_test_user() -> UserData {
    UserData {
        firstname: "alice".to_string(),
        email_address: "alice@example.org".to_string(),
        public_key: "ssh-rsa AAAAuser alice@laptop".to_string(),
    }
}

#[cfg(test)]
pub fn create_test_site_description() -> SiteDescription {
    SiteDescription {
        site_hostname: Some("rocks.example.org".to_string()),
        pragma_boot_path: Some("/opt/pragma_boot".to_string()),
        pragma_boot_version: Some("2".to_string()),
        python_path: None,
        temp_dir: Some("/var/run/pcc".to_string()),
        username: Some("pcc".to_string()),
    }
}

/// Provisioner fake counting calls
#[cfg(test)]
#[derive(Debug, Default)]
pub struct FakeProvisioner {
    pub starts: Mutex<Vec<String>>,
    pub stops: Mutex<Vec<String>>,
    pub fail_start: Mutex<bool>,
    pub fail_stop: Mutex<bool>,
}

#[cfg(test)]
impl FakeProvisioner {
    pub fn starts(&self) -> usize {
        self.starts.lock().unwrap().len()
    }

    pub fn stops(&self) -> usize {
        self.stops.lock().unwrap().len()
    }

    fn failure(site_id: &str) -> ProvisionError {
        ProvisionError::RemoteCommandFailure {
            host: "rocks.example.org".to_string(),
            command: format!("pragma for site {}", site_id),
            code: 255,
            stderr: "Connection refused".to_string(),
        }
    }
}

#[cfg(test)]
#[async_trait::async_trait]
impl ClusterProvisioner for FakeProvisioner {
    async fn start(&self, _dag: &DescriptorDir, site_id: &str) -> Result<(), ProvisionError> {
        self.starts.lock().unwrap().push(site_id.to_string());
        if *self.fail_start.lock().unwrap() {
            return Err(Self::failure(site_id));
        }
        Ok(())
    }

    async fn stop(&self, _dag: &DescriptorDir, site_id: &str) -> Result<(), ProvisionError> {
        self.stops.lock().unwrap().push(site_id.to_string());
        if *self.fail_stop.lock().unwrap() {
            return Err(Self::failure(site_id));
        }
        Ok(())
    }
}

/// Probe fake answering with a fixed report
#[cfg(test)]
#[derive(Debug, Default)]
pub struct FakeProbe {
    pub report: Mutex<Option<RemoteStatusReport>>,
    pub checks: Mutex<usize>,
}

#[cfg(test)]
impl FakeProbe {
    /// Report every cluster up at `endpoint`
    pub fn converge(&self, endpoint: &str) {
        *self.report.lock().unwrap() = Some(RemoteStatusReport {
            active: vec!["rocks-201".to_string()],
            inactive: Vec::new(),
            endpoint: Some(endpoint.to_string()),
            summary: format!("You may now log into the frontend.  E.g.,\n\n    # ssh root@{}\n", endpoint),
        });
    }

    pub fn checks(&self) -> usize {
        *self.checks.lock().unwrap()
    }
}

#[cfg(test)]
#[async_trait::async_trait]
impl StatusProbe for FakeProbe {
    async fn check(
        &self,
        _dag: &DescriptorDir,
        _site_id: &str,
    ) -> Result<Option<RemoteStatusReport>, ProvisionError> {
        *self.checks.lock().unwrap() += 1;
        Ok(self.report.lock().unwrap().clone())
    }
}

/// A reconciler and handles to every fake behind it
#[cfg(test)]
pub struct TestHarness {
    pub reconciler: Reconciler,
    pub booking: MockBookingClient,
    pub provisioner: Arc<FakeProvisioner>,
    pub probe: Arc<FakeProbe>,
    pub dag_root: std::path::PathBuf,
    pub tmp: TempDir,
}

#[cfg(test)]
pub fn create_test_harness() -> TestHarness {
    let tmp = tempfile::tempdir().unwrap();
    let key = tmp.path().join("id_rsa.pub");
    std::fs::write(&key, "ssh-rsa AAAAoperator root@scheduler\n").unwrap();
    let dag_root = tmp.path().join("dags");

    let booking = MockBookingClient::new("http://test-booking");
    booking.add_user(OWNER, create_test_user());
    let provisioner = Arc::new(FakeProvisioner::default());
    let probe = Arc::new(FakeProbe::default());

    let reconciler = Reconciler::new(
        booking.clone(),
        provisioner.clone(),
        probe.clone(),
        DescriptorWriter::new(&dag_root, key),
        Duration::seconds(SHUTDOWN_LEAD_SECS),
        Duration::hours(1),
    );

    TestHarness {
        reconciler,
        booking,
        provisioner,
        probe,
        dag_root,
        tmp,
    }
}
