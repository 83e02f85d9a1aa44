//! Test utilities for the provisioner and probe
//!
//! Builds a descriptor directory in a temporary root from a small reservation.

use crate::descriptor::{DescriptorDir, DescriptorWriter};
use booking_client::{Reservation, Site, SiteDescription, Status, UserData};
use chrono::{TimeZone, Utc};
use std::fs;
use tempfile::TempDir;

pub const RESERVATION_ID: &str = "42";
pub const HOST: &str = "rocks.example.org";
pub const REMOTE_DAG: &str = "/var/run/pcc/dag-42";

pub fn create_test_site(site_id: &str, cpus: u64, memory: u64) -> Site {
    Site {
        site_id: site_id.to_string(),
        site_name: format!("site-{}", site_id),
        cpu: Some(cpus),
        memory: Some(memory),
        status: Status::Created,
        admin_description: None,
    }
}

pub fn create_test_reservation(sites: Vec<Site>) -> Reservation {
    Reservation {
        reservation_id: RESERVATION_ID.to_string(),
        owner: "alice".to_string(),
        begin: Utc.with_ymd_and_hms(2016, 5, 1, 10, 0, 0).unwrap(),
        end: Utc.with_ymd_and_hms(2016, 5, 2, 10, 0, 0).unwrap(),
        title: "Test".to_string(),
        description: String::new(),
        image_type: "centos7".to_string(),
        sites,
    }
}

pub fn create_test_site_description(host: &str, version: &str) -> SiteDescription {
    SiteDescription {
        site_hostname: Some(host.to_string()),
        pragma_boot_path: Some("/opt/pragma_boot".to_string()),
        pragma_boot_version: Some(version.to_string()),
        python_path: Some("/opt/python/bin/python".to_string()),
        temp_dir: Some("/var/run/pcc".to_string()),
        username: Some("pcc".to_string()),
    }
}

/// Write descriptors for every site of `reservation` into a fresh temp root
pub fn write_test_descriptor(
    reservation: &Reservation,
    desc: &SiteDescription,
) -> (TempDir, DescriptorDir) {
    let tmp = tempfile::tempdir().unwrap();
    let key = tmp.path().join("id_rsa.pub");
    fs::write(&key, "ssh-rsa AAAAoperator root@scheduler\n").unwrap();
    let writer = DescriptorWriter::new(tmp.path().join("dags"), key);
    let user = UserData {
        firstname: "alice".to_string(),
        email_address: "alice@example.org".to_string(),
        public_key: "ssh-rsa AAAAuser alice@laptop".to_string(),
    };

    let mut dag = None;
    for site in &reservation.sites {
        dag = Some(writer.write(reservation, &user, site, desc).unwrap());
    }
    (tmp, dag.expect("reservation has at least one site"))
}

/// Mark a site as launched on `host`
pub fn mark_launched(dag: &DescriptorDir, site_id: &str, host: &str) {
    fs::write(dag.node_dir(site_id).join(crate::descriptor::HOSTNAME_FILE), host).unwrap();
}
