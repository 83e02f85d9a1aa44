//! Cluster liveness probe
//!
//! Reads what `pragma_boot` reports about the clusters of a reservation and
//! turns it into a [`RemoteStatusReport`]. All scraping of the tool's log
//! and `list cluster` output happens here; a text that does not match means
//! "not yet", never an error.

use crate::descriptor::{DescriptorDir, NodeDescriptor, TOOL_LOG_FILE};
use crate::error::ProvisionError;
use crate::provisioner::{PragmaBoot, check_version, launched_host};
use crate::shell::RemoteTarget;
use regex::Regex;
use std::fs;
use std::sync::LazyLock;
use tracing::{debug, info, warn};

/// Captured output of `pragma list cluster`
pub const LIST_OUTPUT_FILE: &str = "pragma_list_cluster";

const LOGIN_INFO: &str = r#"

    You may now log into the frontend.  E.g.,

    # ssh root@{{ fqdn }}
"#;

static ALLOCATED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Allocated cluster (\S+)").expect("valid log pattern"));
static DEPLOYED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Successfully deployed frontend (\S+)").expect("valid log pattern")
});
static RUNNING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Running|active").expect("valid state pattern"));
static TRAILING_IP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d{1,3}(?:\.\d{1,3}){3})\s*$").expect("valid address pattern")
});

/// Liveness of a reservation's clusters, built fresh on every check
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteStatusReport {
    pub active: Vec<String>,
    pub inactive: Vec<String>,
    /// Public address of the frontend
    pub endpoint: Option<String>,
    /// Login instructions for the reservation owner
    pub summary: String,
}

/// Reports whether every cluster of a reservation is up
#[async_trait::async_trait]
pub trait StatusProbe: Send + Sync {
    /// Check every site listed in the descriptor's job graph
    ///
    /// # Returns
    /// * `Ok(Some(report))` - every node of every site is active and the
    ///   frontend accepts SSH connections
    /// * `Ok(None)` - not converged yet
    /// * `Err(ProvisionError)` - the local descriptor is unusable
    async fn check(
        &self,
        dag: &DescriptorDir,
        site_id: &str,
    ) -> Result<Option<RemoteStatusReport>, ProvisionError>;
}

/// Name of the cluster allocated by the provisioning tool, from its log
pub fn allocated_cluster(log: &str) -> Option<String> {
    ALLOCATED
        .captures(log)
        .or_else(|| DEPLOYED.captures(log))
        .map(|caps| caps[1].to_string())
}

/// One row of a `list cluster` answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedNode {
    pub name: String,
    pub active: bool,
}

/// Parsed `list cluster` answer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterListing {
    pub nodes: Vec<ListedNode>,
    /// First public address found on an active row
    pub public_ip: Option<String>,
}

impl ClusterListing {
    pub fn all_active(&self) -> bool {
        !self.nodes.is_empty() && self.nodes.iter().all(|n| n.active)
    }
}

/// Parse `list cluster` output; the first line is a header
pub fn parse_cluster_listing(text: &str) -> ClusterListing {
    let mut listing = ClusterListing::default();
    for line in text.lines().skip(1) {
        let Some(name) = line.split_whitespace().next() else {
            continue;
        };
        let active = RUNNING.is_match(line);
        if active && listing.public_ip.is_none() {
            listing.public_ip = TRAILING_IP.captures(line).map(|caps| caps[1].to_string());
        }
        listing.nodes.push(ListedNode {
            name: name.to_string(),
            active,
        });
    }
    listing
}

fn login_summary(endpoint: &str) -> Result<String, ProvisionError> {
    let mut ctx = tera::Context::new();
    ctx.insert("fqdn", endpoint);
    tera::Tera::one_off(LOGIN_INFO, &ctx, false)
        .map_err(|e| ProvisionError::Descriptor(e.into()))
}

/// Outcome of checking one site
struct SiteState {
    active: Vec<String>,
    inactive: Vec<String>,
    endpoint: Option<String>,
}

impl SiteState {
    fn not_started(label: String) -> Self {
        Self {
            active: Vec::new(),
            inactive: vec![label],
            endpoint: None,
        }
    }
}

impl PragmaBoot {
    async fn check_site(
        &self,
        dag: &DescriptorDir,
        node: &NodeDescriptor,
    ) -> Result<SiteState, ProvisionError> {
        let label = format!("vc{}", node.site_id);
        let Some(host) = launched_host(&node.dir)? else {
            debug!("Site {} has not been launched", node.site_id);
            return Ok(SiteState::not_started(label));
        };
        let target = RemoteTarget::new(&node.username, &host);

        let remote_log = format!("{}/{}", dag.remote_path(&node.var_run), TOOL_LOG_FILE);
        let local_log = node.dir.join(TOOL_LOG_FILE);
        let copied = self.shell.copy_from(&target, &remote_log, &local_log).await?;
        if !copied.success() {
            debug!("Could not copy {} back from {}", remote_log, host);
            return Ok(SiteState::not_started(label));
        }

        let log = fs::read_to_string(&local_log).unwrap_or_default();
        let Some(cluster) = allocated_cluster(&log) else {
            debug!("No cluster allocated yet for site {}", node.site_id);
            return Ok(SiteState::not_started(label));
        };

        let command = node.tool_command(&format!("list cluster {}", cluster));
        debug!("{}", command);
        let output = self.shell.run(&target, &command).await?;
        fs::write(node.dir.join(LIST_OUTPUT_FILE), &output.stdout)?;
        if !output.success() {
            debug!("Listing cluster {} failed: {}", cluster, output.stderr.trim());
            return Ok(SiteState::not_started(cluster));
        }

        let listing = parse_cluster_listing(&output.stdout);
        info!("{}", output.stdout.trim());
        if listing.nodes.is_empty() {
            return Ok(SiteState::not_started(cluster));
        }

        let (mut active, mut inactive): (Vec<String>, Vec<String>) = (Vec::new(), Vec::new());
        for row in &listing.nodes {
            if row.active {
                active.push(row.name.clone());
            } else {
                inactive.push(row.name.clone());
            }
        }

        let reachable = match &listing.public_ip {
            Some(ip) => {
                info!("Found public IP {}", ip);
                let accepted = self.shell.accepts_ssh(ip).await;
                if accepted {
                    info!("SSH is active on {}", ip);
                } else {
                    info!("SSH is not yet active on {}", ip);
                }
                accepted
            }
            None => false,
        };
        if !reachable {
            active.retain(|name| name != &cluster);
            if !inactive.contains(&cluster) {
                inactive.push(cluster);
            }
        }

        Ok(SiteState {
            active,
            inactive,
            endpoint: listing.public_ip,
        })
    }
}

#[async_trait::async_trait]
impl StatusProbe for PragmaBoot {
    async fn check(
        &self,
        dag: &DescriptorDir,
        site_id: &str,
    ) -> Result<Option<RemoteStatusReport>, ProvisionError> {
        if !dag.graph_file().is_file() {
            warn!("No job graph in {}", dag.path().display());
            return Ok(None);
        }
        let jobs = dag.jobs()?;
        if !jobs.iter().any(|job| job.site_id == site_id) {
            warn!("Site {} is not listed in {}", site_id, dag.graph_file().display());
            return Ok(None);
        }

        let mut report = RemoteStatusReport::default();
        for job in &jobs {
            let node = NodeDescriptor::for_job(job)?;
            check_version(&node)?;
            let state = self.check_site(dag, &node).await?;
            report.active.extend(state.active);
            report.inactive.extend(state.inactive);
            if report.endpoint.is_none() {
                report.endpoint = state.endpoint;
            }
        }

        info!("Active clusters: {:?}", report.active);
        info!("Inactive clusters: {:?}", report.inactive);

        if !report.inactive.is_empty() {
            return Ok(None);
        }
        let Some(endpoint) = report.endpoint.clone() else {
            return Ok(None);
        };
        report.summary = login_summary(&endpoint)?;
        Ok(Some(report))
    }
}
