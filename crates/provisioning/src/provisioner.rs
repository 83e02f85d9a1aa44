//! Cluster start and stop through `pragma_boot`
//!
//! Starting a site copies the descriptor directory to the provisioning host
//! (unless the host is this machine) and launches `pragma boot` in the
//! background. Stopping reads the allocated cluster name from the copied
//! back provisioning log and runs `pragma shutdown` followed by
//! `pragma clean`.

use crate::descriptor::{
    DescriptorDir, HOSTNAME_FILE, NodeDescriptor, ProvisioningArgs, TOOL_LOG_FILE,
};
use crate::error::ProvisionError;
use crate::probe::allocated_cluster;
use crate::shell::{RemoteShell, RemoteTarget};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// The only `pragma_boot` release this crate can drive
pub const SUPPORTED_TOOL_VERSION: &str = "2";

/// Output of the background SSH session that launched the provisioning tool
pub const LAUNCH_OUTPUT_FILE: &str = "ssh.out";
/// Captured output of `pragma shutdown`
pub const SHUTDOWN_OUTPUT_FILE: &str = "pragma_shutdown";
/// Captured output of `pragma clean`
pub const CLEAN_OUTPUT_FILE: &str = "pragma_clean";

/// Starts and stops the virtual cluster of one reservation site
#[async_trait::async_trait]
pub trait ClusterProvisioner: Send + Sync {
    /// Launch provisioning for a site whose descriptor has been written
    async fn start(&self, dag: &DescriptorDir, site_id: &str) -> Result<(), ProvisionError>;

    /// Tear down and clean the site's cluster
    ///
    /// A site that was never launched has nothing to stop and succeeds.
    async fn stop(&self, dag: &DescriptorDir, site_id: &str) -> Result<(), ProvisionError>;
}

/// Memory per virtual machine, in MiB
///
/// `memory_gb` is the reservation total, shared by `cpus` compute nodes and
/// one frontend. The per-node share is rounded to whole GiB, halves up.
pub fn memory_per_node(memory_gb: u64, cpus: u64) -> u64 {
    let nodes = cpus + 1;
    1024 * ((2 * memory_gb + nodes) / (2 * nodes))
}

/// `pragma_boot` driven over a [`RemoteShell`]
#[derive(Debug, Clone)]
pub struct PragmaBoot {
    pub(crate) shell: Arc<dyn RemoteShell>,
    local_hostname: String,
    settle_delay: Duration,
}

impl PragmaBoot {
    /// # Arguments
    /// * `shell` - channel to the provisioning hosts
    /// * `settle_delay` - pause after launching before the call returns
    pub fn new(shell: Arc<dyn RemoteShell>, settle_delay: Duration) -> Self {
        let local_hostname = gethostname::gethostname().to_string_lossy().into_owned();
        Self::with_local_hostname(shell, settle_delay, local_hostname)
    }

    /// Same as [`new`](Self::new) with an explicit name for this machine
    pub fn with_local_hostname(
        shell: Arc<dyn RemoteShell>,
        settle_delay: Duration,
        local_hostname: impl Into<String>,
    ) -> Self {
        Self {
            shell,
            local_hostname: local_hostname.into(),
            settle_delay,
        }
    }

    fn is_local(&self, host: &str) -> bool {
        host == self.local_hostname
    }

    /// Copy the descriptor directory to the node's host
    async fn stage(
        &self,
        dag: &DescriptorDir,
        node: &NodeDescriptor,
        target: &RemoteTarget,
    ) -> Result<(), ProvisionError> {
        let remote_dag = dag.remote_path(&node.var_run);
        debug!("Copying dir {} over to {}:{}", dag.path().display(), target.host, remote_dag);

        let mkdir = format!("mkdir -p {}", node.var_run);
        self.shell.run(target, &mkdir).await?.check(&target.host, &mkdir)?;

        let copy = format!("scp -r {} {}:{}", dag.path().display(), target, remote_dag);
        self.shell
            .copy_to(target, dag.path(), &remote_dag)
            .await?
            .check(&target.host, &copy)?;
        Ok(())
    }

    /// Build the `pragma boot` command line for a node
    fn boot_command(
        &self,
        dag: &DescriptorDir,
        node: &NodeDescriptor,
    ) -> Result<String, ProvisionError> {
        let args = ProvisioningArgs::load(&dag.node_args_file(&node.site_id))?;
        let local_dag = dag.path().display().to_string();
        let remote_dag = dag.remote_path(&node.var_run);

        let cpus = args.number("num_cpus")?;
        let mem = memory_per_node(args.number("mem")?, cpus);
        let key = args.get("key")?.replace(&local_dag, &remote_dag);
        let logfile = args.get("logfile")?.replace(&local_dag, &remote_dag);

        let boot = node.tool_command(&format!(
            "boot {} {} key={} loglevel=DEBUG logfile={} mem={}",
            args.get("vcname")?,
            cpus,
            key,
            logfile,
            mem
        ));
        Ok(format!("cd {}; {}", remote_dag, boot))
    }

    /// Run a tool verb against a cluster, keeping its output in the node directory
    async fn cluster_command(
        &self,
        node: &NodeDescriptor,
        target: &RemoteTarget,
        verb: &str,
        cluster: &str,
        output_file: &str,
    ) -> Result<(), ProvisionError> {
        let command = node.tool_command(&format!("{} {}", verb, cluster));
        debug!("Running {} for {}: {}", verb, cluster, command);
        let output = self.shell.run(target, &command).await?;
        fs::write(node.dir.join(output_file), &output.stdout)?;
        debug!("{}", output.stdout.trim());
        output.check(&target.host, &command)?;
        Ok(())
    }
}

pub(crate) fn check_version(node: &NodeDescriptor) -> Result<(), ProvisionError> {
    if node.tool_version == SUPPORTED_TOOL_VERSION {
        Ok(())
    } else {
        Err(ProvisionError::UnsupportedToolVersion(node.tool_version.clone()))
    }
}

/// Host recorded by a previous launch, if any
pub(crate) fn launched_host(node_dir: &Path) -> Result<Option<String>, ProvisionError> {
    match fs::read_to_string(node_dir.join(HOSTNAME_FILE)) {
        Ok(host) => Ok(Some(host.trim().to_string()).filter(|h| !h.is_empty())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[async_trait::async_trait]
impl ClusterProvisioner for PragmaBoot {
    async fn start(&self, dag: &DescriptorDir, site_id: &str) -> Result<(), ProvisionError> {
        let node = NodeDescriptor::load(&dag.node_descriptor_file(site_id), site_id)?;
        check_version(&node)?;
        let target = RemoteTarget::new(&node.username, &node.host);

        if !self.is_local(&node.host) {
            self.stage(dag, &node, &target).await?;
        }

        let command = self.boot_command(dag, &node)?;
        info!("Running pragma_boot for site {} on {}: {}", site_id, node.host, command);
        self.shell
            .launch(&target, &command, &dag.path().join(LAUNCH_OUTPUT_FILE))
            .await?
            .check(&node.host, &command)?;

        fs::write(node.dir.join(HOSTNAME_FILE), &node.host)?;

        if !self.settle_delay.is_zero() {
            debug!("Sleeping {} seconds", self.settle_delay.as_secs());
            tokio::time::sleep(self.settle_delay).await;
        }
        Ok(())
    }

    async fn stop(&self, dag: &DescriptorDir, site_id: &str) -> Result<(), ProvisionError> {
        let node_dir = dag.node_dir(site_id);
        if !node_dir.is_dir() {
            info!("No descriptor for site {}, nothing to stop", site_id);
            return Ok(());
        }
        let Some(host) = launched_host(&node_dir)? else {
            info!("Site {} was never launched, nothing to stop", site_id);
            return Ok(());
        };

        let node = NodeDescriptor::load(&dag.node_descriptor_file(site_id), site_id)?;
        let target = RemoteTarget::new(&node.username, &host);

        let remote_log = format!("{}/{}", dag.remote_path(&node.var_run), TOOL_LOG_FILE);
        let local_log = node_dir.join(TOOL_LOG_FILE);
        match self.shell.copy_from(&target, &remote_log, &local_log).await {
            Ok(output) if output.success() => {}
            Ok(output) => warn!(
                "Could not copy {} back from {}: {}",
                remote_log,
                host,
                output.stderr.trim()
            ),
            Err(e) => warn!("Could not copy {} back from {}: {}", remote_log, host, e),
        }

        let log = fs::read_to_string(&local_log).unwrap_or_default();
        let cluster = allocated_cluster(&log)
            .ok_or_else(|| ProvisionError::ClusterNotAllocated(site_id.to_string()))?;

        info!("Shutting down virtual cluster {} on {}", cluster, host);
        self.cluster_command(&node, &target, "shutdown", &cluster, SHUTDOWN_OUTPUT_FILE)
            .await?;
        info!("Cleaning virtual cluster {} on {}", cluster, host);
        self.cluster_command(&node, &target, "clean", &cluster, CLEAN_OUTPUT_FILE)
            .await?;
        Ok(())
    }
}
