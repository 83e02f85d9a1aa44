//! Virtual Cluster Provisioning
//!
//! Everything the reservation controller does on disk and over SSH:
//!
//! - [`descriptor`]: renders the `dag-{reservation}` descriptor directory
//! - [`provisioner`]: launches and tears down clusters with `pragma_boot`
//! - [`probe`]: scrapes `pragma_boot` logs and listings into a [`RemoteStatusReport`]
//! - [`shell`]: the SSH/SCP channel behind a [`RemoteShell`] trait
//!
//! The text formats of the provisioning tool never leave this crate; callers
//! only see the [`ClusterProvisioner`] and [`StatusProbe`] traits.

pub mod descriptor;
pub mod error;
pub mod probe;
pub mod provisioner;
pub mod shell;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;
#[cfg(test)]
mod test_utils;

pub use descriptor::{DescriptorDir, DescriptorWriter, GraphJob, NodeDescriptor, ProvisioningArgs};
pub use error::{DescriptorError, ProvisionError};
pub use probe::{RemoteStatusReport, StatusProbe};
pub use provisioner::{ClusterProvisioner, PragmaBoot, memory_per_node};
pub use shell::{CommandOutput, OpenSshShell, RemoteShell, RemoteTarget};
#[cfg(any(test, feature = "test-util"))]
pub use mock::{MockRemoteShell, ShellCall};
