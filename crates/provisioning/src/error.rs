//! Provisioning errors
//!
//! Every error here is scoped to a single reservation site: the poll loop
//! logs it and moves on to the next site.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while rendering or reading a descriptor directory
#[derive(Debug, Error)]
pub enum DescriptorError {
    /// A site or site description lacks an attribute needed for the descriptor
    #[error("site {site_id} is missing required attribute '{attribute}'")]
    MissingAttribute {
        site_id: String,
        attribute: &'static str,
    },

    /// A descriptor file exists but cannot be understood
    #[error("malformed descriptor {}: {reason}", path.display())]
    Malformed { path: PathBuf, reason: String },

    /// The operator public key could not be read
    #[error("cannot read operator public key {}: {source}", path.display())]
    OperatorKey {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Template rendering error
    #[error("template error: {0}")]
    Template(#[from] tera::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by remote provisioning operations
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// A remote command (copy, start, stop, list) exited non-zero
    ///
    /// Unreachable hosts and provisioning tool failures are the same kind.
    #[error("remote command on {host} failed with exit code {code}: `{command}`: {stderr}")]
    RemoteCommandFailure {
        host: String,
        command: String,
        code: i32,
        stderr: String,
    },

    /// The provisioning tool log names no allocated cluster yet
    #[error("no cluster allocated yet for site {0}")]
    ClusterNotAllocated(String),

    /// The descriptor names a provisioning tool version this crate cannot drive
    #[error("unknown or unsupported pragma_boot version '{0}'")]
    UnsupportedToolVersion(String),

    /// A local OpenSSH binary could not be located
    #[error("Cannot find `{0}` binary. Make sure that OpenSSH is installed.")]
    MissingBinary(&'static str),

    /// Descriptor error
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
