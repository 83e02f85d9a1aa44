//! Remote command channel
//!
//! Provisioning hosts are driven over the local OpenSSH client binaries.
//! The [`RemoteShell`] trait keeps the provisioner and probe independent of
//! the transport so tests can script remote answers.

use crate::error::ProvisionError;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::process::Command;
use tracing::debug;

/// SSH port probed for reachability
const SSH_PORT: u16 = 22;

/// `user@host` login on a provisioning host
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemoteTarget {
    pub user: String,
    pub host: String,
}

impl RemoteTarget {
    pub fn new(user: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            host: host.into(),
        }
    }
}

impl fmt::Display for RemoteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.user, self.host)
    }
}

/// Exit code and captured output of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `-1` when the process was killed by a signal
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }

    /// Turn a non-zero exit into [`ProvisionError::RemoteCommandFailure`]
    pub fn check(self, host: &str, command: &str) -> Result<Self, ProvisionError> {
        if self.success() {
            Ok(self)
        } else {
            Err(ProvisionError::RemoteCommandFailure {
                host: host.to_string(),
                command: command.to_string(),
                code: self.code,
                stderr: self.stderr.trim().to_string(),
            })
        }
    }

    fn from_output(output: std::process::Output) -> Self {
        Self {
            code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }
    }
}

/// Transport used to run commands on and copy files to provisioning hosts
///
/// Methods only fail with `Err` when the local command cannot be spawned;
/// a remote failure is reported through the returned [`CommandOutput`].
#[async_trait::async_trait]
pub trait RemoteShell: Send + Sync + fmt::Debug {
    /// Run `command` on the target and wait for it
    async fn run(&self, target: &RemoteTarget, command: &str) -> Result<CommandOutput, ProvisionError>;

    /// Start `command` on the target in the background (`ssh -f`)
    ///
    /// Standard output and error of the SSH session are written to `output`.
    /// The returned exit code is the one of the SSH session setup.
    async fn launch(
        &self,
        target: &RemoteTarget,
        command: &str,
        output: &Path,
    ) -> Result<CommandOutput, ProvisionError>;

    /// Recursively copy a local path to `remote` on the target
    async fn copy_to(
        &self,
        target: &RemoteTarget,
        local: &Path,
        remote: &str,
    ) -> Result<CommandOutput, ProvisionError>;

    /// Copy a remote file back to a local path
    async fn copy_from(
        &self,
        target: &RemoteTarget,
        remote: &str,
        local: &Path,
    ) -> Result<CommandOutput, ProvisionError>;

    /// Whether `host` answers on the SSH port with an SSH banner
    async fn accepts_ssh(&self, host: &str) -> bool;
}

/// [`RemoteShell`] backed by the local `ssh` and `scp` binaries
#[derive(Debug, Clone)]
pub struct OpenSshShell {
    ssh: PathBuf,
    scp: PathBuf,
    connect_timeout: Duration,
    reachability_timeout: Duration,
    ssh_port: u16,
}

impl OpenSshShell {
    pub fn new(
        ssh: PathBuf,
        scp: PathBuf,
        connect_timeout: Duration,
        reachability_timeout: Duration,
    ) -> Self {
        Self {
            ssh,
            scp,
            connect_timeout,
            reachability_timeout,
            ssh_port: SSH_PORT,
        }
    }

    /// Probe reachability on another port than 22
    pub fn with_ssh_port(mut self, port: u16) -> Self {
        self.ssh_port = port;
        self
    }

    /// Locate `ssh` and `scp` on `PATH` unless explicit paths are given
    pub fn locate(
        ssh: Option<PathBuf>,
        scp: Option<PathBuf>,
        connect_timeout: Duration,
        reachability_timeout: Duration,
    ) -> Result<Self, ProvisionError> {
        let ssh = match ssh {
            Some(path) => path,
            None => which::which("ssh").map_err(|_| ProvisionError::MissingBinary("ssh"))?,
        };
        let scp = match scp {
            Some(path) => path,
            None => which::which("scp").map_err(|_| ProvisionError::MissingBinary("scp"))?,
        };
        Ok(Self::new(ssh, scp, connect_timeout, reachability_timeout))
    }

    fn command(&self, program: &Path) -> Command {
        let mut cmd = Command::new(program);
        cmd.arg("-o")
            .arg("BatchMode=yes")
            .arg("-o")
            .arg(format!("ConnectTimeout={}", self.connect_timeout.as_secs()))
            .stdin(Stdio::null())
            .kill_on_drop(true);
        cmd
    }

    async fn output(mut cmd: Command) -> Result<CommandOutput, ProvisionError> {
        debug!("Running {:?}", cmd);
        let output = cmd.output().await?;
        Ok(CommandOutput::from_output(output))
    }
}

#[async_trait::async_trait]
impl RemoteShell for OpenSshShell {
    async fn run(&self, target: &RemoteTarget, command: &str) -> Result<CommandOutput, ProvisionError> {
        let mut cmd = self.command(&self.ssh);
        cmd.arg(target.to_string()).arg(command);
        Self::output(cmd).await
    }

    async fn launch(
        &self,
        target: &RemoteTarget,
        command: &str,
        output: &Path,
    ) -> Result<CommandOutput, ProvisionError> {
        let stdout = std::fs::File::create(output)?;
        let stderr = stdout.try_clone()?;

        let mut cmd = self.command(&self.ssh);
        cmd.arg("-f")
            .arg(target.to_string())
            .arg(command)
            .stdout(stdout)
            .stderr(stderr)
            .kill_on_drop(false);
        debug!("Launching {:?}", cmd);
        let status = cmd.status().await?;
        Ok(CommandOutput {
            code: status.code().unwrap_or(-1),
            stdout: String::new(),
            stderr: format!("see {}", output.display()),
        })
    }

    async fn copy_to(
        &self,
        target: &RemoteTarget,
        local: &Path,
        remote: &str,
    ) -> Result<CommandOutput, ProvisionError> {
        let mut cmd = self.command(&self.scp);
        cmd.arg("-r")
            .arg(local)
            .arg(format!("{}:{}", target, remote));
        Self::output(cmd).await
    }

    async fn copy_from(
        &self,
        target: &RemoteTarget,
        remote: &str,
        local: &Path,
    ) -> Result<CommandOutput, ProvisionError> {
        let mut cmd = self.command(&self.scp);
        cmd.arg(format!("{}:{}", target, remote)).arg(local);
        Self::output(cmd).await
    }

    async fn accepts_ssh(&self, host: &str) -> bool {
        let probe = async {
            let mut stream = TcpStream::connect((host, self.ssh_port)).await?;
            let mut banner = [0u8; 4];
            stream.read_exact(&mut banner).await?;
            Ok::<_, std::io::Error>(&banner == b"SSH-")
        };
        match tokio::time::timeout(self.reachability_timeout, probe).await {
            Ok(Ok(accepted)) => accepted,
            Ok(Err(e)) => {
                debug!("SSH probe of {} failed: {}", host, e);
                false
            }
            Err(_) => {
                debug!("SSH probe of {} timed out", host);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    #[test]
    fn test_target_display() {
        let target = RemoteTarget::new("pcc", "rocks.example.org");
        assert_eq!(target.to_string(), "pcc@rocks.example.org");
    }

    #[test]
    fn test_check_non_zero_exit() {
        let output = CommandOutput {
            code: 255,
            stdout: String::new(),
            stderr: "ssh: connect to host rocks port 22: No route to host\n".to_string(),
        };
        match output.check("rocks", "mkdir -p /var/run/pcc") {
            Err(ProvisionError::RemoteCommandFailure { host, code, stderr, .. }) => {
                assert_eq!(host, "rocks");
                assert_eq!(code, 255);
                assert!(stderr.ends_with("No route to host"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(CommandOutput::default().check("rocks", "true").is_ok());
    }

    fn shell(reachability_timeout: Duration) -> OpenSshShell {
        OpenSshShell::new(
            PathBuf::from("ssh"),
            PathBuf::from("scp"),
            Duration::from_secs(1),
            reachability_timeout,
        )
    }

    #[tokio::test]
    async fn test_ssh_banner_accepted() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"SSH-2.0-OpenSSH_9.6\r\n").await.unwrap();
        });

        let shell = shell(Duration::from_secs(2)).with_ssh_port(port);
        assert!(shell.accepts_ssh("127.0.0.1").await);
    }

    #[tokio::test]
    async fn test_other_banner_rejected() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"HTTP/1.1 400 Bad Request\r\n").await.unwrap();
        });

        let shell = shell(Duration::from_secs(2)).with_ssh_port(port);
        assert!(!shell.accepts_ssh("127.0.0.1").await);
    }

    #[tokio::test]
    async fn test_closed_port_rejected() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let shell = shell(Duration::from_millis(500)).with_ssh_port(port);
        assert!(!shell.accepts_ssh("127.0.0.1").await);
    }
}
