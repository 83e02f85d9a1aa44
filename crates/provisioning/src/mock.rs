//! Mock RemoteShell for unit testing
//!
//! Answers remote commands from a script instead of running `ssh`, so the
//! provisioner and probe can be tested without a provisioning host.

use crate::error::ProvisionError;
use crate::shell::{CommandOutput, RemoteShell, RemoteTarget};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// A call received by the mock
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellCall {
    Run { target: String, command: String },
    Launch { target: String, command: String, output: PathBuf },
    CopyTo { target: String, local: PathBuf, remote: String },
    CopyFrom { target: String, remote: String, local: PathBuf },
    Probe { host: String },
}

/// Mock RemoteShell for testing
///
/// `run` answers with the first scripted response whose pattern is a
/// substring of the command, or with an empty success. `copy_from` serves
/// files registered with [`set_remote_file`](Self::set_remote_file).
#[derive(Debug, Clone, Default)]
pub struct MockRemoteShell {
    responses: Arc<Mutex<Vec<(String, CommandOutput)>>>,
    remote_files: Arc<Mutex<HashMap<String, String>>>,
    reachable: Arc<Mutex<HashSet<String>>>,
    fail_copies: Arc<Mutex<bool>>,
    fail_launch: Arc<Mutex<bool>>,
    calls: Arc<Mutex<Vec<ShellCall>>>,
}

impl MockRemoteShell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer commands containing `pattern` with `stdout` and exit code `code`
    pub fn respond(&self, pattern: impl Into<String>, code: i32, stdout: impl Into<String>) {
        self.responses.lock().unwrap().push((
            pattern.into(),
            CommandOutput {
                code,
                stdout: stdout.into(),
                stderr: if code == 0 { String::new() } else { "remote failure".to_string() },
            },
        ));
    }

    /// Serve `content` for copies of the remote path `remote`
    pub fn set_remote_file(&self, remote: impl Into<String>, content: impl Into<String>) {
        self.remote_files.lock().unwrap().insert(remote.into(), content.into());
    }

    /// Accept SSH connections on `host`
    pub fn set_reachable(&self, host: impl Into<String>) {
        self.reachable.lock().unwrap().insert(host.into());
    }

    /// Fail every `copy_to` with a non-zero exit
    pub fn fail_copies(&self, fail: bool) {
        *self.fail_copies.lock().unwrap() = fail;
    }

    /// Fail every `launch` with a non-zero exit
    pub fn fail_launch(&self, fail: bool) {
        *self.fail_launch.lock().unwrap() = fail;
    }

    /// Calls received so far
    pub fn calls(&self) -> Vec<ShellCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Commands passed to `run` so far
    pub fn commands(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                ShellCall::Run { command, .. } => Some(command),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: ShellCall) {
        self.calls.lock().unwrap().push(call);
    }

    fn exit(code: i32) -> CommandOutput {
        CommandOutput {
            code,
            stdout: String::new(),
            stderr: if code == 0 { String::new() } else { "remote failure".to_string() },
        }
    }
}

#[async_trait::async_trait]
impl RemoteShell for MockRemoteShell {
    async fn run(&self, target: &RemoteTarget, command: &str) -> Result<CommandOutput, ProvisionError> {
        self.record(ShellCall::Run {
            target: target.to_string(),
            command: command.to_string(),
        });
        let responses = self.responses.lock().unwrap();
        Ok(responses
            .iter()
            .find(|(pattern, _)| command.contains(pattern.as_str()))
            .map(|(_, output)| output.clone())
            .unwrap_or_default())
    }

    async fn launch(
        &self,
        target: &RemoteTarget,
        command: &str,
        output: &Path,
    ) -> Result<CommandOutput, ProvisionError> {
        self.record(ShellCall::Launch {
            target: target.to_string(),
            command: command.to_string(),
            output: output.to_path_buf(),
        });
        std::fs::write(output, "")?;
        let failed = *self.fail_launch.lock().unwrap();
        Ok(Self::exit(if failed { 255 } else { 0 }))
    }

    async fn copy_to(
        &self,
        target: &RemoteTarget,
        local: &Path,
        remote: &str,
    ) -> Result<CommandOutput, ProvisionError> {
        self.record(ShellCall::CopyTo {
            target: target.to_string(),
            local: local.to_path_buf(),
            remote: remote.to_string(),
        });
        let failed = *self.fail_copies.lock().unwrap();
        Ok(Self::exit(if failed { 1 } else { 0 }))
    }

    async fn copy_from(
        &self,
        target: &RemoteTarget,
        remote: &str,
        local: &Path,
    ) -> Result<CommandOutput, ProvisionError> {
        self.record(ShellCall::CopyFrom {
            target: target.to_string(),
            remote: remote.to_string(),
            local: local.to_path_buf(),
        });
        let content = self.remote_files.lock().unwrap().get(remote).cloned();
        match content {
            Some(content) => {
                std::fs::write(local, content)?;
                Ok(Self::exit(0))
            }
            None => Ok(Self::exit(1)),
        }
    }

    async fn accepts_ssh(&self, host: &str) -> bool {
        self.record(ShellCall::Probe {
            host: host.to_string(),
        });
        self.reachable.lock().unwrap().contains(host)
    }
}
