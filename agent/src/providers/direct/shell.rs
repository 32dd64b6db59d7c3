//! Remote command execution

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::errors::AgentError;

/// ssh exits with 255 when the connection itself failed
const SSH_CONNECTION_FAILURE: i32 = 255;

/// Output of a remote command
#[derive(Debug, Clone, Default)]
pub struct ShellOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ShellOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// Runs shell commands on the operator's host
#[async_trait]
pub trait RemoteShell: Send + Sync {
    /// Run `command` remotely.
    ///
    /// A host that cannot be reached is an `Err`; a command that ran and failed is an
    /// `Ok` with a non-zero code.
    async fn exec(&self, command: &str) -> Result<ShellOutput, AgentError>;
}

/// SSH connection settings
#[derive(Debug, Clone)]
pub struct SshOptions {
    pub host: String,
    pub user: String,
    pub port: u16,
    pub identity_file: Option<String>,
    pub connect_timeout: Duration,
    pub command_timeout: Duration,
}

impl Default for SshOptions {
    fn default() -> Self {
        Self {
            host: String::new(),
            user: "root".to_string(),
            port: 22,
            identity_file: None,
            connect_timeout: Duration::from_secs(10),
            command_timeout: Duration::from_secs(300),
        }
    }
}

/// [`RemoteShell`] using the system `ssh` client in batch mode
pub struct SshShell {
    options: SshOptions,
}

impl SshShell {
    pub fn new(options: SshOptions) -> Self {
        Self { options }
    }

    pub fn host(&self) -> &str {
        &self.options.host
    }

    fn command(&self, remote: &str) -> Command {
        let o = &self.options;
        let mut cmd = Command::new("ssh");
        cmd.args(["-o", "BatchMode=yes"])
            .args(["-o", "StrictHostKeyChecking=accept-new"])
            .args(["-o", &format!("ConnectTimeout={}", o.connect_timeout.as_secs().max(1))])
            .args(["-p", &o.port.to_string()]);
        if let Some(identity) = &o.identity_file {
            cmd.args(["-i", identity]);
        }
        cmd.arg(format!("{}@{}", o.user, o.host))
            .arg(remote)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl RemoteShell for SshShell {
    async fn exec(&self, command: &str) -> Result<ShellOutput, AgentError> {
        debug!("ssh {}: {}", self.options.host, command);

        let output = tokio::time::timeout(self.options.command_timeout, self.command(command).output())
            .await
            .map_err(|_| {
                AgentError::Timeout(format!(
                    "ssh {} exceeded {:?}",
                    self.options.host, self.options.command_timeout
                ))
            })?
            .map_err(|e| AgentError::RemoteError(format!("Failed to run ssh: {}", e)))?;

        let code = output.status.code().unwrap_or(-1);
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if code == SSH_CONNECTION_FAILURE {
            return Err(AgentError::RemoteError(format!(
                "{} unreachable: {}",
                self.options.host, stderr
            )));
        }

        Ok(ShellOutput {
            code,
            stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            stderr,
        })
    }
}
