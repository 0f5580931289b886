use super::{short_hash, DnsProvider, LiveRecords, Outcome};
use crate::error::{DaneResult, Error};
use crate::models::TlsaSpec;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::debug;

/// Default limit for one command invocation
pub const DEFAULT_EXEC_TIMEOUT_SECS: u64 = 300;

/// Exit codes from this value up are provider-side failures worth a retry
const RECOVERABLE_EXIT_FLOOR: i32 = 200;

fn default_timeout() -> u64 {
    DEFAULT_EXEC_TIMEOUT_SECS
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecConfig {
    /// Absolute path of the command to run
    pub command: PathBuf,

    /// Run the command as this user instead of the current one
    #[serde(default)]
    pub user: Option<String>,

    /// Seconds before the command is killed and the call retried later
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

/// Credentials the command runs under after dropping privileges
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RunAs {
    uid: u32,
    gid: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Publish,
    Delete,
}

impl Operation {
    fn as_str(&self) -> &'static str {
        match self {
            Operation::Publish => "publish",
            Operation::Delete => "delete",
        }
    }
}

/// Provider that hands every operation to a local command.
///
/// The command receives the record through `TLSA_*` environment variables
/// and answers with its exit code: 0 success, 1 already up / not live,
/// 200 and above a recoverable error, anything else a hard error. Its
/// output is diagnostics only.
#[derive(Debug)]
pub struct ExecProvider {
    command: PathBuf,
    run_as: Option<RunAs>,
    timeout: Duration,
}

impl ExecProvider {
    pub fn new(config: &ExecConfig) -> DaneResult<Self> {
        if !config.command.is_absolute() {
            return Err(Error::Config(format!(
                "exec command {:?} must be an absolute path",
                config.command
            )));
        }
        if config.timeout == 0 {
            return Err(Error::Config("exec timeout must be positive".to_string()));
        }

        let run_as = match &config.user {
            Some(name) => {
                let user = nix::unistd::User::from_name(name)
                    .map_err(|e| Error::Config(format!("failed to look up user '{}': {}", name, e)))?
                    .ok_or_else(|| Error::Config(format!("user '{}' does not exist", name)))?;
                Some(RunAs {
                    uid: user.uid.as_raw(),
                    gid: user.gid.as_raw(),
                })
            }
            None => None,
        };

        Ok(Self {
            command: config.command.clone(),
            run_as,
            timeout: Duration::from_secs(config.timeout),
        })
    }

    fn command_for(
        &self,
        operation: Operation,
        spec: &TlsaSpec,
        hash: &str,
        live_hash: Option<&str>,
    ) -> Command {
        let mut cmd = Command::new(&self.command);
        cmd.env("TLSA_USAGE", spec.usage.to_string())
            .env("TLSA_SELECTOR", spec.selector.to_string())
            .env("TLSA_MATCHING", spec.matching.to_string())
            .env("TLSA_PORT", spec.port.to_string())
            .env("TLSA_PROTOCOL", &spec.protocol)
            .env("TLSA_DOMAIN", &spec.domain)
            .env("TLSA_HASH", hash)
            .env("TLSA_OPERATION", operation.as_str())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(live_hash) = live_hash {
            cmd.env("TLSA_LIVE_HASH", live_hash);
        }

        if let Some(run_as) = self.run_as {
            cmd.uid(run_as.uid).gid(run_as.gid);
        }

        cmd
    }

    async fn run(
        &self,
        operation: Operation,
        spec: &TlsaSpec,
        hash: &str,
        live_hash: Option<&str>,
    ) -> Outcome {
        let command = self.command_for(operation, spec, hash, live_hash);
        let label = format!(
            "{} {} {}",
            operation.as_str(),
            spec,
            short_hash(hash)
        );

        match tokio::time::timeout(self.timeout, self.run_command(command)).await {
            Err(_) => Outcome::Recoverable(format!(
                "command {:?} timed out after {}s ({})",
                self.command,
                self.timeout.as_secs(),
                label
            )),
            Ok(Err(err)) => err.into(),
            Ok(Ok(code)) => exit_outcome(operation, code, &label),
        }
    }

    /// Spawn the command, drain its output into the log, return its exit code
    async fn run_command(&self, mut cmd: Command) -> DaneResult<Option<i32>> {
        let mut child = cmd.spawn().map_err(|e| {
            if self.run_as.is_some() && e.kind() == std::io::ErrorKind::PermissionDenied {
                Error::Privilege(format!(
                    "cannot run {:?} with dropped privileges: {}",
                    self.command, e
                ))
            } else {
                Error::Processing(format!("failed to run {:?}: {}", self.command, e))
            }
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Processing("failed to capture stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Processing("failed to capture stderr".to_string()))?;

        let mut stdout_reader = BufReader::new(stdout).lines();
        let mut stderr_reader = BufReader::new(stderr).lines();
        let mut stdout_done = false;
        let mut stderr_done = false;

        // Read both pipes concurrently so a chatty command cannot block on a full pipe
        while !stdout_done || !stderr_done {
            tokio::select! {
                line = stdout_reader.next_line(), if !stdout_done => match line {
                    Ok(Some(line)) => debug!(command = ?self.command, "stdout: {}", line),
                    Ok(None) => stdout_done = true,
                    Err(e) => return Err(Error::Processing(format!("failed to read stdout: {}", e))),
                },
                line = stderr_reader.next_line(), if !stderr_done => match line {
                    Ok(Some(line)) => debug!(command = ?self.command, "stderr: {}", line),
                    Ok(None) => stderr_done = true,
                    Err(e) => return Err(Error::Processing(format!("failed to read stderr: {}", e))),
                },
            }
        }

        let status = child.wait().await?;
        Ok(status.code())
    }
}

fn exit_outcome(operation: Operation, code: Option<i32>, label: &str) -> Outcome {
    match code {
        Some(0) => Outcome::Success,
        Some(1) => match operation {
            Operation::Publish => Outcome::AlreadyUp(format!("record already up ({})", label)),
            Operation::Delete => Outcome::NotLive(format!("record not live ({})", label)),
        },
        Some(code) if code >= RECOVERABLE_EXIT_FLOOR => {
            Outcome::Recoverable(format!("command exited with {} ({})", code, label))
        }
        Some(code) => Outcome::Processing(format!("command exited with {} ({})", code, label)),
        None => Outcome::Processing(format!("command killed by a signal ({})", label)),
    }
}

#[async_trait]
impl DnsProvider for ExecProvider {
    fn name(&self) -> &'static str {
        "exec"
    }

    async fn publish(&self, spec: &TlsaSpec, hash: &str) -> Outcome {
        self.run(Operation::Publish, spec, hash, None).await
    }

    async fn read(&self, spec: &TlsaSpec) -> Result<LiveRecords, Outcome> {
        Err(Outcome::Processing(format!(
            "exec provider cannot list records for {}",
            spec.owner_name()
        )))
    }

    async fn delete(&self, spec: &TlsaSpec, record_id: &str) -> Outcome {
        self.run(Operation::Delete, spec, record_id, None).await
    }

    /// The command owns the record state, so the presence checks are its job:
    /// it gets `TLSA_HASH` to delete and `TLSA_LIVE_HASH` that must be up.
    async fn delete_if_up(&self, spec: &TlsaSpec, hash1: &str, hash2: Option<&str>) -> Outcome {
        self.run(Operation::Delete, spec, hash1, hash2).await
    }
}
