use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use crate::dispatch::{DispatchCandidate, Dispatcher};
use crate::error::{CliError, EXIT_FAILURE, EXIT_TIMEOUT};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecStatus {
    Exited(i32),
    TimedOut,
}

impl ExecStatus {
    pub fn code(&self) -> i32 {
        match self {
            ExecStatus::Exited(c) => *c,
            ExecStatus::TimedOut => EXIT_TIMEOUT,
        }
    }

    pub fn success(&self) -> bool {
        matches!(self, ExecStatus::Exited(0))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutcome {
    pub stdout: String,
    pub stderr: String,
    pub status: ExecStatus,
}

impl ExecOutcome {
    /// Maps a failed run onto the error carrying its exit code.
    pub fn into_result(self, timeout: Option<Duration>) -> Result<Self, CliError> {
        match self.status {
            ExecStatus::Exited(0) => Ok(self),
            ExecStatus::Exited(code) => Err(CliError::CommandFailed(code)),
            ExecStatus::TimedOut => Err(CliError::TimedOut(timeout.map(|t| t.as_secs()).unwrap_or(0))),
        }
    }
}

/// Set on dispatched children. Their own commands then stay in the group the
/// dispatching parent kills on expiry.
pub const DISPATCHED_ENV: &str = "AI_CLI_DISPATCHED";

/// Kills a child's whole process group when dropped while armed.
struct GroupKill(Option<u32>);

impl GroupKill {
    fn disarm(&mut self) {
        self.0 = None;
    }
}

impl Drop for GroupKill {
    fn drop(&mut self) {
        if let Some(pgid) = self.0.take() {
            kill_group(pgid);
        }
    }
}

#[cfg(unix)]
fn kill_group(pgid: u32) {
    debug!("killing process group {}", pgid);
    unsafe {
        libc::kill(-(pgid as i32), libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill_group(_pgid: u32) {}

/// Runs `cmd` to completion with captured output.
///
/// Outside a dispatched child, `cmd` leads its own process group. When the
/// timeout expires, or the returned future is dropped first, every process in
/// that group is killed.
pub async fn run_captured(mut cmd: Command, timeout: Option<Duration>) -> Result<ExecOutcome> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    let own_group = cfg!(unix) && std::env::var_os(DISPATCHED_ENV).is_none();
    #[cfg(unix)]
    {
        if own_group {
            cmd.process_group(0);
        }
    }
    let child = cmd.spawn().context("failed to spawn child process")?;
    let mut group = GroupKill(if own_group { child.id() } else { None });
    let waited = match timeout {
        Some(t) => match tokio::time::timeout(t, child.wait_with_output()).await {
            Ok(r) => r,
            Err(_) => {
                warn!("child timed out after {}s", t.as_secs());
                drop(group);
                return Ok(ExecOutcome {
                    stdout: String::new(),
                    stderr: format!("command timed out after {}s", t.as_secs()),
                    status: ExecStatus::TimedOut,
                });
            }
        },
        None => child.wait_with_output().await,
    };
    group.disarm();
    let output = waited.context("failed to wait for child process")?;
    let code = output.status.code().unwrap_or(EXIT_FAILURE);
    debug!("child exited with {}", code);
    Ok(ExecOutcome {
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        status: ExecStatus::Exited(code),
    })
}

/// Runs `cmd` attached to the terminal. Nothing is captured.
pub async fn run_inherited(mut cmd: Command, timeout: Option<Duration>) -> Result<ExecOutcome> {
    cmd.stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .kill_on_drop(true);
    let mut child = cmd.spawn().context("failed to spawn child process")?;
    let status = match timeout {
        Some(t) => match tokio::time::timeout(t, child.wait()).await {
            Ok(r) => r?,
            Err(_) => {
                let _ = child.kill().await;
                return Ok(ExecOutcome { stdout: String::new(), stderr: String::new(), status: ExecStatus::TimedOut });
            }
        },
        None => child.wait().await?,
    };
    Ok(ExecOutcome {
        stdout: String::new(),
        stderr: String::new(),
        status: ExecStatus::Exited(status.code().unwrap_or(EXIT_FAILURE)),
    })
}

/// Global flags re-applied to every child invocation.
#[derive(Debug, Clone, Default)]
pub struct ForwardedFlags {
    pub provider: Option<String>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub timeout_secs: Option<u64>,
    pub json: bool,
    pub no_color: bool,
    pub verbose: u8,
}

impl ForwardedFlags {
    fn to_args(&self) -> Vec<String> {
        let mut out = Vec::new();
        if let Some(p) = &self.provider { out.push("--provider".to_string()); out.push(p.clone()); }
        if let Some(m) = &self.model { out.push("--model".to_string()); out.push(m.clone()); }
        if let Some(t) = self.temperature { out.push("--temperature".to_string()); out.push(t.to_string()); }
        if let Some(n) = self.max_tokens { out.push("--max-tokens".to_string()); out.push(n.to_string()); }
        if let Some(s) = self.timeout_secs { out.push("--timeout".to_string()); out.push(s.to_string()); }
        if self.json { out.push("--json".to_string()); }
        if self.no_color { out.push("--no-color".to_string()); }
        if self.verbose > 0 { out.push(format!("-{}", "v".repeat(self.verbose as usize))); }
        out
    }
}

/// Runs dispatched subcommands as children of this executable.
pub struct SubcommandExecutor {
    program: PathBuf,
    known: Vec<String>,
    interactive: Vec<String>,
    flags: ForwardedFlags,
    timeout: Option<Duration>,
}

impl SubcommandExecutor {
    pub fn new(program: PathBuf, dispatcher: &Dispatcher, flags: ForwardedFlags, timeout: Option<Duration>) -> Self {
        Self {
            program,
            known: dispatcher.known_commands(),
            interactive: dispatcher.tools().filter(|d| d.interactive).map(|d| d.command.to_string()).collect(),
            flags,
            timeout,
        }
    }

    pub fn for_current_exe(dispatcher: &Dispatcher, flags: ForwardedFlags, timeout: Option<Duration>) -> Result<Self> {
        let exe = std::env::current_exe().context("unable to locate the running executable")?;
        Ok(Self::new(exe, dispatcher, flags, timeout))
    }

    pub fn is_interactive(&self, command: &str) -> bool {
        self.interactive.iter().any(|c| c == command)
    }

    pub fn argv(&self, command: &str, args: &[String]) -> Vec<String> {
        let mut argv = self.flags.to_args();
        argv.extend(command.split_whitespace().map(str::to_string));
        if !args.is_empty() {
            // keeps dash-leading values such as "ls -la" positional
            argv.push("--".to_string());
            argv.extend(args.iter().cloned());
        }
        argv
    }

    pub async fn execute(&self, candidate: &DispatchCandidate, args: &[String]) -> Result<ExecOutcome> {
        if !self.known.iter().any(|c| c == &candidate.command) {
            return Err(CliError::Validation(format!("refusing to run unknown command '{}'", candidate.command)).into());
        }
        let argv = self.argv(&candidate.command, args);
        info!("executing {} {:?}", self.program.display(), argv);
        let mut cmd = Command::new(&self.program);
        cmd.args(&argv).env(DISPATCHED_ENV, "1");
        let outcome = if self.is_interactive(&candidate.command) {
            run_inherited(cmd, None).await?
        } else {
            run_captured(cmd, self.timeout).await?
        };
        debug!("{} finished with {:?}", candidate.command, outcome.status);
        Ok(outcome)
    }
}
