use anyhow::{bail, Result};
use colored::Colorize;
use log::debug;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt};
use tokio::process::Command;

use crate::error::CliError;
use crate::executor::{run_captured, ExecOutcome, ExecStatus};

const EXIT_WORDS: [&str; 3] = ["exit", "quit", "q"];

const CATEGORIES: [(&str, &[&str]); 6] = [
    ("System", &["ls", "cd", "pwd", "mkdir", "rm", "cp", "mv", "cat", "grep", "find", "chmod", "chown"]),
    ("Network", &["curl", "wget", "ssh", "scp", "ping", "netstat", "ifconfig", "ip"]),
    ("Development", &["git", "python", "python3", "node", "npm", "pip", "cargo", "rustc", "docker", "kubectl"]),
    ("Text", &["vim", "nano", "emacs", "less", "more", "head", "tail", "sort", "uniq", "sed", "awk"]),
    ("Archive", &["tar", "zip", "unzip", "gzip", "gunzip", "bzip2", "bunzip2"]),
    ("Process", &["ps", "top", "kill", "pkill", "pgrep", "nice", "renice"]),
];

#[derive(Debug, Clone, Serialize)]
pub struct CommandCategory {
    pub name: String,
    pub commands: Vec<String>,
}

pub fn resolve_cwd(cwd: Option<&Path>) -> Result<PathBuf> {
    let dir = match cwd {
        Some(p) => p.to_path_buf(),
        None => std::env::current_dir()?,
    };
    if !dir.is_dir() {
        bail!(CliError::Validation(format!("working directory does not exist: {}", dir.display())));
    }
    Ok(dir)
}

pub fn shell_command(command: &str, cwd: &Path) -> Command {
    let mut cmd = Command::new("bash");
    cmd.arg("-c").arg(command).current_dir(cwd);
    cmd
}

pub fn script_command(script: &Path, args: &[String], cwd: &Path) -> Command {
    let mut cmd = Command::new("bash");
    cmd.arg(script).args(args).current_dir(cwd);
    cmd
}

pub async fn run_shell(command: &str, cwd: &Path, timeout: Option<Duration>) -> Result<ExecOutcome> {
    debug!("bash -c {:?} in {}", command, cwd.display());
    run_captured(shell_command(command, cwd), timeout).await
}

pub async fn run_script(script: &Path, args: &[String], cwd: &Path, timeout: Option<Duration>) -> Result<ExecOutcome> {
    if !script.is_file() {
        bail!(CliError::Validation(format!("script file not found: {}", script.display())));
    }
    debug!("bash {} {:?} in {}", script.display(), args, cwd.display());
    run_captured(script_command(script, args, cwd), timeout).await
}

/// Executables on `path_var`, deduplicated and sorted.
pub fn list_path_commands(path_var: &str) -> Vec<String> {
    let mut found = BTreeSet::new();
    for dir in std::env::split_paths(path_var) {
        let Ok(entries) = std::fs::read_dir(&dir) else { continue };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_file() && is_executable(&path) {
                if let Some(name) = path.file_name().and_then(|s| s.to_str()) {
                    found.insert(name.to_string());
                }
            }
        }
    }
    found.into_iter().collect()
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path).map(|m| m.permissions().mode() & 0o111 != 0).unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(_path: &Path) -> bool {
    true
}

pub fn categorize_commands(commands: &[String]) -> Vec<CommandCategory> {
    let mut out: Vec<CommandCategory> = CATEGORIES
        .iter()
        .map(|(name, _)| CommandCategory { name: name.to_string(), commands: vec![] })
        .collect();
    let mut other = Vec::new();
    for c in commands {
        match CATEGORIES.iter().position(|(_, known)| known.contains(&c.as_str())) {
            Some(i) => out[i].commands.push(c.clone()),
            None => other.push(c.clone()),
        }
    }
    out.push(CommandCategory { name: "Other".to_string(), commands: other });
    out.retain(|c| !c.commands.is_empty());
    out
}

/// Line-oriented shell session. Interrupting a running command returns to the prompt.
pub async fn interactive_loop<R>(reader: R, cwd: &Path, timeout: Option<Duration>) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut stdout = tokio::io::stdout();
    loop {
        stdout.write_all(format!("bash {} $ ", cwd.display()).as_bytes()).await?;
        stdout.flush().await?;
        let Some(line) = lines.next_line().await? else {
            println!();
            break;
        };
        let command = line.trim();
        if command.is_empty() {
            continue;
        }
        if EXIT_WORDS.contains(&command.to_lowercase().as_str()) {
            break;
        }
        tokio::select! {
            res = run_shell(command, cwd, timeout) => match res {
                Ok(outcome) => {
                    if !outcome.stdout.is_empty() { print!("{}", outcome.stdout); }
                    if !outcome.stderr.is_empty() { eprint!("{}", outcome.stderr.red()); }
                    match outcome.status {
                        ExecStatus::Exited(0) => {}
                        ExecStatus::Exited(code) => println!("{}", format!("Exit code: {}", code).yellow()),
                        ExecStatus::TimedOut => println!("{}", "Command timed out".yellow()),
                    }
                }
                Err(e) => eprintln!("{}", format!("Error: {:#}", e).red()),
            },
            _ = tokio::signal::ctrl_c() => {
                println!("\n{}", "Command interrupted".yellow());
            }
        }
    }
    println!("{}", "Goodbye!".green());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn shell_runs_in_cwd_and_keeps_pipes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "x").unwrap();
        let out = run_shell("ls | grep marker", dir.path(), None).await.unwrap();
        assert_eq!(out.status, ExecStatus::Exited(0));
        assert_eq!(out.stdout.trim(), "marker.txt");
    }

    #[tokio::test]
    async fn script_gets_arguments() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("s.sh");
        std::fs::write(&script, "echo \"$1-$2\"\nexit 4\n").unwrap();
        let out = run_script(&script, &["a".into(), "b".into()], dir.path(), None).await.unwrap();
        assert_eq!(out.stdout.trim(), "a-b");
        assert_eq!(out.status, ExecStatus::Exited(4));
    }

    #[test]
    fn missing_cwd_is_rejected() {
        assert!(resolve_cwd(Some(Path::new("/definitely/not/here"))).is_err());
    }

    #[test]
    fn categories() {
        let cats = categorize_commands(&["git".into(), "ls".into(), "zzz".into()]);
        let names: Vec<_> = cats.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["System", "Development", "Other"]);
    }

    #[cfg(unix)]
    #[test]
    fn path_listing_finds_executables() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let exe = dir.path().join("mytool");
        std::fs::write(&exe, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&exe, std::fs::Permissions::from_mode(0o755)).unwrap();
        std::fs::write(dir.path().join("data.txt"), "").unwrap();
        let found = list_path_commands(&dir.path().display().to_string());
        assert_eq!(found, vec!["mytool".to_string()]);
    }
}
