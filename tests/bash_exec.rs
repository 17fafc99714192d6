use predicates::prelude::*;
use std::path::Path;
use assert_cmd::Command;

fn cli(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("ai-cli").unwrap();
    cmd.current_dir(dir)
        .env("DEFAULT_PROVIDER", "mock")
        .env("XDG_CONFIG_HOME", dir.join("config"))
        .env("NO_COLOR", "1")
        .env_remove("COMMAND_TIMEOUT");
    cmd
}

#[test]
fn output_and_status_are_reported() {
    let temp = tempfile::tempdir().unwrap();
    cli(temp.path())
        .args(["bash", "main", "echo hello"])
        .assert()
        .success()
        .stdout(predicate::str::contains("hello"))
        .stdout(predicate::str::contains("Exit Code: 0"));
}

#[test]
fn child_exit_code_is_propagated() {
    let temp = tempfile::tempdir().unwrap();
    cli(temp.path()).args(["bash", "main", "exit 3"]).assert().failure().code(3);
}

#[test]
fn timeout_kills_the_command() {
    let temp = tempfile::tempdir().unwrap();
    let started = std::time::Instant::now();
    cli(temp.path())
        .args(["bash", "main", "sleep 5", "--timeout", "1"])
        .assert()
        .failure()
        .code(124);
    assert!(started.elapsed() < std::time::Duration::from_secs(4));
}

#[test]
fn json_mode_reports_streams() {
    let temp = tempfile::tempdir().unwrap();
    let out = cli(temp.path())
        .args(["--json", "bash", "main", "echo out; echo err >&2"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let v: serde_json::Value = serde_json::from_slice(&out).unwrap();
    assert_eq!(v["exit_code"], 0);
    assert_eq!(v["stdout"], "out\n");
    assert_eq!(v["stderr"], "err\n");
}

#[test]
fn dry_run_does_not_execute() {
    let temp = tempfile::tempdir().unwrap();
    cli(temp.path())
        .args(["bash", "main", "touch created.txt", "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Dry Run"));
    assert!(!temp.path().join("created.txt").exists());
}

#[test]
fn cwd_option_sets_working_directory() {
    let temp = tempfile::tempdir().unwrap();
    let sub = temp.path().join("sub");
    std::fs::create_dir(&sub).unwrap();
    cli(temp.path())
        .args(["bash", "main", "touch here.txt", "--simple", "--cwd"])
        .arg(&sub)
        .assert()
        .success();
    assert!(sub.join("here.txt").exists());
}

#[test]
fn script_runs_with_arguments() {
    let temp = tempfile::tempdir().unwrap();
    std::fs::write(temp.path().join("greet.sh"), "echo \"hi $1\"\nexit 2\n").unwrap();
    cli(temp.path())
        .args(["bash", "script", "greet.sh", "there", "--simple"])
        .assert()
        .failure()
        .code(2)
        .stdout(predicate::str::contains("hi there"));
}

#[test]
fn interactive_reads_commands_until_exit() {
    let temp = tempfile::tempdir().unwrap();
    cli(temp.path())
        .args(["bash", "interactive"])
        .write_stdin("echo first\nexit\necho never\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("first"))
        .stdout(predicate::str::contains("never").not());
}

#[test]
fn list_commands_groups_path_entries() {
    let temp = tempfile::tempdir().unwrap();
    let out = cli(temp.path())
        .args(["--json", "bash", "list-commands"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let v: serde_json::Value = serde_json::from_slice(&out).unwrap();
    assert!(v["total"].as_u64().unwrap() > 0);
}
