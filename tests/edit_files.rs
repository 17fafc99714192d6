use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use std::process::Command;

fn cli(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("ai-cli").unwrap();
    cmd.current_dir(dir)
        .env("DEFAULT_PROVIDER", "mock")
        .env("XDG_CONFIG_HOME", dir.join("config"))
        .env("NO_COLOR", "1");
    cmd
}

fn notes(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("notes.txt");
    fs::write(&path, "foo one\nFoo two\nbar\n").unwrap();
    path
}

#[test]
fn find_is_case_insensitive_by_default() {
    let temp = tempfile::tempdir().unwrap();
    notes(temp.path());
    let out = cli(temp.path())
        .args(["--json", "edit", "find", "foo", "notes.txt"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let v: serde_json::Value = serde_json::from_slice(&out).unwrap();
    let lines: Vec<u64> = v["matches"].as_array().unwrap().iter().map(|m| m["line"].as_u64().unwrap()).collect();
    assert_eq!(lines, vec![1, 2]);

    let out = cli(temp.path())
        .args(["--json", "edit", "find", "foo", "notes.txt", "--case-sensitive"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let v: serde_json::Value = serde_json::from_slice(&out).unwrap();
    assert_eq!(v["matches"].as_array().unwrap().len(), 1);
}

#[test]
fn replace_dry_run_leaves_file_alone() {
    let temp = tempfile::tempdir().unwrap();
    let path = notes(temp.path());
    cli(temp.path())
        .args(["edit", "replace", "foo", "baz", "notes.txt", "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Dry Run"));
    assert_eq!(fs::read_to_string(&path).unwrap(), "foo one\nFoo two\nbar\n");
}

#[test]
fn replace_rewrites_every_match() {
    let temp = tempfile::tempdir().unwrap();
    let path = notes(temp.path());
    cli(temp.path())
        .args(["edit", "replace", "foo", "baz", "notes.txt"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Replaced 2"));
    assert_eq!(fs::read_to_string(&path).unwrap(), "baz one\nbaz two\nbar\n");
}

#[test]
fn regex_replace_expands_groups() {
    let temp = tempfile::tempdir().unwrap();
    let path = notes(temp.path());
    cli(temp.path())
        .args(["edit", "replace", "(\\w+) one", "one $1", "notes.txt", "--regex"])
        .assert()
        .success();
    assert_eq!(fs::read_to_string(&path).unwrap(), "one foo\nFoo two\nbar\n");
}

#[test]
fn insert_positions() {
    let temp = tempfile::tempdir().unwrap();
    let path = notes(temp.path());
    cli(temp.path())
        .args(["edit", "insert", "# header", "notes.txt", "--position", "start"])
        .assert()
        .success();
    cli(temp.path())
        .args(["edit", "insert", "middle", "notes.txt", "--position", "line", "--line", "3"])
        .assert()
        .success();
    cli(temp.path()).args(["edit", "insert", "tail", "notes.txt"]).assert().success();
    assert_eq!(
        fs::read_to_string(&path).unwrap(),
        "# header\nfoo one\nmiddle\nFoo two\nbar\ntail\n"
    );
}

#[test]
fn insert_out_of_range_line_is_rejected() {
    let temp = tempfile::tempdir().unwrap();
    let path = notes(temp.path());
    cli(temp.path())
        .args(["edit", "insert", "x", "notes.txt", "--position", "line", "--line", "99"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("out of range"));
    assert_eq!(fs::read_to_string(&path).unwrap(), "foo one\nFoo two\nbar\n");
}

#[test]
fn info_and_view() {
    let temp = tempfile::tempdir().unwrap();
    notes(temp.path());
    let out = cli(temp.path())
        .args(["--json", "edit", "info", "notes.txt"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let v: serde_json::Value = serde_json::from_slice(&out).unwrap();
    assert_eq!(v["lines"], 3);
    assert_eq!(v["size_bytes"], 20);

    cli(temp.path())
        .args(["edit", "view", "notes.txt"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Foo two"));
}

#[test]
fn missing_file_is_reported() {
    let temp = tempfile::tempdir().unwrap();
    cli(temp.path())
        .args(["--json", "edit", "view", "absent.txt"])
        .assert()
        .failure()
        .code(1)
        .stdout(predicate::str::contains("file_not_found"));
}
