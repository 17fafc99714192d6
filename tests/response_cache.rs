use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::path::{Path, PathBuf};
use std::process::Command;

fn cli(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("ai-cli").unwrap();
    cmd.current_dir(dir)
        .env("DEFAULT_PROVIDER", "mock")
        .env("CACHE_DIR", dir.join("cache"))
        .env("XDG_CONFIG_HOME", dir.join("config"))
        .env("NO_COLOR", "1")
        .env_remove("AI_CLI_MOCK_REPLY")
        .env_remove("ENABLE_CACHE")
        .env_remove("DEFAULT_TEMPERATURE");
    cmd
}

fn entries(dir: &Path) -> Vec<PathBuf> {
    match std::fs::read_dir(dir) {
        Ok(rd) => rd
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|e| e == "json"))
            .collect(),
        Err(_) => Vec::new(),
    }
}

#[test]
fn responses_are_cached_by_md5_fingerprint() {
    let temp = tempfile::tempdir().unwrap();
    let cache_dir = temp.path().join("cache");

    cli(temp.path()).args(["ask", "cache me"]).assert().success();
    let files = entries(&cache_dir);
    assert_eq!(files.len(), 1);
    let stem = files[0].file_stem().unwrap().to_str().unwrap().to_string();
    assert_eq!(stem.len(), 32);
    assert!(stem.chars().all(|c| c.is_ascii_hexdigit()));

    // a later process reads the stored entry instead of the provider
    cli(temp.path())
        .env("AI_CLI_MOCK_REPLY", "fresh reply")
        .args(["ask", "cache me"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[stub answer] cache me"));
    assert_eq!(entries(&cache_dir).len(), 1);
}

#[test]
fn different_temperature_is_a_different_entry() {
    let temp = tempfile::tempdir().unwrap();
    cli(temp.path()).args(["ask", "same question"]).assert().success();
    cli(temp.path()).args(["ask", "same question", "-t", "0.1"]).assert().success();
    assert_eq!(entries(&temp.path().join("cache")).len(), 2);
}

#[test]
fn disabled_cache_writes_nothing() {
    let temp = tempfile::tempdir().unwrap();
    cli(temp.path()).env("ENABLE_CACHE", "false").args(["ask", "x"]).assert().success();
    assert!(entries(&temp.path().join("cache")).is_empty());
}

#[test]
fn clear_cache_removes_entries() {
    let temp = tempfile::tempdir().unwrap();
    cli(temp.path()).args(["ask", "one"]).assert().success();
    cli(temp.path()).args(["ask", "two"]).assert().success();

    let out = cli(temp.path()).args(["--json", "config", "cache"]).assert().success().get_output().stdout.clone();
    let v: serde_json::Value = serde_json::from_slice(&out).unwrap();
    assert_eq!(v["entries"], 2);

    cli(temp.path())
        .args(["config", "clear-cache"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Cleared 2"));
    assert!(entries(&temp.path().join("cache")).is_empty());
}

#[test]
fn dispatched_ask_shares_the_direct_cache_entry() {
    let temp = tempfile::tempdir().unwrap();
    let cache_dir = temp.path().join("cache");
    cli(temp.path())
        .args(["--max-tokens", "7", "ask", "hello", "there"])
        .assert()
        .success();
    cli(temp.path())
        .args(["--max-tokens", "7", "ask hello there"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[stub answer] hello there"));
    assert_eq!(entries(&cache_dir).len(), 1);
}
