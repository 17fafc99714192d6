use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::process::Command;

#[test]
fn help_lists_subcommands() {
    let mut cmd = Command::cargo_bin("ai-cli").unwrap();
    cmd.arg("--help");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("ask"))
        .stdout(predicate::str::contains("chat"))
        .stdout(predicate::str::contains("edit"))
        .stdout(predicate::str::contains("bash"))
        .stdout(predicate::str::contains("web"))
        .stdout(predicate::str::contains("config"));
}

#[test]
fn version_flag() {
    let mut cmd = Command::cargo_bin("ai-cli").unwrap();
    cmd.arg("--version");
    cmd.assert().success().stdout(predicate::str::contains("ai-cli"));
}

#[test]
fn edit_help_lists_operations() {
    let mut cmd = Command::cargo_bin("ai-cli").unwrap();
    cmd.args(["edit", "--help"]);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("view"))
        .stdout(predicate::str::contains("replace"))
        .stdout(predicate::str::contains("insert"));
}
