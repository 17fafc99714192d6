use predicates::prelude::*;
use std::path::Path;
use assert_cmd::Command;

fn cli(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("ai-cli").unwrap();
    cmd.current_dir(dir)
        .env("DEFAULT_PROVIDER", "mock")
        .env("CACHE_DIR", dir.join("cache"))
        .env("XDG_CONFIG_HOME", dir.join("config"))
        .env("NO_COLOR", "1")
        .env_remove("AI_CLI_MOCK_REPLY")
        .env_remove("DEFAULT_TEMPERATURE");
    cmd
}

#[test]
fn chat_answers_and_exits() {
    let temp = tempfile::tempdir().unwrap();
    cli(temp.path())
        .arg("chat")
        .write_stdin("hello there\n/exit\nnot sent\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("[stub answer] hello there"))
        .stdout(predicate::str::contains("not sent").not())
        .stdout(predicate::str::contains("Goodbye"));
}

#[test]
fn help_and_temperature_commands() {
    let temp = tempfile::tempdir().unwrap();
    cli(temp.path())
        .arg("chat")
        .write_stdin("/help\n/temperature 3\n/temperature 1.5\n/quit\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("/save <file>"))
        .stderr(predicate::str::contains("Temperature must be between 0.0 and 2.0"))
        .stdout(predicate::str::contains("Temperature changed to: 1.5"));
}

#[test]
fn save_writes_jsonl_transcript() {
    let temp = tempfile::tempdir().unwrap();
    cli(temp.path())
        .arg("chat")
        .write_stdin("first question\n/save out/chat.jsonl\n")
        .assert()
        .success();
    let text = std::fs::read_to_string(temp.path().join("out").join("chat.jsonl")).unwrap();
    let records: Vec<serde_json::Value> = text.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0]["role"], "user");
    assert_eq!(records[0]["content"], "first question");
    assert_eq!(records[1]["role"], "assistant");
    assert!(records[1]["timestamp_ms"].as_i64().unwrap() > 0);
}

#[test]
fn load_restores_history_for_later_turns() {
    let temp = tempfile::tempdir().unwrap();
    cli(temp.path())
        .arg("chat")
        .write_stdin("remember me\n/save saved.jsonl\n")
        .assert()
        .success();
    cli(temp.path())
        .arg("chat")
        .write_stdin("/load saved.jsonl\n/clear\n/exit\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("Loaded 2 messages"))
        .stdout(predicate::str::contains("Chat history cleared"));
}

#[test]
fn unknown_slash_command_is_reported() {
    let temp = tempfile::tempdir().unwrap();
    cli(temp.path())
        .arg("chat")
        .write_stdin("/bogus\n")
        .assert()
        .success()
        .stderr(predicate::str::contains("Unknown command: /bogus"));
}
