use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::path::Path;
use std::process::Command;

fn cli(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("ai-cli").unwrap();
    cmd.current_dir(dir)
        .env("DEFAULT_PROVIDER", "mock")
        .env("CACHE_DIR", dir.join("cache"))
        .env("XDG_CONFIG_HOME", dir.join("config"))
        .env("NO_COLOR", "1")
        .env_remove("OPENAI_API_KEY")
        .env_remove("ANTHROPIC_API_KEY")
        .env_remove("AI_CLI_MOCK_REPLY")
        .env_remove("DEFAULT_TEMPERATURE")
        .env_remove("LOG_FILE");
    cmd
}

#[test]
fn ask_with_mock_provider_echoes_question() {
    let temp = tempfile::tempdir().unwrap();
    let mut cmd = cli(temp.path());
    cmd.args(["ask", "What", "is", "Rust?"]);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("[stub answer] What is Rust?"));
}

#[test]
fn ask_json_prints_single_object() {
    let temp = tempfile::tempdir().unwrap();
    let mut cmd = cli(temp.path());
    cmd.args(["--json", "ask", "Hello"]);
    let out = cmd.assert().success().get_output().stdout.clone();
    let v: serde_json::Value = serde_json::from_slice(&out).unwrap();
    assert_eq!(v["answer"], "[stub answer] Hello");
    assert!(v.get("model").is_some());
}

#[test]
fn temperature_out_of_range_is_rejected() {
    let temp = tempfile::tempdir().unwrap();
    let mut cmd = cli(temp.path());
    cmd.args(["ask", "hi", "-t", "2.5"]);
    cmd.assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("temperature"));
}

#[test]
fn temperature_bounds_are_inclusive() {
    for t in ["0.0", "2.0"] {
        let temp = tempfile::tempdir().unwrap();
        let mut cmd = cli(temp.path());
        cmd.args(["ask", "hi", "--temperature", t]);
        cmd.assert().success();
    }
}

#[test]
fn missing_api_key_fails_before_any_request() {
    let temp = tempfile::tempdir().unwrap();
    let mut cmd = cli(temp.path());
    cmd.args(["--provider", "openai", "ask", "hi"]);
    cmd.assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("OPENAI_API_KEY"));
}

#[test]
fn missing_api_key_json_error() {
    let temp = tempfile::tempdir().unwrap();
    let mut cmd = cli(temp.path());
    cmd.args(["--json", "--provider", "anthropic", "ask", "hi"]);
    let out = cmd.assert().failure().code(1).get_output().stdout.clone();
    let v: serde_json::Value = serde_json::from_slice(&out).unwrap();
    assert_eq!(v["code"], "missing_api_key");
    assert!(v["hint"].is_string());
}

#[test]
fn mock_reply_override_is_used() {
    let temp = tempfile::tempdir().unwrap();
    let mut cmd = cli(temp.path());
    cmd.env("AI_CLI_MOCK_REPLY", "fixed reply").args(["ask", "anything"]);
    cmd.assert().success().stdout(predicate::str::contains("fixed reply"));
}

#[test]
fn code_output_writes_extracted_block() {
    let temp = tempfile::tempdir().unwrap();
    let out_file = temp.path().join("hello.py");
    let mut cmd = cli(temp.path());
    cmd.env("AI_CLI_MOCK_REPLY", "Here you go:\\n```python\\nprint('hi')\\n```\\nDone.")
        .args(["code", "print hi", "--language", "python", "--output"])
        .arg(&out_file);
    cmd.assert().success().stdout(predicate::str::contains("Code saved to"));
    assert_eq!(std::fs::read_to_string(&out_file).unwrap(), "print('hi')");
}

#[test]
fn explain_reads_code_from_file() {
    let temp = tempfile::tempdir().unwrap();
    std::fs::write(temp.path().join("lib.rs"), "fn main() {}\n").unwrap();
    let mut cmd = cli(temp.path());
    cmd.args(["--json", "explain", "@lib.rs", "--detail", "brief"]);
    let out = cmd.assert().success().get_output().stdout.clone();
    let v: serde_json::Value = serde_json::from_slice(&out).unwrap();
    assert!(v["answer"].as_str().unwrap().contains("fn main() {}"));
}

#[test]
fn explain_missing_file_fails() {
    let temp = tempfile::tempdir().unwrap();
    let mut cmd = cli(temp.path());
    cmd.args(["explain", "@nope.rs"]);
    cmd.assert().failure().code(1).stderr(predicate::str::contains("file not found"));
}

#[test]
fn markdown_rendering_follows_setting() {
    let temp = tempfile::tempdir().unwrap();
    let reply = "## Summary\\n- **fast** builds";
    cli(temp.path())
        .env("AI_CLI_MOCK_REPLY", reply)
        .env("ENABLE_MARKDOWN_RENDERING", "true")
        .args(["ask", "render this"])
        .assert()
        .success()
        .stdout(predicate::str::contains("• fast builds"))
        .stdout(predicate::str::contains("## Summary").not());

    cli(temp.path())
        .env("AI_CLI_MOCK_REPLY", reply)
        .env("ENABLE_MARKDOWN_RENDERING", "false")
        .args(["ask", "render this"])
        .assert()
        .success()
        .stdout(predicate::str::contains("## Summary"))
        .stdout(predicate::str::contains("- **fast** builds"));
}
