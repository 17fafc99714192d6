use crate::llm::{ChatMessage, Usage};
use crate::util;
use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufWriter, Write as _};
use std::path::Path;

/// Token budget for history sent with each chat turn.
pub const HISTORY_TOKEN_BUDGET: usize = 8000;

/// One line of a saved chat transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptRecord {
    pub timestamp_ms: i64,
    pub role: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl TranscriptRecord {
    pub fn new(role: &str, content: &str) -> Self {
        Self { timestamp_ms: now_ms(), role: role.to_string(), content: content.to_string(), model: None, usage: None }
    }

    pub fn to_message(&self) -> ChatMessage {
        ChatMessage::new(&self.role, self.content.clone())
    }
}

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

pub fn save_transcript(path: &Path, records: &[TranscriptRecord]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).with_context(|| format!("creating directory: {}", parent.display()))?;
        }
    }
    let file = File::create(path).with_context(|| format!("creating transcript: {}", path.display()))?;
    let mut w = BufWriter::new(file);
    for rec in records {
        serde_json::to_writer(&mut w, rec)?;
        w.write_all(b"\n")?;
    }
    w.flush()?;
    Ok(())
}

/// Unreadable lines are skipped with a warning.
pub fn load_transcript(path: &Path) -> Result<Vec<TranscriptRecord>> {
    let content = fs::read_to_string(path).with_context(|| format!("reading transcript: {}", path.display()))?;
    let mut out = Vec::new();
    for (i, line) in content.lines().enumerate() {
        if line.trim().is_empty() { continue; }
        match serde_json::from_str::<TranscriptRecord>(line) {
            Ok(r) => out.push(r),
            Err(e) => warn!("skipping transcript line {}: {}", i + 1, e),
        }
    }
    Ok(out)
}

/// Keeps the newest messages that fit the budget; the new user turn and the
/// system prompt are always kept.
pub fn build_messages_with_truncation(
    system: Option<&str>,
    history: &[TranscriptRecord],
    new_user_message: &str,
    max_tokens: usize,
) -> Vec<ChatMessage> {
    let mut budget = max_tokens;
    if let Some(s) = system {
        budget = budget.saturating_sub(util::estimate_tokens_for_text(s));
    }
    let mut kept: Vec<ChatMessage> = vec![ChatMessage::user(new_user_message)];
    let mut total = util::estimate_tokens_for_text(new_user_message);
    for rec in history.iter().rev() {
        let t = util::estimate_tokens_for_text(&rec.content);
        if total + t > budget {
            break;
        }
        kept.push(rec.to_message());
        total += t;
    }
    if let Some(s) = system {
        kept.push(ChatMessage::system(s));
    }
    kept.reverse();
    kept
}
