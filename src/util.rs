use std::path::Path;

pub fn estimate_tokens_for_text(text: &str) -> usize {
    // Simple heuristic: 1 token ~ 4 characters
    let chars = text.chars().count();
    chars.div_ceil(4)
}

/// Prefix-based guess; good enough to pick a fence label.
pub fn detect_language(text: &str) -> &'static str {
    let t = text.trim().to_lowercase();
    let starts = |prefixes: &[&str]| prefixes.iter().any(|p| t.starts_with(p));

    if starts(&["#!/bin/bash", "#!/bin/sh", "#!/usr/bin/env bash"]) {
        "bash"
    } else if starts(&["def ", "import ", "from ", "class ", "if __name__"]) {
        "python"
    } else if starts(&["fn ", "use ", "pub ", "mod ", "#[", "impl "]) {
        "rust"
    } else if starts(&["function ", "const ", "let ", "var ", "console.log"]) {
        "javascript"
    } else if starts(&["public class", "private ", "public ", "import java"]) {
        "java"
    } else if starts(&["package ", "func "]) {
        "go"
    } else if starts(&["<?php"]) {
        "php"
    } else if starts(&["using ", "namespace "]) {
        "csharp"
    } else if starts(&["#include", "int main", "void "]) {
        "c"
    } else if starts(&["<!doctype", "<html"]) {
        "html"
    } else if starts(&["select ", "insert ", "update ", "delete from", "create table"]) {
        "sql"
    } else if starts(&["---"]) {
        "yaml"
    } else if (t.starts_with('{') || t.starts_with('[')) && serde_json::from_str::<serde_json::Value>(text.trim()).is_ok() {
        "json"
    } else if t.contains('{') && t.contains('}') && ["font-family", "margin", "padding", "color:"].iter().any(|k| t.contains(k)) {
        "css"
    } else {
        "text"
    }
}

pub fn language_from_extension(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_lowercase();
    let lang = match ext.as_str() {
        "py" => "python",
        "rs" => "rust",
        "js" | "mjs" | "cjs" => "javascript",
        "ts" | "tsx" => "typescript",
        "java" => "java",
        "go" => "go",
        "php" => "php",
        "rb" => "ruby",
        "cs" => "csharp",
        "c" | "h" => "c",
        "cc" | "cpp" | "hpp" => "cpp",
        "html" | "htm" => "html",
        "css" => "css",
        "sql" => "sql",
        "sh" | "bash" => "bash",
        "yml" | "yaml" => "yaml",
        "json" => "json",
        "toml" => "toml",
        "md" => "markdown",
        _ => return None,
    };
    Some(lang)
}

pub fn truncate_text(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let keep = max_chars.saturating_sub(3);
    let mut out: String = text.chars().take(keep).collect();
    out.push_str("...");
    out
}

/// Body of the first fenced block, or the whole text when there is none.
pub fn extract_code_block(text: &str) -> String {
    let mut in_block = false;
    let mut body = Vec::new();
    for line in text.lines() {
        if line.trim_start().starts_with("```") {
            if in_block {
                return body.join("\n");
            }
            in_block = true;
            continue;
        }
        if in_block {
            body.push(line);
        }
    }
    if in_block { body.join("\n") } else { text.trim().to_string() }
}
