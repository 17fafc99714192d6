use anyhow::{bail, Context, Result};
use regex::{NoExpand, Regex, RegexBuilder};
use serde::Serialize;
use std::path::Path;

use crate::error::CliError;
use crate::util;

#[derive(Debug, Clone, Copy, Default)]
pub struct MatchOptions {
    pub case_sensitive: bool,
    pub regex: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LineMatch {
    pub line: usize,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplacementPreview {
    pub line: usize,
    pub before: String,
    pub after: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertPosition {
    Start,
    End,
    Line(usize),
}

impl InsertPosition {
    pub fn parse(position: &str, line: Option<usize>) -> Result<Self, CliError> {
        match (position.trim().to_lowercase().as_str(), line) {
            ("start", _) => Ok(InsertPosition::Start),
            ("end", _) => Ok(InsertPosition::End),
            ("line", Some(n)) => Ok(InsertPosition::Line(n)),
            ("line", None) => Err(CliError::Validation("--line is required when --position is 'line'".to_string())),
            (other, _) => Err(CliError::Validation(format!("position must be one of: start, end, line (got '{}')", other))),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            InsertPosition::Start => "start".to_string(),
            InsertPosition::End => "end".to_string(),
            InsertPosition::Line(n) => format!("line {}", n),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FileInfo {
    pub path: String,
    pub size_bytes: u64,
    pub lines: usize,
    pub characters: usize,
    pub language: String,
    pub empty: bool,
}

/// Literal patterns are escaped; matching is case-insensitive unless asked otherwise.
pub fn build_matcher(pattern: &str, opts: MatchOptions) -> Result<Regex> {
    if pattern.is_empty() {
        bail!(CliError::Validation("search pattern must not be empty".to_string()));
    }
    let source = if opts.regex { pattern.to_string() } else { regex::escape(pattern) };
    RegexBuilder::new(&source)
        .case_insensitive(!opts.case_sensitive)
        .build()
        .with_context(|| format!("invalid pattern: {}", pattern))
}

pub fn find_matches(content: &str, pattern: &str, opts: MatchOptions) -> Result<Vec<LineMatch>> {
    let re = build_matcher(pattern, opts)?;
    Ok(content
        .lines()
        .enumerate()
        .filter(|(_, l)| re.is_match(l))
        .map(|(i, l)| LineMatch { line: i + 1, text: l.to_string() })
        .collect())
}

/// Returns the new content and the number of replacements.
/// In regex mode the replacement may reference groups (`$1`); literal mode inserts it as is.
pub fn replace_all(content: &str, pattern: &str, replacement: &str, opts: MatchOptions) -> Result<(String, usize)> {
    let re = build_matcher(pattern, opts)?;
    let count = re.find_iter(content).count();
    let replaced = if opts.regex {
        re.replace_all(content, replacement).into_owned()
    } else {
        re.replace_all(content, NoExpand(replacement)).into_owned()
    };
    Ok((replaced, count))
}

pub fn preview_replacements(content: &str, pattern: &str, replacement: &str, opts: MatchOptions) -> Result<Vec<ReplacementPreview>> {
    let re = build_matcher(pattern, opts)?;
    let mut out = Vec::new();
    for (i, line) in content.lines().enumerate() {
        if !re.is_match(line) {
            continue;
        }
        let after = if opts.regex {
            re.replace_all(line, replacement).into_owned()
        } else {
            re.replace_all(line, NoExpand(replacement)).into_owned()
        };
        out.push(ReplacementPreview { line: i + 1, before: line.to_string(), after });
    }
    Ok(out)
}

/// Inserts `text` as one or more whole lines. Line positions are 1-based; `len + 1` appends.
pub fn insert_lines(content: &str, text: &str, position: InsertPosition) -> Result<String, CliError> {
    let mut lines: Vec<String> = content.lines().map(str::to_string).collect();
    let new_line = text.trim_end_matches('\n').to_string();
    match position {
        InsertPosition::Start => lines.insert(0, new_line),
        InsertPosition::End => lines.push(new_line),
        InsertPosition::Line(n) => {
            if n < 1 || n > lines.len() + 1 {
                return Err(CliError::Validation(format!(
                    "line number {} is out of range (1-{})",
                    n,
                    lines.len() + 1
                )));
            }
            lines.insert(n - 1, new_line);
        }
    }
    let mut out = lines.join("\n");
    out.push('\n');
    Ok(out)
}

pub fn describe_file(path: &Path, content: &str, size_bytes: u64) -> FileInfo {
    FileInfo {
        path: path.display().to_string(),
        size_bytes,
        lines: content.lines().count(),
        characters: content.chars().count(),
        language: util::detect_language(content).to_string(),
        empty: content.trim().is_empty(),
    }
}

pub fn ensure_file_exists(path: &Path) -> Result<()> {
    if !path.is_file() {
        bail!(CliError::Validation(format!("file not found: {}", path.display())));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEXT: &str = "Hello world\nhello again\nbye\n";

    #[test]
    fn literal_find_is_case_insensitive_by_default() {
        let m = find_matches(TEXT, "HELLO", MatchOptions::default()).unwrap();
        assert_eq!(m.iter().map(|x| x.line).collect::<Vec<_>>(), vec![1, 2]);

        let m = find_matches(TEXT, "hello", MatchOptions { case_sensitive: true, regex: false }).unwrap();
        assert_eq!(m, vec![LineMatch { line: 2, text: "hello again".into() }]);
    }

    #[test]
    fn literal_patterns_are_not_regexes() {
        let m = find_matches("a.b\naxb\n", "a.b", MatchOptions::default()).unwrap();
        assert_eq!(m.len(), 1);
        let m = find_matches("a.b\naxb\n", "a.b", MatchOptions { case_sensitive: false, regex: true }).unwrap();
        assert_eq!(m.len(), 2);
    }

    #[test]
    fn replace_counts_and_preserves_dollars() {
        let (out, n) = replace_all(TEXT, "hello", "$x", MatchOptions::default()).unwrap();
        assert_eq!(n, 2);
        assert_eq!(out, "$x world\n$x again\nbye\n");

        let (out, n) = replace_all("v1 v22", r"v(\d+)", "n$1", MatchOptions { case_sensitive: true, regex: true }).unwrap();
        assert_eq!(n, 2);
        assert_eq!(out, "n1 n22");
    }

    #[test]
    fn dry_run_preview_matches_replacement() {
        let p = preview_replacements(TEXT, "world", "there", MatchOptions::default()).unwrap();
        assert_eq!(p, vec![ReplacementPreview { line: 1, before: "Hello world".into(), after: "Hello there".into() }]);
    }

    #[test]
    fn insert_positions() {
        assert_eq!(insert_lines("a\nb\n", "x", InsertPosition::Start).unwrap(), "x\na\nb\n");
        assert_eq!(insert_lines("a\nb", "x", InsertPosition::End).unwrap(), "a\nb\nx\n");
        assert_eq!(insert_lines("a\nb\n", "x", InsertPosition::Line(2)).unwrap(), "a\nx\nb\n");
        assert_eq!(insert_lines("a\nb\n", "x", InsertPosition::Line(3)).unwrap(), "a\nb\nx\n");
        assert_eq!(insert_lines("", "x", InsertPosition::End).unwrap(), "x\n");
        assert!(insert_lines("a\nb\n", "x", InsertPosition::Line(4)).is_err());
        assert!(insert_lines("a\n", "x", InsertPosition::Line(0)).is_err());
    }

    #[test]
    fn position_parsing() {
        assert_eq!(InsertPosition::parse("END", None).unwrap(), InsertPosition::End);
        assert_eq!(InsertPosition::parse("line", Some(3)).unwrap(), InsertPosition::Line(3));
        assert!(InsertPosition::parse("line", None).is_err());
        assert!(InsertPosition::parse("middle", None).is_err());
    }

    #[test]
    fn empty_and_invalid_patterns_are_rejected() {
        assert!(find_matches(TEXT, "", MatchOptions::default()).is_err());
        assert!(find_matches(TEXT, "(", MatchOptions { case_sensitive: false, regex: true }).is_err());
    }

    #[test]
    fn info_counts() {
        let info = describe_file(Path::new("x.py"), "def f():\n    return 1\n", 22);
        assert_eq!(info.lines, 2);
        assert_eq!(info.language, "python");
        assert!(!info.empty);
    }
}
