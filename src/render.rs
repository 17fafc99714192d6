use colored::{Color, Colorize};
use serde::Serialize;

use crate::config::Settings;
use crate::edit::{FileInfo, LineMatch, ReplacementPreview};
use crate::executor::{ExecOutcome, ExecStatus};
use crate::llm::Usage;
use crate::shell::CommandCategory;
use crate::web::SearchResult;

pub fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string(value) {
        Ok(s) => println!("{}", s),
        Err(e) => eprintln!("failed to serialize json: {}", e),
    }
}

#[derive(Serialize, Debug, Clone)]
pub struct ErrorOut<'a> {
    pub code: &'a str,
    pub message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<&'a str>,
}

pub fn print_json_error(code: &str, message: &str, hint: Option<&str>) {
    let err = ErrorOut { code, message, hint };
    print_json(&err);
}

pub fn disable_color() {
    colored::control::set_override(false);
}

/// Titled block with a left rule.
pub fn panel(title: &str, body: &str) {
    println!("{}", format!("╭─ {}", title).bold().blue());
    for line in body.lines() {
        println!("{} {}", "│".blue(), line);
    }
    println!("{}", "╰─".blue());
}

pub fn field(label: &str, value: impl std::fmt::Display) -> String {
    format!("{} {}", format!("{}:", label).bold(), value)
}

pub fn print_usage(usage: Option<&Usage>, model: &str) {
    let Some(u) = usage else { return };
    let fmt = |v: Option<u32>| v.map(|n| n.to_string()).unwrap_or_else(|| "?".to_string());
    println!(
        "{}",
        format!(
            "model {} | prompt {} | completion {} | total {}",
            model,
            fmt(u.prompt_tokens),
            fmt(u.completion_tokens),
            fmt(u.total_tokens)
        )
        .dimmed()
    );
}

/// Fenced block; optional gutter with line numbers.
pub fn print_code(content: &str, language: &str, line_numbers: bool) {
    println!("{}", format!("```{}", language).dimmed());
    let width = content.lines().count().to_string().len().max(3);
    for (i, line) in content.lines().enumerate() {
        if line_numbers {
            println!("{} {}", format!("{:>width$}", i + 1, width = width).dimmed(), line);
        } else {
            println!("{}", line);
        }
    }
    println!("{}", "```".dimmed());
}

/// How model answers are printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnswerStyle {
    pub markdown: bool,
    pub highlight_code: bool,
    pub code_color: Color,
}

impl AnswerStyle {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            markdown: settings.markdown_rendering,
            highlight_code: settings.syntax_highlighting,
            code_color: theme_code_color(&settings.theme),
        }
    }
}

/// Unknown theme names get the default palette.
pub fn theme_code_color(theme: &str) -> Color {
    match theme.to_ascii_lowercase().as_str() {
        "monokai" => Color::Yellow,
        "light" => Color::Blue,
        "dark" => Color::BrightCyan,
        _ => Color::Cyan,
    }
}

pub fn print_answer(content: &str, style: AnswerStyle) {
    println!("{}", format_answer(content, style));
}

/// Renders headings, `**bold**` and bullet lists when markdown is on; fenced
/// code is colored by the theme when highlighting is on.
pub fn format_answer(content: &str, style: AnswerStyle) -> String {
    let mut out = Vec::new();
    let mut in_block = false;
    for line in content.lines() {
        if line.trim_start().starts_with("```") {
            in_block = !in_block;
            out.push(if style.highlight_code { line.dimmed().to_string() } else { line.to_string() });
        } else if in_block {
            out.push(if style.highlight_code { line.color(style.code_color).to_string() } else { line.to_string() });
        } else if style.markdown {
            out.push(render_markdown_line(line));
        } else {
            out.push(line.to_string());
        }
    }
    out.join("\n")
}

fn render_markdown_line(line: &str) -> String {
    let trimmed = line.trim_start();
    let indent = &line[..line.len() - trimmed.len()];
    if trimmed.starts_with('#') {
        let heading = trimmed.trim_start_matches('#').trim_start();
        return format!("{}{}", indent, strip_bold(heading).bold().underline());
    }
    if let Some(item) = trimmed.strip_prefix("- ").or_else(|| trimmed.strip_prefix("* ")) {
        return format!("{}• {}", indent, emphasize(item));
    }
    format!("{}{}", indent, emphasize(trimmed))
}

fn strip_bold(text: &str) -> String {
    text.replace("**", "")
}

/// Bolds `**spans**`; an unterminated marker is kept as written.
fn emphasize(text: &str) -> String {
    let mut out = String::new();
    let mut rest = text;
    while let Some(open) = rest.find("**") {
        let after = &rest[open + 2..];
        let Some(close) = after.find("**") else { break };
        out.push_str(&rest[..open]);
        out.push_str(&after[..close].bold().to_string());
        rest = &after[close + 2..];
    }
    out.push_str(rest);
    out
}

pub fn print_exec_outcome(command: &str, cwd: &str, outcome: &ExecOutcome, simple: bool) {
    let status = match outcome.status {
        ExecStatus::Exited(c) => c.to_string(),
        ExecStatus::TimedOut => "timed out".to_string(),
    };
    if simple {
        let mark = if outcome.status.success() { "✓".green() } else { "✗".red() };
        println!("{} {}", mark, command);
    } else {
        let body = [field("Command", command), field("Working Directory", cwd), field("Exit Code", &status)].join("\n");
        let title = match outcome.status {
            ExecStatus::Exited(0) => "Command Execution".green(),
            ExecStatus::Exited(_) => "Command Execution".yellow(),
            ExecStatus::TimedOut => "Command Execution".red(),
        };
        println!("{}", title.bold());
        println!("{}", body);
    }
    if !outcome.stdout.is_empty() {
        if !simple {
            println!("{}", "Standard Output".bold().green());
        }
        print!("{}", outcome.stdout);
        if !outcome.stdout.ends_with('\n') {
            println!();
        }
    }
    if !outcome.stderr.is_empty() {
        if !simple {
            eprintln!("{}", "Standard Error".bold().red());
        }
        eprint!("{}", outcome.stderr.red());
        if !outcome.stderr.ends_with('\n') {
            eprintln!();
        }
    }
}

pub fn print_line_matches(file: &str, pattern: &str, matches: &[LineMatch]) {
    if matches.is_empty() {
        println!("{}", format!("No matches found for '{}' in {}", pattern, file).yellow());
        return;
    }
    panel("Search Results", &[field("File", file), field("Pattern", pattern), field("Matches", matches.len())].join("\n"));
    for m in matches {
        println!("{} {}", format!("{:>5}", m.line).cyan(), m.text.trim());
    }
}

pub fn print_replacement_preview(file: &str, pattern: &str, replacement: &str, previews: &[ReplacementPreview]) {
    if previews.is_empty() {
        println!("{}", format!("No matches found for '{}' in {}", pattern, file).yellow());
        return;
    }
    panel(
        "Dry Run - Would Replace",
        &[field("File", file), field("Pattern", pattern), field("Replacement", replacement), field("Matches", previews.len())].join("\n"),
    );
    for p in previews {
        println!("{} {} {}", format!("{:>5}", p.line).cyan(), "-".red(), p.before.trim().red());
        println!("{} {} {}", " ".repeat(5), "+".green(), p.after.trim().green());
    }
}

pub fn print_file_info(info: &FileInfo) {
    let kb = info.size_bytes as f64 / 1024.0;
    panel(
        &format!("File Information: {}", info.path),
        &[
            field("Size", format!("{:.2} KB ({} bytes)", kb, info.size_bytes)),
            field("Lines", info.lines),
            field("Characters", info.characters),
            field("Detected Language", &info.language),
            field("Empty", if info.empty { "Yes" } else { "No" }),
        ]
        .join("\n"),
    );
}

pub fn print_search_results(query: &str, results: &[SearchResult]) {
    if results.is_empty() {
        println!("{}", "No results found.".yellow());
        return;
    }
    println!("{}", format!("Search Results for: {}", query).bold());
    for (i, r) in results.iter().enumerate() {
        println!("{} {}", format!("{}.", i + 1).cyan(), r.title.bold());
        if !r.url.is_empty() {
            println!("   {}", r.url.blue());
        }
        println!("   {}", crate::util::truncate_text(&r.snippet, 200));
    }
}

pub fn print_command_categories(cwd: &str, total: usize, categories: &[CommandCategory], per_category: usize) {
    panel("Available Commands", &[field("Working Directory", cwd), field("Total Commands", total)].join("\n"));
    for c in categories {
        let shown: Vec<&str> = c.commands.iter().take(per_category).map(String::as_str).collect();
        let more = c.commands.len().saturating_sub(shown.len());
        let suffix = if more > 0 { format!(" (+{} more)", more) } else { String::new() };
        println!("{} {}{}", format!("{}:", c.name).bold().cyan(), shown.join(", "), suffix.dimmed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain(markdown: bool) -> AnswerStyle {
        colored::control::set_override(false);
        AnswerStyle { markdown, highlight_code: true, code_color: Color::Cyan }
    }

    #[test]
    fn markdown_is_rendered_when_enabled() {
        let text = "## Steps\n- run **cargo**\n```sh\n# not a heading\n```";
        let out = format_answer(text, plain(true));
        assert_eq!(out, "Steps\n• run cargo\n```sh\n# not a heading\n```");
    }

    #[test]
    fn markdown_passes_through_when_disabled() {
        let text = "## Steps\n- run **cargo**";
        assert_eq!(format_answer(text, plain(false)), text);
    }

    #[test]
    fn unterminated_bold_is_kept() {
        assert_eq!(emphasize("a **b"), "a **b");
    }

    #[test]
    fn theme_palette() {
        assert_eq!(theme_code_color("Monokai"), Color::Yellow);
        assert_eq!(theme_code_color("unknown"), Color::Cyan);
    }
}
