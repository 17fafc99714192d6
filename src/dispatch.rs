use anyhow::{Context, Result};
use log::{debug, info, warn};
use regex::Regex;

use crate::config::Settings;
use crate::llm::{ChatMessage, CompletionGateway, CompletionRequest};

pub const CONFIDENCE_THRESHOLD: f32 = 0.5;
pub const SELECTION_MAX_TOKENS: u32 = 300;
pub const FALLBACK_KEY: &str = "ask";
pub const FALLBACK_COMMAND: &str = "ask";

/// Static description of one subcommand the dispatcher may route to.
#[derive(Debug, Clone)]
pub struct ToolDescriptor {
    pub key: &'static str,
    pub description: &'static str,
    pub command: &'static str,
    pub patterns: &'static [&'static str],
    pub args: &'static [&'static str],
    /// Needs the terminal; never captured.
    pub interactive: bool,
    /// Model-selected ARGS are passed as one argument instead of split on `|`.
    pub verbatim_args: bool,
}

static FALLBACK_TOOL: ToolDescriptor = ToolDescriptor {
    key: FALLBACK_KEY,
    description: "Ask a single question to the AI",
    command: FALLBACK_COMMAND,
    patterns: &[],
    args: &["question"],
    interactive: false,
    verbatim_args: false,
};

pub fn builtin_tools() -> Vec<ToolDescriptor> {
    vec![
        ToolDescriptor {
            key: "ask",
            description: "Ask a single question to the AI (general knowledge, explanations, analysis)",
            command: "ask",
            patterns: &[r"ask(?: the ai)?[:\s]+(.+)"],
            args: &["question"],
            interactive: false,
            verbatim_args: false,
        },
        ToolDescriptor {
            key: "code",
            description: "Generate code from a description",
            command: "code",
            patterns: &[r"(?:write|generate|create) .*\b(?:code|function|script|program|class)\b"],
            args: &["prompt"],
            interactive: false,
            verbatim_args: false,
        },
        ToolDescriptor {
            key: "explain",
            description: "Explain a code snippet or a file given as @path",
            command: "explain",
            patterns: &[r"explain (@\S+)\s*$", r"explain(?: this| the)? code[:\s]+(.+)"],
            args: &["code"],
            interactive: false,
            verbatim_args: false,
        },
        ToolDescriptor {
            key: "edit_view",
            description: "View file content",
            command: "edit view",
            patterns: &[r"(?:show|view|display|cat|print|open)(?: me)?(?: the)?(?: contents of)?(?: file)? (\S+\.\w+)\s*$"],
            args: &["file"],
            interactive: false,
            verbatim_args: false,
        },
        ToolDescriptor {
            key: "edit_find",
            description: "Search for text in a file",
            command: "edit find",
            patterns: &[r#"(?:find|search for|look for|grep) ['"]?(.+?)['"]? in (?:the )?(?:file )?(\S+)\s*$"#],
            args: &["pattern", "file"],
            interactive: false,
            verbatim_args: false,
        },
        ToolDescriptor {
            key: "edit_replace",
            description: "Replace text in a file",
            command: "edit replace",
            patterns: &[r#"replace ['"]?(.+?)['"]? with ['"]?(.+?)['"]? in (?:the )?(?:file )?(\S+)\s*$"#],
            args: &["pattern", "replacement", "file"],
            interactive: false,
            verbatim_args: false,
        },
        ToolDescriptor {
            key: "edit_insert",
            description: "Insert text into a file",
            command: "edit insert",
            patterns: &[r#"(?:insert|append|add) ['"]?(.+?)['"]? (?:in)?to (?:the )?(?:end of )?(?:file )?(\S+\.\w+)\s*$"#],
            args: &["content", "file"],
            interactive: false,
            verbatim_args: false,
        },
        ToolDescriptor {
            key: "edit_info",
            description: "Show file information and statistics",
            command: "edit info",
            patterns: &[r"(?:info|information|details|stats|statistics)(?: about| for| on| of)?(?: the)?(?: file)? (\S+\.\w+)\s*$"],
            args: &["file"],
            interactive: false,
            verbatim_args: false,
        },
        ToolDescriptor {
            key: "chat",
            description: "Start an interactive chat session",
            command: "chat",
            patterns: &[r"(?:start|open|begin)(?: a| an)?(?: new)?(?: interactive)? chat(?: session)?\s*$"],
            args: &[],
            interactive: true,
            verbatim_args: false,
        },
        ToolDescriptor {
            key: "config_show",
            description: "Show the current configuration",
            command: "config show",
            patterns: &[r"(?:show|display|view|print)(?: me)?(?: the)?(?: current)? (?:config|configuration|settings)\s*$"],
            args: &[],
            interactive: false,
            verbatim_args: false,
        },
        ToolDescriptor {
            key: "bash",
            description: "Execute shell commands (system info, files, processes, network, time and date)",
            command: "bash main",
            patterns: &[
                r"(?:run|execute)(?: the)?(?: shell| bash)? command[:\s]+(.+)",
                r"\$\s*(.+)",
                r"(?:pwd|ls|whoami|date|uptime|hostname|uname)(?: -{1,2}\w+)*\s*$",
            ],
            args: &["command"],
            interactive: false,
            verbatim_args: true,
        },
    ]
}

#[derive(Debug, Clone, PartialEq)]
pub struct DispatchCandidate {
    pub tool: String,
    pub command: String,
    pub args: Vec<String>,
    pub confidence: f32,
}

impl DispatchCandidate {
    pub fn fallback(instruction: &str) -> Self {
        Self {
            tool: FALLBACK_KEY.to_string(),
            command: FALLBACK_COMMAND.to_string(),
            args: vec![instruction.trim().to_string()],
            confidence: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    DeterministicMatch(DispatchCandidate),
    ModelAssisted {
        candidate: DispatchCandidate,
        reasoning: Option<String>,
        /// Why the model answer was replaced by the fallback, if it was.
        degraded: Option<String>,
    },
    Unresolved,
}

impl DispatchOutcome {
    pub fn candidate(&self) -> Option<&DispatchCandidate> {
        match self {
            DispatchOutcome::DeterministicMatch(c) => Some(c),
            DispatchOutcome::ModelAssisted { candidate, .. } => Some(candidate),
            DispatchOutcome::Unresolved => None,
        }
    }
}

#[derive(Debug)]
enum Resolution {
    Pattern(DispatchCandidate),
    Model { candidate: DispatchCandidate, reasoning: Option<String>, degraded: Option<String> },
}

#[derive(Debug)]
enum DispatchState {
    MatchPatterns,
    AwaitModelFallback,
    Validate(Resolution),
    Done(DispatchOutcome),
}

/// Parsed `TOOL:`/`ARGS:`/`REASONING:` reply.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelSelection {
    pub tool: Option<String>,
    pub args: Option<String>,
    pub reasoning: Option<String>,
}

struct CompiledTool {
    descriptor: ToolDescriptor,
    patterns: Vec<(usize, Regex)>,
}

pub struct Dispatcher {
    tools: Vec<CompiledTool>,
}

impl Dispatcher {
    pub fn new(tools: Vec<ToolDescriptor>) -> Result<Self> {
        let mut compiled = Vec::with_capacity(tools.len());
        for descriptor in tools {
            let mut patterns = Vec::with_capacity(descriptor.patterns.len());
            for p in descriptor.patterns {
                let re = Regex::new(&format!("^(?:{})", p))
                    .with_context(|| format!("invalid pattern for tool {}: {}", descriptor.key, p))?;
                patterns.push((p.chars().count(), re));
            }
            compiled.push(CompiledTool { descriptor, patterns });
        }
        Ok(Self { tools: compiled })
    }

    pub fn with_builtin_tools() -> Result<Self> {
        Self::new(builtin_tools())
    }

    pub fn tools(&self) -> impl Iterator<Item = &ToolDescriptor> {
        self.tools.iter().map(|t| &t.descriptor)
    }

    pub fn known_commands(&self) -> Vec<String> {
        let mut out: Vec<String> = self.tools().map(|d| d.command.to_string()).collect();
        if !out.iter().any(|c| c == FALLBACK_COMMAND) {
            out.push(FALLBACK_COMMAND.to_string());
        }
        out
    }

    pub fn descriptor_for_command(&self, command: &str) -> Option<&ToolDescriptor> {
        self.tools()
            .find(|d| d.command == command)
            .or_else(|| (command == FALLBACK_COMMAND).then_some(&FALLBACK_TOOL))
    }

    /// Resolves free text to a candidate. `gateway` is only consulted when no
    /// pattern is confident; without one the model tier degrades to the fallback.
    pub async fn dispatch(
        &self,
        instruction: &str,
        gateway: Option<&CompletionGateway>,
        settings: &Settings,
    ) -> DispatchOutcome {
        if instruction.trim().is_empty() {
            debug!("dispatch: empty instruction is unresolved");
            return DispatchOutcome::Unresolved;
        }
        let mut state = DispatchState::MatchPatterns;
        loop {
            state = match state {
                DispatchState::MatchPatterns => match self.match_patterns(instruction) {
                    Some(c) if c.confidence > CONFIDENCE_THRESHOLD => {
                        debug!("dispatch: pattern match {} ({:.3})", c.tool, c.confidence);
                        DispatchState::Validate(Resolution::Pattern(c))
                    }
                    best => {
                        debug!(
                            "dispatch: no confident pattern (best {:.3}); asking the model",
                            best.map(|c| c.confidence).unwrap_or(0.0)
                        );
                        DispatchState::AwaitModelFallback
                    }
                },
                DispatchState::AwaitModelFallback => {
                    DispatchState::Validate(self.select_with_model(instruction, gateway, settings).await)
                }
                DispatchState::Validate(resolution) => {
                    DispatchState::Done(self.validate_resolution(resolution, instruction))
                }
                DispatchState::Done(outcome) => {
                    info!("dispatch resolved: {:?}", outcome.candidate().map(|c| (&c.command, &c.args)));
                    return outcome;
                }
            };
        }
    }

    /// Bypasses both tiers; the named tool is still validated.
    pub fn dispatch_forced(&self, instruction: &str, tool: &str) -> DispatchOutcome {
        if instruction.trim().is_empty() {
            return DispatchOutcome::Unresolved;
        }
        let candidate = match self.lookup(tool) {
            Some(d) => DispatchCandidate {
                tool: d.key.to_string(),
                command: d.command.to_string(),
                args: if d.args.is_empty() { vec![] } else { vec![instruction.trim().to_string()] },
                confidence: 1.0,
            },
            None => DispatchCandidate {
                tool: tool.to_string(),
                command: tool.to_string(),
                args: vec![instruction.trim().to_string()],
                confidence: 1.0,
            },
        };
        debug!("dispatch: forced tool {}", candidate.command);
        DispatchOutcome::DeterministicMatch(self.validate(candidate, instruction))
    }

    pub fn match_patterns(&self, instruction: &str) -> Option<DispatchCandidate> {
        let trimmed = instruction.trim();
        let normalized = trimmed.to_lowercase();
        let source = if same_offsets(trimmed, &normalized) { trimmed } else { normalized.as_str() };

        let mut best: Option<DispatchCandidate> = None;
        for tool in &self.tools {
            let hit = tool.patterns.iter().find_map(|(len, re)| re.captures(&normalized).map(|caps| (*len, caps)));
            let Some((len, caps)) = hit else { continue };
            let confidence = pattern_confidence(len);
            if best.as_ref().is_some_and(|b| b.confidence >= confidence) {
                continue;
            }
            let args = caps
                .iter()
                .skip(1)
                .flatten()
                .map(|m| source[m.range()].trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            best = Some(DispatchCandidate {
                tool: tool.descriptor.key.to_string(),
                command: tool.descriptor.command.to_string(),
                args,
                confidence,
            });
        }
        best
    }

    /// Replaces anything outside the table with the fallback.
    pub fn validate(&self, candidate: DispatchCandidate, instruction: &str) -> DispatchCandidate {
        if self.is_known(&candidate.command) {
            candidate
        } else {
            warn!("refusing unknown command '{}'; falling back to {}", candidate.command, FALLBACK_COMMAND);
            DispatchCandidate::fallback(instruction)
        }
    }

    pub fn is_known(&self, command: &str) -> bool {
        command == FALLBACK_COMMAND || self.tools().any(|d| d.command == command)
    }

    /// Final argument list for execution. A descriptor expecting exactly one
    /// argument takes the whole instruction when nothing was captured.
    pub fn complete_args(&self, candidate: &DispatchCandidate, instruction: &str) -> Vec<String> {
        let expects_one = self
            .descriptor_for_command(&candidate.command)
            .is_some_and(|d| d.args.len() == 1);
        if candidate.args.is_empty() && expects_one {
            vec![instruction.trim().to_string()]
        } else {
            candidate.args.clone()
        }
    }

    pub fn selection_prompt(&self) -> String {
        let mut s = String::from(
            "You help users choose the right command-line tool for their task.\n\nAvailable tools:\n",
        );
        for d in self.tools() {
            let args = if d.args.is_empty() { "none".to_string() } else { d.args.join(" | ") };
            s.push_str(&format!("- {} (command: {}) - {}. Arguments in order: {}\n", d.key, d.command, d.description, args));
        }
        s.push_str(
            "\nGuidelines:\n\
             - For system questions (time, date, current directory, file listings, processes, network) use \"bash main\" with a shell command.\n\
             - For general knowledge questions use \"ask\".\n\
             - For code generation use \"code\".\n\
             - For piped shell commands put the whole command, pipes included, in ARGS.\n\
             \nRespond with ONLY these lines:\n\
             TOOL: <command>\n\
             ARGS: arg1|arg2\n\
             REASONING: <one short sentence>\n\
             \nExamples:\n\
             TOOL: ask\nARGS: What is the capital of France?\n\n\
             TOOL: bash main\nARGS: ps aux | grep ssh\n\n\
             TOOL: edit find\nARGS: hello|notes.txt\n\n\
             TOOL: config show\nARGS:\n\
             \nUse the command name, not the description, and do not quote arguments.",
        );
        s
    }

    async fn select_with_model(
        &self,
        instruction: &str,
        gateway: Option<&CompletionGateway>,
        settings: &Settings,
    ) -> Resolution {
        let degrade = |why: String| {
            warn!("model tool selection degraded: {}", why);
            Resolution::Model { candidate: DispatchCandidate::fallback(instruction), reasoning: None, degraded: Some(why) }
        };
        let Some(gateway) = gateway else {
            return degrade("no completion provider available".to_string());
        };
        let req = CompletionRequest {
            model: settings.model.clone(),
            messages: vec![
                ChatMessage::system(self.selection_prompt()),
                ChatMessage::user(format!("Which tool should I use for: {}", instruction.trim())),
            ],
            temperature: settings.temperature,
            max_tokens: Some(SELECTION_MAX_TOKENS),
        };
        let reply = match gateway.complete(&req).await {
            Ok(r) => r.content,
            Err(e) => return degrade(format!("{:#}", e)),
        };
        debug!("dispatch: model replied {:?}", reply);
        let selection = parse_selection(&reply);
        let (Some(tool_name), Some(raw_args)) = (selection.tool.as_deref(), selection.args.as_deref()) else {
            return degrade("reply has no TOOL/ARGS lines".to_string());
        };
        let Some(d) = self.lookup(tool_name) else {
            return degrade(format!("unknown tool '{}'", tool_name));
        };
        let args = if d.verbatim_args {
            let whole = strip_quotes(raw_args.trim()).to_string();
            if whole.is_empty() { vec![] } else { vec![whole] }
        } else {
            split_args(raw_args)
        };
        Resolution::Model {
            candidate: DispatchCandidate {
                tool: d.key.to_string(),
                command: d.command.to_string(),
                args,
                confidence: 0.0,
            },
            reasoning: selection.reasoning,
            degraded: None,
        }
    }

    fn validate_resolution(&self, resolution: Resolution, instruction: &str) -> DispatchOutcome {
        match resolution {
            Resolution::Pattern(c) => DispatchOutcome::DeterministicMatch(self.validate(c, instruction)),
            Resolution::Model { candidate, reasoning, degraded } => {
                if self.is_known(&candidate.command) {
                    DispatchOutcome::ModelAssisted { candidate, reasoning, degraded }
                } else {
                    DispatchOutcome::ModelAssisted {
                        degraded: Some(format!("unknown command '{}'", candidate.command)),
                        candidate: self.validate(candidate, instruction),
                        reasoning,
                    }
                }
            }
        }
    }

    fn lookup(&self, name: &str) -> Option<&ToolDescriptor> {
        let wanted = name.trim().to_lowercase();
        self.tools()
            .find(|d| d.command.eq_ignore_ascii_case(&wanted))
            .or_else(|| self.tools().find(|d| d.key.eq_ignore_ascii_case(&wanted)))
            .or_else(|| (wanted == FALLBACK_COMMAND).then_some(&FALLBACK_TOOL))
    }
}

pub fn pattern_confidence(pattern_len: usize) -> f32 {
    let len = pattern_len as f32;
    len / (len + 5.0)
}

pub fn parse_selection(reply: &str) -> ModelSelection {
    let mut sel = ModelSelection::default();
    let mut pending: Option<Vec<&str>> = None;
    fn commit(sel: &mut ModelSelection, pending: &mut Option<Vec<&str>>) {
        if let Some(lines) = pending.take() {
            if sel.args.is_none() {
                sel.args = Some(lines.join("\n").trim().to_string());
            }
        }
    }
    for line in reply.lines() {
        let clean = line.trim().trim_start_matches(['*', '-', '`']).trim();
        if let Some(rest) = strip_label(clean, "TOOL:") {
            commit(&mut sel, &mut pending);
            let mut tool = rest.trim_matches(['*', '`', ' ']).to_string();
            if let Some(pos) = tool.to_uppercase().find(" ARGS") {
                tool.truncate(pos);
            }
            let tool = strip_quotes(tool.trim()).to_string();
            if sel.tool.is_none() && !tool.is_empty() {
                sel.tool = Some(tool);
            }
        } else if let Some(rest) = strip_label(clean, "ARGS:") {
            commit(&mut sel, &mut pending);
            if sel.args.is_none() {
                pending = Some(vec![rest.trim_matches(['*', '`']).trim()]);
            }
        } else if let Some(rest) = strip_label(clean, "REASONING:") {
            commit(&mut sel, &mut pending);
            if sel.reasoning.is_none() {
                sel.reasoning = Some(rest.trim().to_string());
            }
        } else if line.trim().is_empty() {
            commit(&mut sel, &mut pending);
        } else if let Some(lines) = pending.as_mut() {
            lines.push(line.trim());
        }
    }
    commit(&mut sel, &mut pending);
    sel
}

fn strip_label<'a>(line: &'a str, label: &str) -> Option<&'a str> {
    if line.len() >= label.len() && line.is_char_boundary(label.len()) && line[..label.len()].eq_ignore_ascii_case(label) {
        Some(&line[label.len()..])
    } else {
        None
    }
}

fn split_args(raw: &str) -> Vec<String> {
    strip_quotes(raw.trim())
        .split('|')
        .map(|a| strip_quotes(a.trim()).to_string())
        .filter(|a| !a.is_empty())
        .collect()
}

fn strip_quotes(s: &str) -> &str {
    s.trim_matches(|c| c == '"' || c == '\'')
}

fn same_offsets(a: &str, b: &str) -> bool {
    a.len() == b.len()
        && a.chars().count() == b.chars().count()
        && a.chars().zip(b.chars()).all(|(x, y)| x.len_utf8() == y.len_utf8())
}
