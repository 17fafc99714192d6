use clap::{Args, Parser, Subcommand, ValueEnum};
use std::future::Future;
use std::path::PathBuf;

mod cache;
mod chat;
mod config;
mod dispatch;
mod edit;
mod error;
mod executor;
mod io;
mod llm;
mod render;
mod session;
mod shell;
mod util;
mod web;

use crate::render as render_mod;
use anyhow::Context as _;
use colored::Colorize;
use config::{Overrides, Settings};
use dispatch::{DispatchOutcome, Dispatcher};
use error::{exit_code_for, CliError};
use executor::{ExecStatus, ForwardedFlags, SubcommandExecutor};
use llm::{ChatMessage, CompletionGateway, CompletionRequest, CompletionResponse};
use log::{debug, warn};
use std::time::Duration;

#[derive(Parser, Debug, Clone)]
#[command(name = "ai-cli", version, about = "AI-powered command line assistant", long_about = None)]
struct Cli {
    #[command(flatten)]
    globals: GlobalOpts,

    #[command(subcommand)]
    command: Commands,
}

/// Global flags written after free text, e.g. `ai-cli "show config" --json`.
#[derive(Parser, Debug)]
#[command(name = "ai-cli", no_binary_name = true)]
struct TrailingFlags {
    #[command(flatten)]
    globals: GlobalOpts,
}

#[derive(Subcommand, Debug, Clone)]
enum Commands {
    /// Ask a one-shot question
    Ask(AskArgs),

    /// Interactive multi-turn chat
    Chat(ChatArgs),

    /// Generate code from a description
    Code(CodeArgs),

    /// Explain a piece of code
    Explain(ExplainArgs),

    /// View and edit files
    Edit {
        #[command(subcommand)]
        command: EditCommands,
    },

    /// Run shell commands and scripts
    Bash {
        #[command(subcommand)]
        command: BashCommands,
    },

    /// Search and read the web
    Web {
        #[command(subcommand)]
        command: WebCommands,
    },

    /// Inspect configuration and the response cache
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Route a natural-language instruction to a subcommand
    Ai(AiArgs),

    /// Free text is treated as an instruction for `ai`
    #[command(external_subcommand)]
    External(Vec<String>),
}

#[derive(Args, Debug, Clone)]
struct AskArgs {
    /// Question text
    #[arg(required = true)]
    question: Vec<String>,

    /// System prompt
    #[arg(long = "system")]
    system: Option<String>,
}

#[derive(Args, Debug, Clone)]
struct ChatArgs {
    /// System prompt for the whole session
    #[arg(long = "system")]
    system: Option<String>,
}

#[derive(Args, Debug, Clone)]
struct CodeArgs {
    /// What the code should do
    #[arg(required = true)]
    prompt: Vec<String>,

    /// Target language
    #[arg(short = 'l', long = "language")]
    language: Option<String>,

    /// Write the generated code to this file
    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum Detail {
    Brief,
    Normal,
    Detailed,
}

impl Detail {
    fn as_str(self) -> &'static str {
        match self {
            Detail::Brief => "brief",
            Detail::Normal => "normal",
            Detail::Detailed => "detailed",
        }
    }

    fn instruction(self) -> &'static str {
        match self {
            Detail::Brief => "Provide a brief, high-level explanation of what the code does.",
            Detail::Normal => "Explain what the code does, how it works, and any important concepts.",
            Detail::Detailed => {
                "Provide a detailed explanation including line-by-line analysis, algorithms used, \
                 time complexity, and potential improvements."
            }
        }
    }
}

#[derive(Args, Debug, Clone)]
struct ExplainArgs {
    /// Code to explain, or @path to read it from a file
    #[arg(required = true)]
    code: Vec<String>,

    /// Language of the code (detected when omitted)
    #[arg(short = 'l', long = "language")]
    language: Option<String>,

    #[arg(short = 'd', long = "detail", value_enum, default_value_t = Detail::Normal)]
    detail: Detail,
}

#[derive(Subcommand, Debug, Clone)]
enum EditCommands {
    /// Print a file
    View {
        file: PathBuf,
        #[arg(long = "no-line-numbers")]
        no_line_numbers: bool,
    },
    /// Find lines matching a pattern
    Find {
        pattern: String,
        file: PathBuf,
        #[command(flatten)]
        matching: MatchFlags,
    },
    /// Replace every match of a pattern
    Replace {
        pattern: String,
        replacement: String,
        file: PathBuf,
        #[command(flatten)]
        matching: MatchFlags,
        /// Show what would change without writing
        #[arg(long = "dry-run")]
        dry_run: bool,
    },
    /// Insert content into a file
    Insert {
        content: String,
        file: PathBuf,
        /// start, end or line
        #[arg(long = "position", default_value = "end")]
        position: String,
        /// 1-based line for --position line
        #[arg(long = "line")]
        line: Option<usize>,
    },
    /// Size, line count and detected language
    Info { file: PathBuf },
}

#[derive(Args, Debug, Clone, Copy)]
struct MatchFlags {
    #[arg(long = "case-sensitive")]
    case_sensitive: bool,
    /// Treat the pattern as a regular expression
    #[arg(long = "regex")]
    regex: bool,
}

impl From<MatchFlags> for edit::MatchOptions {
    fn from(f: MatchFlags) -> Self {
        edit::MatchOptions { case_sensitive: f.case_sensitive, regex: f.regex }
    }
}

#[derive(Subcommand, Debug, Clone)]
enum BashCommands {
    /// Run a shell command
    Main {
        #[arg(required = true)]
        command: Vec<String>,
        #[arg(long = "cwd")]
        cwd: Option<PathBuf>,
        /// Compact output
        #[arg(long = "simple")]
        simple: bool,
        /// Show the command without running it
        #[arg(long = "dry-run")]
        dry_run: bool,
    },
    /// Run a script file with bash
    Script {
        path: PathBuf,
        args: Vec<String>,
        #[arg(long = "cwd")]
        cwd: Option<PathBuf>,
        #[arg(long = "simple")]
        simple: bool,
    },
    /// Line-oriented shell session
    Interactive {
        #[arg(long = "cwd")]
        cwd: Option<PathBuf>,
    },
    /// List executables on PATH by category
    ListCommands,
}

#[derive(Subcommand, Debug, Clone)]
enum WebCommands {
    /// Search the web
    Search {
        #[arg(required = true)]
        query: Vec<String>,
        #[arg(long = "max", default_value_t = 5)]
        max: usize,
    },
    /// Latest news, optionally on a topic
    News {
        topic: Vec<String>,
        #[arg(long = "max", default_value_t = 5)]
        max: usize,
    },
    /// Fetch a page and print its content
    Read {
        url: String,
        /// text, markdown or html
        #[arg(long = "format", default_value = "text")]
        format: String,
        /// Maximum characters to print
        #[arg(long = "max", default_value_t = 5000)]
        max: usize,
    },
    /// Summarize a page with the model
    Summarize {
        url: String,
        /// Maximum words in the summary
        #[arg(long = "max", default_value_t = 150)]
        max: usize,
    },
}

#[derive(Subcommand, Debug, Clone)]
enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// List known models per provider
    Models,
    /// Write the shareable settings to a TOML file
    Export { file: PathBuf },
    /// Response cache statistics
    Cache,
    /// Delete every cached response
    ClearCache,
    /// Check settings and credentials
    Validate,
}

#[derive(Args, Debug, Clone)]
struct AiArgs {
    #[arg(required = true)]
    instruction: Vec<String>,

    /// Skip matching and run this subcommand
    #[arg(long = "force-tool")]
    force_tool: Option<String>,
}

#[derive(Args, Debug, Clone, Default)]
struct GlobalOpts {
    /// Model provider (openai, anthropic, mock)
    #[arg(long = "provider", global = true)]
    provider: Option<String>,

    /// Model override
    #[arg(short = 'm', long = "model", global = true)]
    model: Option<String>,

    /// Sampling temperature (0.0-2.0)
    #[arg(short = 't', long = "temperature", global = true, allow_negative_numbers = true)]
    temperature: Option<f32>,

    /// Maximum tokens in a completion
    #[arg(long = "max-tokens", global = true)]
    max_tokens: Option<u32>,

    /// Output JSON instead of human-readable text
    #[arg(long = "json", global = true)]
    json: bool,

    /// Disable ANSI colors
    #[arg(long = "no-color", global = true)]
    no_color: bool,

    /// Increase verbosity (-v, -vv)
    #[arg(short = 'v', action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Timeout (seconds) for shell and dispatched commands
    #[arg(long = "timeout", global = true)]
    timeout_secs: Option<u64>,
}

impl GlobalOpts {
    /// Applies flags given later on the command line over these.
    fn merge(&mut self, later: GlobalOpts) {
        self.provider = later.provider.or(self.provider.take());
        self.model = later.model.or(self.model.take());
        self.temperature = later.temperature.or(self.temperature);
        self.max_tokens = later.max_tokens.or(self.max_tokens);
        self.timeout_secs = later.timeout_secs.or(self.timeout_secs);
        self.json |= later.json;
        self.no_color |= later.no_color;
        self.verbose = self.verbose.saturating_add(later.verbose);
    }

    fn overrides(&self) -> Overrides {
        Overrides {
            provider: self.provider.clone(),
            model: self.model.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            command_timeout_secs: self.timeout_secs,
        }
    }

    fn forwarded(&self) -> ForwardedFlags {
        ForwardedFlags {
            provider: self.provider.clone(),
            model: self.model.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            timeout_secs: self.timeout_secs,
            json: self.json,
            no_color: self.no_color,
            verbose: self.verbose,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let Cli { mut globals, command } = Cli::parse();

    let command = match command {
        Commands::External(words) => {
            let (text, flags) = split_trailing_globals(words);
            if !flags.is_empty() {
                let trailing = TrailingFlags::try_parse_from(&flags).unwrap_or_else(|e| e.exit());
                globals.merge(trailing.globals);
            }
            Commands::External(text)
        }
        other => other,
    };

    if globals.no_color {
        render_mod::disable_color();
    }

    if let Err(e) = run(&globals, command).await {
        report_error(&globals, &e);
        std::process::exit(exit_code_for(&e));
    }

    Ok(())
}

const VALUE_FLAGS: &[&str] = &["--provider", "-m", "--model", "-t", "--temperature", "--max-tokens", "--timeout"];
const SWITCH_FLAGS: &[&str] = &["--json", "--no-color"];

/// Separates global flags from the words of a free-text instruction.
/// Everything after `--` is instruction text.
fn split_trailing_globals(words: Vec<String>) -> (Vec<String>, Vec<String>) {
    let mut text = Vec::new();
    let mut flags = Vec::new();
    let mut it = words.into_iter();
    while let Some(word) = it.next() {
        if word == "--" {
            text.extend(it);
            break;
        }
        let name = word.split_once('=').map_or(word.as_str(), |(n, _)| n);
        if VALUE_FLAGS.contains(&name) {
            let inline = name.len() != word.len();
            flags.push(word);
            if !inline {
                flags.extend(it.next());
            }
        } else if SWITCH_FLAGS.contains(&word.as_str()) || is_verbose_flag(&word) {
            flags.push(word);
        } else {
            text.push(word);
        }
    }
    (text, flags)
}

fn is_verbose_flag(word: &str) -> bool {
    word.len() > 1 && word.starts_with('-') && word[1..].chars().all(|c| c == 'v')
}

async fn run(globals: &GlobalOpts, command: Commands) -> anyhow::Result<()> {
    let mut settings = Settings::load()?;
    settings.apply_overrides(&globals.overrides());
    init_logging(globals.verbose, &settings)?;
    debug!("provider {} model {} temperature {}", settings.provider, settings.model, settings.temperature);

    // config subcommands report bad values themselves
    if !matches!(command, Commands::Config { .. }) {
        config::validate_temperature(settings.temperature)?;
    }

    // these watch for Ctrl-C on their own
    let self_interrupting = matches!(
        command,
        Commands::Chat(_)
            | Commands::Bash { command: BashCommands::Interactive { .. } }
            | Commands::Ai(_)
            | Commands::External(_)
    );
    let fut = run_command(globals, &settings, command);
    if self_interrupting { fut.await } else { interruptible(fut).await }
}

async fn run_command(globals: &GlobalOpts, settings: &Settings, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Ask(args) => cmd_ask(globals, settings, args).await,
        Commands::Chat(args) => cmd_chat(settings, args).await,
        Commands::Code(args) => cmd_code(globals, settings, args).await,
        Commands::Explain(args) => cmd_explain(globals, settings, args).await,
        Commands::Edit { command } => cmd_edit(globals, command).await,
        Commands::Bash { command } => cmd_bash(globals, settings, command).await,
        Commands::Web { command } => cmd_web(globals, settings, command).await,
        Commands::Config { command } => cmd_config(globals, settings, command).await,
        Commands::Ai(args) => cmd_dispatch(globals, settings, &args.instruction.join(" "), args.force_tool.as_deref()).await,
        Commands::External(words) => cmd_dispatch(globals, settings, &words.join(" "), None).await,
    }
}

async fn interruptible<T>(fut: impl Future<Output = anyhow::Result<T>>) -> anyhow::Result<T> {
    tokio::select! {
        r = fut => r,
        _ = tokio::signal::ctrl_c() => Err(CliError::Interrupted.into()),
    }
}

fn report_error(globals: &GlobalOpts, e: &anyhow::Error) {
    // the child's own output already explains a failed command
    if matches!(e.downcast_ref::<CliError>(), Some(CliError::CommandFailed(_))) {
        return;
    }
    if globals.json {
        let (code, hint) = classify_error(e);
        let msg = format!("{:#}", e);
        render_mod::print_json_error(&code, &msg, hint.as_deref());
    } else {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
    }
}

fn classify_error(e: &anyhow::Error) -> (String, Option<String>) {
    let msg = format!("{:#}", e).to_lowercase();
    if msg.contains("api key is required") {
        return ("missing_api_key".to_string(), Some("set OPENAI_API_KEY or ANTHROPIC_API_KEY in env or .env".to_string()));
    }
    if msg.contains("file not found") {
        return ("file_not_found".to_string(), Some("check the file path".to_string()));
    }
    if msg.contains("timed out") || msg.contains("timeout") {
        return ("timeout".to_string(), Some("try increasing --timeout or REQUEST_TIMEOUT".to_string()));
    }
    if msg.contains("unsupported provider") {
        return ("provider_unsupported".to_string(), Some("use openai, anthropic or mock".to_string()));
    }
    if msg.contains("interrupted") {
        return ("interrupted".to_string(), None);
    }
    match e.downcast_ref::<CliError>() {
        Some(CliError::Validation(_)) => return ("invalid_value".to_string(), None),
        Some(CliError::Config(_)) => return ("config_error".to_string(), None),
        _ => {}
    }
    if msg.contains("network") || msg.contains("dns") || msg.contains("connection refused") || msg.contains("error sending request") {
        return ("network_error".to_string(), None);
    }
    ("unknown".to_string(), None)
}

fn map_provider_error(e: anyhow::Error) -> anyhow::Error {
    let timed_out = e
        .chain()
        .any(|c| c.downcast_ref::<reqwest::Error>().is_some_and(reqwest::Error::is_timeout) || c.to_string().contains("timed out"));
    if timed_out {
        return e.context("request timed out; try raising REQUEST_TIMEOUT or check network");
    }
    e
}

fn parse_level(level: &str) -> log::LevelFilter {
    match level.trim().to_lowercase().as_str() {
        "trace" => log::LevelFilter::Trace,
        "debug" => log::LevelFilter::Debug,
        "info" => log::LevelFilter::Info,
        "error" | "critical" => log::LevelFilter::Error,
        "off" => log::LevelFilter::Off,
        _ => log::LevelFilter::Warn,
    }
}

fn init_logging(verbose: u8, settings: &Settings) -> anyhow::Result<()> {
    let level = match verbose {
        0 => parse_level(&settings.log_level),
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    let mut builder = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"));
    builder.filter_module("ai_cli", level);
    if let Some(path) = &settings.log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("opening log file: {}", path.display()))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
        builder.write_style(env_logger::WriteStyle::Never);
    }
    // a logger may already be installed when running in-process
    if builder.try_init().is_err() {
        debug!("logger already initialized");
    }
    Ok(())
}

async fn complete(settings: &Settings, messages: Vec<ChatMessage>) -> anyhow::Result<CompletionResponse> {
    let gateway = CompletionGateway::from_settings(settings)?;
    let req = CompletionRequest::from_settings(settings, messages);
    gateway.complete(&req).await.map_err(map_provider_error)
}

fn print_model_answer(globals: &GlobalOpts, settings: &Settings, resp: &CompletionResponse) {
    if globals.json {
        #[derive(serde::Serialize)]
        struct Out<'a> { model: &'a str, usage: Option<&'a llm::Usage>, answer: &'a str }
        render_mod::print_json(&Out { model: &resp.model, usage: resp.usage.as_ref(), answer: &resp.content });
    } else {
        render_mod::print_answer(&resp.content, render_mod::AnswerStyle::from_settings(settings));
        render_mod::print_usage(resp.usage.as_ref(), &resp.model);
    }
}

async fn cmd_ask(globals: &GlobalOpts, settings: &Settings, args: AskArgs) -> anyhow::Result<()> {
    let question = args.question.join(" ");
    if question.trim().is_empty() {
        anyhow::bail!(CliError::Validation("empty question; e.g. ai-cli ask \"What is Rust async?\"".to_string()));
    }
    let mut messages = Vec::new();
    if let Some(system) = args.system.filter(|s| !s.trim().is_empty()) {
        messages.push(ChatMessage::system(system));
    }
    messages.push(ChatMessage::user(question));
    let resp = complete(settings, messages).await?;
    print_model_answer(globals, settings, &resp);
    Ok(())
}

async fn cmd_chat(settings: &Settings, args: ChatArgs) -> anyhow::Result<()> {
    let gateway = CompletionGateway::from_settings(settings)?;
    let mut chat = chat::ChatSession::new(settings.clone(), gateway, args.system);
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    chat.run(stdin).await
}

async fn cmd_code(globals: &GlobalOpts, settings: &Settings, args: CodeArgs) -> anyhow::Result<()> {
    let prompt = args.prompt.join(" ");
    if prompt.trim().is_empty() {
        anyhow::bail!(CliError::Validation("empty prompt".to_string()));
    }
    let mut system = String::from("You are an expert programmer. Generate clean, well-documented, and efficient code. ");
    if let Some(lang) = &args.language {
        system.push_str(&format!("Write the code in {}. ", lang));
    }
    system.push_str("Include comments explaining complex logic and provide a brief explanation of what the code does.");

    if !globals.json {
        render_mod::panel("AI CLI Code Generation", &render_mod::field("Prompt", &prompt));
    }
    let resp = complete(settings, vec![ChatMessage::system(system), ChatMessage::user(prompt)]).await?;

    let code = util::extract_code_block(&resp.content);
    let language = args.language.clone().unwrap_or_else(|| util::detect_language(&code).to_string());
    if let Some(path) = &args.output {
        io::write_file_async(path, &code).await?;
    }

    if globals.json {
        #[derive(serde::Serialize)]
        struct Out<'a> {
            model: &'a str,
            usage: Option<&'a llm::Usage>,
            language: &'a str,
            answer: &'a str,
            saved_to: Option<String>,
        }
        render_mod::print_json(&Out {
            model: &resp.model,
            usage: resp.usage.as_ref(),
            language: &language,
            answer: &resp.content,
            saved_to: args.output.as_ref().map(|p| p.display().to_string()),
        });
        return Ok(());
    }
    render_mod::print_answer(&resp.content, render_mod::AnswerStyle::from_settings(settings));
    if let Some(path) = &args.output {
        println!("{}", format!("Code saved to: {}", path.display()).green());
    }
    render_mod::print_usage(resp.usage.as_ref(), &resp.model);
    Ok(())
}

async fn cmd_explain(globals: &GlobalOpts, settings: &Settings, args: ExplainArgs) -> anyhow::Result<()> {
    let raw = args.code.join(" ");
    let (code, from_file) = io::read_code_argument(&raw).await?;
    if code.trim().is_empty() {
        anyhow::bail!(CliError::Validation("no code to explain".to_string()));
    }
    let language = args
        .language
        .clone()
        .or_else(|| from_file.as_deref().and_then(util::language_from_extension).map(str::to_string))
        .unwrap_or_else(|| util::detect_language(&code).to_string());

    let system = format!(
        "You are an expert programmer. {} The code is written in {}. Be clear, concise, and educational in your explanation.",
        args.detail.instruction(),
        language
    );
    let user = format!("Please explain this {} code:\n\n{}", language, code);

    if !globals.json {
        let source = from_file.as_ref().map(|p| p.display().to_string()).unwrap_or_else(|| "inline".to_string());
        render_mod::panel(
            "AI CLI Code Explanation",
            &[render_mod::field("Source", source), render_mod::field("Language", &language)].join("\n"),
        );
        if settings.syntax_highlighting {
            render_mod::print_code(&code, &language, true);
        }
    }
    let resp = complete(settings, vec![ChatMessage::system(system), ChatMessage::user(user)]).await?;
    print_model_answer(globals, settings, &resp);
    if !globals.json {
        println!("{}", format!("Detail level: {}", args.detail.as_str()).dimmed());
    }
    Ok(())
}

async fn cmd_edit(globals: &GlobalOpts, command: EditCommands) -> anyhow::Result<()> {
    match command {
        EditCommands::View { file, no_line_numbers } => {
            let content = io::read_file_to_string_async(&file).await?;
            let language = util::language_from_extension(&file).unwrap_or_else(|| util::detect_language(&content));
            if globals.json {
                #[derive(serde::Serialize)]
                struct Out<'a> { path: String, language: &'a str, content: &'a str }
                render_mod::print_json(&Out { path: file.display().to_string(), language, content: &content });
            } else {
                println!("{}", file.display().to_string().bold());
                render_mod::print_code(&content, language, !no_line_numbers);
            }
        }
        EditCommands::Find { pattern, file, matching } => {
            let content = io::read_file_to_string_async(&file).await?;
            let matches = edit::find_matches(&content, &pattern, matching.into())?;
            if globals.json {
                #[derive(serde::Serialize)]
                struct Out<'a> { file: String, pattern: &'a str, matches: &'a [edit::LineMatch] }
                render_mod::print_json(&Out { file: file.display().to_string(), pattern: &pattern, matches: &matches });
            } else {
                render_mod::print_line_matches(&file.display().to_string(), &pattern, &matches);
            }
        }
        EditCommands::Replace { pattern, replacement, file, matching, dry_run } => {
            let content = io::read_file_to_string_async(&file).await?;
            let opts: edit::MatchOptions = matching.into();
            if dry_run {
                let previews = edit::preview_replacements(&content, &pattern, &replacement, opts)?;
                if globals.json {
                    #[derive(serde::Serialize)]
                    struct Out<'a> { file: String, dry_run: bool, replacements: usize, previews: &'a [edit::ReplacementPreview] }
                    render_mod::print_json(&Out { file: file.display().to_string(), dry_run: true, replacements: previews.len(), previews: &previews });
                } else {
                    render_mod::print_replacement_preview(&file.display().to_string(), &pattern, &replacement, &previews);
                }
                return Ok(());
            }
            let (updated, count) = edit::replace_all(&content, &pattern, &replacement, opts)?;
            if count > 0 {
                io::write_file_async(&file, &updated).await?;
            }
            if globals.json {
                #[derive(serde::Serialize)]
                struct Out { file: String, dry_run: bool, replacements: usize }
                render_mod::print_json(&Out { file: file.display().to_string(), dry_run: false, replacements: count });
            } else if count == 0 {
                println!("{}", format!("No matches found for '{}' in {}", pattern, file.display()).yellow());
            } else {
                println!("{}", format!("Replaced {} occurrence(s) in {}", count, file.display()).green());
            }
        }
        EditCommands::Insert { content, file, position, line } => {
            let position = edit::InsertPosition::parse(&position, line)?;
            let existing = io::read_file_or_empty_async(&file).await?;
            let updated = edit::insert_lines(&existing, &content, position)?;
            io::write_file_async(&file, &updated).await?;
            if globals.json {
                #[derive(serde::Serialize)]
                struct Out { file: String, position: String }
                render_mod::print_json(&Out { file: file.display().to_string(), position: position.describe() });
            } else {
                println!("{}", format!("Inserted content at {} of {}", position.describe(), file.display()).green());
            }
        }
        EditCommands::Info { file } => {
            edit::ensure_file_exists(&file)?;
            let content = io::read_file_to_string_async(&file).await?;
            let size = io::file_size_async(&file).await?;
            let info = edit::describe_file(&file, &content, size);
            if globals.json {
                render_mod::print_json(&info);
            } else {
                render_mod::print_file_info(&info);
            }
        }
    }
    Ok(())
}

fn command_timeout(settings: &Settings) -> Option<Duration> {
    settings.command_timeout_secs.map(Duration::from_secs)
}

fn report_exec(globals: &GlobalOpts, command: &str, cwd: &str, outcome: &executor::ExecOutcome, simple: bool) {
    if globals.json {
        #[derive(serde::Serialize)]
        struct Out<'a> {
            command: &'a str,
            cwd: &'a str,
            exit_code: Option<i32>,
            timed_out: bool,
            stdout: &'a str,
            stderr: &'a str,
        }
        let exit_code = match outcome.status {
            ExecStatus::Exited(c) => Some(c),
            ExecStatus::TimedOut => None,
        };
        render_mod::print_json(&Out {
            command,
            cwd,
            exit_code,
            timed_out: outcome.status == ExecStatus::TimedOut,
            stdout: &outcome.stdout,
            stderr: &outcome.stderr,
        });
    } else {
        render_mod::print_exec_outcome(command, cwd, outcome, simple);
    }
}

async fn cmd_bash(globals: &GlobalOpts, settings: &Settings, command: BashCommands) -> anyhow::Result<()> {
    let timeout = command_timeout(settings);
    match command {
        BashCommands::Main { command, cwd, simple, dry_run } => {
            let command = command.join(" ");
            let cwd = shell::resolve_cwd(cwd.as_deref())?;
            let cwd_str = cwd.display().to_string();
            if dry_run {
                if globals.json {
                    #[derive(serde::Serialize)]
                    struct Out<'a> { command: &'a str, cwd: &'a str, dry_run: bool }
                    render_mod::print_json(&Out { command: &command, cwd: &cwd_str, dry_run: true });
                } else {
                    render_mod::panel(
                        "Dry Run",
                        &[render_mod::field("Command", &command), render_mod::field("Working Directory", &cwd_str)].join("\n"),
                    );
                }
                return Ok(());
            }
            let outcome = shell::run_shell(&command, &cwd, timeout).await?;
            report_exec(globals, &command, &cwd_str, &outcome, simple);
            outcome.into_result(timeout)?;
        }
        BashCommands::Script { path, args, cwd, simple } => {
            let cwd = shell::resolve_cwd(cwd.as_deref())?;
            let cwd_str = cwd.display().to_string();
            let outcome = shell::run_script(&path, &args, &cwd, timeout).await?;
            let label = std::iter::once(path.display().to_string()).chain(args.iter().cloned()).collect::<Vec<_>>().join(" ");
            report_exec(globals, &label, &cwd_str, &outcome, simple);
            outcome.into_result(timeout)?;
        }
        BashCommands::Interactive { cwd } => {
            let cwd = shell::resolve_cwd(cwd.as_deref())?;
            render_mod::panel(
                "Interactive Bash",
                &[render_mod::field("Working Directory", cwd.display()), "Type 'exit' to quit.".to_string()].join("\n"),
            );
            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            shell::interactive_loop(stdin, &cwd, timeout).await?;
        }
        BashCommands::ListCommands => {
            let path_var = std::env::var("PATH").unwrap_or_default();
            let commands = shell::list_path_commands(&path_var);
            let categories = shell::categorize_commands(&commands);
            let cwd = shell::resolve_cwd(None)?;
            if globals.json {
                #[derive(serde::Serialize)]
                struct Out<'a> { total: usize, categories: &'a [shell::CommandCategory] }
                render_mod::print_json(&Out { total: commands.len(), categories: &categories });
            } else {
                render_mod::print_command_categories(&cwd.display().to_string(), commands.len(), &categories, 10);
            }
        }
    }
    Ok(())
}

async fn cmd_web(globals: &GlobalOpts, settings: &Settings, command: WebCommands) -> anyhow::Result<()> {
    let client = web::WebClient::new(Duration::from_secs(settings.request_timeout_secs))?;
    match command {
        WebCommands::Search { query, max } => {
            let query = query.join(" ");
            let results = client.search(&query, max).await?;
            print_results(globals, &query, &results);
        }
        WebCommands::News { topic, max } => {
            let topic = topic.join(" ");
            let topic = Some(topic.as_str()).filter(|t| !t.trim().is_empty());
            let results = client.news(topic, max).await?;
            print_results(globals, &web::news_query(topic), &results);
        }
        WebCommands::Read { url, format, max } => {
            let format = web::ReadFormat::parse(&format)?;
            let page = client.fetch(&url).await?;
            let content = web::render_page(&page, format, max)?;
            if globals.json {
                #[derive(serde::Serialize)]
                struct Out<'a> { url: &'a str, status: u16, title: Option<&'a str>, format: &'a str, content: &'a str }
                render_mod::print_json(&Out {
                    url: &page.url,
                    status: page.status,
                    title: page.title.as_deref(),
                    format: format.as_str(),
                    content: &content,
                });
            } else {
                let mut header = vec![render_mod::field("URL", &page.url)];
                if let Some(d) = &page.description {
                    header.push(render_mod::field("Description", d));
                }
                render_mod::panel(page.title.as_deref().unwrap_or("Web Page"), &header.join("\n"));
                println!("{}", content);
            }
        }
        WebCommands::Summarize { url, max } => {
            let page = client.fetch(&url).await?;
            let text = web::html_to_text(&page.html)?;
            if text.trim().is_empty() {
                anyhow::bail!("no readable content at {}", url);
            }
            let messages = vec![
                ChatMessage::system("You are a helpful assistant that creates concise, accurate summaries."),
                ChatMessage::user(web::summary_prompt(page.title.as_deref(), &text, max)),
            ];
            let resp = complete(settings, messages).await?;
            if globals.json {
                #[derive(serde::Serialize)]
                struct Out<'a> { url: &'a str, title: Option<&'a str>, model: &'a str, summary: &'a str }
                render_mod::print_json(&Out { url: &page.url, title: page.title.as_deref(), model: &resp.model, summary: &resp.content });
            } else {
                render_mod::panel(
                    &format!("Summary: {}", page.title.as_deref().unwrap_or(&page.url)),
                    &resp.content,
                );
                render_mod::print_usage(resp.usage.as_ref(), &resp.model);
            }
        }
    }
    Ok(())
}

fn print_results(globals: &GlobalOpts, query: &str, results: &[web::SearchResult]) {
    if globals.json {
        #[derive(serde::Serialize)]
        struct Out<'a> { query: &'a str, results: &'a [web::SearchResult] }
        render_mod::print_json(&Out { query, results });
    } else {
        render_mod::print_search_results(query, results);
    }
}

static KNOWN_MODELS: [(&str, &[&str]); 3] = [
    ("openai", &["gpt-4", "gpt-4-turbo", "gpt-4o", "gpt-4o-mini", "gpt-3.5-turbo"]),
    (
        "anthropic",
        &["claude-3-5-sonnet-20241022", "claude-3-opus-20240229", "claude-3-sonnet-20240229", "claude-3-haiku-20240307"],
    ),
    ("mock", &["mock"]),
];

async fn cmd_config(globals: &GlobalOpts, settings: &Settings, command: ConfigCommands) -> anyhow::Result<()> {
    match command {
        ConfigCommands::Show => {
            let path = config::default_config_path()?;
            let cache_dir = settings.resolved_cache_dir();
            if globals.json {
                #[derive(serde::Serialize)]
                struct Out<'a> {
                    config_file: String,
                    provider: &'a str,
                    model: &'a str,
                    temperature: f32,
                    max_tokens: u32,
                    openai_api_key: String,
                    openai_org_id: Option<&'a str>,
                    anthropic_api_key: String,
                    log_level: &'a str,
                    syntax_highlighting: bool,
                    markdown_rendering: bool,
                    theme: &'a str,
                    cache_enabled: bool,
                    cache_dir: String,
                    cache_ttl_secs: u64,
                    command_timeout_secs: Option<u64>,
                    request_timeout_secs: u64,
                }
                render_mod::print_json(&Out {
                    config_file: path.display().to_string(),
                    provider: &settings.provider,
                    model: &settings.model,
                    temperature: settings.temperature,
                    max_tokens: settings.max_tokens,
                    openai_api_key: config::mask_secret(settings.openai_api_key.as_deref()),
                    openai_org_id: settings.openai_org_id.as_deref(),
                    anthropic_api_key: config::mask_secret(settings.anthropic_api_key.as_deref()),
                    log_level: &settings.log_level,
                    syntax_highlighting: settings.syntax_highlighting,
                    markdown_rendering: settings.markdown_rendering,
                    theme: &settings.theme,
                    cache_enabled: settings.cache_enabled,
                    cache_dir: cache_dir.display().to_string(),
                    cache_ttl_secs: settings.cache_ttl_secs,
                    command_timeout_secs: settings.command_timeout_secs,
                    request_timeout_secs: settings.request_timeout_secs,
                });
                return Ok(());
            }
            let timeout = settings
                .command_timeout_secs
                .map(|s| format!("{}s", s))
                .unwrap_or_else(|| "none".to_string());
            let rows = [
                render_mod::field("Config File", path.display()),
                render_mod::field("Provider", &settings.provider),
                render_mod::field("Model", &settings.model),
                render_mod::field("Temperature", settings.temperature),
                render_mod::field("Max Tokens", settings.max_tokens),
                render_mod::field("OpenAI API Key", config::mask_secret(settings.openai_api_key.as_deref())),
                render_mod::field("OpenAI Org ID", settings.openai_org_id.as_deref().unwrap_or("not set")),
                render_mod::field("Anthropic API Key", config::mask_secret(settings.anthropic_api_key.as_deref())),
                render_mod::field("Log Level", &settings.log_level),
                render_mod::field("Syntax Highlighting", settings.syntax_highlighting),
                render_mod::field("Markdown Rendering", settings.markdown_rendering),
                render_mod::field("Theme", &settings.theme),
                render_mod::field("Cache", if settings.cache_enabled { "enabled" } else { "disabled" }),
                render_mod::field("Cache Directory", cache_dir.display()),
                render_mod::field("Cache TTL", format!("{}s", settings.cache_ttl_secs)),
                render_mod::field("Command Timeout", timeout),
                render_mod::field("Request Timeout", format!("{}s", settings.request_timeout_secs)),
            ];
            render_mod::panel("AI CLI Configuration", &rows.join("\n"));
        }
        ConfigCommands::Models => {
            if globals.json {
                #[derive(serde::Serialize)]
                struct Entry<'a> { provider: &'a str, models: &'a [&'a str] }
                #[derive(serde::Serialize)]
                struct Out<'a> { current_provider: &'a str, current_model: &'a str, providers: Vec<Entry<'a>> }
                let providers = KNOWN_MODELS.iter().map(|(provider, models)| Entry { provider, models }).collect();
                render_mod::print_json(&Out { current_provider: &settings.provider, current_model: &settings.model, providers });
                return Ok(());
            }
            for (provider, models) in KNOWN_MODELS.iter() {
                println!("{}", provider.bold().cyan());
                for m in models.iter() {
                    if *provider == settings.provider && *m == settings.model {
                        println!("  {} {}", m.green(), "(current)".dimmed());
                    } else {
                        println!("  {}", m);
                    }
                }
            }
        }
        ConfigCommands::Export { file } => {
            config::write_config(&file, &settings.to_file_config())?;
            if globals.json {
                #[derive(serde::Serialize)]
                struct Out { exported: String }
                render_mod::print_json(&Out { exported: file.display().to_string() });
            } else {
                println!("{}", format!("Configuration exported to {}", file.display()).green());
            }
        }
        ConfigCommands::Cache => {
            let stats = cache::ResponseCache::from_settings(settings).stats()?;
            if globals.json {
                render_mod::print_json(&stats);
            } else {
                let kb = stats.total_bytes as f64 / 1024.0;
                render_mod::panel(
                    "Response Cache",
                    &[
                        render_mod::field("Directory", stats.dir.display()),
                        render_mod::field("Enabled", stats.enabled),
                        render_mod::field("Entries", stats.entries),
                        render_mod::field("Size", format!("{:.2} KB", kb)),
                        render_mod::field("TTL", format!("{}s", stats.ttl_secs)),
                        render_mod::field("Older Than TTL", stats.stale_entries),
                    ]
                    .join("\n"),
                );
            }
        }
        ConfigCommands::ClearCache => {
            let removed = cache::ResponseCache::from_settings(settings).clear()?;
            if globals.json {
                #[derive(serde::Serialize)]
                struct Out { removed: usize }
                render_mod::print_json(&Out { removed });
            } else {
                println!("{}", format!("Cleared {} cached response(s)", removed).green());
            }
        }
        ConfigCommands::Validate => {
            let mut problems = Vec::new();
            if let Err(e) = config::validate_temperature(settings.temperature) {
                problems.push(e.to_string());
            }
            if settings.max_tokens == 0 {
                problems.push("max tokens must be greater than zero".to_string());
            }
            if let Err(e) = settings.validate_credentials() {
                problems.push(e.to_string());
            }
            if globals.json {
                #[derive(serde::Serialize)]
                struct Out<'a> { valid: bool, problems: &'a [String] }
                render_mod::print_json(&Out { valid: problems.is_empty(), problems: &problems });
            } else if problems.is_empty() {
                println!("{}", "Configuration is valid".green());
            } else {
                for p in &problems {
                    eprintln!("{} {}", "✗".red(), p);
                }
            }
            if !problems.is_empty() {
                anyhow::bail!(CliError::Config(format!("{} configuration problem(s)", problems.len())));
            }
        }
    }
    Ok(())
}

async fn cmd_dispatch(
    globals: &GlobalOpts,
    settings: &Settings,
    instruction: &str,
    force_tool: Option<&str>,
) -> anyhow::Result<()> {
    let dispatcher = Dispatcher::with_builtin_tools()?;
    let outcome = match force_tool {
        Some(tool) => dispatcher.dispatch_forced(instruction, tool),
        None => {
            let gateway = match CompletionGateway::from_settings(settings) {
                Ok(g) => Some(g),
                Err(e) => {
                    warn!("model-assisted dispatch unavailable: {:#}", e);
                    None
                }
            };
            interruptible(async { Ok::<_, anyhow::Error>(dispatcher.dispatch(instruction, gateway.as_ref(), settings).await) }).await?
        }
    };

    let Some(candidate) = outcome.candidate().cloned() else {
        if !globals.json {
            eprintln!("{}", "Could not work out what to do with that instruction. Available tools:".yellow());
            for tool in dispatcher.tools() {
                eprintln!("  {} {}", tool.command.cyan(), tool.description.dimmed());
            }
        }
        anyhow::bail!(CliError::Validation("could not resolve instruction to a tool".to_string()));
    };

    let (strategy, reasoning, degraded) = match &outcome {
        DispatchOutcome::DeterministicMatch(_) => ("pattern", None, None),
        DispatchOutcome::ModelAssisted { reasoning, degraded, .. } => ("model", reasoning.as_deref(), degraded.as_deref()),
        DispatchOutcome::Unresolved => ("none", None, None),
    };
    let args = dispatcher.complete_args(&candidate, instruction);
    if !globals.json {
        if let Some(why) = degraded {
            eprintln!("{}", format!("Falling back to '{}': {}", candidate.command, why).yellow());
        }
        eprintln!(
            "{}",
            format!("→ {} {} (confidence {:.2}, {})", candidate.command, args.join(" "), candidate.confidence, strategy).dimmed()
        );
        if let Some(r) = reasoning {
            eprintln!("{}", r.dimmed());
        }
    }

    let timeout = command_timeout(settings);
    let executor = SubcommandExecutor::for_current_exe(&dispatcher, globals.forwarded(), timeout)?;
    let exec_outcome = if executor.is_interactive(&candidate.command) {
        // the child owns the terminal; Ctrl-C is its to handle
        let exec = executor.execute(&candidate, &args);
        tokio::pin!(exec);
        loop {
            tokio::select! {
                r = &mut exec => break r?,
                _ = tokio::signal::ctrl_c() => debug!("interrupt left to interactive child"),
            }
        }
    } else {
        interruptible(executor.execute(&candidate, &args)).await?
    };

    if globals.json {
        #[derive(serde::Serialize)]
        struct Out<'a> {
            tool: &'a str,
            command: &'a str,
            args: &'a [String],
            confidence: f32,
            strategy: &'a str,
            exit_code: Option<i32>,
            timed_out: bool,
            stdout: &'a str,
            stderr: &'a str,
        }
        render_mod::print_json(&Out {
            tool: &candidate.tool,
            command: &candidate.command,
            args: &args,
            confidence: candidate.confidence,
            strategy,
            exit_code: match exec_outcome.status {
                ExecStatus::Exited(c) => Some(c),
                ExecStatus::TimedOut => None,
            },
            timed_out: exec_outcome.status == ExecStatus::TimedOut,
            stdout: &exec_outcome.stdout,
            stderr: &exec_outcome.stderr,
        });
    } else {
        print!("{}", exec_outcome.stdout);
        eprint!("{}", exec_outcome.stderr);
    }
    exec_outcome.into_result(timeout)?;
    Ok(())
}
