use anyhow::Result;
use colored::Colorize;
use log::{debug, warn};
use std::path::PathBuf;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt};

use crate::config::{self, Settings};
use crate::llm::{CompletionGateway, CompletionRequest};
use crate::render;
use crate::session::{self, TranscriptRecord, HISTORY_TOKEN_BUDGET};

const HELP: &str = "\
/help                 Show this help message
/clear                Clear the chat history
/exit, /quit          Exit the chat session
/save <file>          Save chat history to a JSONL file
/load <file>          Load chat history from a JSONL file
/model <name>         Change the model
/provider <name>      Change the provider
/temperature <value>  Set temperature (0.0-2.0)";

#[derive(Debug, Clone, PartialEq)]
pub enum SlashCommand {
    Help,
    Clear,
    Exit,
    Save(PathBuf),
    Load(PathBuf),
    Model(String),
    Provider(String),
    Temperature(String),
    MissingArgument(&'static str),
    Unknown(String),
}

/// `None` for ordinary chat input.
pub fn parse_slash(line: &str) -> Option<SlashCommand> {
    let line = line.trim();
    if !line.starts_with('/') {
        return None;
    }
    let (cmd, rest) = match line.split_once(char::is_whitespace) {
        Some((c, r)) => (c, r.trim()),
        None => (line, ""),
    };
    let with_arg = |name: &'static str, f: fn(String) -> SlashCommand| {
        if rest.is_empty() { SlashCommand::MissingArgument(name) } else { f(rest.to_string()) }
    };
    Some(match cmd.to_lowercase().as_str() {
        "/help" => SlashCommand::Help,
        "/clear" => SlashCommand::Clear,
        "/exit" | "/quit" => SlashCommand::Exit,
        "/save" => with_arg("/save", |s| SlashCommand::Save(PathBuf::from(s))),
        "/load" => with_arg("/load", |s| SlashCommand::Load(PathBuf::from(s))),
        "/model" => with_arg("/model", SlashCommand::Model),
        "/provider" => with_arg("/provider", SlashCommand::Provider),
        "/temperature" => with_arg("/temperature", SlashCommand::Temperature),
        other => SlashCommand::Unknown(other.to_string()),
    })
}

#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Exit,
}

pub struct ChatSession {
    settings: Settings,
    gateway: CompletionGateway,
    system: Option<String>,
    history: Vec<TranscriptRecord>,
}

impl ChatSession {
    pub fn new(settings: Settings, gateway: CompletionGateway, system: Option<String>) -> Self {
        Self { settings, gateway, system, history: Vec::new() }
    }

    pub fn history(&self) -> &[TranscriptRecord] {
        &self.history
    }

    fn welcome(&self) {
        render::panel(
            "AI CLI Chat",
            &[
                render::field("Provider", &self.settings.provider),
                render::field("Model", &self.settings.model),
                render::field("Temperature", self.settings.temperature),
                String::new(),
                "Type your message, /help for commands, /exit to quit.".to_string(),
            ]
            .join("\n"),
        );
    }

    fn handle_command(&mut self, cmd: SlashCommand) -> Flow {
        match cmd {
            SlashCommand::Help => render::panel("Chat Help", HELP),
            SlashCommand::Clear => {
                self.history.clear();
                println!("{}", "Chat history cleared".green());
            }
            SlashCommand::Exit => return Flow::Exit,
            SlashCommand::Save(path) => match session::save_transcript(&path, &self.history) {
                Ok(()) => println!("{}", format!("Chat history saved to {}", path.display()).green()),
                Err(e) => eprintln!("{}", format!("Failed to save chat history: {:#}", e).red()),
            },
            SlashCommand::Load(path) => match session::load_transcript(&path) {
                Ok(records) => {
                    self.history = records;
                    println!("{}", format!("Loaded {} messages from {}", self.history.len(), path.display()).green());
                }
                Err(e) => eprintln!("{}", format!("Failed to load chat history: {:#}", e).red()),
            },
            SlashCommand::Model(m) => {
                self.settings.model = m;
                println!("{}", format!("Model changed to: {}", self.settings.model).green());
            }
            SlashCommand::Provider(p) => {
                let mut next = self.settings.clone();
                next.provider = p.trim().to_lowercase();
                match CompletionGateway::from_settings(&next) {
                    Ok(gw) => {
                        self.settings = next;
                        self.gateway = gw;
                        println!("{}", format!("Provider changed to: {}", self.settings.provider).green());
                    }
                    Err(e) => eprintln!("{}", format!("Cannot switch provider: {:#}", e).red()),
                }
            }
            SlashCommand::Temperature(v) => match v.parse::<f32>() {
                Ok(t) => match config::validate_temperature(t) {
                    Ok(()) => {
                        self.settings.temperature = t;
                        println!("{}", format!("Temperature changed to: {}", t).green());
                    }
                    Err(_) => eprintln!("{}", "Temperature must be between 0.0 and 2.0".red()),
                },
                Err(_) => eprintln!("{}", "Invalid temperature value".red()),
            },
            SlashCommand::MissingArgument(name) => eprintln!("{}", format!("{} needs an argument", name).red()),
            SlashCommand::Unknown(name) => eprintln!("{}", format!("Unknown command: {} (try /help)", name).red()),
        }
        Flow::Continue
    }

    /// One turn. The user message is only recorded once the reply arrives.
    async fn turn(&mut self, input: &str) -> Result<()> {
        let messages = session::build_messages_with_truncation(
            self.system.as_deref(),
            &self.history,
            input,
            HISTORY_TOKEN_BUDGET,
        );
        let req = CompletionRequest::from_settings(&self.settings, messages);
        debug!("chat turn with {} messages", req.messages.len());
        let resp = self.gateway.complete(&req).await?;
        self.history.push(TranscriptRecord::new("user", input));
        let mut assistant = TranscriptRecord::new("assistant", &resp.content);
        assistant.model = Some(resp.model.clone());
        assistant.usage = resp.usage.clone();
        self.history.push(assistant);

        println!("{}", "Assistant".bold().blue());
        render::print_answer(&resp.content, render::AnswerStyle::from_settings(&self.settings));
        render::print_usage(resp.usage.as_ref(), &resp.model);
        Ok(())
    }

    pub async fn run<R>(&mut self, reader: R) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
    {
        self.welcome();
        let mut lines = reader.lines();
        let mut stdout = tokio::io::stdout();
        loop {
            stdout.write_all(b"> ").await?;
            stdout.flush().await?;
            let line = tokio::select! {
                l = lines.next_line() => l?,
                _ = tokio::signal::ctrl_c() => {
                    println!("\n{}", "Use /exit to quit the chat".yellow());
                    continue;
                }
            };
            let Some(line) = line else {
                println!();
                break;
            };
            let input = line.trim();
            if input.is_empty() {
                continue;
            }
            if let Some(cmd) = parse_slash(input) {
                if self.handle_command(cmd) == Flow::Exit {
                    break;
                }
                continue;
            }
            tokio::select! {
                res = self.turn(input) => if let Err(e) = res {
                    warn!("chat turn failed: {:#}", e);
                    eprintln!("{}", format!("Error getting AI response: {:#}", e).red());
                },
                _ = tokio::signal::ctrl_c() => {
                    println!("\n{}", "Request cancelled".yellow());
                }
            }
        }
        println!("{}", "Goodbye!".yellow());
        Ok(())
    }
}
