use anyhow::{Context, Result};
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use std::{fs, path::{Path, PathBuf}};

use crate::error::CliError;
use crate::llm::Provider;

pub const APP_DIR_NAME: &str = "ai-cli";
pub const CONFIG_FILE_NAME: &str = "config.toml";

pub const MIN_TEMPERATURE: f32 = 0.0;
pub const MAX_TEMPERATURE: f32 = 2.0;

/// Optional file layer, read from `<config_dir>/ai-cli/config.toml`.
/// Credentials are not part of it; they come from the environment.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FileConfig {
    pub default_provider: Option<String>,
    pub default_model: Option<String>,
    pub default_temperature: Option<f32>,
    pub default_max_tokens: Option<u32>,
    pub log_level: Option<String>,
    pub log_file: Option<String>,
    pub enable_syntax_highlighting: Option<bool>,
    pub enable_markdown_rendering: Option<bool>,
    pub theme: Option<String>,
    pub enable_cache: Option<bool>,
    pub cache_dir: Option<String>,
    pub cache_ttl: Option<u64>,
    pub command_timeout: Option<u64>,
}

pub fn default_config_path() -> Result<PathBuf> {
    let base = config_dir().context("unable to resolve OS config directory")?;
    Ok(base.join(APP_DIR_NAME).join(CONFIG_FILE_NAME))
}

pub fn ensure_config_parent_exists(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).with_context(|| format!("creating config dir: {}", parent.display()))?;
        }
    }
    Ok(())
}

pub fn load_config_if_exists(path: &Path) -> Result<Option<FileConfig>> {
    if path.exists() {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading config file: {}", path.display()))?;
        let cfg: FileConfig = toml::from_str(&text).context("parsing config TOML")?;
        Ok(Some(cfg))
    } else {
        Ok(None)
    }
}

pub fn write_config(path: &Path, cfg: &FileConfig) -> Result<()> {
    ensure_config_parent_exists(path)?;
    let text = toml::to_string_pretty(cfg).context("serializing config to TOML")?;
    fs::write(path, text).with_context(|| format!("writing config file: {}", path.display()))?;
    Ok(())
}

/// Run-time settings, resolved once and passed explicitly to every component.
#[derive(Debug, Clone)]
pub struct Settings {
    pub openai_api_key: Option<String>,
    pub openai_org_id: Option<String>,
    pub openai_api_base: String,
    pub anthropic_api_key: Option<String>,
    pub anthropic_api_base: String,
    pub provider: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub log_level: String,
    pub log_file: Option<PathBuf>,
    pub syntax_highlighting: bool,
    pub markdown_rendering: bool,
    pub theme: String,
    pub cache_enabled: bool,
    pub cache_dir: PathBuf,
    pub cache_ttl_secs: u64,
    pub command_timeout_secs: Option<u64>,
    pub request_timeout_secs: u64,
    pub mock_reply: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            openai_org_id: None,
            openai_api_base: "https://api.openai.com/v1".to_string(),
            anthropic_api_key: None,
            anthropic_api_base: "https://api.anthropic.com/v1".to_string(),
            provider: "openai".to_string(),
            model: "gpt-4".to_string(),
            temperature: 0.7,
            max_tokens: 4000,
            log_level: "warn".to_string(),
            log_file: None,
            syntax_highlighting: true,
            markdown_rendering: true,
            theme: "default".to_string(),
            cache_enabled: true,
            cache_dir: PathBuf::from(".cache"),
            cache_ttl_secs: 3600,
            command_timeout_secs: None,
            request_timeout_secs: 60,
            mock_reply: None,
        }
    }
}

/// Values given on the command line; they win over every other layer.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub provider: Option<String>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub command_timeout_secs: Option<u64>,
}

impl Settings {
    /// Defaults, then the config file (if present), then `.env` and the process environment.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        let path = default_config_path()?;
        let file = load_config_if_exists(&path)?;
        Self::from_lookup(file.as_ref(), |key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(file: Option<&FileConfig>, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut s = Settings::default();

        if let Some(f) = file {
            if let Some(v) = &f.default_provider { s.provider = v.clone(); }
            if let Some(v) = &f.default_model { s.model = v.clone(); }
            if let Some(v) = f.default_temperature { s.temperature = v; }
            if let Some(v) = f.default_max_tokens { s.max_tokens = v; }
            if let Some(v) = &f.log_level { s.log_level = v.clone(); }
            if let Some(v) = &f.log_file { s.log_file = Some(PathBuf::from(v)); }
            if let Some(v) = f.enable_syntax_highlighting { s.syntax_highlighting = v; }
            if let Some(v) = f.enable_markdown_rendering { s.markdown_rendering = v; }
            if let Some(v) = &f.theme { s.theme = v.clone(); }
            if let Some(v) = f.enable_cache { s.cache_enabled = v; }
            if let Some(v) = &f.cache_dir { s.cache_dir = PathBuf::from(v); }
            if let Some(v) = f.cache_ttl { s.cache_ttl_secs = v; }
            if f.command_timeout.is_some() { s.command_timeout_secs = f.command_timeout; }
        }

        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        s.openai_api_key = get("OPENAI_API_KEY");
        s.openai_org_id = get("OPENAI_ORG_ID");
        s.anthropic_api_key = get("ANTHROPIC_API_KEY");
        if let Some(v) = get("OPENAI_API_BASE") { s.openai_api_base = v.trim_end_matches('/').to_string(); }
        if let Some(v) = get("ANTHROPIC_API_BASE") { s.anthropic_api_base = v.trim_end_matches('/').to_string(); }
        if let Some(v) = get("DEFAULT_PROVIDER") { s.provider = v.trim().to_lowercase(); }
        if let Some(v) = get("DEFAULT_MODEL") { s.model = v.trim().to_string(); }
        if let Some(v) = get("DEFAULT_TEMPERATURE") { s.temperature = parse_env("DEFAULT_TEMPERATURE", &v)?; }
        if let Some(v) = get("DEFAULT_MAX_TOKENS") { s.max_tokens = parse_env("DEFAULT_MAX_TOKENS", &v)?; }
        if let Some(v) = get("LOG_LEVEL") { s.log_level = v.trim().to_lowercase(); }
        if let Some(v) = get("LOG_FILE") { s.log_file = Some(PathBuf::from(v)); }
        if let Some(v) = get("ENABLE_SYNTAX_HIGHLIGHTING") { s.syntax_highlighting = parse_flag(&v); }
        if let Some(v) = get("ENABLE_MARKDOWN_RENDERING") { s.markdown_rendering = parse_flag(&v); }
        if let Some(v) = get("THEME") { s.theme = v; }
        if let Some(v) = get("ENABLE_CACHE") { s.cache_enabled = parse_flag(&v); }
        if let Some(v) = get("CACHE_DIR") { s.cache_dir = PathBuf::from(v); }
        if let Some(v) = get("CACHE_TTL") { s.cache_ttl_secs = parse_env("CACHE_TTL", &v)?; }
        if let Some(v) = get("COMMAND_TIMEOUT") { s.command_timeout_secs = Some(parse_env("COMMAND_TIMEOUT", &v)?); }
        if let Some(v) = get("REQUEST_TIMEOUT") { s.request_timeout_secs = parse_env("REQUEST_TIMEOUT", &v)?; }
        s.mock_reply = lookup("AI_CLI_MOCK_REPLY");

        Ok(s)
    }

    pub fn apply_overrides(&mut self, o: &Overrides) {
        if let Some(p) = &o.provider { self.provider = p.trim().to_lowercase(); }
        if let Some(m) = &o.model { self.model = m.clone(); }
        if let Some(t) = o.temperature { self.temperature = t; }
        if let Some(n) = o.max_tokens { self.max_tokens = n; }
        if o.command_timeout_secs.is_some() { self.command_timeout_secs = o.command_timeout_secs; }
    }

    pub fn validate_credentials(&self) -> Result<(), CliError> {
        let provider = Provider::from_str(&self.provider)
            .ok_or_else(|| CliError::Config(format!("unsupported provider: {}", self.provider)))?;
        match provider {
            Provider::OpenAi if self.openai_api_key.is_none() => Err(CliError::Config(
                "OpenAI API key is required (set OPENAI_API_KEY)".to_string(),
            )),
            Provider::Anthropic if self.anthropic_api_key.is_none() => Err(CliError::Config(
                "Anthropic API key is required (set ANTHROPIC_API_KEY)".to_string(),
            )),
            _ => Ok(()),
        }
    }

    /// Relative cache directories resolve against the working directory.
    pub fn resolved_cache_dir(&self) -> PathBuf {
        if self.cache_dir.is_absolute() {
            self.cache_dir.clone()
        } else {
            std::env::current_dir()
                .map(|cwd| cwd.join(&self.cache_dir))
                .unwrap_or_else(|_| self.cache_dir.clone())
        }
    }

    /// The shareable part of the settings; never includes credentials.
    pub fn to_file_config(&self) -> FileConfig {
        FileConfig {
            default_provider: Some(self.provider.clone()),
            default_model: Some(self.model.clone()),
            default_temperature: Some(self.temperature),
            default_max_tokens: Some(self.max_tokens),
            log_level: Some(self.log_level.clone()),
            log_file: self.log_file.as_ref().map(|p| p.display().to_string()),
            enable_syntax_highlighting: Some(self.syntax_highlighting),
            enable_markdown_rendering: Some(self.markdown_rendering),
            theme: Some(self.theme.clone()),
            enable_cache: Some(self.cache_enabled),
            cache_dir: Some(self.cache_dir.display().to_string()),
            cache_ttl: Some(self.cache_ttl_secs),
            command_timeout: self.command_timeout_secs,
        }
    }
}

pub fn validate_temperature(t: f32) -> Result<(), CliError> {
    if t.is_nan() || !(MIN_TEMPERATURE..=MAX_TEMPERATURE).contains(&t) {
        return Err(CliError::Validation(format!(
            "temperature must be between {:.1} and {:.1}, got {}",
            MIN_TEMPERATURE, MAX_TEMPERATURE, t
        )));
    }
    Ok(())
}

pub fn mask_secret(secret: Option<&str>) -> String {
    match secret {
        Some(s) if s.chars().count() > 4 => {
            let tail: String = s.chars().rev().take(4).collect::<Vec<_>>().into_iter().rev().collect();
            format!("***{}", tail)
        }
        Some(_) => "***".to_string(),
        None => "not set".to_string(),
    }
}

fn parse_flag(v: &str) -> bool {
    matches!(v.trim().to_lowercase().as_str(), "true" | "1" | "yes" | "on")
}

fn parse_env<T: std::str::FromStr>(key: &str, v: &str) -> Result<T> {
    v.trim()
        .parse::<T>()
        .map_err(|_| CliError::Config(format!("{} has an invalid value: {}", key, v)).into())
}
