use anyhow::{bail, Context, Result};
use log::{debug, info};
use rand::{thread_rng, Rng};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::cache::ResponseCache;
use crate::config::Settings;
use crate::error::CliError;

pub const ANTHROPIC_VERSION: &str = "2023-06-01";
pub const ANTHROPIC_DEFAULT_MAX_TOKENS: u32 = 4000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: &str, content: impl Into<String>) -> Self {
        Self { role: role.to_string(), content: content.into() }
    }
    pub fn system(content: impl Into<String>) -> Self { Self::new("system", content) }
    pub fn user(content: impl Into<String>) -> Self { Self::new("user", content) }
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

impl CompletionRequest {
    pub fn from_settings(settings: &Settings, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: settings.model.clone(),
            messages,
            temperature: settings.temperature,
            max_tokens: Some(settings.max_tokens),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub content: String,
    pub model: String,
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub total_tokens: Option<u32>,
}

/// How a provider wants the conversation on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireStyle {
    /// Role-tagged multi-turn messages.
    NativeRoles,
    /// A separate system field plus one flattened user turn.
    FlattenedWithSystem,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    OpenAi,
    Anthropic,
    Mock,
}

impl Provider {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Some(Provider::OpenAi),
            "anthropic" => Some(Provider::Anthropic),
            "mock" => Some(Provider::Mock),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::Anthropic => "anthropic",
            Provider::Mock => "mock",
        }
    }

    pub fn wire_style(&self) -> WireStyle {
        match self {
            Provider::Anthropic => WireStyle::FlattenedWithSystem,
            Provider::OpenAi | Provider::Mock => WireStyle::NativeRoles,
        }
    }
}

#[async_trait::async_trait]
pub trait ModelProviderAdapter: Send + Sync {
    async fn send(&self, req: &CompletionRequest) -> Result<CompletionResponse>;
}

pub struct OpenAiAdapter {
    http: Client,
    base: String,
    api_key: String,
    org_id: Option<String>,
}

impl OpenAiAdapter {
    pub fn new(http: Client, base: String, api_key: String, org_id: Option<String>) -> Self {
        Self { http, base, api_key, org_id }
    }
}

#[async_trait::async_trait]
impl ModelProviderAdapter for OpenAiAdapter {
    async fn send(&self, req: &CompletionRequest) -> Result<CompletionResponse> {
        let url = format!("{}/chat/completions", self.base);

        #[derive(Serialize)]
        struct OpenAiRequest<'a> {
            model: &'a str,
            messages: &'a [ChatMessage],
            temperature: f32,
            #[serde(skip_serializing_if = "Option::is_none")]
            max_tokens: Option<u32>,
        }

        #[derive(Deserialize)]
        struct OpenAiChoiceMessage {
            content: Option<String>,
        }

        #[derive(Deserialize)]
        struct OpenAiChoice {
            message: Option<OpenAiChoiceMessage>,
        }

        #[derive(Deserialize)]
        struct OpenAiUsage {
            prompt_tokens: Option<u32>,
            completion_tokens: Option<u32>,
            total_tokens: Option<u32>,
        }

        #[derive(Deserialize)]
        struct OpenAiResponse {
            model: Option<String>,
            choices: Vec<OpenAiChoice>,
            usage: Option<OpenAiUsage>,
        }

        let body = OpenAiRequest {
            model: &req.model,
            messages: &req.messages,
            temperature: req.temperature,
            max_tokens: req.max_tokens,
        };

        let res = with_retries(|| async {
            let mut rb = self.http.post(&url).bearer_auth(&self.api_key).json(&body);
            if let Some(org) = self.org_id.as_ref() { rb = rb.header("OpenAI-Organization", org); }
            let resp = rb.send().await?;
            Ok::<_, anyhow::Error>(resp)
        }).await?;
        if res.status() != StatusCode::OK {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            bail!("openai error {}: {}", status, text);
        }
        let parsed: OpenAiResponse = res.json().await.context("failed to parse openai response")?;
        let content = parsed
            .choices
            .first()
            .and_then(|c| c.message.as_ref())
            .and_then(|m| m.content.clone())
            .unwrap_or_default();
        let usage = parsed.usage.map(|u| Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        });
        Ok(CompletionResponse { content, model: parsed.model.unwrap_or_else(|| req.model.clone()), usage })
    }
}

pub struct AnthropicAdapter {
    http: Client,
    base: String,
    api_key: String,
}

impl AnthropicAdapter {
    pub fn new(http: Client, base: String, api_key: String) -> Self {
        Self { http, base, api_key }
    }
}

#[async_trait::async_trait]
impl ModelProviderAdapter for AnthropicAdapter {
    async fn send(&self, req: &CompletionRequest) -> Result<CompletionResponse> {
        let url = format!("{}/messages", self.base);
        let system = req.messages.iter().find(|m| m.role == "system").map(|m| m.content.as_str());
        let turns: Vec<&ChatMessage> = req.messages.iter().filter(|m| m.role != "system").collect();

        #[derive(Serialize)]
        struct AnthropicRequest<'a> {
            model: &'a str,
            max_tokens: u32,
            temperature: f32,
            #[serde(skip_serializing_if = "Option::is_none")]
            system: Option<&'a str>,
            messages: Vec<&'a ChatMessage>,
        }

        #[derive(Deserialize)]
        struct ContentBlock {
            text: Option<String>,
        }

        #[derive(Deserialize)]
        struct AnthropicUsage {
            input_tokens: Option<u32>,
            output_tokens: Option<u32>,
        }

        #[derive(Deserialize)]
        struct AnthropicResponse {
            model: Option<String>,
            content: Vec<ContentBlock>,
            usage: Option<AnthropicUsage>,
        }

        let body = AnthropicRequest {
            model: &req.model,
            max_tokens: req.max_tokens.unwrap_or(ANTHROPIC_DEFAULT_MAX_TOKENS),
            temperature: req.temperature,
            system,
            messages: turns,
        };

        let res = with_retries(|| async {
            let resp = self
                .http
                .post(&url)
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .json(&body)
                .send()
                .await?;
            Ok::<_, anyhow::Error>(resp)
        }).await?;
        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            bail!("anthropic error {}: {}", status, text);
        }
        let parsed: AnthropicResponse = res.json().await.context("failed to parse anthropic response")?;
        let content = parsed
            .content
            .iter()
            .filter_map(|c| c.text.as_deref())
            .collect::<Vec<_>>()
            .join("");
        let usage = parsed.usage.map(|u| {
            let total = match (u.input_tokens, u.output_tokens) {
                (Some(i), Some(o)) => Some(i + o),
                _ => None,
            };
            Usage { prompt_tokens: u.input_tokens, completion_tokens: u.output_tokens, total_tokens: total }
        });
        Ok(CompletionResponse { content, model: parsed.model.unwrap_or_else(|| req.model.clone()), usage })
    }
}

/// Offline provider: answers with a fixed reply, or echoes the last user turn.
pub struct MockAdapter {
    reply: Option<String>,
}

impl MockAdapter {
    pub fn new(reply: Option<String>) -> Self {
        Self { reply }
    }
}

#[async_trait::async_trait]
impl ModelProviderAdapter for MockAdapter {
    async fn send(&self, req: &CompletionRequest) -> Result<CompletionResponse> {
        let content = match &self.reply {
            Some(r) => r.replace("\\n", "\n"),
            None => {
                let last = req.messages.iter().rev().find(|m| m.role == "user").map(|m| m.content.as_str()).unwrap_or("");
                format!("[stub answer] {}", last)
            }
        };
        Ok(CompletionResponse { content, model: req.model.clone(), usage: None })
    }
}

/// Splits system content out and folds the remaining turns into one user turn.
pub fn flatten_for_single_turn(messages: &[ChatMessage]) -> (Option<String>, String) {
    let system: Vec<&str> = messages.iter().filter(|m| m.role == "system").map(|m| m.content.as_str()).collect();
    let turns: Vec<&ChatMessage> = messages.iter().filter(|m| m.role != "system").collect();
    let system = if system.is_empty() { None } else { Some(system.join("\n\n")) };
    let body = match turns.as_slice() {
        [only] => only.content.clone(),
        many => many
            .iter()
            .map(|m| format!("{}: {}", role_label(&m.role), m.content))
            .collect::<Vec<_>>()
            .join("\n\n"),
    };
    (system, body)
}

/// Request rewritten for providers that take one user turn plus a separate system field.
pub fn flatten_request(req: &CompletionRequest) -> CompletionRequest {
    let (system, turn) = flatten_for_single_turn(&req.messages);
    let mut messages: Vec<ChatMessage> = system.into_iter().map(ChatMessage::system).collect();
    messages.push(ChatMessage::user(turn));
    CompletionRequest { messages, ..req.clone() }
}

fn role_label(role: &str) -> &str {
    match role {
        "assistant" => "Assistant",
        "user" => "User",
        other => other,
    }
}

pub async fn with_retries<F, Fut, T>(mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, anyhow::Error>>,
{
    let mut attempt = 0u32;
    let max_retries = 3u32;
    loop {
        match f().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                attempt += 1;
                if attempt > max_retries {
                    return Err(e).context("request failed after retries");
                }
                debug!("request attempt {} failed: {}", attempt, e);
                let backoff_ms = (2u64.pow(attempt) * 100) + thread_rng().gen_range(0..100);
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
            }
        }
    }
}

/// Uniform completion entry point: cache first, then exactly one provider.
pub struct CompletionGateway {
    provider: Provider,
    adapter: Box<dyn ModelProviderAdapter>,
    cache: ResponseCache,
}

impl CompletionGateway {
    pub fn new(provider: Provider, adapter: Box<dyn ModelProviderAdapter>, cache: ResponseCache) -> Self {
        Self { provider, adapter, cache }
    }

    /// Resolves the provider and its credential before anything touches the network.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        settings.validate_credentials()?;
        let provider = Provider::from_str(&settings.provider)
            .ok_or_else(|| CliError::Config(format!("unsupported provider: {}", settings.provider)))?;
        let http = Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()?;
        let adapter: Box<dyn ModelProviderAdapter> = match provider {
            Provider::OpenAi => Box::new(OpenAiAdapter::new(
                http,
                settings.openai_api_base.clone(),
                settings.openai_api_key.clone().unwrap_or_default(),
                settings.openai_org_id.clone(),
            )),
            Provider::Anthropic => Box::new(AnthropicAdapter::new(
                http,
                settings.anthropic_api_base.clone(),
                settings.anthropic_api_key.clone().unwrap_or_default(),
            )),
            Provider::Mock => Box::new(MockAdapter::new(settings.mock_reply.clone())),
        };
        Ok(Self::new(provider, adapter, ResponseCache::from_settings(settings)))
    }

    pub async fn complete(&self, req: &CompletionRequest) -> Result<CompletionResponse> {
        let fingerprint = ResponseCache::fingerprint(self.provider.as_str(), req);
        if let Some(hit) = self.cache.get(&fingerprint) {
            info!("using cached response {}", fingerprint);
            return Ok(hit);
        }
        debug!("cache miss {}; calling {} model {}", fingerprint, self.provider.as_str(), req.model);
        let flattened;
        let outbound = match self.provider.wire_style() {
            WireStyle::NativeRoles => req,
            WireStyle::FlattenedWithSystem => {
                flattened = flatten_request(req);
                &flattened
            }
        };
        let resp = self.adapter.send(outbound).await?;
        if let Err(e) = self.cache.put(&fingerprint, &resp) {
            log::warn!("failed to save cache entry: {:#}", e);
        }
        Ok(resp)
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Scripted adapter that counts upstream calls.
    pub struct ScriptedAdapter {
        pub reply: Result<String, String>,
        pub calls: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl ModelProviderAdapter for ScriptedAdapter {
        async fn send(&self, req: &CompletionRequest) -> Result<CompletionResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.reply {
                Ok(text) => Ok(CompletionResponse { content: text.clone(), model: req.model.clone(), usage: None }),
                Err(msg) => bail!("{}", msg),
            }
        }
    }

    pub fn scripted_gateway(reply: Result<&str, &str>, cache: ResponseCache) -> (CompletionGateway, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let adapter = ScriptedAdapter {
            reply: reply.map(str::to_string).map_err(str::to_string),
            calls: calls.clone(),
        };
        (CompletionGateway::new(Provider::Mock, Box::new(adapter), cache), calls)
    }

    pub fn no_cache() -> ResponseCache {
        ResponseCache::new(std::env::temp_dir().join("ai-cli-unused"), false, Duration::from_secs(0))
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use std::sync::atomic::Ordering;

    fn request() -> CompletionRequest {
        CompletionRequest {
            model: "gpt-4".into(),
            messages: vec![ChatMessage::system("be brief"), ChatMessage::user("hi")],
            temperature: 0.2,
            max_tokens: Some(50),
        }
    }

    #[tokio::test]
    async fn second_identical_request_is_served_from_cache() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResponseCache::new(dir.path().to_path_buf(), true, Duration::from_secs(3600));
        let (gw, calls) = scripted_gateway(Ok("hello"), cache);

        let first = gw.complete(&request()).await.unwrap();
        let second = gw.complete(&request()).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let mut other = request();
        other.model = "gpt-4o".into();
        gw.complete(&other).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResponseCache::new(dir.path().to_path_buf(), true, Duration::from_secs(3600));
        let (gw, calls) = scripted_gateway(Err("upstream down"), cache.clone());
        assert!(gw.complete(&request()).await.is_err());
        assert!(gw.complete(&request()).await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.stats().unwrap().entries, 0);
    }

    #[tokio::test]
    async fn mock_adapter_echoes_last_user_turn() {
        let resp = MockAdapter::new(None).send(&request()).await.unwrap();
        assert_eq!(resp.content, "[stub answer] hi");
        let resp = MockAdapter::new(Some("TOOL: ask\\nARGS: x".into())).send(&request()).await.unwrap();
        assert_eq!(resp.content, "TOOL: ask\nARGS: x");
    }

    #[test]
    fn flattening_separates_system_content() {
        let (system, body) = flatten_for_single_turn(&[ChatMessage::system("rules"), ChatMessage::user("q")]);
        assert_eq!(system.as_deref(), Some("rules"));
        assert_eq!(body, "q");

        let (system, body) = flatten_for_single_turn(&[
            ChatMessage::user("a"),
            ChatMessage::new("assistant", "b"),
            ChatMessage::user("c"),
        ]);
        assert!(system.is_none());
        assert_eq!(body, "User: a\n\nAssistant: b\n\nUser: c");
    }

    #[test]
    fn flattened_request_keeps_sampling_parameters() {
        let mut req = request();
        req.messages.push(ChatMessage::new("assistant", "hello"));
        req.messages.push(ChatMessage::user("again"));
        let flat = flatten_request(&req);
        let roles: Vec<_> = flat.messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["system", "user"]);
        assert_eq!(flat.messages[1].content, "User: hi\n\nAssistant: hello\n\nUser: again");
        assert_eq!((flat.model.as_str(), flat.max_tokens), ("gpt-4", Some(50)));
    }

    #[test]
    fn provider_names() {
        assert_eq!(Provider::from_str("OpenAI"), Some(Provider::OpenAi));
        assert_eq!(Provider::from_str("anthropic").unwrap().wire_style(), WireStyle::FlattenedWithSystem);
        assert_eq!(Provider::OpenAi.wire_style(), WireStyle::NativeRoles);
        assert!(Provider::from_str("gemini").is_none());
    }

    #[test]
    fn gateway_refuses_missing_credentials() {
        let settings = Settings::default();
        let err = CompletionGateway::from_settings(&settings).err().unwrap();
        assert!(matches!(err.downcast_ref::<CliError>(), Some(CliError::Config(_))));
    }
}
