use anyhow::{Context, Result};
use log::{debug, warn};
use serde::Serialize;
use std::fs;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use crate::config::Settings;
use crate::llm::{ChatMessage, CompletionRequest, CompletionResponse};

const ENTRY_EXT: &str = "json";

/// Content-addressed store of completions: one `<fingerprint>.json` file per request.
#[derive(Debug, Clone)]
pub struct ResponseCache {
    dir: PathBuf,
    enabled: bool,
    ttl: Duration,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub dir: PathBuf,
    pub enabled: bool,
    pub entries: usize,
    pub total_bytes: u64,
    pub stale_entries: usize,
    pub ttl_secs: u64,
}

// Field order is the canonical key order.
#[derive(Serialize)]
struct CanonicalRequest<'a> {
    max_tokens: Option<u32>,
    messages: &'a [ChatMessage],
    model: &'a str,
    provider: &'a str,
    temperature: f32,
}

impl ResponseCache {
    pub fn new(dir: PathBuf, enabled: bool, ttl: Duration) -> Self {
        Self { dir, enabled, ttl }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            settings.resolved_cache_dir(),
            settings.cache_enabled,
            Duration::from_secs(settings.cache_ttl_secs),
        )
    }

    /// Deterministic over provider, model, messages and sampling parameters.
    pub fn fingerprint(provider: &str, req: &CompletionRequest) -> String {
        let canonical = CanonicalRequest {
            max_tokens: req.max_tokens,
            messages: &req.messages,
            model: &req.model,
            provider,
            temperature: req.temperature,
        };
        let bytes = serde_json::to_vec(&canonical).unwrap_or_default();
        format!("{:x}", md5::compute(bytes))
    }

    pub fn entry_path(&self, fingerprint: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", fingerprint, ENTRY_EXT))
    }

    pub fn get(&self, fingerprint: &str) -> Option<CompletionResponse> {
        if !self.enabled {
            return None;
        }
        let path = self.entry_path(fingerprint);
        let text = fs::read_to_string(&path).ok()?;
        match serde_json::from_str::<CompletionResponse>(&text) {
            Ok(resp) => Some(resp),
            Err(e) => {
                warn!("ignoring unreadable cache entry {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Stores a response unless an entry for the fingerprint already exists.
    pub fn put(&self, fingerprint: &str, resp: &CompletionResponse) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let path = self.entry_path(fingerprint);
        if path.exists() {
            return Ok(());
        }
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating cache dir: {}", self.dir.display()))?;
        let tmp = self.dir.join(format!("{}.{}.tmp{}", fingerprint, ENTRY_EXT, std::process::id()));
        let text = serde_json::to_string_pretty(resp)?;
        fs::write(&tmp, text).with_context(|| format!("writing cache entry: {}", tmp.display()))?;
        fs::rename(&tmp, &path).with_context(|| format!("committing cache entry: {}", path.display()))?;
        debug!("cached response {}", fingerprint);
        Ok(())
    }

    /// Removes every entry; returns how many were deleted.
    pub fn clear(&self) -> Result<usize> {
        let mut removed = 0usize;
        for path in self.entry_files()? {
            fs::remove_file(&path).with_context(|| format!("removing cache entry: {}", path.display()))?;
            removed += 1;
        }
        Ok(removed)
    }

    pub fn stats(&self) -> Result<CacheStats> {
        let now = SystemTime::now();
        let mut entries = 0usize;
        let mut total_bytes = 0u64;
        let mut stale_entries = 0usize;
        for path in self.entry_files()? {
            let meta = fs::metadata(&path)?;
            entries += 1;
            total_bytes += meta.len();
            let age = meta
                .modified()
                .ok()
                .and_then(|m| now.duration_since(m).ok())
                .unwrap_or_default();
            if age > self.ttl {
                stale_entries += 1;
            }
        }
        Ok(CacheStats {
            dir: self.dir.clone(),
            enabled: self.enabled,
            entries,
            total_bytes,
            stale_entries,
            ttl_secs: self.ttl.as_secs(),
        })
    }

    fn entry_files(&self) -> Result<Vec<PathBuf>> {
        if !self.dir.exists() {
            return Ok(vec![]);
        }
        let mut out = Vec::new();
        for entry in fs::read_dir(&self.dir).with_context(|| format!("listing cache dir: {}", self.dir.display()))? {
            let path = entry?.path();
            if path.is_file() && path.extension().and_then(|s| s.to_str()) == Some(ENTRY_EXT) {
                out.push(path);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(text: &str) -> CompletionRequest {
        CompletionRequest {
            model: "m".into(),
            messages: vec![ChatMessage::user(text)],
            temperature: 0.7,
            max_tokens: Some(100),
        }
    }

    fn response(text: &str) -> CompletionResponse {
        CompletionResponse { content: text.into(), model: "m".into(), usage: None }
    }

    #[test]
    fn fingerprint_is_stable_and_sensitive() {
        let a = ResponseCache::fingerprint("openai", &request("hi"));
        assert_eq!(a, ResponseCache::fingerprint("openai", &request("hi")));
        assert_eq!(a.len(), 32);
        assert_ne!(a, ResponseCache::fingerprint("openai", &request("hello")));
        assert_ne!(a, ResponseCache::fingerprint("anthropic", &request("hi")));

        let mut warmer = request("hi");
        warmer.temperature = 1.0;
        assert_ne!(a, ResponseCache::fingerprint("openai", &warmer));
    }

    #[test]
    fn put_get_clear() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResponseCache::new(dir.path().join("c"), true, Duration::from_secs(60));
        let fp = ResponseCache::fingerprint("mock", &request("q"));
        assert!(cache.get(&fp).is_none());

        cache.put(&fp, &response("first")).unwrap();
        assert_eq!(cache.get(&fp).unwrap().content, "first");
        assert!(cache.entry_path(&fp).ends_with(format!("{}.json", fp)));

        // entries are never rewritten
        cache.put(&fp, &response("second")).unwrap();
        assert_eq!(cache.get(&fp).unwrap().content, "first");

        let stats = cache.stats().unwrap();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.stale_entries, 0);

        assert_eq!(cache.clear().unwrap(), 1);
        assert!(cache.get(&fp).is_none());
        assert_eq!(cache.clear().unwrap(), 0);
    }

    #[test]
    fn disabled_cache_stores_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResponseCache::new(dir.path().to_path_buf(), false, Duration::from_secs(60));
        cache.put("abc", &response("x")).unwrap();
        assert!(!cache.entry_path("abc").exists());
        assert!(cache.get("abc").is_none());
    }

    #[test]
    fn corrupt_entry_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResponseCache::new(dir.path().to_path_buf(), true, Duration::from_secs(60));
        fs::write(cache.entry_path("bad"), "not json").unwrap();
        assert!(cache.get("bad").is_none());
    }
}
