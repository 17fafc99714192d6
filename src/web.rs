use anyhow::{bail, Context, Result};
use log::debug;
use regex::Regex;
use reqwest::{Client, Url};
use serde::Serialize;
use std::time::Duration;

use crate::error::CliError;

pub const DUCKDUCKGO_API: &str = "https://api.duckduckgo.com/";
const USER_AGENT: &str = concat!("ai-cli/", env!("CARGO_PKG_VERSION"));
const SUMMARY_INPUT_CHARS: usize = 3000;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FetchedPage {
    pub url: String,
    pub status: u16,
    pub title: Option<String>,
    pub description: Option<String>,
    pub html: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadFormat {
    Text,
    Markdown,
    Html,
}

impl ReadFormat {
    pub fn parse(s: &str) -> Result<Self, CliError> {
        match s.trim().to_lowercase().as_str() {
            "text" => Ok(ReadFormat::Text),
            "markdown" | "md" => Ok(ReadFormat::Markdown),
            "html" => Ok(ReadFormat::Html),
            other => Err(CliError::Validation(format!("format must be one of: text, markdown, html (got '{}')", other))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReadFormat::Text => "text",
            ReadFormat::Markdown => "markdown",
            ReadFormat::Html => "html",
        }
    }
}

pub struct WebClient {
    http: Client,
    search_endpoint: String,
}

impl WebClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = Client::builder().timeout(timeout).user_agent(USER_AGENT).build()?;
        Ok(Self { http, search_endpoint: DUCKDUCKGO_API.to_string() })
    }

    /// Instant-answer lookup: the abstract first, then related topics.
    pub async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchResult>> {
        if query.trim().is_empty() {
            bail!(CliError::Validation("search query must not be empty".to_string()));
        }
        let url = format!(
            "{}?q={}&format=json&no_html=1&skip_disambig=1",
            self.search_endpoint,
            urlencoding::encode(query.trim())
        );
        debug!("web search: {}", url);
        let resp = self.http.get(&url).send().await.context("search request failed")?;
        if !resp.status().is_success() {
            bail!("search error {}", resp.status());
        }
        let json: serde_json::Value = resp.json().await.context("failed to parse search response")?;
        Ok(parse_instant_answer(&json, max_results))
    }

    pub async fn news(&self, topic: Option<&str>, max_results: usize) -> Result<Vec<SearchResult>> {
        self.search(&news_query(topic), max_results).await
    }

    pub async fn fetch(&self, url: &str) -> Result<FetchedPage> {
        let parsed = validate_url(url)?;
        debug!("fetching {}", parsed);
        let resp = self.http.get(parsed.clone()).send().await.with_context(|| format!("failed to fetch {}", url))?;
        let status = resp.status();
        if !status.is_success() {
            bail!("fetch error {} for {}", status, url);
        }
        let html = resp.text().await.context("failed to read response body")?;
        Ok(FetchedPage {
            url: parsed.to_string(),
            status: status.as_u16(),
            title: extract_tag_content(&html, "title")?,
            description: extract_meta_description(&html)?,
            html,
        })
    }
}

pub fn news_query(topic: Option<&str>) -> String {
    match topic.map(str::trim).filter(|t| !t.is_empty()) {
        Some(t) => format!("latest news {}", t),
        None => "latest news".to_string(),
    }
}

pub fn validate_url(url: &str) -> Result<Url, CliError> {
    let parsed = Url::parse(url.trim()).map_err(|_| CliError::Validation(format!("invalid URL: {}", url)))?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return Err(CliError::Validation(format!("invalid URL: {}", url)));
    }
    Ok(parsed)
}

pub fn parse_instant_answer(json: &serde_json::Value, max_results: usize) -> Vec<SearchResult> {
    let mut results = Vec::new();
    if let Some(abstract_text) = json["Abstract"].as_str().filter(|s| !s.is_empty()) {
        results.push(SearchResult {
            title: json["Heading"].as_str().unwrap_or("Result").to_string(),
            url: json["AbstractURL"].as_str().unwrap_or("").to_string(),
            snippet: abstract_text.to_string(),
        });
    }
    if let Some(topics) = json["RelatedTopics"].as_array() {
        // grouped topics nest one level under "Topics"
        let flat = topics.iter().flat_map(|t| match t["Topics"].as_array() {
            Some(inner) => inner.iter().collect::<Vec<_>>(),
            None => vec![t],
        });
        for topic in flat {
            let Some(text) = topic["Text"].as_str() else { continue };
            let url = topic["FirstURL"].as_str().unwrap_or("");
            results.push(SearchResult {
                title: url.rsplit('/').next().filter(|s| !s.is_empty()).unwrap_or("Related").replace('_', " "),
                url: url.to_string(),
                snippet: text.to_string(),
            });
        }
    }
    results.truncate(max_results);
    results
}

fn remove_tag_and_content(html: &str, tag: &str) -> Result<String> {
    let re = Regex::new(&format!(r"(?is)<{tag}\b[^>]*>.*?</{tag}\s*>"))?;
    Ok(re.replace_all(html, " ").into_owned())
}

fn extract_tag_content(html: &str, tag: &str) -> Result<Option<String>> {
    let re = Regex::new(&format!(r"(?is)<{tag}\b[^>]*>(.*?)</{tag}\s*>"))?;
    Ok(re
        .captures(html)
        .and_then(|c| c.get(1))
        .map(|m| decode_entities(m.as_str().trim()))
        .filter(|s| !s.is_empty()))
}

fn extract_meta_description(html: &str) -> Result<Option<String>> {
    let re = Regex::new(r#"(?is)<meta\s[^>]*name\s*=\s*["']description["'][^>]*content\s*=\s*["']([^"']*)["']"#)?;
    Ok(re.captures(html).and_then(|c| c.get(1)).map(|m| decode_entities(m.as_str())))
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

/// Strips boilerplate, then keeps the `<article>`/`<main>` region when present.
fn main_region(html: &str) -> Result<String> {
    let mut text = html.to_string();
    for tag in ["script", "style", "noscript", "nav", "header", "footer"] {
        text = remove_tag_and_content(&text, tag)?;
    }
    for tag in ["article", "main"] {
        if let Some(inner) = extract_raw_tag(&text, tag)? {
            return Ok(inner);
        }
    }
    Ok(extract_raw_tag(&text, "body")?.unwrap_or(text))
}

fn extract_raw_tag(html: &str, tag: &str) -> Result<Option<String>> {
    let re = Regex::new(&format!(r"(?is)<{tag}\b[^>]*>(.*)</{tag}\s*>"))?;
    Ok(re.captures(html).and_then(|c| c.get(1)).map(|m| m.as_str().to_string()))
}

pub fn html_to_text(html: &str) -> Result<String> {
    let region = main_region(html)?;
    let tags = Regex::new(r"<[^>]+>")?;
    let stripped = tags.replace_all(&region, " ");
    Ok(collapse_whitespace(&decode_entities(&stripped)))
}

pub fn html_to_markdown(html: &str) -> Result<String> {
    let mut s = main_region(html)?;
    let heading = Regex::new(r"(?is)<h([1-6])[^>]*>(.*?)</h[1-6]\s*>")?;
    s = heading
        .replace_all(&s, |c: &regex::Captures| {
            let level = c[1].parse::<usize>().unwrap_or(1);
            format!("\n\n{} {}\n\n", "#".repeat(level), c[2].trim())
        })
        .into_owned();
    let link = Regex::new(r#"(?is)<a\s[^>]*href\s*=\s*["']([^"']*)["'][^>]*>(.*?)</a\s*>"#)?;
    s = link.replace_all(&s, "[$2]($1)").into_owned();
    let bold = Regex::new(r"(?is)<(?:b|strong)\b[^>]*>(.*?)</(?:b|strong)\s*>")?;
    s = bold.replace_all(&s, "**$1**").into_owned();
    let italic = Regex::new(r"(?is)<(?:i|em)\b[^>]*>(.*?)</(?:i|em)\s*>")?;
    s = italic.replace_all(&s, "*$1*").into_owned();
    let code = Regex::new(r"(?is)<code\b[^>]*>(.*?)</code\s*>")?;
    s = code.replace_all(&s, "`$1`").into_owned();
    let item = Regex::new(r"(?is)<li\b[^>]*>")?;
    s = item.replace_all(&s, "\n- ").into_owned();
    let breaks = Regex::new(r"(?is)<br\s*/?>|</p\s*>|</div\s*>|</li\s*>|</tr\s*>")?;
    s = breaks.replace_all(&s, "\n").into_owned();
    let tags = Regex::new(r"<[^>]+>")?;
    s = tags.replace_all(&s, "").into_owned();
    let s = decode_entities(&s);

    let spaces = Regex::new(r"[ \t]+")?;
    let blank = Regex::new(r"\n\s*\n\s*\n+")?;
    let s = spaces.replace_all(&s, " ");
    let lines: Vec<&str> = s.lines().map(str::trim).collect();
    let joined = lines.join("\n");
    Ok(blank.replace_all(&joined, "\n\n").trim().to_string())
}

pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Collapses whitespace and caps the length, marking the cut with "...".
pub fn clean_text(text: &str, max_chars: usize) -> String {
    let collapsed = collapse_whitespace(text);
    if collapsed.chars().count() <= max_chars {
        return collapsed;
    }
    let mut out: String = collapsed.chars().take(max_chars).collect();
    out.push_str("...");
    out
}

pub fn render_page(page: &FetchedPage, format: ReadFormat, max_chars: usize) -> Result<String> {
    Ok(match format {
        ReadFormat::Text => clean_text(&html_to_text(&page.html)?, max_chars),
        ReadFormat::Markdown => {
            let md = html_to_markdown(&page.html)?;
            if md.chars().count() > max_chars {
                let mut cut: String = md.chars().take(max_chars).collect();
                cut.push_str("...");
                cut
            } else {
                md
            }
        }
        ReadFormat::Html => clean_text(&page.html, max_chars),
    })
}

pub fn summary_prompt(title: Option<&str>, content: &str, max_words: usize) -> String {
    let excerpt: String = content.chars().take(SUMMARY_INPUT_CHARS).collect();
    format!(
        "Please provide a concise summary of the following web content in {} words or less:\n\n\
         Title: {}\n\nContent:\n{}\n\nFocus on the main points and key information.",
        max_words,
        title.unwrap_or("(untitled)"),
        excerpt
    )
}
