//! Target page snapshot.
//!
//! The checkers never parse a DOM; they work off a flat snapshot built
//! from one page fetch plus robots.txt and sitemap probes. The scans are
//! deliberately cheap string passes over the response body — enough for
//! diagnostic signals, not a rendering-grade parser.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// AI answer-engine crawlers whose robots.txt access we check.
pub const AI_CRAWLERS: &[&str] = &[
    "GPTBot",
    "ChatGPT-User",
    "ClaudeBot",
    "Claude-Web",
    "Google-Extended",
    "PerplexityBot",
    "Anthropic-AI",
    "YouBot",
];

/// Flat observation record for one target page.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageSnapshot {
    pub url: String,
    pub status: u16,
    pub elapsed_ms: u64,
    pub body_bytes: usize,

    pub title: Option<String>,
    pub meta_description: Option<String>,
    pub has_viewport: bool,
    pub has_canonical: bool,
    pub og_tag_count: usize,

    /// `@type` values from JSON-LD blocks (best-effort).
    pub json_ld_types: Vec<String>,

    pub h1_count: usize,
    pub word_count: usize,
    pub list_blocks: usize,
    pub table_blocks: usize,
    pub internal_links: usize,
    pub images_total: usize,
    pub images_missing_alt: usize,

    pub robots_txt_found: bool,
    /// AI crawlers explicitly blocked for the whole site in robots.txt.
    pub ai_crawlers_blocked: Vec<String>,
    pub sitemap_found: bool,
}

/// Fetch the target page and probe robots.txt / sitemap.xml.
pub async fn fetch_snapshot(url: &str, timeout: Duration) -> Result<PageSnapshot> {
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("aether/", env!("CARGO_PKG_VERSION")))
        .build()?;

    let start = Instant::now();
    let response = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("failed to fetch {}", url))?;
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    let elapsed_ms = start.elapsed().as_millis() as u64;

    let mut snapshot = scan_html(url, &body);
    snapshot.status = status;
    snapshot.elapsed_ms = elapsed_ms;

    let origin = origin_of(url);

    if let Ok(resp) = client.get(format!("{}/robots.txt", origin)).send().await {
        if resp.status().is_success() {
            snapshot.robots_txt_found = true;
            let robots = resp.text().await.unwrap_or_default();
            snapshot.ai_crawlers_blocked = blocked_ai_crawlers(&robots);
        }
    }

    if let Ok(resp) = client.get(format!("{}/sitemap.xml", origin)).send().await {
        snapshot.sitemap_found = resp.status().is_success();
    }

    Ok(snapshot)
}

/// Scheme + host (+ port) of a URL, without a trailing slash.
fn origin_of(url: &str) -> String {
    if let Some(scheme_end) = url.find("://") {
        let rest = &url[scheme_end + 3..];
        let host_end = rest.find('/').unwrap_or(rest.len());
        format!("{}{}", &url[..scheme_end + 3], &rest[..host_end])
    } else {
        url.trim_end_matches('/').to_string()
    }
}

/// Build a snapshot from raw HTML. Split out from the fetch so checkers
/// can be tested against static fixtures.
pub fn scan_html(url: &str, body: &str) -> PageSnapshot {
    let lower = body.to_lowercase();

    let title = extract_between(&lower, body, "<title", "</title>").map(|t| {
        // Strip any attributes on the title tag itself
        match t.find('>') {
            Some(pos) => t[pos + 1..].trim().to_string(),
            None => t.trim().to_string(),
        }
    });

    let meta_description = extract_meta_content(&lower, body, "name=\"description\"");

    PageSnapshot {
        url: url.to_string(),
        title,
        meta_description,
        has_viewport: lower.contains("name=\"viewport\""),
        has_canonical: lower.contains("rel=\"canonical\""),
        og_tag_count: lower.matches("property=\"og:").count(),
        json_ld_types: extract_json_ld_types(&lower, body),
        h1_count: lower.matches("<h1").count(),
        word_count: visible_word_count(&lower),
        list_blocks: lower.matches("<ul").count() + lower.matches("<ol").count(),
        table_blocks: lower.matches("<table").count(),
        internal_links: count_internal_links(&lower, url),
        images_total: lower.matches("<img").count(),
        images_missing_alt: count_images_missing_alt(&lower),
        body_bytes: body.len(),
        ..Default::default()
    }
}

fn extract_between(lower: &str, original: &str, open: &str, close: &str) -> Option<String> {
    let start = lower.find(open)?;
    let end = lower[start..].find(close)? + start;
    Some(original[start + open.len()..end].to_string())
}

fn extract_meta_content(lower: &str, original: &str, marker: &str) -> Option<String> {
    let tag_start = lower.find(marker)?;
    // Search the surrounding tag for a content attribute
    let open = lower[..tag_start].rfind('<')?;
    let close = lower[tag_start..].find('>')? + tag_start;
    let tag_lower = &lower[open..close];
    let content_pos = tag_lower.find("content=\"")? + open + "content=\"".len();
    let content_end = lower[content_pos..].find('"')? + content_pos;
    Some(original[content_pos..content_end].trim().to_string())
}

fn extract_json_ld_types(lower: &str, original: &str) -> Vec<String> {
    let mut types = Vec::new();
    let mut cursor = 0;
    while let Some(pos) = lower[cursor..].find("application/ld+json") {
        let block_start = cursor + pos;
        let Some(open) = lower[block_start..].find('>') else {
            break;
        };
        let content_start = block_start + open + 1;
        let Some(close) = lower[content_start..].find("</script>") else {
            break;
        };
        let raw = &original[content_start..content_start + close];
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(raw) {
            collect_types(&value, &mut types);
        }
        cursor = content_start + close;
    }
    types
}

fn collect_types(value: &serde_json::Value, out: &mut Vec<String>) {
    match value {
        serde_json::Value::Object(map) => {
            if let Some(t) = map.get("@type").and_then(|t| t.as_str()) {
                out.push(t.to_string());
            }
            for v in map.values() {
                collect_types(v, out);
            }
        }
        serde_json::Value::Array(items) => {
            for v in items {
                collect_types(v, out);
            }
        }
        _ => {}
    }
}

/// Rough visible word count: strips tags, scripts, and styles.
fn visible_word_count(lower: &str) -> usize {
    let mut text = String::with_capacity(lower.len());
    let mut in_tag = false;
    let mut skip_until: Option<&str> = None;
    let mut rest = lower;

    while !rest.is_empty() {
        if let Some(end_tag) = skip_until {
            match rest.find(end_tag) {
                Some(pos) => {
                    rest = &rest[pos + end_tag.len()..];
                    skip_until = None;
                }
                None => break,
            }
            continue;
        }
        let Some(ch) = rest.chars().next() else {
            break;
        };
        if ch == '<' {
            if rest.starts_with("<script") {
                skip_until = Some("</script>");
            } else if rest.starts_with("<style") {
                skip_until = Some("</style>");
            } else {
                in_tag = true;
            }
        } else if ch == '>' {
            in_tag = false;
            text.push(' ');
        } else if !in_tag {
            text.push(ch);
        }
        rest = &rest[ch.len_utf8()..];
    }

    text.split_whitespace().count()
}

fn count_internal_links(lower: &str, url: &str) -> usize {
    let origin = origin_of(&url.to_lowercase());
    let mut count = 0;
    let mut cursor = 0;
    while let Some(pos) = lower[cursor..].find("href=\"") {
        let start = cursor + pos + "href=\"".len();
        let Some(end) = lower[start..].find('"') else {
            break;
        };
        let href = &lower[start..start + end];
        if href.starts_with('/') && !href.starts_with("//") {
            count += 1;
        } else if href.starts_with(&origin) {
            count += 1;
        }
        cursor = start + end;
    }
    count
}

fn count_images_missing_alt(lower: &str) -> usize {
    let mut missing = 0;
    let mut cursor = 0;
    while let Some(pos) = lower[cursor..].find("<img") {
        let start = cursor + pos;
        let end = lower[start..].find('>').map(|e| start + e).unwrap_or(lower.len());
        if !lower[start..end].contains("alt=") {
            missing += 1;
        }
        cursor = end;
    }
    missing
}

/// Parse robots.txt and return the AI crawlers that are blocked site-wide
/// (a `Disallow: /` under their own user-agent group or under `*`).
pub fn blocked_ai_crawlers(robots: &str) -> Vec<String> {
    let mut current_agents: Vec<String> = Vec::new();
    let mut blocked_agents: Vec<String> = Vec::new();
    let mut wildcard_blocks_all = false;
    let mut last_was_agent = false;

    for line in robots.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((directive, value)) = line.split_once(':') else {
            continue;
        };
        let directive = directive.trim().to_lowercase();
        let value = value.trim();

        match directive.as_str() {
            "user-agent" => {
                if !last_was_agent {
                    current_agents.clear();
                }
                current_agents.push(value.to_string());
                last_was_agent = true;
            }
            "disallow" => {
                last_was_agent = false;
                if value == "/" {
                    for agent in &current_agents {
                        if agent == "*" {
                            wildcard_blocks_all = true;
                        } else {
                            blocked_agents.push(agent.clone());
                        }
                    }
                }
            }
            _ => {
                last_was_agent = false;
            }
        }
    }

    AI_CRAWLERS
        .iter()
        .filter(|crawler| {
            let named = blocked_agents
                .iter()
                .any(|a| a.eq_ignore_ascii_case(crawler));
            named || wildcard_blocks_all
        })
        .map(|c| c.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<!DOCTYPE html>
<html><head>
<title>Used Cars in Hyderabad | CarArth</title>
<meta name="description" content="Browse verified used cars with transparent pricing.">
<meta name="viewport" content="width=device-width">
<link rel="canonical" href="https://example.com/">
<meta property="og:title" content="Used Cars">
<meta property="og:image" content="/img/cover.png">
<script type="application/ld+json">{"@type":"AutoDealer","name":"CarArth"}</script>
</head><body>
<h1>Used Cars</h1>
<ul><li><a href="/car/1">Swift</a></li><li><a href="/car/2">i20</a></li></ul>
<img src="/a.png" alt="Swift front view"><img src="/b.png">
<p>Find your next car today with verified listings and fair prices.</p>
<a href="https://example.com/sell">Sell</a>
<a href="https://other.example.org/">Elsewhere</a>
</body></html>"#;

    #[test]
    fn scan_extracts_head_signals() {
        let snap = scan_html("https://example.com/", SAMPLE);
        assert_eq!(snap.title.as_deref(), Some("Used Cars in Hyderabad | CarArth"));
        assert!(snap
            .meta_description
            .as_deref()
            .unwrap()
            .starts_with("Browse verified"));
        assert!(snap.has_viewport);
        assert!(snap.has_canonical);
        assert_eq!(snap.og_tag_count, 2);
        assert_eq!(snap.json_ld_types, vec!["AutoDealer".to_string()]);
    }

    #[test]
    fn scan_counts_body_structure() {
        let snap = scan_html("https://example.com/", SAMPLE);
        assert_eq!(snap.h1_count, 1);
        assert_eq!(snap.list_blocks, 1);
        assert_eq!(snap.images_total, 2);
        assert_eq!(snap.images_missing_alt, 1);
        // Two relative hrefs plus one absolute same-origin link
        assert_eq!(snap.internal_links, 3);
        assert!(snap.word_count > 10);
    }

    #[test]
    fn scan_handles_empty_body() {
        let snap = scan_html("https://example.com/", "");
        assert!(snap.title.is_none());
        assert_eq!(snap.word_count, 0);
        assert_eq!(snap.h1_count, 0);
    }

    #[test]
    fn origin_strips_path() {
        assert_eq!(origin_of("https://example.com/a/b"), "https://example.com");
        assert_eq!(
            origin_of("http://127.0.0.1:8080/x"),
            "http://127.0.0.1:8080"
        );
    }

    #[test]
    fn robots_detects_blocked_ai_crawlers() {
        let robots = "User-agent: GPTBot\nDisallow: /\n\nUser-agent: ClaudeBot\nDisallow: /private\n";
        let blocked = blocked_ai_crawlers(robots);
        assert!(blocked.contains(&"GPTBot".to_string()));
        assert!(!blocked.contains(&"ClaudeBot".to_string()));
    }

    #[test]
    fn robots_wildcard_blocks_everyone() {
        let robots = "User-agent: *\nDisallow: /\n";
        let blocked = blocked_ai_crawlers(robots);
        assert_eq!(blocked.len(), AI_CRAWLERS.len());
    }

    #[test]
    fn robots_grouped_agents_share_rules() {
        let robots = "User-agent: GPTBot\nUser-agent: PerplexityBot\nDisallow: /\n";
        let blocked = blocked_ai_crawlers(robots);
        assert!(blocked.contains(&"GPTBot".to_string()));
        assert!(blocked.contains(&"PerplexityBot".to_string()));
    }
}
