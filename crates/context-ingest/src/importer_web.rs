//! Web importer.
//!
//! Fetches the referenced page and, with `max_depth > 0`, crawls
//! breadth-first over discovered links. Canonical locators are
//! normalized URLs: fragments dropped, tracking parameters stripped,
//! scheme and host lowercased — so the same page reached through a
//! campaign link resolves to the same record.
//!
//! Failure split: the root fetch failing means the whole source is
//! unavailable; any later broken link is an item error and the crawl
//! continues.

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use reqwest::Url;
use tracing::debug;

use context_ingest_core::error::{IngestError, ItemError};
use context_ingest_core::models::{ExtractedItem, Payload, SourceKind};

use crate::importer::{channel, ExtractRequest, Importer, ItemSender, ItemStream};
use crate::options::{ImportOptions, WebOptions};

/// Query parameters that identify campaigns, not content.
const TRACKING_PARAMS: &[&str] = &["fbclid", "gclid", "ref", "mc_cid", "mc_eid"];

pub struct WebImporter {
    client: reqwest::Client,
}

impl WebImporter {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .user_agent(concat!("cingest/", env!("CARGO_PKG_VERSION")))
                .build()
                .expect("reqwest client"),
        }
    }
}

impl Default for WebImporter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Importer for WebImporter {
    fn source_kind(&self) -> SourceKind {
        SourceKind::Web
    }

    fn description(&self) -> &str {
        "Fetch web pages, optionally crawling same-host links to a depth"
    }

    async fn extract(&self, request: &ExtractRequest) -> Result<ItemStream, IngestError> {
        let opts = match &request.options {
            ImportOptions::Web(opts) => opts.clone(),
            _ => {
                return Err(IngestError::InvalidOptions(
                    "web importer given non-web options".to_string(),
                ))
            }
        };

        let root = Url::parse(&request.reference)
            .map_err(|e| IngestError::unavailable(format!("bad URL '{}': {}", request.reference, e)))?;
        let root = canonicalize_url(&root);

        // Root fetch happens before the stream exists: if the referenced
        // page itself is unreachable the whole source is unavailable.
        let root_body = fetch_page(&self.client, &root)
            .await
            .map_err(IngestError::unavailable)?;

        let client = self.client.clone();
        let (tx, rx) = channel();
        tokio::spawn(async move {
            crawl(client, root, root_body, opts, tx).await;
        });

        Ok(rx)
    }
}

async fn crawl(client: reqwest::Client, root: Url, root_body: String, opts: WebOptions, tx: ItemSender) {
    let mut visited: HashSet<String> = HashSet::new();
    let mut queue: VecDeque<(Url, u32, Option<String>)> = VecDeque::new();

    visited.insert(root.to_string());
    queue.push_back((root.clone(), 0, Some(root_body)));
    let mut fetched = 1usize;

    while let Some((url, depth, prefetched)) = queue.pop_front() {
        let body = match prefetched {
            Some(body) => body,
            None => match fetch_page(&client, &url).await {
                Ok(body) => body,
                Err(reason) => {
                    if tx.send(Err(ItemError::new(url.to_string(), reason))).await.is_err() {
                        return;
                    }
                    continue;
                }
            },
        };

        if depth < opts.max_depth {
            for link in extract_links(&url, &body) {
                if !opts.follow_external && link.host_str() != root.host_str() {
                    continue;
                }
                if fetched >= opts.max_pages {
                    break;
                }
                if visited.insert(link.to_string()) {
                    fetched += 1;
                    queue.push_back((link, depth + 1, None));
                }
            }
        }

        let item = page_item(&url, body);
        if tx.send(Ok(item)).await.is_err() {
            debug!("web stream receiver dropped, stopping crawl");
            return;
        }
    }
}

fn page_item(url: &Url, body: String) -> ExtractedItem {
    let title = extract_title(&body);
    let size = body.len() as u64;
    let mut item = ExtractedItem::new(SourceKind::Web, url.to_string(), Payload::Text { body });
    item.extracted_at = Utc::now();
    item.metadata = serde_json::json!({
        "url": url.to_string(),
        "title": title,
        "size": size,
        "mime_type": "text/html",
    });
    item
}

async fn fetch_page(client: &reqwest::Client, url: &Url) -> Result<String, String> {
    let response = client
        .get(url.clone())
        .send()
        .await
        .map_err(|e| e.to_string())?;
    let status = response.status();
    if !status.is_success() {
        return Err(format!("HTTP {}", status));
    }
    response.text().await.map_err(|e| e.to_string())
}

/// Normalize a URL into its canonical locator form.
pub fn canonicalize_url(url: &Url) -> Url {
    let mut out = url.clone();
    out.set_fragment(None);

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| {
            !key.starts_with("utm_") && !TRACKING_PARAMS.contains(&key.as_ref())
        })
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        out.set_query(None);
    } else {
        let query: String = kept
            .iter()
            .map(|(k, v)| {
                if v.is_empty() {
                    k.clone()
                } else {
                    format!("{}={}", k, v)
                }
            })
            .collect::<Vec<_>>()
            .join("&");
        out.set_query(Some(&query));
    }

    // Url already lowercases scheme and host on parse; nothing else to do.
    out
}

fn extract_links(base: &Url, body: &str) -> Vec<Url> {
    // Anchor hrefs only; good enough for crawl discovery.
    let href = Regex::new(r#"href\s*=\s*["']([^"']+)["']"#).expect("href regex");
    let mut links = Vec::new();
    for cap in href.captures_iter(body) {
        let raw = &cap[1];
        if raw.starts_with('#') || raw.starts_with("mailto:") || raw.starts_with("javascript:") {
            continue;
        }
        if let Ok(resolved) = base.join(raw) {
            if resolved.scheme() == "http" || resolved.scheme() == "https" {
                links.push(canonicalize_url(&resolved));
            }
        }
    }
    links
}

fn extract_title(body: &str) -> Option<String> {
    let title = Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("title regex");
    title
        .captures(body)
        .map(|cap| cap[1].trim().to_string())
        .filter(|t| !t.is_empty())
}
