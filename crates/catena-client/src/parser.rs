//! Default page parsers built on `scraper`.
//!
//! Both parsers produce the same record shape:
//!
//! ```json
//! { "title": "...", "text": "...", "links_count": 42, "links": ["https://..."] }
//! ```
//!
//! [`summarize_html`] keeps the first 10 links, [`collect_links`] keeps all
//! of them so [`page_links`] can feed them to the next chain step.

use std::collections::HashSet;
use std::sync::LazyLock;

use catena_core::error::CrawlError;
use catena_core::models::Record;
use scraper::{ElementRef, Html, Selector};
use serde_json::json;
use url::Url;

/// Characters of visible text kept in a summary.
pub const TEXT_PREVIEW_CHARS: usize = 500;
/// Links kept in a summary.
pub const LINK_PREVIEW_COUNT: usize = 10;

static TITLE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("title").expect("static 'title' selector is valid"));
static BODY: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("body").expect("static 'body' selector is valid"));
static ANCHORS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("static 'a[href]' selector is valid"));

/// Title, text preview, and the first few links of a page.
pub fn summarize_html(url: &str, html: &str) -> Result<Record, CrawlError> {
    summarize(url, html, Some(LINK_PREVIEW_COUNT))
}

/// Like [`summarize_html`] but keeps every link.
pub fn collect_links(url: &str, html: &str) -> Result<Record, CrawlError> {
    summarize(url, html, None)
}

/// Next-URL extractor for records produced by these parsers.
pub fn page_links(record: &Record) -> Vec<String> {
    record["links"]
        .as_array()
        .map(|links| {
            links
                .iter()
                .filter_map(|l| l.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default()
}

fn summarize(url: &str, html: &str, link_limit: Option<usize>) -> Result<Record, CrawlError> {
    let base = Url::parse(url).map_err(|e| CrawlError::ParseError(format!("Invalid page URL '{url}': {e}")))?;
    let document = Html::parse_document(html);

    let title = document
        .select(&TITLE)
        .next()
        .map(|t| t.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty());

    let text: String = visible_text(&document)
        .chars()
        .take(TEXT_PREVIEW_CHARS)
        .collect();

    let links = absolute_links(&document, &base);
    let links_count = links.len();
    let kept: Vec<String> = match link_limit {
        Some(limit) => links.into_iter().take(limit).collect(),
        None => links,
    };

    Ok(json!({
        "title": title,
        "text": text,
        "links_count": links_count,
        "links": kept,
    }))
}

/// Whitespace-collapsed body text, skipping script and style content.
fn visible_text(document: &Html) -> String {
    let root = document
        .select(&BODY)
        .next()
        .unwrap_or_else(|| document.root_element());

    let mut words = Vec::new();
    for node in root.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node
            .parent()
            .and_then(ElementRef::wrap)
            .is_some_and(|parent| matches!(parent.value().name(), "script" | "style" | "noscript"));
        if !hidden {
            words.extend(text.split_whitespace());
        }
    }
    words.join(" ")
}

/// Absolute http(s) links in document order, without fragments or repeats.
fn absolute_links(document: &Html, base: &Url) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut links = Vec::new();
    for anchor in document.select(&ANCHORS) {
        let Some(href) = anchor.value().attr("href").map(str::trim) else {
            continue;
        };
        if href.is_empty() || href.starts_with('#') {
            continue;
        }
        let Ok(mut link) = base.join(href) else {
            continue;
        };
        if !matches!(link.scheme(), "http" | "https") {
            continue;
        }
        link.set_fragment(None);
        let link = link.to_string();
        if seen.insert(link.clone()) {
            links.push(link);
        }
    }
    links
}
