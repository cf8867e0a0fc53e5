use std::sync::LazyLock;

use regex::Regex;

use crate::dom::Document;

static TRAILING_PAGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/page-\d+$").expect("valid trailing page regex"));
static PAGE_IN_HREF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/page-(\d+)").expect("valid page href regex"));
static THREAD_ROOT_HREF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"threads/[^/]+\.\d+/?$").expect("valid thread root regex"));
static THREAD_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\.(\d+)").expect("valid thread id regex"));
static UNREAD_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*\(\d+\)\s*").expect("valid unread prefix regex"));
static UNSAFE_PATH_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[\\/*?:"<>|]"#).expect("valid path char regex"));

const MAX_TITLE_CHARS: usize = 80;

/// Strips trailing slashes and a trailing `/page-N` so every page of a thread maps to
/// the same key.
pub fn canonical_thread_url(url: &str) -> String {
    let trimmed = url.trim().trim_end_matches('/');
    TRAILING_PAGE.replace(trimmed, "").into_owned()
}

pub fn page_url(thread_url: &str, page: u32) -> String {
    let base = thread_url.trim_end_matches('/');
    if page <= 1 {
        base.to_owned()
    } else {
        format!("{base}/page-{page}")
    }
}

pub fn page_file_name(page: u32) -> String {
    format!("page-{page}.html")
}

pub fn page_number_in_href(href: &str) -> Option<u32> {
    PAGE_IN_HREF
        .captures(href)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

pub fn is_thread_root_href(href: &str) -> bool {
    THREAD_ROOT_HREF.is_match(href)
}

pub fn detect_total_pages(doc: &Document) -> u32 {
    let mut total = 1;
    doc.for_each_element(|el| {
        if !el.is("a") {
            return;
        }
        if let Some(page) = el.attr("href").and_then(page_number_in_href) {
            total = total.max(page);
        }
    });
    total
}

pub fn thread_title(doc: &Document) -> String {
    let raw = doc
        .find_first("title")
        .map(|title| title.text())
        .unwrap_or_default();
    let first = raw.split('|').next().unwrap_or_default().trim();
    let title = UNREAD_PREFIX.replace(first, "").trim().to_owned();
    if title.is_empty() {
        "thread".to_owned()
    } else {
        title
    }
}

pub fn thread_id(thread_url: &str) -> String {
    THREAD_ID
        .captures(thread_url)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_owned())
        .unwrap_or_else(|| "unknown".to_owned())
}

pub fn thread_dir_name(title: &str, thread_url: &str) -> String {
    let safe = UNSAFE_PATH_CHARS.replace_all(title, "_");
    let safe: String = safe.chars().take(MAX_TITLE_CHARS).collect();
    format!("{}_{}", safe.trim(), thread_id(thread_url))
}
