//! Candidate feed links on hub pages.

use std::collections::HashSet;

use scraper::Html;
use tender_storage::Url;

use crate::{select_all_attrs, AdapterError};

/// Upper bound on hrefs handed to the link-extraction assist.
pub const HREF_CAP: usize = 200;

const FEED_LINK_SELECTOR: &str =
    r#"link[type="application/rss+xml"][href], link[type="application/atom+xml"][href]"#;

const FEED_KEYWORDS: &[&str] = &["rss", "feed", "tender", "procurement", "notice", "gebiz"];
const FEED_EXTENSIONS: &[&str] = &[".xml", ".rss", ".atom"];
const FEED_PATH_SUFFIXES: &[&str] = &["/rss", "/feed", "/atom"];

/// Resolves `href` against `base`, keeping only http(s) targets and dropping fragments.
pub fn resolve_url(base: &Url, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }
    let mut url = base.join(href).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    url.set_fragment(None);
    Some(url.to_string())
}

fn path_of(href: &str) -> String {
    href.split(['?', '#'])
        .next()
        .unwrap_or_default()
        .trim_end_matches('/')
        .to_ascii_lowercase()
}

fn looks_like_feed(href: &str) -> bool {
    let lower = href.to_ascii_lowercase();
    let path = path_of(href);
    FEED_KEYWORDS.iter().any(|k| lower.contains(k))
        && (FEED_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
            || FEED_PATH_SUFFIXES.iter().any(|suffix| path.ends_with(suffix)))
}

fn is_bare_xml(href: &str) -> bool {
    path_of(href).ends_with(".xml")
}

fn push_unique(out: &mut Vec<String>, seen: &mut HashSet<String>, url: String) {
    if seen.insert(url.clone()) {
        out.push(url);
    }
}

/// Feed candidates on a hub page, in matcher order: declared feed `<link>`s, then
/// keyword hrefs with a feed-like extension, then any other `.xml` href.
pub fn find_feed_links(html: &str, page_url: &str) -> Result<Vec<String>, AdapterError> {
    let base = Url::parse(page_url)
        .map_err(|e| AdapterError::Message(format!("invalid hub url {page_url}: {e}")))?;
    let document = Html::parse_document(html);
    let declared = select_all_attrs(&document, FEED_LINK_SELECTOR, "href")?;
    let anchors = select_all_attrs(&document, "a[href]", "href")?;

    let mut out = Vec::new();
    let mut seen = HashSet::new();
    let ordered = declared
        .iter()
        .chain(anchors.iter().filter(|href| looks_like_feed(href)))
        .chain(anchors.iter().filter(|href| is_bare_xml(href)));
    for href in ordered {
        if let Some(url) = resolve_url(&base, href) {
            push_unique(&mut out, &mut seen, url);
        }
    }
    Ok(out)
}

/// De-duplicated absolute hrefs on a page, capped at `cap`.
pub fn collect_hrefs(html: &str, page_url: &str, cap: usize) -> Result<Vec<String>, AdapterError> {
    let base = Url::parse(page_url)
        .map_err(|e| AdapterError::Message(format!("invalid hub url {page_url}: {e}")))?;
    let document = Html::parse_document(html);

    let mut out = Vec::new();
    let mut seen = HashSet::new();
    for href in select_all_attrs(&document, "a[href]", "href")? {
        if out.len() >= cap {
            break;
        }
        if let Some(url) = resolve_url(&base, &href) {
            push_unique(&mut out, &mut seen, url);
        }
    }
    Ok(out)
}

/// Accepts an assist-suggested URL only if it is absolute http(s) or root-relative,
/// returning it resolved against the hub.
pub fn accept_candidate(hub_url: &str, candidate: &str) -> Option<String> {
    let candidate = candidate.trim();
    let lower = candidate.to_ascii_lowercase();
    let acceptable = lower.starts_with("http://")
        || lower.starts_with("https://")
        || (candidate.starts_with('/') && !candidate.starts_with("//"));
    if !acceptable {
        return None;
    }
    let base = Url::parse(hub_url).ok()?;
    resolve_url(&base, candidate)
}
