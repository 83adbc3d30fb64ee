//! Tender reference extraction from free-text titles.

use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;

use crate::identity_hash;

/// Ordered reference shapes; the first match wins.
const REFERENCE_PATTERNS: &[&str] = &[
    // Department code with bracketed letter, e.g. EMSD(T)23/2025, HyD(T)01/2025
    r"\b[A-Z][A-Za-z]{1,5}\([A-Z]\)\d+/\d{4}\b",
    // Slash-delimited codes with a year, e.g. ISD/EA/2026
    r"\b[A-Z]{2,8}[/-]\w+/\d{4}\b",
    // Singapore marketplace, e.g. GeBIZ-MOE-2026-0231
    r"(?i)\bGeBIZ[-\w]+\d{4}[-\w]+",
    // Compact codes, e.g. HY202514
    r"\b[A-Z]{2,6}\d{6,}\b",
    // Ticket numbers, e.g. TB2025/001
    r"(?i)\bTB\d{4}/\d{2,4}\b",
];

fn patterns() -> &'static [Regex] {
    static RES: OnceLock<Vec<Regex>> = OnceLock::new();
    RES.get_or_init(|| {
        REFERENCE_PATTERNS
            .iter()
            .map(|p| Regex::new(p).expect("valid reference pattern"))
            .collect()
    })
}

fn hint_delimiters() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"/(.+?)/").expect("valid regex"))
}

/// Pulls a `/pattern/` out of a source's parsing notes and tries it against `title`.
/// Hints that are not valid regular expressions are ignored.
fn match_hint(title: &str, hint: &str) -> Option<String> {
    let caps = hint_delimiters().captures(hint)?;
    match Regex::new(&caps[1]) {
        Ok(re) => re.find(title).map(|m| m.as_str().to_string()),
        Err(err) => {
            debug!(hint, error = %err, "ignoring malformed reference hint");
            None
        }
    }
}

/// Best-effort extraction of an official tender reference from a title.
pub fn extract_reference(title: &str, parsing_notes: Option<&str>) -> Option<String> {
    if title.trim().is_empty() {
        return None;
    }
    if let Some(found) = parsing_notes.and_then(|hint| match_hint(title, hint)) {
        return Some(found);
    }
    patterns()
        .iter()
        .find_map(|re| re.find(title))
        .map(|m| m.as_str().to_string())
}

/// Stand-in reference for titles with no recognisable code. Never an official reference.
pub fn synthetic_reference(source_id: &str, title: &str) -> String {
    let prefix: String = source_id.chars().take(8).collect();
    let digest = identity_hash(&[source_id, title]);
    format!("{prefix}-{}", &digest[..8])
}
