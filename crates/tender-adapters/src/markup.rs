//! Tolerant tag scanning for feed documents that are not always well-formed XML.

use std::sync::OnceLock;

use regex::{Captures, Regex};

fn entity_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"&(#[0-9]+|#[xX][0-9a-fA-F]+|amp|lt|gt|quot|apos|nbsp);").expect("valid regex")
    })
}

fn tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<[^>]*>").expect("valid regex"))
}

fn whitespace_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("valid regex"))
}

fn element_re(tag: &str) -> Option<Regex> {
    let tag = regex::escape(tag);
    Regex::new(&format!(r"(?is)<{tag}(?:\s[^>]*)?>(.*?)</{tag}\s*>")).ok()
}

/// Decodes the named entities feeds use in practice plus numeric references, in one pass.
pub fn decode_entities(text: &str) -> String {
    entity_re()
        .replace_all(text, |caps: &Captures<'_>| {
            let entity = &caps[1];
            let decoded = match entity {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                "nbsp" => Some(' '),
                _ => {
                    let digits = &entity[1..];
                    let code = if let Some(hex) = digits.strip_prefix(['x', 'X']) {
                        u32::from_str_radix(hex, 16).ok()
                    } else {
                        digits.parse::<u32>().ok()
                    };
                    code.and_then(char::from_u32)
                }
            };
            match decoded {
                Some(ch) => ch.to_string(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Unwraps a `<![CDATA[...]]>` section; other text is returned trimmed.
pub fn unwrap_cdata(text: &str) -> &str {
    let trimmed = text.trim();
    trimmed
        .strip_prefix("<![CDATA[")
        .and_then(|rest| rest.strip_suffix("]]>"))
        .map(str::trim)
        .unwrap_or(trimmed)
}

/// Removes markup and collapses whitespace.
pub fn strip_tags(text: &str) -> String {
    let without = tag_re().replace_all(text, " ");
    whitespace_re().replace_all(&without, " ").trim().to_string()
}

/// Text of an element: CDATA unwrapped, entities decoded, nested markup removed.
pub fn clean_text(raw: &str) -> String {
    strip_tags(&decode_entities(unwrap_cdata(raw)))
}

/// Raw inner contents of every `<tag>` element, in document order.
pub fn element_blocks<'a>(xml: &'a str, tag: &str) -> Vec<&'a str> {
    let Some(re) = element_re(tag) else {
        return Vec::new();
    };
    re.captures_iter(xml)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
        .collect()
}

/// Full matched text of every `<tag>...</tag>` element, in document order.
pub fn element_outer<'a>(xml: &'a str, tag: &str) -> Vec<&'a str> {
    let Some(re) = element_re(tag) else {
        return Vec::new();
    };
    re.find_iter(xml).map(|m| m.as_str()).collect()
}

/// Cleaned text of the first `<tag>` element, `None` when absent or blank.
pub fn first_text(xml: &str, tag: &str) -> Option<String> {
    element_blocks(xml, tag)
        .into_iter()
        .next()
        .map(clean_text)
        .filter(|text| !text.is_empty())
}

/// First non-blank text among `tags`, tried in order.
pub fn first_text_of(xml: &str, tags: &[&str]) -> Option<String> {
    tags.iter().find_map(|tag| first_text(xml, tag))
}

/// Value of `attr` on the first opening `<tag ...>` that carries it.
pub fn first_attr(xml: &str, tag: &str, attr: &str) -> Option<String> {
    let pattern = format!(
        r#"(?is)<{}\s[^>]*?\b{}\s*=\s*["']([^"']*)["']"#,
        regex::escape(tag),
        regex::escape(attr)
    );
    let re = Regex::new(&pattern).ok()?;
    re.captures(xml)
        .and_then(|caps| caps.get(1))
        .map(|m| decode_entities(m.as_str().trim()))
        .filter(|value| !value.is_empty())
}
