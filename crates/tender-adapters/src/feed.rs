//! RSS 2.0, Atom and tabular-XML parsing into [`RawItem`]s.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use tender_core::{identity_hash, PreExtracted, RawFormat, RawItem};
use tracing::debug;

use crate::markup::{clean_text, element_blocks, element_outer, first_attr, first_text, first_text_of};
use crate::AdapterError;

/// Row element names tried in order when a source does not name one.
pub const ROW_TAG_CANDIDATES: &[&str] = &["Row", "row", "record", "tender", "item", "entry"];

/// Field-map key naming the row element explicitly.
pub const ROW_TAG_KEY: &str = "row_tag";

fn atom_root_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)<feed\b").expect("valid regex"))
}

fn feed_marker_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)<(?:rss|rdf:rdf|channel|feed|item|entry)\b").expect("valid regex")
    })
}

pub fn is_atom(xml: &str) -> bool {
    atom_root_re().is_match(xml)
}

/// Parses an RSS or Atom document. Items without a title are dropped; items without
/// an identifier get one derived from title and link.
pub fn parse_feed(xml: &str) -> Result<Vec<RawItem>, AdapterError> {
    if !feed_marker_re().is_match(xml) {
        return Err(AdapterError::Parse(
            "response is not an RSS or Atom document".to_string(),
        ));
    }
    let items = if is_atom(xml) {
        parse_entries(xml)
    } else {
        parse_items(xml)
    };
    Ok(items)
}

fn parse_items(xml: &str) -> Vec<RawItem> {
    let mut out = Vec::new();
    for block in element_outer(xml, "item") {
        let Some(title) = first_text(block, "title") else {
            debug!("dropping rss item without title");
            continue;
        };
        let link = first_text(block, "link");
        let guid = first_text(block, "guid");
        let published_at = first_text_of(block, &["pubDate", "dc:date", "published", "updated"]);
        let description = first_text_of(block, &["description", "content:encoded"]);
        let category = first_text(block, "category");
        out.push(build_item(
            RawFormat::RssXml,
            block,
            title,
            link,
            guid,
            published_at,
            description,
            category,
        ));
    }
    out
}

fn parse_entries(xml: &str) -> Vec<RawItem> {
    let mut out = Vec::new();
    for block in element_outer(xml, "entry") {
        let Some(title) = first_text(block, "title") else {
            debug!("dropping atom entry without title");
            continue;
        };
        let link = first_attr(block, "link", "href").or_else(|| first_text(block, "link"));
        let guid = first_text(block, "id");
        let published_at = first_text_of(block, &["published", "updated"]);
        let description = first_text_of(block, &["summary", "content"]);
        let category = first_attr(block, "category", "term");
        out.push(build_item(
            RawFormat::AtomXml,
            block,
            title,
            link,
            guid,
            published_at,
            description,
            category,
        ));
    }
    out
}

#[allow(clippy::too_many_arguments)]
fn build_item(
    format: RawFormat,
    block: &str,
    title: String,
    link: Option<String>,
    guid: Option<String>,
    published_at: Option<String>,
    description: Option<String>,
    category: Option<String>,
) -> RawItem {
    let guid = guid.unwrap_or_else(|| identity_hash(&[&title, link.as_deref().unwrap_or("")]));
    let pre = PreExtracted {
        title: Some(title.clone()),
        publish_date: published_at.clone(),
        raw_category: category,
        description_snippet: description.clone(),
        source_url: link.clone(),
        ..PreExtracted::default()
    };
    RawItem {
        guid,
        title,
        link,
        published_at,
        description,
        format,
        payload: block.to_string(),
        pre,
    }
}

fn assign_field(pre: &mut PreExtracted, field: &str, value: String) -> bool {
    let slot = match field {
        "title" => &mut pre.title,
        "publish_date" => &mut pre.publish_date,
        "closing_date" => &mut pre.closing_date,
        "agency" => &mut pre.agency,
        "raw_category" | "category" => &mut pre.raw_category,
        "tender_ref" => &mut pre.tender_ref,
        "description_snippet" | "description" => &mut pre.description_snippet,
        "budget" => &mut pre.budget,
        "source_url" | "link" => &mut pre.source_url,
        _ => return false,
    };
    *slot = Some(value);
    true
}

fn detect_row_blocks<'a>(xml: &'a str, explicit: Option<&str>) -> (String, Vec<&'a str>) {
    if let Some(tag) = explicit {
        return (tag.to_string(), element_outer(xml, tag));
    }
    for tag in ROW_TAG_CANDIDATES {
        let rows = element_outer(xml, tag);
        if !rows.is_empty() {
            return (tag.to_string(), rows);
        }
    }
    (String::new(), Vec::new())
}

/// Parses a row-oriented XML export. `field_map` maps a standard field name
/// (`title`, `closing_date`, `tender_ref`, ...) to the element carrying it in each row.
pub fn parse_tabular(xml: &str, field_map: &BTreeMap<String, String>) -> Vec<RawItem> {
    let (row_tag, rows) = detect_row_blocks(xml, field_map.get(ROW_TAG_KEY).map(String::as_str));
    debug!(row_tag = %row_tag, rows = rows.len(), "tabular rows detected");

    let mut out = Vec::new();
    for row in rows {
        let mut pre = PreExtracted::default();
        let mut values = Vec::new();
        for (field, tag) in field_map {
            if field == ROW_TAG_KEY {
                continue;
            }
            let Some(value) = element_blocks(row, tag)
                .into_iter()
                .next()
                .map(clean_text)
                .filter(|v| !v.is_empty())
            else {
                continue;
            };
            values.push(value.clone());
            if !assign_field(&mut pre, field, value) {
                debug!(field = %field, "unmapped tabular field");
            }
        }

        let Some(title) = pre.title.clone() else {
            debug!("dropping tabular row without title");
            continue;
        };
        let parts: Vec<&str> = values.iter().map(String::as_str).collect();
        out.push(RawItem {
            guid: identity_hash(&parts),
            title,
            link: pre.source_url.clone(),
            published_at: pre.publish_date.clone(),
            description: pre.description_snippet.clone(),
            format: RawFormat::TabularXml,
            payload: row.to_string(),
            pre,
        });
    }
    out
}
