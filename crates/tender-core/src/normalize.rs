//! Raw capture → canonical tender draft.

use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;

use crate::categorize::merge_tags;
use crate::dates::normalize_opt;
use crate::reference::{extract_reference, synthetic_reference};
use crate::{BudgetSource, RawCapture, Source, TenderDraft, TenderStatus};

pub const MAPPING_VERSION: &str = "v1.0";

const SNIPPET_CHARS: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SkipReason {
    #[error("capture {guid} has no title")]
    MissingTitle { guid: String },
}

/// Open through the closing day itself; unknown when no closing date parsed.
pub fn derive_status(closing_date: Option<NaiveDate>, today: NaiveDate) -> TenderStatus {
    match closing_date {
        Some(date) if date >= today => TenderStatus::Open,
        Some(_) => TenderStatus::Closed,
        None => TenderStatus::UnknownClosing,
    }
}

fn flush(current: &mut String, multiplier: f64, out: &mut Vec<f64>) {
    if let Ok(v) = current.parse::<f64>() {
        out.push(v * multiplier);
    }
    current.clear();
}

/// Numbers in `text`, honouring thousands separators and `k`/`m` suffixes.
pub fn extract_amounts(text: &str) -> Vec<f64> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut seen_dot = false;
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch.is_ascii_digit() {
            current.push(ch);
            continue;
        }
        if ch == ',' && !current.is_empty() && chars.peek().is_some_and(|c| c.is_ascii_digit()) {
            continue;
        }
        if ch == '.' && !seen_dot && !current.is_empty() {
            current.push(ch);
            seen_dot = true;
            continue;
        }
        if !current.is_empty() {
            let multiplier = match ch.to_ascii_lowercase() {
                'k' => 1_000.0,
                'm' => 1_000_000.0,
                _ => 1.0,
            };
            flush(&mut current, multiplier, &mut out);
            seen_dot = false;
        }
    }
    if !current.is_empty() {
        flush(&mut current, 1.0, &mut out);
    }
    out
}

/// Parses a published budget string into `(min, max)`.
pub fn parse_budget(text: &str) -> Option<(f64, f64)> {
    let amounts: Vec<f64> = extract_amounts(text).into_iter().filter(|v| *v > 0.0).collect();
    let min = amounts.iter().copied().fold(f64::INFINITY, f64::min);
    let max = amounts.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if amounts.is_empty() {
        None
    } else {
        Some((min, max))
    }
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(ToString::to_string)
}

fn snippet(text: &str) -> String {
    text.trim().chars().take(SNIPPET_CHARS).collect()
}

/// Builds the canonical draft for one capture. Rejects captures without a title.
pub fn normalize_capture(
    capture: &RawCapture,
    source: &Source,
    now: DateTime<Utc>,
) -> Result<TenderDraft, SkipReason> {
    let pre = &capture.pre;
    let title = non_empty(pre.title.as_ref()).ok_or_else(|| SkipReason::MissingTitle {
        guid: capture.guid.clone(),
    })?;

    let closing_date = normalize_opt(pre.closing_date.as_deref());
    let parsed_publish = normalize_opt(pre.publish_date.as_deref());
    let publish_date_estimated = parsed_publish.is_none();
    let publish_date = parsed_publish.or_else(|| Some(capture.captured_at.date_naive()));

    let (tender_ref, reference_is_synthetic) = match non_empty(pre.tender_ref.as_ref())
        .or_else(|| extract_reference(&title, source.parsing_notes.as_deref()))
    {
        Some(reference) => (reference, false),
        None => (synthetic_reference(&source.source_id, &title), true),
    };

    let agency = non_empty(pre.agency.as_ref())
        .or_else(|| non_empty(source.organisation.as_ref()))
        .or_else(|| non_empty(Some(&source.name)));

    let (budget_min, budget_max, budget_source) = match pre.budget.as_deref().and_then(parse_budget) {
        Some((min, max)) => (Some(min), Some(max), BudgetSource::Stated),
        None => (None, None, BudgetSource::Unknown),
    };

    Ok(TenderDraft {
        source_id: source.source_id.clone(),
        raw_capture_id: Some(capture.id),
        jurisdiction: source.jurisdiction.clone(),
        owner_type: source.owner_type.clone(),
        source_url: capture
            .item_url
            .clone()
            .or_else(|| non_empty(pre.source_url.as_ref()))
            .or_else(|| source.fetch_url().map(ToString::to_string)),
        mapping_version: MAPPING_VERSION.to_string(),
        tender_ref,
        reference_is_synthetic,
        category_tags: merge_tags(&source.category_tags_default, &title),
        title,
        description_snippet: non_empty(pre.description_snippet.as_ref()).map(|d| snippet(&d)),
        agency,
        raw_category: non_empty(pre.raw_category.as_ref()),
        publish_date,
        publish_date_estimated,
        closing_date,
        status: derive_status(closing_date, now.date_naive()),
        budget_min,
        budget_max,
        currency: source.jurisdiction.default_currency().map(ToString::to_string),
        budget_source,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::TimeZone;

    use super::*;
    use crate::{Jurisdiction, NewSource, PreExtracted, RawFormat, SourceKind, SourceStatus};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).single().unwrap()
    }

    fn source(jurisdiction: Jurisdiction) -> Source {
        NewSource {
            source_id: "hk-emsd-rss".into(),
            name: "EMSD Tender Notices".into(),
            organisation: Some("Electrical and Mechanical Services Department".into()),
            jurisdiction,
            owner_type: "government".into(),
            kind: SourceKind::RssXml,
            access: "public".into(),
            priority: 1,
            status: SourceStatus::Active,
            feed_url: Some("https://www.emsd.gov.hk/rss/tenders.xml".into()),
            base_url: None,
            hub_url: None,
            field_map: BTreeMap::new(),
            category_tags_default: vec![],
            parsing_notes: None,
            discovered_from: None,
            discovered_at: None,
        }
        .into_source(now())
    }

    fn capture(pre: PreExtracted) -> RawCapture {
        RawCapture {
            id: 7,
            source_id: "hk-emsd-rss".into(),
            format: RawFormat::RssXml,
            payload: String::new(),
            pre,
            item_url: Some("https://www.emsd.gov.hk/t/1".into()),
            guid: "g-1".into(),
            captured_at: now(),
            normalized: false,
            tender_id: None,
        }
    }

    #[test]
    fn normalizes_a_feed_item() {
        let pre = PreExtracted {
            title: Some("Supply Contract EMSD(T)23/2025 for lift maintenance".into()),
            publish_date: Some("Tue, 24 Feb 2026 10:00:00 GMT".into()),
            closing_date: Some("31/03/2026".into()),
            ..PreExtracted::default()
        };
        let draft = normalize_capture(&capture(pre), &source(Jurisdiction::Hk), now()).unwrap();

        assert_eq!(draft.tender_ref, "EMSD(T)23/2025");
        assert!(!draft.reference_is_synthetic);
        assert_eq!(draft.publish_date, NaiveDate::from_ymd_opt(2026, 2, 24));
        assert!(!draft.publish_date_estimated);
        assert_eq!(draft.status, TenderStatus::Open);
        assert_eq!(draft.currency.as_deref(), Some("HKD"));
        assert_eq!(
            draft.agency.as_deref(),
            Some("Electrical and Mechanical Services Department")
        );
        assert_eq!(draft.mapping_version, MAPPING_VERSION);
        assert_eq!(draft.raw_capture_id, Some(7));
        assert!(draft.category_tags.contains(&"facilities_management".to_string()));
    }

    #[test]
    fn unparseable_publish_date_is_estimated_from_capture_time() {
        let pre = PreExtracted {
            title: Some("Cleaning services".into()),
            publish_date: Some("soon".into()),
            closing_date: Some("2026-02-01".into()),
            ..PreExtracted::default()
        };
        let draft = normalize_capture(&capture(pre), &source(Jurisdiction::Sg), now()).unwrap();

        assert!(draft.publish_date_estimated);
        assert_eq!(draft.publish_date, Some(now().date_naive()));
        assert_eq!(draft.status, TenderStatus::Closed);
        assert!(draft.reference_is_synthetic);
        assert!(draft.tender_ref.starts_with("hk-emsd-"));
        assert_eq!(draft.currency.as_deref(), Some("SGD"));
    }

    #[test]
    fn pre_extracted_fields_win() {
        let pre = PreExtracted {
            title: Some("Exhibition booth EMSD(T)23/2025".into()),
            tender_ref: Some("GLD-ETB-0042".into()),
            agency: Some("Leisure and Cultural Services Department".into()),
            budget: Some("HK$300,000 - 1.2M".into()),
            ..PreExtracted::default()
        };
        let draft =
            normalize_capture(&capture(pre), &source(Jurisdiction::Other("MO".into())), now())
                .unwrap();

        assert_eq!(draft.tender_ref, "GLD-ETB-0042");
        assert_eq!(draft.agency.as_deref(), Some("Leisure and Cultural Services Department"));
        assert_eq!(draft.budget_min, Some(300_000.0));
        assert_eq!(draft.budget_max, Some(1_200_000.0));
        assert_eq!(draft.budget_source, BudgetSource::Stated);
        assert_eq!(draft.currency, None);
        assert_eq!(draft.status, TenderStatus::UnknownClosing);
    }

    #[test]
    fn missing_title_is_rejected() {
        let pre = PreExtracted {
            title: Some("   ".into()),
            ..PreExtracted::default()
        };
        let err = normalize_capture(&capture(pre), &source(Jurisdiction::Hk), now()).unwrap_err();
        assert_eq!(err, SkipReason::MissingTitle { guid: "g-1".into() });
    }

    #[test]
    fn amounts_handle_separators_and_suffixes() {
        assert_eq!(extract_amounts("SGD 30,000"), vec![30_000.0]);
        assert_eq!(extract_amounts("500k to 2.5m"), vec![500_000.0, 2_500_000.0]);
        assert_eq!(parse_budget("to be confirmed"), None);
    }
}
