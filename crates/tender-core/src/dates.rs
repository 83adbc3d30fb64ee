//! Date normalization for the date shapes government feeds actually publish.

use std::sync::OnceLock;

use chrono::NaiveDate;
use regex::Regex;

fn iso_prefix() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d{4})-(\d{2})-(\d{2})").expect("valid regex"))
}

fn rfc822() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(?:Mon|Tue|Wed|Thu|Fri|Sat|Sun),?\s+(\d{1,2})\s+([A-Za-z]{3})[A-Za-z]*\s+(\d{4})")
            .expect("valid regex")
    })
}

fn day_month_year_slash() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d{1,2})/(\d{1,2})/(\d{4})").expect("valid regex"))
}

fn day_abbrev_year() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d{1,2})-([A-Za-z]{3})-(\d{4})").expect("valid regex"))
}

fn iso_with_time() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d{4})-(\d{2})-(\d{2})T").expect("valid regex"))
}

pub fn month_from_abbrev(abbrev: &str) -> Option<u32> {
    let month = match abbrev.to_ascii_lowercase().as_str() {
        "jan" => 1,
        "feb" => 2,
        "mar" => 3,
        "apr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "oct" => 10,
        "nov" => 11,
        "dec" => 12,
        _ => return None,
    };
    Some(month)
}

fn ymd(year: &str, month: u32, day: &str) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year.parse().ok()?, month, day.parse().ok()?)
}

/// Maps a free-form date string to a calendar date, or `None` when no known shape matches.
pub fn normalize_date(raw: &str) -> Option<NaiveDate> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    if let Some(caps) = iso_prefix().captures(s) {
        if let Some(date) = ymd(&caps[1], caps[2].parse().ok()?, &caps[3]) {
            return Some(date);
        }
    }

    if let Some(caps) = rfc822().captures(s) {
        if let Some(month) = month_from_abbrev(&caps[2]) {
            if let Some(date) = ymd(&caps[3], month, &caps[1]) {
                return Some(date);
            }
        }
    }

    if let Some(caps) = day_month_year_slash().captures(s) {
        let month: u32 = caps[2].parse().ok()?;
        if month <= 12 {
            if let Some(date) = ymd(&caps[3], month, &caps[1]) {
                return Some(date);
            }
        }
    }

    if let Some(caps) = day_abbrev_year().captures(s) {
        if let Some(month) = month_from_abbrev(&caps[2]) {
            if let Some(date) = ymd(&caps[3], month, &caps[1]) {
                return Some(date);
            }
        }
    }

    let caps = iso_with_time().captures(s)?;
    ymd(&caps[1], caps[2].parse().ok()?, &caps[3])
}

/// Like [`normalize_date`] but treats a missing input as unparseable.
pub fn normalize_opt(raw: Option<&str>) -> Option<NaiveDate> {
    raw.and_then(normalize_date)
}
