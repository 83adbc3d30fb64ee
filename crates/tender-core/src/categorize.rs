//! Keyword-based category tagging for tender titles.

pub const OTHER_TAG: &str = "other";

/// Category tag and the lowercase substrings that imply it. Substring matching is
/// deliberately loose; trailing spaces in keywords like `"it "` keep them word-ish.
pub const CATEGORY_KEYWORDS: &[(&str, &[&str])] = &[
    (
        "IT_digital",
        &[
            "software", "it ", "digital", "system", "platform", "cyber", "app", "database",
            "network", "cloud", "data centre", "computer",
        ],
    ),
    (
        "events_experiential",
        &[
            "event", "exhibition", "ceremony", "show", "seminar", "conference", "forum",
            "festival", "performance",
        ],
    ),
    (
        "marketing_comms",
        &[
            "marketing", "publicity", "campaign", "media", "communications", "advertising",
            "branding", "pr ", "printing",
        ],
    ),
    (
        "consultancy_advisory",
        &[
            "consultancy", "advisory", "consulting", "eoi", "expression of interest", "study",
            "review", "assessment",
        ],
    ),
    (
        "construction_works",
        &[
            "construction", "building", "civil", "structural", "renovation", "fitting",
            "alteration", "demolition", "drainage", "sewage",
        ],
    ),
    (
        "facilities_management",
        &[
            "maintenance", "lift", "escalator", "hvac", "electrical", "mechanical", "cleaning",
            "security", "facilities",
        ],
    ),
    (
        "social_services",
        &[
            "social", "welfare", "elderly", "disability", "youth", "community", "health",
            "medical", "hospital",
        ],
    ),
    (
        "research_study",
        &[
            "research", "survey", "study", "investigation", "pilot", "evaluation",
            "impact assessment",
        ],
    ),
    (
        "supplies_procurement",
        &[
            "supply", "purchase", "procurement", "equipment", "furniture", "vehicle", "material",
            "goods",
        ],
    ),
    (
        "financial_services",
        &["insurance", "audit", "accounting", "financial", "banking", "actuarial"],
    ),
    (
        "grant_funding",
        &["grant", "funding", "subsidy", "bursary", "scholarship"],
    ),
];

/// Tags inferred from title keywords, in table order. Empty when nothing matches.
pub fn infer_tags(title: &str) -> Vec<String> {
    let lower = title.to_lowercase();
    CATEGORY_KEYWORDS
        .iter()
        .filter(|(_, keywords)| keywords.iter().any(|kw| lower.contains(kw)))
        .map(|(tag, _)| tag.to_string())
        .collect()
}

/// Title classification as a non-empty tag set; falls back to `other`.
pub fn classify_title(title: &str) -> Vec<String> {
    let tags = infer_tags(title);
    if tags.is_empty() {
        vec![OTHER_TAG.to_string()]
    } else {
        tags
    }
}

/// Source default tags first, then inferred tags, without duplicates.
/// `other` only appears when both inputs are empty.
pub fn merge_tags(defaults: &[String], title: &str) -> Vec<String> {
    let mut merged: Vec<String> = Vec::new();
    for tag in defaults.iter().cloned().chain(infer_tags(title)) {
        if !tag.trim().is_empty() && !merged.contains(&tag) {
            merged.push(tag);
        }
    }
    if merged.is_empty() {
        merged.push(OTHER_TAG.to_string());
    }
    merged
}
