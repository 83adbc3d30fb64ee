//! Two-factor relevance scoring and label assignment.

use std::collections::HashSet;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tender_core::{
    BusinessSignals, CapabilityProfile, CapabilitySignals, Label, SignalBreakdown, Tender,
};

/// Confidence discount applied to the jurisdiction budget proxy.
pub const PROXY_CONFIDENCE: f64 = 0.9;

/// Keyword hits are amplified before capping; a title rarely carries more than a few.
pub const KEYWORD_AMPLIFIER: f64 = 3.0;

/// Agencies the organisation already knows, compared case-insensitively.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KnownAgencies {
    names: HashSet<String>,
}

impl KnownAgencies {
    /// Seed agencies from every jurisdiction in the profile plus agencies of tracked tenders.
    pub fn from_profile(profile: &CapabilityProfile, tracked: &[String]) -> Self {
        let names = profile
            .known_agencies
            .values()
            .flatten()
            .chain(tracked.iter())
            .map(|name| name.trim().to_lowercase())
            .filter(|name| !name.is_empty())
            .collect();
        Self { names }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Exact match, or the tender's agency names a known agency (e.g. "EMSD" in
    /// "EMSD Headquarters").
    pub fn contains(&self, agency: Option<&str>) -> bool {
        let Some(agency) = agency.map(|a| a.trim().to_lowercase()) else {
            return false;
        };
        if agency.is_empty() {
            return false;
        }
        self.names.contains(&agency)
            || self
                .names
                .iter()
                .any(|known| known.len() >= 3 && agency.contains(known.as_str()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Scorecard {
    pub capability_fit: f64,
    pub business_potential: f64,
    pub overall: f64,
    pub label: Label,
    pub signals: SignalBreakdown,
}

impl Scorecard {
    /// Every signal with a readable name, capability signals first.
    pub fn named_signals(&self) -> Vec<(&'static str, f64)> {
        let c = &self.signals.capability;
        let b = &self.signals.business;
        vec![
            ("category match", c.category_match),
            ("agency familiarity", c.agency_familiarity),
            ("delivery scale", c.delivery_scale),
            ("keyword overlap", c.keyword_overlap),
            ("geographic fit", c.geographic_fit),
            ("stated budget", b.budget),
            ("budget proxy", b.budget_proxy),
            ("strategic beachhead", b.strategic_beachhead),
            ("category growth", b.category_growth),
            ("time to deadline", b.time_to_deadline),
            ("recurrence potential", b.recurrence_potential),
        ]
    }

    /// The two strongest signals and the weakest one.
    pub fn highlights(&self) -> (Vec<(&'static str, f64)>, Option<(&'static str, f64)>) {
        let mut ranked = self.named_signals();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        let concern = ranked.last().copied();
        ranked.truncate(2);
        (ranked, concern)
    }
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

fn has_any(haystack: &[String], needles: &[String]) -> bool {
    haystack
        .iter()
        .any(|h| needles.iter().any(|n| n.eq_ignore_ascii_case(h)))
}

pub fn category_match(tender: &Tender, profile: &CapabilityProfile) -> f64 {
    if has_any(&tender.category_tags, &profile.competencies) {
        1.0
    } else if has_any(&tender.category_tags, &profile.adjacent_categories) {
        0.5
    } else {
        0.0
    }
}

/// Team size implied by the stated budget, or the jurisdiction proxy when none was stated.
pub fn delivery_scale(tender: &Tender, profile: &CapabilityProfile) -> f64 {
    let band = profile.band_for(&tender.jurisdiction);
    if band.cost_per_fte <= 0.0 {
        return 1.0;
    }
    let budget = tender.stated_budget().unwrap_or(band.default_proxy);
    let team = budget / band.cost_per_fte;
    let max = f64::from(profile.max_team_size);
    if team <= max {
        1.0
    } else if team <= max * 1.5 {
        0.5
    } else {
        0.0
    }
}

pub fn keyword_overlap(tender: &Tender, profile: &CapabilityProfile) -> f64 {
    if profile.keywords.is_empty() {
        return 0.0;
    }
    let text = format!(
        "{} {}",
        tender.title,
        tender.description_snippet.as_deref().unwrap_or("")
    )
    .to_lowercase();
    let hits = profile
        .keywords
        .iter()
        .filter(|kw| !kw.trim().is_empty() && text.contains(&kw.trim().to_lowercase()))
        .count();
    let fraction = hits as f64 / profile.keywords.len() as f64;
    (fraction * KEYWORD_AMPLIFIER).min(1.0)
}

pub fn geographic_fit(tender: &Tender, profile: &CapabilityProfile) -> f64 {
    if tender.jurisdiction == profile.primary_jurisdiction {
        1.0
    } else if profile.secondary_jurisdiction.as_ref() == Some(&tender.jurisdiction) {
        0.7
    } else {
        0.3
    }
}

pub fn deadline_signal(closing_date: Option<NaiveDate>, today: NaiveDate) -> f64 {
    let Some(closing) = closing_date else {
        return 0.3;
    };
    let days = (closing - today).num_days();
    if days > 30 {
        1.0
    } else if days >= 14 {
        0.7
    } else if days >= 7 {
        0.4
    } else {
        0.1
    }
}

pub fn recurrence_signal(tender: &Tender, profile: &CapabilityProfile) -> f64 {
    let title = tender.title.to_lowercase();
    if profile
        .recurrence_keywords
        .iter()
        .any(|kw| title.contains(&kw.to_lowercase()))
    {
        0.9
    } else {
        0.3
    }
}

/// Delivery infeasibility wins over every threshold.
pub fn assign_label(delivery_scale: f64, overall: f64) -> Label {
    if delivery_scale < 0.5 {
        Label::PartnerOnly
    } else if overall >= 0.70 {
        Label::Priority
    } else if overall >= 0.50 {
        Label::Consider
    } else if overall >= 0.35 {
        Label::PartnerOnly
    } else {
        Label::Ignore
    }
}

pub fn score_tender(
    tender: &Tender,
    profile: &CapabilityProfile,
    known: &KnownAgencies,
    today: NaiveDate,
) -> Scorecard {
    let band = profile.band_for(&tender.jurisdiction);
    let agency_known = known.contains(tender.agency.as_deref());

    let capability = CapabilitySignals {
        category_match: category_match(tender, profile),
        agency_familiarity: if agency_known { 1.0 } else { 0.0 },
        delivery_scale: delivery_scale(tender, profile),
        keyword_overlap: keyword_overlap(tender, profile),
        geographic_fit: geographic_fit(tender, profile),
    };
    let business = BusinessSignals {
        budget: tender.stated_budget().map(|b| band.tier(b)).unwrap_or(0.0),
        budget_proxy: band.tier(band.default_proxy) * PROXY_CONFIDENCE,
        strategic_beachhead: if agency_known { 0.4 } else { 0.8 },
        category_growth: if has_any(&tender.category_tags, &profile.growing_categories) {
            0.9
        } else {
            0.5
        },
        time_to_deadline: deadline_signal(tender.closing_date, today),
        recurrence_potential: recurrence_signal(tender, profile),
    };

    let cw = &profile.weights.capability;
    let capability_fit = capability.category_match * cw.category_match
        + capability.agency_familiarity * cw.agency_familiarity
        + capability.delivery_scale * cw.delivery_scale
        + capability.keyword_overlap * cw.keyword_overlap
        + capability.geographic_fit * cw.geographic_fit;

    let bw = &profile.weights.business;
    let business_potential = business.budget * bw.budget
        + business.budget_proxy * bw.budget_proxy
        + business.strategic_beachhead * bw.strategic_beachhead
        + business.category_growth * bw.category_growth
        + business.time_to_deadline * bw.time_to_deadline
        + business.recurrence_potential * bw.recurrence_potential;

    let ow = &profile.weights.overall;
    let overall = capability_fit * ow.capability_fit + business_potential * ow.business_potential;

    let capability_fit = round3(capability_fit);
    let business_potential = round3(business_potential);
    let overall = round3(overall);
    Scorecard {
        capability_fit,
        business_potential,
        overall,
        label: assign_label(capability.delivery_scale, overall),
        signals: SignalBreakdown {
            capability,
            business,
        },
    }
}
