//! Versioned capability profile consumed by the evaluator.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::Jurisdiction;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CapabilityWeights {
    pub category_match: f64,
    pub agency_familiarity: f64,
    pub delivery_scale: f64,
    pub keyword_overlap: f64,
    pub geographic_fit: f64,
}

impl Default for CapabilityWeights {
    fn default() -> Self {
        Self {
            category_match: 0.35,
            agency_familiarity: 0.15,
            delivery_scale: 0.20,
            keyword_overlap: 0.20,
            geographic_fit: 0.10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusinessWeights {
    pub budget: f64,
    pub budget_proxy: f64,
    pub strategic_beachhead: f64,
    pub category_growth: f64,
    pub time_to_deadline: f64,
    pub recurrence_potential: f64,
}

impl Default for BusinessWeights {
    fn default() -> Self {
        Self {
            budget: 0.30,
            budget_proxy: 0.15,
            strategic_beachhead: 0.20,
            category_growth: 0.15,
            time_to_deadline: 0.10,
            recurrence_potential: 0.10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverallWeights {
    pub capability_fit: f64,
    pub business_potential: f64,
}

impl Default for OverallWeights {
    fn default() -> Self {
        Self {
            capability_fit: 0.55,
            business_potential: 0.45,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    pub capability: CapabilityWeights,
    pub business: BusinessWeights,
    pub overall: OverallWeights,
}

/// Budget thresholds in local currency for one jurisdiction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BudgetBand {
    pub high: f64,
    pub mid: f64,
    pub low: f64,
    /// Assumed contract value when none is published.
    pub default_proxy: f64,
    /// Annual cost of one delivery headcount.
    pub cost_per_fte: f64,
}

impl BudgetBand {
    pub const fn new(high: f64, mid: f64, low: f64, default_proxy: f64, cost_per_fte: f64) -> Self {
        Self {
            high,
            mid,
            low,
            default_proxy,
            cost_per_fte,
        }
    }

    /// Non-decreasing tier score for an amount.
    pub fn tier(&self, amount: f64) -> f64 {
        if amount >= self.high {
            1.0
        } else if amount >= self.mid {
            0.6
        } else if amount >= self.low {
            0.4
        } else {
            0.2
        }
    }
}

fn default_bands() -> BTreeMap<String, BudgetBand> {
    BTreeMap::from([
        (
            "HK".to_string(),
            BudgetBand::new(500_000.0, 100_000.0, 50_000.0, 1_400_000.0, 250_000.0),
        ),
        (
            "SG".to_string(),
            BudgetBand::new(100_000.0, 30_000.0, 20_000.0, 250_000.0, 50_000.0),
        ),
    ])
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Organisation-specific scoring inputs. Loaded once per evaluator run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CapabilityProfile {
    pub version: String,
    pub competencies: Vec<String>,
    pub adjacent_categories: Vec<String>,
    pub keywords: Vec<String>,
    /// Seed agencies keyed by jurisdiction code.
    pub known_agencies: BTreeMap<String, Vec<String>>,
    pub max_team_size: u32,
    pub primary_jurisdiction: Jurisdiction,
    pub secondary_jurisdiction: Option<Jurisdiction>,
    pub growing_categories: Vec<String>,
    pub recurrence_keywords: Vec<String>,
    pub budget_bands: BTreeMap<String, BudgetBand>,
    pub fallback_band: BudgetBand,
    pub weights: ScoringWeights,
}

impl Default for CapabilityProfile {
    fn default() -> Self {
        Self {
            version: "2026.1".to_string(),
            competencies: strings(&["IT_digital", "events_experiential", "marketing_comms"]),
            adjacent_categories: strings(&["consultancy_advisory", "research_study"]),
            keywords: strings(&[
                "digital",
                "campaign",
                "event",
                "exhibition",
                "website",
                "social media",
                "video",
                "branding",
                "platform",
                "experience",
            ]),
            known_agencies: BTreeMap::new(),
            max_team_size: 8,
            primary_jurisdiction: Jurisdiction::Hk,
            secondary_jurisdiction: Some(Jurisdiction::Sg),
            growing_categories: strings(&["IT_digital", "events_experiential", "marketing_comms"]),
            recurrence_keywords: strings(&[
                "framework",
                "standing offer",
                "retainer",
                "term contract",
                "panel",
                "annual",
                "multi-year",
            ]),
            budget_bands: default_bands(),
            fallback_band: BudgetBand::new(500_000.0, 100_000.0, 50_000.0, 500_000.0, 100_000.0),
            weights: ScoringWeights::default(),
        }
    }
}

impl CapabilityProfile {
    pub fn band_for(&self, jurisdiction: &Jurisdiction) -> &BudgetBand {
        self.budget_bands
            .get(jurisdiction.code())
            .unwrap_or(&self.fallback_band)
    }

    /// Opaque copy stored with every evaluation for reproducibility.
    pub fn snapshot(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_weights_sum_to_one() {
        let w = ScoringWeights::default();
        let cap = w.capability.category_match
            + w.capability.agency_familiarity
            + w.capability.delivery_scale
            + w.capability.keyword_overlap
            + w.capability.geographic_fit;
        let biz = w.business.budget
            + w.business.budget_proxy
            + w.business.strategic_beachhead
            + w.business.category_growth
            + w.business.time_to_deadline
            + w.business.recurrence_potential;
        assert!((cap - 1.0).abs() < 1e-9);
        assert!((biz - 1.0).abs() < 1e-9);
        assert!((w.overall.capability_fit + w.overall.business_potential - 1.0).abs() < 1e-9);
    }

    #[test]
    fn budget_tiers_never_decrease() {
        let band = CapabilityProfile::default().band_for(&Jurisdiction::Hk).to_owned();
        let mut last = 0.0;
        for amount in [0.0, 10_000.0, 50_000.0, 99_999.0, 100_000.0, 600_000.0, 5_000_000.0] {
            let tier = band.tier(amount);
            assert!(tier >= last);
            last = tier;
        }
    }

    #[test]
    fn unknown_jurisdiction_uses_fallback_band() {
        let profile = CapabilityProfile::default();
        let band = profile.band_for(&Jurisdiction::Other("MY".into()));
        assert_eq!(band.default_proxy, 500_000.0);
    }

    #[test]
    fn snapshot_carries_version() {
        let snapshot = CapabilityProfile::default().snapshot();
        assert_eq!(snapshot["version"], "2026.1");
        assert_eq!(snapshot["primary_jurisdiction"], "HK");
    }
}
