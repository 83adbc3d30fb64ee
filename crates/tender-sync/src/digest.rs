//! Daily digest: header statistics, the ranked top list and a short narrative.

use std::time::Instant;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tender_core::{BudgetSource, CapabilityProfile, Jurisdiction, Label, RunStatus, Tender};
use tender_storage::{DigestCandidate, DigestStats, StoreError};
use tracing::info;

use crate::ingest::INGESTOR_AGENT;
use crate::{write_run_log, AgentContext, RunOutline};

pub const DIGEST_AGENT: &str = "DigestGeneratorAgent";

pub const DIGEST_SIZE: i64 = 20;

/// Actions offered on every entry; priority entries can also be assigned.
pub const BASE_ACTIONS: &[&str] = &["track", "ignore", "partner_only", "not_for_us"];
pub const ASSIGN_ACTION: &str = "assign_to_team";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DigestEntry {
    pub tender_id: i64,
    pub tender_ref: String,
    pub title: String,
    pub agency: Option<String>,
    pub jurisdiction: Jurisdiction,
    pub source_name: Option<String>,
    pub source_url: Option<String>,
    pub category_tags: Vec<String>,
    pub closing_date: Option<NaiveDate>,
    pub days_to_close: Option<i64>,
    pub budget_display: String,
    pub label: Label,
    pub overall: Option<f64>,
    pub capability_fit: Option<f64>,
    pub business_potential: Option<f64>,
    pub rationale: Option<String>,
    pub actions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastRun {
    pub finished_at: DateTime<Utc>,
    pub status: RunStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Digest {
    pub date: NaiveDate,
    pub generated_at: DateTime<Utc>,
    pub stats: DigestStats,
    /// `sources_ok / sources_active`, zero with no active sources.
    pub source_health: f64,
    pub last_ingestion: Option<LastRun>,
    pub entries: Vec<DigestEntry>,
    pub narrative: String,
    pub narrative_model: Option<String>,
}

fn currency_symbol(currency: Option<&str>, jurisdiction: &Jurisdiction) -> String {
    match currency.or(jurisdiction.default_currency()) {
        Some("HKD") => "HK$".to_string(),
        Some("SGD") => "S$".to_string(),
        Some(other) => format!("{other} "),
        None => String::new(),
    }
}

/// `1200000` → `1,200,000`.
pub fn group_thousands(amount: f64) -> String {
    let whole = amount.round().abs() as u64;
    let digits = whole.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// `1400000` → `1.4M`, `500000` → `500k`.
pub fn compact_amount(amount: f64) -> String {
    if amount >= 1_000_000.0 {
        let millions = format!("{:.1}", amount / 1_000_000.0);
        format!("{}M", millions.trim_end_matches(".0"))
    } else if amount >= 1_000.0 {
        format!("{:.0}k", amount / 1_000.0)
    } else {
        format!("{amount:.0}")
    }
}

pub fn budget_display(tender: &Tender, profile: &CapabilityProfile) -> String {
    let symbol = currency_symbol(tender.currency.as_deref(), &tender.jurisdiction);
    if tender.budget_source == BudgetSource::Stated {
        match (tender.budget_min, tender.budget_max) {
            (Some(min), Some(max)) if (max - min).abs() >= 1.0 => {
                return format!(
                    "{symbol}{} to {symbol}{}",
                    group_thousands(min),
                    group_thousands(max)
                );
            }
            (_, Some(amount)) | (Some(amount), None) => {
                return format!("{symbol}{}", group_thousands(amount));
            }
            (None, None) => {}
        }
    }
    match profile.budget_bands.get(tender.jurisdiction.code()) {
        Some(band) => format!("~{symbol}{} (estimated)", compact_amount(band.default_proxy)),
        None => "Budget not stated".to_string(),
    }
}

pub fn actions_for(label: Label) -> Vec<String> {
    let mut actions: Vec<String> = BASE_ACTIONS.iter().map(|a| a.to_string()).collect();
    if label == Label::Priority {
        actions.push(ASSIGN_ACTION.to_string());
    }
    actions
}

pub fn digest_entry(
    candidate: DigestCandidate,
    today: NaiveDate,
    profile: &CapabilityProfile,
) -> DigestEntry {
    let DigestCandidate {
        tender,
        source_name,
        latest,
    } = candidate;
    let latest = latest.map(|evaluation| evaluation.body);
    DigestEntry {
        tender_id: tender.id,
        days_to_close: tender.closing_date.map(|d| (d - today).num_days()),
        budget_display: budget_display(&tender, profile),
        actions: actions_for(tender.label),
        overall: latest.as_ref().map(|e| e.overall),
        capability_fit: latest.as_ref().map(|e| e.capability_fit),
        business_potential: latest.as_ref().map(|e| e.business_potential),
        rationale: latest.map(|e| e.rationale),
        tender_ref: tender.tender_ref,
        title: tender.title,
        agency: tender.agency,
        jurisdiction: tender.jurisdiction,
        source_name,
        source_url: tender.source_url,
        category_tags: tender.category_tags,
        closing_date: tender.closing_date,
        label: tender.label,
    }
}

pub async fn build_digest(
    cx: AgentContext<'_>,
    profile: &CapabilityProfile,
) -> Result<Digest, StoreError> {
    let started = Instant::now();
    let today = cx.now.date_naive();
    let stats = cx.store.digest_stats(today).await?;
    let entries: Vec<DigestEntry> = cx
        .store
        .digest_candidates(today, DIGEST_SIZE)
        .await?
        .into_iter()
        .map(|candidate| digest_entry(candidate, today, profile))
        .collect();
    let last_ingestion = cx
        .store
        .last_run(INGESTOR_AGENT)
        .await?
        .map(|log| LastRun {
            finished_at: log.body.finished_at,
            status: log.body.status,
        });
    let narrative = cx.assist.narrator.narrative(&stats, &entries).await;

    let source_health = if stats.sources_active > 0 {
        stats.sources_ok as f64 / stats.sources_active as f64
    } else {
        0.0
    };
    let digest = Digest {
        date: today,
        generated_at: cx.now,
        stats,
        source_health,
        last_ingestion,
        entries,
        narrative: narrative.text,
        narrative_model: narrative.model,
    };
    info!(
        run_id = %cx.run_id,
        entries = digest.entries.len(),
        new_today = stats.new_today,
        open_priority = stats.open_priority,
        "digest generated"
    );

    write_run_log(
        cx,
        RunOutline {
            agent: DIGEST_AGENT,
            status: RunStatus::Success,
            items_processed: digest.entries.len() as i64,
            new_items: stats.new_today,
            detail: format!("{} entries", digest.entries.len()),
            errors: &[],
            metadata: serde_json::json!({
                "stats": stats,
                "narrative_model": digest.narrative_model,
            }),
            duration_ms: started.elapsed().as_millis() as i64,
        },
    )
    .await;
    Ok(digest)
}
