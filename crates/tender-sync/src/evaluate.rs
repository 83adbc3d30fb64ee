//! Relevance evaluator: scores pending tenders against the capability profile.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use tender_core::{CapabilityProfile, Label, NewEvaluation, RunStatus, Tender};
use tender_storage::StoreError;
use tracing::{info, warn};
use uuid::Uuid;

use crate::scoring::{score_tender, KnownAgencies};
use crate::{write_run_log, AgentContext, RunError, RunOutline};

pub const EVALUATOR_AGENT: &str = "TenderEvaluatorAgent";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluatedTender {
    pub tender_id: i64,
    pub evaluation_id: i64,
    pub tender_ref: String,
    pub label: Label,
    pub overall: f64,
    pub capability_fit: f64,
    pub business_potential: f64,
    pub model_used: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationSummary {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub evaluated: Vec<EvaluatedTender>,
    pub errors: Vec<RunError>,
    pub profile_version: String,
    pub duration_ms: i64,
}

impl EvaluationSummary {
    pub fn new(run_id: Uuid, profile_version: &str) -> Self {
        Self {
            run_id,
            status: RunStatus::Success,
            evaluated: Vec::new(),
            errors: Vec::new(),
            profile_version: profile_version.to_string(),
            duration_ms: 0,
        }
    }

    pub fn skipped(run_id: Uuid, profile_version: &str, reason: &str) -> Self {
        Self {
            status: RunStatus::Skipped,
            errors: vec![RunError::new("run", reason)],
            ..Self::new(run_id, profile_version)
        }
    }
}

/// Scores one tender and records the result as its latest evaluation.
pub async fn evaluate_tender(
    cx: AgentContext<'_>,
    profile: &CapabilityProfile,
    known: &KnownAgencies,
    tender: &Tender,
) -> Result<EvaluatedTender, StoreError> {
    let card = score_tender(tender, profile, known, cx.now.date_naive());
    let rationale = cx.assist.rationale.rationale(tender, &card).await;
    let evaluation = NewEvaluation {
        tender_id: tender.id,
        tender_ref: tender.tender_ref.clone(),
        capability_fit: card.capability_fit,
        business_potential: card.business_potential,
        overall: card.overall,
        label: card.label,
        rationale: rationale.text,
        signals: card.signals,
        weights: profile.weights,
        profile_version: profile.version.clone(),
        profile_snapshot: profile.snapshot(),
        model_used: rationale.model.clone(),
        evaluated_at: cx.now,
    };
    let evaluation_id = cx.store.record_evaluation(&evaluation).await?;
    Ok(EvaluatedTender {
        tender_id: tender.id,
        evaluation_id,
        tender_ref: tender.tender_ref.clone(),
        label: card.label,
        overall: card.overall,
        capability_fit: card.capability_fit,
        business_potential: card.business_potential,
        model_used: rationale.model,
    })
}

pub async fn run_evaluation(cx: AgentContext<'_>, profile: &CapabilityProfile) -> EvaluationSummary {
    let started = Instant::now();
    let mut summary = EvaluationSummary::new(cx.run_id, &profile.version);

    let pending = match cx.store.pending_tenders(cx.config.eval_batch).await {
        Ok(pending) => pending,
        Err(err) => {
            warn!(run_id = %cx.run_id, error = %err, "could not load pending tenders");
            summary.status = RunStatus::Failed;
            summary.errors.push(RunError::new("load_pending", err));
            summary.duration_ms = started.elapsed().as_millis() as i64;
            record(cx, &summary).await;
            return summary;
        }
    };

    let tracked = match cx.store.tracked_agencies().await {
        Ok(tracked) => tracked,
        Err(err) => {
            warn!(error = %err, "could not load tracked agencies; using profile seeds only");
            summary.errors.push(RunError::new("tracked_agencies", err));
            Vec::new()
        }
    };
    let known = KnownAgencies::from_profile(profile, &tracked);
    info!(
        run_id = %cx.run_id,
        pending = pending.len(),
        known_agencies = known.len(),
        profile_version = %profile.version,
        "evaluation run starting"
    );

    for tender in &pending {
        match evaluate_tender(cx, profile, &known, tender).await {
            Ok(evaluated) => summary.evaluated.push(evaluated),
            Err(err) => {
                warn!(tender_id = tender.id, error = %err, "could not record evaluation");
                summary
                    .errors
                    .push(RunError::new(format!("tender:{}", tender.id), err));
            }
        }
    }

    if !summary.errors.is_empty() {
        summary.status = RunStatus::Partial;
    }
    summary.duration_ms = started.elapsed().as_millis() as i64;
    info!(
        run_id = %cx.run_id,
        evaluated = summary.evaluated.len(),
        errors = summary.errors.len(),
        "evaluation run finished"
    );
    record(cx, &summary).await;
    summary
}

async fn record(cx: AgentContext<'_>, summary: &EvaluationSummary) {
    let count = |label: Label| summary.evaluated.iter().filter(|e| e.label == label).count();
    let outline = RunOutline {
        agent: EVALUATOR_AGENT,
        status: summary.status,
        items_processed: summary.evaluated.len() as i64,
        new_items: summary.evaluated.len() as i64,
        detail: format!("{} tenders evaluated", summary.evaluated.len()),
        errors: &summary.errors,
        metadata: serde_json::json!({
            "profile_version": summary.profile_version,
            "priority": count(Label::Priority),
            "consider": count(Label::Consider),
            "partner_only": count(Label::PartnerOnly),
            "ignore": count(Label::Ignore),
        }),
        duration_ms: summary.duration_ms,
    };
    write_run_log(cx, outline).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assist::{AssistSuite, ScriptedBackend};
    use crate::config::SyncConfig;
    use chrono::{Duration, NaiveDate, TimeZone, Utc};
    use std::sync::Arc;
    use tender_core::{BudgetSource, EvaluationStatus, Jurisdiction, TenderDraft, TenderStatus};
    use tender_storage::{MemoryStore, StaticFetcher, TenderStore};

    fn now() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 4, 0, 0).single().unwrap()
    }

    fn draft(reference: &str, title: &str, tags: &[&str], closing: Option<NaiveDate>) -> TenderDraft {
        TenderDraft {
            source_id: "hk-emsd".into(),
            raw_capture_id: None,
            jurisdiction: Jurisdiction::Hk,
            owner_type: "government".into(),
            source_url: None,
            mapping_version: "v1.0".into(),
            tender_ref: reference.into(),
            reference_is_synthetic: false,
            title: title.into(),
            description_snippet: None,
            agency: Some("Drainage Services Department".into()),
            category_tags: tags.iter().map(|t| t.to_string()).collect(),
            raw_category: None,
            publish_date: Some(now().date_naive()),
            publish_date_estimated: false,
            closing_date: closing,
            status: TenderStatus::Open,
            budget_min: None,
            budget_max: None,
            currency: Some("HKD".into()),
            budget_source: BudgetSource::Unknown,
        }
    }

    #[tokio::test]
    async fn pending_tenders_are_scored_and_labelled() {
        let store = MemoryStore::new();
        let today = now().date_naive();
        let id = store
            .upsert_tender(
                &draft("DSD/T/01/2026", "Desilting works", &["construction_works"], Some(today + Duration::days(45))),
                now(),
            )
            .await
            .unwrap()
            .id();
        let fetcher = StaticFetcher::new();
        let config = SyncConfig::default();
        let assist = AssistSuite::deterministic();
        let profile = CapabilityProfile::default();

        let cx = AgentContext::new(&store, &fetcher, &assist, &config, now());
        let summary = run_evaluation(cx, &profile).await;
        assert_eq!(summary.status, RunStatus::Success);
        assert_eq!(summary.profile_version, profile.version);
        assert_eq!(summary.evaluated.len(), 1);
        assert_eq!(summary.evaluated[0].label, Label::PartnerOnly);

        let tender = store.get_tender(id).await.unwrap().unwrap();
        assert_eq!(tender.evaluation_status, EvaluationStatus::Scored);
        assert_eq!(tender.label, Label::PartnerOnly);

        let again = run_evaluation(cx, &profile).await;
        assert!(again.evaluated.is_empty(), "scored tenders are not pending");
    }

    #[tokio::test]
    async fn repeated_scoring_keeps_one_latest_evaluation() {
        let store = MemoryStore::new();
        let id = store
            .upsert_tender(&draft("EMSD(T)23/2025", "Digital campaign", &["IT_digital"], None), now())
            .await
            .unwrap()
            .id();
        let tender = store.get_tender(id).await.unwrap().unwrap();
        let fetcher = StaticFetcher::new();
        let config = SyncConfig::default();
        let backend = Arc::new(ScriptedBackend::new().reply("Good digital fit.").fail("timeout"));
        let assist = AssistSuite::with_backend(
            backend,
            std::time::Duration::from_secs(1),
            std::time::Duration::from_secs(1),
        );
        let profile = CapabilityProfile::default();
        let known = KnownAgencies::default();

        let cx = AgentContext::new(&store, &fetcher, &assist, &config, now());
        for _ in 0..3 {
            evaluate_tender(cx, &profile, &known, &tender).await.unwrap();
        }
        let evaluations = store.evaluations_for(id).await.unwrap();
        assert_eq!(evaluations.len(), 3);
        assert_eq!(evaluations.iter().filter(|e| e.is_latest).count(), 1);

        let models: Vec<_> = evaluations
            .iter()
            .map(|e| e.body.model_used.clone())
            .collect();
        assert!(models.contains(&Some("scripted".to_string())));
        assert!(models.contains(&None));
        assert_eq!(evaluations[0].body.profile_snapshot["version"], profile.version.as_str());
    }

    #[tokio::test]
    async fn tracked_agencies_feed_familiarity() {
        let store = MemoryStore::new();
        let first = store
            .upsert_tender(&draft("DSD/1/2026", "Drainage open day event", &["events_experiential"], None), now())
            .await
            .unwrap()
            .id();
        store
            .insert_decision(&tender_core::NewDecision {
                tender_id: first,
                decision: tender_core::DecisionKind::Track,
                notes: None,
                assignee: None,
                pipeline_stage: None,
                decided_at: now(),
            })
            .await
            .unwrap();
        let fetcher = StaticFetcher::new();
        let config = SyncConfig::default();
        let assist = AssistSuite::deterministic();

        let cx = AgentContext::new(&store, &fetcher, &assist, &config, now());
        run_evaluation(cx, &CapabilityProfile::default()).await;
        let latest = store.evaluations_for(first).await.unwrap();
        assert_eq!(latest[0].body.signals.capability.agency_familiarity, 1.0);
        assert_eq!(latest[0].body.signals.business.strategic_beachhead, 0.4);
    }
}
