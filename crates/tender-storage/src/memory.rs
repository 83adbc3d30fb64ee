//! In-memory [`TenderStore`] enforcing the same uniqueness rules as the SQL schema.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use tender_core::{
    AgentRunLog, Decision, DecisionKind, Evaluation, EvaluationStatus, HealthStatus, Label,
    NewDecision, NewEvaluation, NewRawCapture, NewRunLog, NewSource, RawCapture, Source,
    SourceHealth, SourceKind, SourceStatus, Tender, TenderDraft, TenderStatus,
};
use tender_core::normalize::derive_status;
use tokio::sync::Mutex;

use crate::store::{
    DigestCandidate, DigestStats, InsertOutcome, SourceQuery, StoreError, TenderPage,
    TenderQuery, TenderStore, UpsertOutcome,
};

#[derive(Debug, Default)]
struct MemoryState {
    sources: BTreeMap<String, Source>,
    captures: Vec<RawCapture>,
    tenders: BTreeMap<i64, Tender>,
    evaluations: Vec<Evaluation>,
    decisions: Vec<Decision>,
    run_logs: Vec<AgentRunLog>,
    next_id: i64,
}

impl MemoryState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn tender_mut(&mut self, tender_id: i64) -> Result<&mut Tender, StoreError> {
        self.tenders
            .get_mut(&tender_id)
            .ok_or_else(|| StoreError::NotFound {
                entity: "tender",
                id: tender_id.to_string(),
            })
    }

    fn sorted_sources(&self, filter: impl Fn(&Source) -> bool) -> Vec<Source> {
        let mut out: Vec<Source> = self.sources.values().filter(|s| filter(*s)).cloned().collect();
        out.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| a.source_id.cmp(&b.source_id))
        });
        out
    }

    fn latest_evaluation(&self, tender_id: i64) -> Option<Evaluation> {
        self.evaluations
            .iter()
            .find(|e| e.body.tender_id == tender_id && e.is_latest)
            .cloned()
    }
}

/// The stored status goes stale once the closing day passes without a re-sighting.
fn open_on(tender: &Tender, today: NaiveDate) -> bool {
    derive_status(tender.closing_date, today) == TenderStatus::Open
}

/// Store used by tests and by the CLI when no database is configured.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every capture held, in insertion order.
    pub async fn captures(&self) -> Vec<RawCapture> {
        self.state.lock().await.captures.clone()
    }

    pub async fn decisions(&self) -> Vec<Decision> {
        self.state.lock().await.decisions.clone()
    }

    /// Backdates a tender's first sighting; used to stage digest scenarios.
    pub async fn set_first_seen(&self, tender_id: i64, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.tender_mut(tender_id)?.first_seen_at = at;
        Ok(())
    }
}

#[async_trait]
impl TenderStore for MemoryStore {
    async fn count_sources(&self) -> Result<i64, StoreError> {
        Ok(self.state.lock().await.sources.len() as i64)
    }

    async fn insert_source(
        &self,
        source: &NewSource,
        created_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        let feed_taken = source.feed_url.as_ref().is_some_and(|url| {
            state
                .sources
                .values()
                .any(|s| s.feed_url.as_ref() == Some(url))
        });
        if feed_taken || state.sources.contains_key(&source.source_id) {
            return Ok(false);
        }
        state.sources.insert(
            source.source_id.clone(),
            source.clone().into_source(created_at),
        );
        Ok(true)
    }

    async fn list_sources(&self, query: &SourceQuery) -> Result<Vec<Source>, StoreError> {
        Ok(self.state.lock().await.sorted_sources(|s| query.matches(s)))
    }

    async fn ingestible_sources(&self) -> Result<Vec<Source>, StoreError> {
        Ok(self.state.lock().await.sorted_sources(|s| {
            s.status.is_ingestible() && (s.kind.is_feed() || s.kind == SourceKind::HtmlList)
        }))
    }

    async fn hub_sources(&self) -> Result<Vec<Source>, StoreError> {
        Ok(self.state.lock().await.sorted_sources(|s| {
            s.kind == SourceKind::HtmlHub && s.status != SourceStatus::Disabled
        }))
    }

    async fn source_url_known(&self, url: &str) -> Result<bool, StoreError> {
        let state = self.state.lock().await;
        Ok(state.sources.values().any(|s| {
            [&s.feed_url, &s.base_url, &s.hub_url]
                .iter()
                .any(|candidate| candidate.as_deref() == Some(url))
        }))
    }

    async fn record_source_health(
        &self,
        source_id: &str,
        health: &SourceHealth,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let source = state
            .sources
            .get_mut(source_id)
            .ok_or_else(|| StoreError::NotFound {
                entity: "source",
                id: source_id.to_string(),
            })?;
        source.last_checked_at = Some(health.checked_at);
        source.last_status = Some(health.status);
        source.last_status_detail = Some(health.detail.clone());
        Ok(())
    }

    async fn known_guids(&self, source_id: &str) -> Result<HashSet<String>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .captures
            .iter()
            .filter(|c| c.source_id == source_id && c.normalized)
            .map(|c| c.guid.clone())
            .collect())
    }

    async fn pending_captures(&self, source_id: &str) -> Result<Vec<RawCapture>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .captures
            .iter()
            .filter(|c| c.source_id == source_id && !c.normalized)
            .cloned()
            .collect())
    }

    async fn insert_raw_capture(
        &self,
        capture: &NewRawCapture,
    ) -> Result<InsertOutcome, StoreError> {
        let mut state = self.state.lock().await;
        if !state.sources.contains_key(&capture.source_id) {
            return Err(StoreError::Constraint(format!(
                "capture references unknown source {}",
                capture.source_id
            )));
        }
        if state
            .captures
            .iter()
            .any(|c| c.source_id == capture.source_id && c.guid == capture.guid)
        {
            return Ok(InsertOutcome::Duplicate);
        }
        let id = state.next_id();
        state.captures.push(RawCapture {
            id,
            source_id: capture.source_id.clone(),
            format: capture.format,
            payload: capture.payload.clone(),
            pre: capture.pre.clone(),
            item_url: capture.item_url.clone(),
            guid: capture.guid.clone(),
            captured_at: capture.captured_at,
            normalized: false,
            tender_id: None,
        });
        Ok(InsertOutcome::Inserted(id))
    }

    async fn mark_capture_normalized(
        &self,
        capture_id: i64,
        tender_id: Option<i64>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let capture = state
            .captures
            .iter_mut()
            .find(|c| c.id == capture_id)
            .ok_or_else(|| StoreError::NotFound {
                entity: "raw capture",
                id: capture_id.to_string(),
            })?;
        capture.normalized = true;
        capture.tender_id = tender_id;
        Ok(())
    }

    async fn upsert_tender(
        &self,
        draft: &TenderDraft,
        seen_at: DateTime<Utc>,
    ) -> Result<UpsertOutcome, StoreError> {
        let mut state = self.state.lock().await;
        let existing = state.tenders.values_mut().find(|t| {
            t.is_canonical
                && t.tender_ref == draft.tender_ref
                && t.jurisdiction == draft.jurisdiction
        });

        if let Some(tender) = existing {
            tender.title = draft.title.clone();
            tender.closing_date = draft.closing_date;
            tender.status = draft.status;
            tender.category_tags = draft.category_tags.clone();
            if draft.description_snippet.is_some() {
                tender.description_snippet = draft.description_snippet.clone();
            }
            if draft.agency.is_some() {
                tender.agency = draft.agency.clone();
            }
            if draft.source_url.is_some() {
                tender.source_url = draft.source_url.clone();
            }
            tender.last_seen_at = tender.last_seen_at.max(seen_at);
            tender.updated_at = seen_at;
            return Ok(UpsertOutcome::Refreshed(tender.id));
        }

        let id = state.next_id();
        state
            .tenders
            .insert(id, Tender::from_draft(id, draft.clone(), seen_at));
        Ok(UpsertOutcome::Inserted(id))
    }

    async fn get_tender(&self, tender_id: i64) -> Result<Option<Tender>, StoreError> {
        Ok(self.state.lock().await.tenders.get(&tender_id).cloned())
    }

    async fn query_tenders(&self, query: &TenderQuery) -> Result<TenderPage, StoreError> {
        let state = self.state.lock().await;
        let mut matched: Vec<&Tender> = state.tenders.values().filter(|t| query.matches(t)).collect();
        matched.sort_by_key(|t| {
            (
                t.publish_date.is_none(),
                Reverse(t.publish_date),
                Reverse(t.first_seen_at),
                Reverse(t.id),
            )
        });
        let total = matched.len() as i64;
        let tenders = matched
            .into_iter()
            .skip(query.offset.max(0) as usize)
            .take(query.limit.max(0) as usize)
            .cloned()
            .collect();
        Ok(TenderPage { tenders, total })
    }

    async fn pending_tenders(&self, limit: i64) -> Result<Vec<Tender>, StoreError> {
        let state = self.state.lock().await;
        let mut pending: Vec<&Tender> = state
            .tenders
            .values()
            .filter(|t| t.is_canonical && t.evaluation_status == EvaluationStatus::Pending)
            .collect();
        pending.sort_by_key(|t| (Reverse(t.first_seen_at), Reverse(t.id)));
        Ok(pending
            .into_iter()
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn tracked_agencies(&self) -> Result<Vec<String>, StoreError> {
        let state = self.state.lock().await;
        let mut agencies: Vec<String> = state
            .decisions
            .iter()
            .filter(|d| d.body.decision == DecisionKind::Track)
            .filter_map(|d| state.tenders.get(&d.body.tender_id))
            .filter_map(|t| t.agency.clone())
            .collect();
        agencies.sort();
        agencies.dedup();
        Ok(agencies)
    }

    async fn record_evaluation(&self, evaluation: &NewEvaluation) -> Result<i64, StoreError> {
        let mut state = self.state.lock().await;
        let tender = state.tender_mut(evaluation.tender_id)?;
        tender.label = evaluation.label;
        tender.evaluation_status = EvaluationStatus::Scored;
        tender.updated_at = evaluation.evaluated_at;

        for previous in state
            .evaluations
            .iter_mut()
            .filter(|e| e.body.tender_id == evaluation.tender_id)
        {
            previous.is_latest = false;
        }
        let id = state.next_id();
        state.evaluations.push(Evaluation {
            id,
            is_latest: true,
            body: evaluation.clone(),
        });
        Ok(id)
    }

    async fn evaluations_for(&self, tender_id: i64) -> Result<Vec<Evaluation>, StoreError> {
        let state = self.state.lock().await;
        let mut out: Vec<Evaluation> = state
            .evaluations
            .iter()
            .filter(|e| e.body.tender_id == tender_id)
            .cloned()
            .collect();
        out.sort_by_key(|e| Reverse(e.id));
        Ok(out)
    }

    async fn insert_decision(&self, decision: &NewDecision) -> Result<i64, StoreError> {
        let mut state = self.state.lock().await;
        state.tender_mut(decision.tender_id)?;
        let id = state.next_id();
        state.decisions.push(Decision {
            id,
            body: decision.clone(),
        });
        Ok(id)
    }

    async fn set_tender_label(&self, tender_id: i64, label: Label) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let tender = state.tender_mut(tender_id)?;
        tender.label = label;
        tender.updated_at = Utc::now();
        Ok(())
    }

    async fn digest_stats(&self, today: NaiveDate) -> Result<DigestStats, StoreError> {
        let state = self.state.lock().await;
        let horizon = today + Duration::days(7);
        let open = |t: &&Tender| open_on(t, today);
        let active = |s: &&Source| s.status == SourceStatus::Active;

        Ok(DigestStats {
            new_today: state
                .tenders
                .values()
                .filter(|t| t.first_seen_at.date_naive() == today)
                .count() as i64,
            open_priority: state
                .tenders
                .values()
                .filter(open)
                .filter(|t| t.label == Label::Priority)
                .count() as i64,
            closing_soon: state
                .tenders
                .values()
                .filter(open)
                .filter(|t| t.closing_date.is_some_and(|d| d >= today && d <= horizon))
                .count() as i64,
            sources_ok: state
                .sources
                .values()
                .filter(active)
                .filter(|s| s.last_status == Some(HealthStatus::Ok))
                .count() as i64,
            sources_active: state.sources.values().filter(active).count() as i64,
        })
    }

    async fn digest_candidates(
        &self,
        today: NaiveDate,
        limit: i64,
    ) -> Result<Vec<DigestCandidate>, StoreError> {
        let state = self.state.lock().await;
        let mut open: Vec<&Tender> = state
            .tenders
            .values()
            .filter(|t| open_on(t, today) && t.label != Label::Ignore)
            .collect();
        open.sort_by_key(|t| {
            (
                t.label.digest_rank(),
                t.closing_date.is_none(),
                t.closing_date,
                t.id,
            )
        });
        Ok(open
            .into_iter()
            .take(limit.max(0) as usize)
            .map(|t| DigestCandidate {
                tender: t.clone(),
                source_name: state.sources.get(&t.source_id).map(|s| s.name.clone()),
                latest: state.latest_evaluation(t.id),
            })
            .collect())
    }

    async fn insert_run_log(&self, log: &NewRunLog) -> Result<i64, StoreError> {
        let mut state = self.state.lock().await;
        let id = state.next_id();
        state.run_logs.push(AgentRunLog {
            id,
            body: log.clone(),
        });
        Ok(id)
    }

    async fn recent_run_logs(&self, limit: i64) -> Result<Vec<AgentRunLog>, StoreError> {
        let state = self.state.lock().await;
        let mut logs = state.run_logs.clone();
        logs.sort_by_key(|l| (Reverse(l.body.started_at), Reverse(l.id)));
        logs.truncate(limit.max(0) as usize);
        Ok(logs)
    }

    async fn last_run(&self, agent_name: &str) -> Result<Option<AgentRunLog>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .run_logs
            .iter()
            .filter(|l| l.body.agent_name == agent_name)
            .max_by_key(|l| (l.body.started_at, l.id))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::TimeZone;
    use tender_core::{
        BudgetSource, Jurisdiction, PreExtracted, RawFormat, ScoringWeights, SignalBreakdown,
    };

    use super::*;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, day, 9, 0, 0).single().unwrap()
    }

    fn new_source(id: &str, feed: &str) -> NewSource {
        NewSource {
            source_id: id.into(),
            name: format!("{id} feed"),
            organisation: None,
            jurisdiction: Jurisdiction::Hk,
            owner_type: "government".into(),
            kind: SourceKind::RssXml,
            access: "public".into(),
            priority: 1,
            status: SourceStatus::Active,
            feed_url: Some(feed.into()),
            base_url: None,
            hub_url: None,
            field_map: BTreeMap::new(),
            category_tags_default: vec![],
            parsing_notes: None,
            discovered_from: None,
            discovered_at: None,
        }
    }

    fn draft(reference: &str, title: &str) -> TenderDraft {
        TenderDraft {
            source_id: "emsd".into(),
            raw_capture_id: None,
            jurisdiction: Jurisdiction::Hk,
            owner_type: "government".into(),
            source_url: None,
            mapping_version: "v1.0".into(),
            tender_ref: reference.into(),
            reference_is_synthetic: false,
            title: title.into(),
            description_snippet: None,
            agency: Some("EMSD".into()),
            category_tags: vec!["other".into()],
            raw_category: None,
            publish_date: None,
            publish_date_estimated: true,
            closing_date: None,
            status: TenderStatus::UnknownClosing,
            budget_min: None,
            budget_max: None,
            currency: Some("HKD".into()),
            budget_source: BudgetSource::Unknown,
        }
    }

    fn evaluation(tender_id: i64, label: Label) -> NewEvaluation {
        NewEvaluation {
            tender_id,
            tender_ref: "EMSD(T)23/2025".into(),
            capability_fit: 0.5,
            business_potential: 0.5,
            overall: 0.5,
            label,
            rationale: "test".into(),
            signals: SignalBreakdown::default(),
            weights: ScoringWeights::default(),
            profile_version: "test".into(),
            profile_snapshot: serde_json::Value::Null,
            model_used: None,
            evaluated_at: at(2),
        }
    }

    #[tokio::test]
    async fn sources_dedup_on_id_and_feed_url() {
        let store = MemoryStore::new();
        assert!(store
            .insert_source(&new_source("emsd", "https://a/feed.xml"), at(1))
            .await
            .unwrap());
        assert!(!store
            .insert_source(&new_source("emsd-2", "https://a/feed.xml"), at(1))
            .await
            .unwrap());
        assert!(!store
            .insert_source(&new_source("emsd", "https://b/feed.xml"), at(1))
            .await
            .unwrap());
        assert!(store.source_url_known("https://a/feed.xml").await.unwrap());
        assert_eq!(store.count_sources().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn captures_are_unique_per_source_and_guid() {
        let store = MemoryStore::new();
        store
            .insert_source(&new_source("emsd", "https://a/feed.xml"), at(1))
            .await
            .unwrap();
        let capture = NewRawCapture {
            source_id: "emsd".into(),
            format: RawFormat::RssXml,
            payload: "<item/>".into(),
            pre: PreExtracted::default(),
            item_url: None,
            guid: "g1".into(),
            captured_at: at(1),
        };
        let first = store.insert_raw_capture(&capture).await.unwrap();
        let second = store.insert_raw_capture(&capture).await.unwrap();
        assert!(first.inserted_id().is_some());
        assert_eq!(second, InsertOutcome::Duplicate);

        let orphan = NewRawCapture {
            source_id: "nope".into(),
            ..capture
        };
        assert!(matches!(
            store.insert_raw_capture(&orphan).await,
            Err(StoreError::Constraint(_))
        ));
    }

    #[tokio::test]
    async fn upsert_refreshes_without_regressing_first_seen() {
        let store = MemoryStore::new();
        let first = store
            .upsert_tender(&draft("EMSD(T)23/2025", "Lift maintenance"), at(1))
            .await
            .unwrap();
        let id = first.id();
        store.record_evaluation(&evaluation(id, Label::Consider)).await.unwrap();

        let second = store
            .upsert_tender(&draft("EMSD(T)23/2025", "Lift maintenance (amended)"), at(3))
            .await
            .unwrap();
        assert_eq!(second, UpsertOutcome::Refreshed(id));

        let tender = store.get_tender(id).await.unwrap().unwrap();
        assert_eq!(tender.title, "Lift maintenance (amended)");
        assert_eq!(tender.first_seen_at, at(1));
        assert_eq!(tender.last_seen_at, at(3));
        assert_eq!(tender.label, Label::Consider);
        assert_eq!(tender.evaluation_status, EvaluationStatus::Scored);
    }

    #[tokio::test]
    async fn exactly_one_latest_evaluation() {
        let store = MemoryStore::new();
        let id = store
            .upsert_tender(&draft("REF-1", "Event"), at(1))
            .await
            .unwrap()
            .id();
        for label in [Label::Ignore, Label::Consider, Label::Priority] {
            store.record_evaluation(&evaluation(id, label)).await.unwrap();
        }
        let evaluations = store.evaluations_for(id).await.unwrap();
        assert_eq!(evaluations.len(), 3);
        assert_eq!(evaluations.iter().filter(|e| e.is_latest).count(), 1);
        assert_eq!(evaluations[0].body.label, Label::Priority);
        assert!(evaluations[0].is_latest);
    }

    #[tokio::test]
    async fn query_filters_and_paginates() {
        let store = MemoryStore::new();
        for n in 0..5 {
            let mut d = draft(&format!("REF-{n}"), &format!("Exhibition {n}"));
            d.publish_date = NaiveDate::from_ymd_opt(2026, 2, n + 1);
            store.upsert_tender(&d, at(1)).await.unwrap();
        }
        let page = store
            .query_tenders(&TenderQuery {
                search: Some("exhibition".into()),
                limit: 2,
                offset: 1,
                ..TenderQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(page.tenders.len(), 2);
        assert_eq!(page.tenders[0].tender_ref, "REF-3");

        let none = store
            .query_tenders(&TenderQuery {
                jurisdiction: Some(Jurisdiction::Sg),
                ..TenderQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(none.total, 0);
    }

    #[tokio::test]
    async fn unfinished_captures_stay_pending() {
        let store = MemoryStore::new();
        store
            .insert_source(&new_source("emsd", "https://a/feed.xml"), at(1))
            .await
            .unwrap();
        let mut ids = Vec::new();
        for guid in ["g1", "g2"] {
            let capture = NewRawCapture {
                source_id: "emsd".into(),
                format: RawFormat::RssXml,
                payload: "<item/>".into(),
                pre: PreExtracted::default(),
                item_url: None,
                guid: guid.into(),
                captured_at: at(1),
            };
            ids.extend(store.insert_raw_capture(&capture).await.unwrap().inserted_id());
        }
        store.mark_capture_normalized(ids[0], None).await.unwrap();

        let known = store.known_guids("emsd").await.unwrap();
        assert!(known.contains("g1"));
        assert!(!known.contains("g2"));
        let pending = store.pending_captures("emsd").await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].guid, "g2");
        assert!(store.pending_captures("other").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn digest_rederives_openness_from_closing_date() {
        let store = MemoryStore::new();
        let today = at(10).date_naive();
        let mut stale = draft("STALE", "Closed last week");
        stale.closing_date = Some(today - Duration::days(3));
        stale.status = TenderStatus::Open;
        let mut live = draft("LIVE", "Closes today");
        live.closing_date = Some(today);
        live.status = TenderStatus::Open;
        let stale_id = store.upsert_tender(&stale, at(1)).await.unwrap().id();
        let live_id = store.upsert_tender(&live, at(1)).await.unwrap().id();
        store.upsert_tender(&draft("NODATE", "No closing date"), at(1)).await.unwrap();
        store.set_tender_label(stale_id, Label::Priority).await.unwrap();
        store.set_tender_label(live_id, Label::Priority).await.unwrap();

        let candidates = store.digest_candidates(today, 20).await.unwrap();
        let ids: Vec<i64> = candidates.iter().map(|c| c.tender.id).collect();
        assert_eq!(ids, vec![live_id]);

        let stats = store.digest_stats(today).await.unwrap();
        assert_eq!(stats.open_priority, 1);
        assert_eq!(stats.closing_soon, 1);
    }
}
