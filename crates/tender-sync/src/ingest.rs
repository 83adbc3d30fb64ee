//! Ingestion orchestrator: fetch, parse, capture, normalize and upsert every
//! ingestible source in priority order.

use std::collections::HashSet;
use std::time::Instant;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use tender_adapters::{adapter_for_source, AdapterError, Harvest, SourceAdapter};
use tender_core::normalize::normalize_capture;
use tender_core::{
    HealthStatus, NewRawCapture, RawCapture, RunStatus, Source, SourceHealth,
};
use tender_storage::{InsertOutcome, RetryDisposition, StoreError};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{emit, write_run_log, AgentContext, ProgressEvent, RunError, RunOutline};

pub const INGESTOR_AGENT: &str = "RSSXMLIngestorAgent";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestSummary {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub sources_processed: usize,
    pub sources_skipped: usize,
    pub total_raw_captures: usize,
    pub new_raw_captures: usize,
    pub tenders_inserted: usize,
    pub tenders_refreshed: usize,
    pub warnings: Vec<RunError>,
    pub errors: Vec<RunError>,
    pub duration_ms: i64,
}

impl IngestSummary {
    pub fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            status: RunStatus::Success,
            sources_processed: 0,
            sources_skipped: 0,
            total_raw_captures: 0,
            new_raw_captures: 0,
            tenders_inserted: 0,
            tenders_refreshed: 0,
            warnings: Vec::new(),
            errors: Vec::new(),
            duration_ms: 0,
        }
    }

    /// Summary for a request refused because another ingestion is running.
    pub fn skipped(run_id: Uuid, reason: &str) -> Self {
        Self {
            status: RunStatus::Skipped,
            errors: vec![RunError::new("run", reason)],
            ..Self::new(run_id)
        }
    }
}

#[derive(Debug, Default)]
struct SourceOutcome {
    items: usize,
    new_items: usize,
    inserted: usize,
    refreshed: usize,
    item_errors: Vec<RunError>,
}

#[derive(Debug, thiserror::Error)]
enum SourceFailure {
    #[error(transparent)]
    Adapter(#[from] AdapterError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("{0}")]
    Layout(String),
}

impl SourceFailure {
    /// Transient failures are left for the next scheduled run; nothing retries inline.
    fn transient(&self) -> bool {
        matches!(
            self,
            SourceFailure::Adapter(AdapterError::Fetch(fetch))
                if fetch.disposition() == RetryDisposition::NextRun
        )
    }
}

pub async fn run_ingestion(cx: AgentContext<'_>, skip_recent: Duration) -> IngestSummary {
    let started = Instant::now();
    let mut summary = IngestSummary::new(cx.run_id);

    let sources = match cx.store.ingestible_sources().await {
        Ok(sources) => sources,
        Err(err) => {
            warn!(run_id = %cx.run_id, error = %err, "could not load ingestible sources");
            summary.status = RunStatus::Failed;
            summary.errors.push(RunError::new("load_sources", err));
            summary.duration_ms = started.elapsed().as_millis() as i64;
            record(cx, &summary).await;
            return summary;
        }
    };

    info!(run_id = %cx.run_id, sources = sources.len(), "ingestion run starting");
    emit(
        cx.progress,
        ProgressEvent::Init {
            run_id: cx.run_id,
            agent: INGESTOR_AGENT.to_string(),
            total: sources.len(),
        },
    );

    let total = sources.len();
    for (index, source) in sources.iter().enumerate() {
        if source.checked_within(cx.now, skip_recent) {
            debug!(source_id = %source.source_id, "checked recently; skipping");
            summary.sources_skipped += 1;
            continue;
        }
        let Some(adapter) = adapter_for_source(source) else {
            debug!(source_id = %source.source_id, kind = %source.kind, "no adapter for source kind");
            summary.sources_skipped += 1;
            continue;
        };

        emit(
            cx.progress,
            ProgressEvent::SourceStart {
                source_id: source.source_id.clone(),
                index,
                total,
            },
        );

        let (result, warnings) = ingest_source(cx, adapter.as_ref(), source).await;
        summary.sources_processed += 1;
        summary.warnings.extend(
            warnings
                .iter()
                .map(|w| RunError::new(source.source_id.as_str(), w)),
        );

        let health = match result {
            Ok(outcome) => {
                info!(
                    source_id = %source.source_id,
                    items = outcome.items,
                    new_items = outcome.new_items,
                    inserted = outcome.inserted,
                    refreshed = outcome.refreshed,
                    "source ingested"
                );
                summary.total_raw_captures += outcome.items;
                summary.new_raw_captures += outcome.new_items;
                summary.tenders_inserted += outcome.inserted;
                summary.tenders_refreshed += outcome.refreshed;
                emit(
                    cx.progress,
                    ProgressEvent::SourceDone {
                        source_id: source.source_id.clone(),
                        items: outcome.items,
                        new_items: outcome.new_items,
                        tenders: outcome.inserted + outcome.refreshed,
                    },
                );
                let mut detail = format!(
                    "{} new items, {} tenders",
                    outcome.new_items,
                    outcome.inserted + outcome.refreshed
                );
                if !warnings.is_empty() {
                    detail.push_str(&format!("; {} row warnings", warnings.len()));
                }
                summary.errors.extend(outcome.item_errors);
                SourceHealth {
                    status: HealthStatus::Ok,
                    detail,
                    checked_at: cx.now,
                }
            }
            Err(err) => {
                warn!(
                    source_id = %source.source_id,
                    transient = err.transient(),
                    error = %err,
                    "source failed"
                );
                summary
                    .errors
                    .push(RunError::new(source.source_id.as_str(), &err));
                emit(
                    cx.progress,
                    ProgressEvent::SourceError {
                        source_id: source.source_id.clone(),
                        error: err.to_string(),
                    },
                );
                SourceHealth {
                    status: HealthStatus::Error,
                    detail: truncate(&err.to_string(), 500),
                    checked_at: cx.now,
                }
            }
        };

        if let Err(err) = cx
            .store
            .record_source_health(&source.source_id, &health)
            .await
        {
            warn!(source_id = %source.source_id, error = %err, "could not record source health");
            summary.errors.push(RunError::new(
                format!("{}/health", source.source_id),
                err,
            ));
        }
    }

    if !summary.errors.is_empty() {
        summary.status = RunStatus::Partial;
    }
    summary.duration_ms = started.elapsed().as_millis() as i64;
    emit(
        cx.progress,
        ProgressEvent::Done {
            processed: summary.sources_processed,
            skipped: summary.sources_skipped,
            new_items: summary.new_raw_captures,
            errors: summary.errors.len(),
            duration_ms: summary.duration_ms,
        },
    );
    info!(
        run_id = %cx.run_id,
        status = %summary.status,
        processed = summary.sources_processed,
        skipped = summary.sources_skipped,
        new_items = summary.new_raw_captures,
        inserted = summary.tenders_inserted,
        errors = summary.errors.len(),
        "ingestion run finished"
    );
    record(cx, &summary).await;
    summary
}

/// Harvest warnings are returned even when the source fails.
async fn ingest_source(
    cx: AgentContext<'_>,
    adapter: &dyn SourceAdapter,
    source: &Source,
) -> (Result<SourceOutcome, SourceFailure>, Vec<String>) {
    let actx = cx.config.adapter_context(cx.run_id);
    let Harvest { items, warnings } = match adapter.harvest(cx.fetcher, &actx, source).await {
        Ok(harvest) => harvest,
        Err(err) => return (Err(err.into()), Vec::new()),
    };
    if items.is_empty() && !warnings.is_empty() {
        let reason = warnings.join("; ");
        return (Err(SourceFailure::Layout(reason)), warnings);
    }
    (store_items(cx, source, items).await, warnings)
}

async fn store_items(
    cx: AgentContext<'_>,
    source: &Source,
    items: Vec<tender_core::RawItem>,
) -> Result<SourceOutcome, SourceFailure> {
    let mut outcome = SourceOutcome {
        items: items.len(),
        ..SourceOutcome::default()
    };
    let seen = cx.store.known_guids(&source.source_id).await?;
    let mut batch = HashSet::new();

    for pending in cx.store.pending_captures(&source.source_id).await? {
        let scope = format!("{}/{}", source.source_id, pending.guid);
        batch.insert(pending.guid.clone());
        if let Err(err) = normalize_and_upsert(cx, source, &pending, &mut outcome).await {
            warn!(scope = %scope, error = %err, "could not normalize pending capture");
            outcome.item_errors.push(RunError::new(scope, err));
        }
    }

    for item in items {
        if seen.contains(&item.guid) || !batch.insert(item.guid.clone()) {
            continue;
        }
        let capture = NewRawCapture::from_item(source, item, cx.now);
        let scope = format!("{}/{}", source.source_id, capture.guid);
        match cx.store.insert_raw_capture(&capture).await {
            Ok(InsertOutcome::Inserted(capture_id)) => {
                outcome.new_items += 1;
                let stored = stored_capture(capture_id, capture);
                if let Err(err) = normalize_and_upsert(cx, source, &stored, &mut outcome).await {
                    warn!(scope = %scope, error = %err, "could not normalize capture");
                    outcome.item_errors.push(RunError::new(scope, err));
                }
            }
            Ok(InsertOutcome::Duplicate) => {
                debug!(scope = %scope, "capture already stored");
            }
            Err(err) => {
                warn!(scope = %scope, error = %err, "could not store capture");
                outcome.item_errors.push(RunError::new(scope, err));
            }
        }
    }
    Ok(outcome)
}

fn stored_capture(id: i64, capture: NewRawCapture) -> RawCapture {
    RawCapture {
        id,
        source_id: capture.source_id,
        format: capture.format,
        payload: capture.payload,
        pre: capture.pre,
        item_url: capture.item_url,
        guid: capture.guid,
        captured_at: capture.captured_at,
        normalized: false,
        tender_id: None,
    }
}

/// Leaves the capture unmarked on any store failure so the next run retries it.
async fn normalize_and_upsert(
    cx: AgentContext<'_>,
    source: &Source,
    capture: &RawCapture,
    outcome: &mut SourceOutcome,
) -> Result<(), StoreError> {
    let draft = match normalize_capture(capture, source, cx.now) {
        Ok(draft) => draft,
        Err(reason) => {
            debug!(capture_id = capture.id, reason = %reason, "capture not normalized");
            return cx.store.mark_capture_normalized(capture.id, None).await;
        }
    };
    let upsert = cx.store.upsert_tender(&draft, cx.now).await?;
    if upsert.is_insert() {
        outcome.inserted += 1;
    } else {
        outcome.refreshed += 1;
    }
    cx.store
        .mark_capture_normalized(capture.id, Some(upsert.id()))
        .await
}

fn truncate(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

async fn record(cx: AgentContext<'_>, summary: &IngestSummary) {
    let outline = RunOutline {
        agent: INGESTOR_AGENT,
        status: summary.status,
        items_processed: summary.sources_processed as i64,
        new_items: summary.new_raw_captures as i64,
        detail: format!(
            "{} sources, {} tenders inserted",
            summary.sources_processed, summary.tenders_inserted
        ),
        errors: &summary.errors,
        metadata: serde_json::json!({
            "sources_skipped": summary.sources_skipped,
            "total_raw_captures": summary.total_raw_captures,
            "tenders_refreshed": summary.tenders_refreshed,
            "warnings": summary.warnings.len(),
        }),
        duration_ms: summary.duration_ms,
    };
    write_run_log(cx, outline).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assist::AssistSuite;
    use crate::config::SyncConfig;
    use async_trait::async_trait;
    use chrono::{DateTime, NaiveDate, TimeZone, Utc};
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tender_core::{
        AgentRunLog, Evaluation, Jurisdiction, Label, NewDecision, NewEvaluation, NewRunLog,
        NewSource, SourceKind, SourceStatus, Tender, TenderDraft,
    };
    use tender_storage::{
        DigestCandidate, DigestStats, MemoryStore, SourceQuery, StaticFetcher, TenderPage,
        TenderQuery, TenderStore, UpsertOutcome,
    };
    use tokio::sync::mpsc;

    const FEED_URL: &str = "https://www.emsd.gov.hk/tenders.xml";
    const FEED: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>EMSD</title>
<item><title>Event management services EMSD(T)23/2025</title><link>https://www.emsd.gov.hk/t/23</link>
<guid>EMSD-23</guid><pubDate>Tue, 31 Dec 2025 10:00:00 GMT</pubDate>
<description>Closing date: 2026-04-30</description></item>
<item><title>Website maintenance EMSD(T)24/2025</title><link>https://www.emsd.gov.hk/t/24</link></item>
<item><link>https://www.emsd.gov.hk/t/untitled</link></item>
</channel></rss>"#;

    fn source(id: &str, url: &str, kind: SourceKind) -> NewSource {
        NewSource {
            source_id: id.into(),
            name: format!("{id} feed"),
            organisation: Some("Electrical and Mechanical Services Department".into()),
            jurisdiction: Jurisdiction::Hk,
            owner_type: "government".into(),
            kind,
            access: "public".into(),
            priority: 1,
            status: SourceStatus::Active,
            feed_url: Some(url.into()),
            base_url: None,
            hub_url: None,
            field_map: BTreeMap::new(),
            category_tags_default: vec![],
            parsing_notes: None,
            discovered_from: None,
            discovered_at: None,
        }
    }

    fn now() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 3, 0, 0).single().unwrap()
    }

    #[tokio::test]
    async fn second_run_over_same_content_adds_nothing() {
        let store = MemoryStore::new();
        store
            .insert_source(&source("hk-emsd", FEED_URL, SourceKind::RssXml), now())
            .await
            .unwrap();
        let fetcher = StaticFetcher::new().with_page(FEED_URL, FEED);
        let config = SyncConfig::default();
        let assist = AssistSuite::deterministic();

        let cx = AgentContext::new(&store, &fetcher, &assist, &config, now());
        let first = run_ingestion(cx, Duration::zero()).await;
        assert_eq!(first.status, RunStatus::Success, "{:?}", first.errors);
        assert_eq!(first.sources_processed, 1);
        assert_eq!(first.total_raw_captures, 2);
        assert_eq!(first.new_raw_captures, 2);
        assert_eq!(first.tenders_inserted, 2);

        let later = now() + Duration::hours(1);
        let cx = AgentContext::new(&store, &fetcher, &assist, &config, later);
        let second = run_ingestion(cx, Duration::zero()).await;
        assert_eq!(second.new_raw_captures, 0);
        assert_eq!(second.tenders_inserted, 0);

        let page = store.query_tenders(&TenderQuery::default()).await.unwrap();
        assert_eq!(page.total, 2);
        let tender = page
            .tenders
            .iter()
            .find(|t| t.tender_ref == "EMSD(T)23/2025")
            .expect("extracted reference");
        assert_eq!(
            tender.agency.as_deref(),
            Some("Electrical and Mechanical Services Department")
        );
        assert_eq!(store.recent_run_logs(10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn failing_source_marks_run_partial_without_stopping_others() {
        let store = MemoryStore::new();
        let broken = "https://www.archsd.gov.hk/tenders.xml";
        store
            .insert_source(&source("hk-archsd", broken, SourceKind::RssXml), now())
            .await
            .unwrap();
        store
            .insert_source(&source("hk-emsd", FEED_URL, SourceKind::RssXml), now())
            .await
            .unwrap();
        let fetcher = StaticFetcher::new()
            .with_status(broken, 503)
            .with_page(FEED_URL, FEED);
        let config = SyncConfig::default();
        let assist = AssistSuite::deterministic();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let cx = AgentContext::new(&store, &fetcher, &assist, &config, now()).with_progress(&tx);
        let summary = run_ingestion(cx, Duration::zero()).await;
        assert_eq!(summary.status, RunStatus::Partial);
        assert_eq!(summary.sources_processed, 2);
        assert_eq!(summary.errors.len(), 1);
        assert_eq!(summary.errors[0].scope, "hk-archsd");
        assert_eq!(summary.tenders_inserted, 2);

        let sources = store.ingestible_sources().await.unwrap();
        let archsd = sources.iter().find(|s| s.source_id == "hk-archsd").unwrap();
        assert_eq!(archsd.last_status, Some(HealthStatus::Error));
        let emsd = sources.iter().find(|s| s.source_id == "hk-emsd").unwrap();
        assert_eq!(emsd.last_status, Some(HealthStatus::Ok));
        assert_eq!(emsd.last_status_detail.as_deref(), Some("2 new items, 2 tenders"));

        drop(tx);
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        assert!(matches!(events.first(), Some(ProgressEvent::Init { total: 2, .. })));
        assert!(matches!(events.last(), Some(ProgressEvent::Done { errors: 1, .. })));
        assert!(events
            .iter()
            .any(|e| matches!(e, ProgressEvent::SourceError { source_id, .. } if source_id == "hk-archsd")));
    }

    #[tokio::test]
    async fn recently_checked_sources_are_skipped_in_cron_mode() {
        let store = MemoryStore::new();
        store
            .insert_source(&source("hk-emsd", FEED_URL, SourceKind::RssXml), now())
            .await
            .unwrap();
        let fetcher = StaticFetcher::new().with_page(FEED_URL, FEED);
        let config = SyncConfig::default();
        let assist = AssistSuite::deterministic();

        let cx = AgentContext::new(&store, &fetcher, &assist, &config, now());
        run_ingestion(cx, Duration::zero()).await;

        let cx = AgentContext::new(&store, &fetcher, &assist, &config, now() + Duration::hours(2));
        let cron = run_ingestion(cx, Duration::hours(20)).await;
        assert_eq!(cron.sources_skipped, 1);
        assert_eq!(cron.sources_processed, 0);
        assert_eq!(fetcher.requests().len(), 1);
    }

    /// Delegates to a [`MemoryStore`] but fails the first tender upsert.
    #[derive(Default)]
    struct FlakyUpsertStore {
        inner: MemoryStore,
        tripped: AtomicBool,
    }

    #[async_trait]
    impl TenderStore for FlakyUpsertStore {
        async fn count_sources(&self) -> Result<i64, StoreError> {
            self.inner.count_sources().await
        }
        async fn insert_source(
            &self,
            source: &NewSource,
            created_at: DateTime<Utc>,
        ) -> Result<bool, StoreError> {
            self.inner.insert_source(source, created_at).await
        }
        async fn list_sources(&self, query: &SourceQuery) -> Result<Vec<Source>, StoreError> {
            self.inner.list_sources(query).await
        }
        async fn ingestible_sources(&self) -> Result<Vec<Source>, StoreError> {
            self.inner.ingestible_sources().await
        }
        async fn hub_sources(&self) -> Result<Vec<Source>, StoreError> {
            self.inner.hub_sources().await
        }
        async fn source_url_known(&self, url: &str) -> Result<bool, StoreError> {
            self.inner.source_url_known(url).await
        }
        async fn record_source_health(
            &self,
            source_id: &str,
            health: &SourceHealth,
        ) -> Result<(), StoreError> {
            self.inner.record_source_health(source_id, health).await
        }
        async fn known_guids(&self, source_id: &str) -> Result<HashSet<String>, StoreError> {
            self.inner.known_guids(source_id).await
        }
        async fn pending_captures(&self, source_id: &str) -> Result<Vec<RawCapture>, StoreError> {
            self.inner.pending_captures(source_id).await
        }
        async fn insert_raw_capture(
            &self,
            capture: &NewRawCapture,
        ) -> Result<InsertOutcome, StoreError> {
            self.inner.insert_raw_capture(capture).await
        }
        async fn mark_capture_normalized(
            &self,
            capture_id: i64,
            tender_id: Option<i64>,
        ) -> Result<(), StoreError> {
            self.inner.mark_capture_normalized(capture_id, tender_id).await
        }
        async fn upsert_tender(
            &self,
            draft: &TenderDraft,
            seen_at: DateTime<Utc>,
        ) -> Result<UpsertOutcome, StoreError> {
            if !self.tripped.swap(true, Ordering::SeqCst) {
                return Err(StoreError::Constraint("connection reset".into()));
            }
            self.inner.upsert_tender(draft, seen_at).await
        }
        async fn get_tender(&self, tender_id: i64) -> Result<Option<Tender>, StoreError> {
            self.inner.get_tender(tender_id).await
        }
        async fn query_tenders(&self, query: &TenderQuery) -> Result<TenderPage, StoreError> {
            self.inner.query_tenders(query).await
        }
        async fn pending_tenders(&self, limit: i64) -> Result<Vec<Tender>, StoreError> {
            self.inner.pending_tenders(limit).await
        }
        async fn tracked_agencies(&self) -> Result<Vec<String>, StoreError> {
            self.inner.tracked_agencies().await
        }
        async fn record_evaluation(&self, evaluation: &NewEvaluation) -> Result<i64, StoreError> {
            self.inner.record_evaluation(evaluation).await
        }
        async fn evaluations_for(&self, tender_id: i64) -> Result<Vec<Evaluation>, StoreError> {
            self.inner.evaluations_for(tender_id).await
        }
        async fn insert_decision(&self, decision: &NewDecision) -> Result<i64, StoreError> {
            self.inner.insert_decision(decision).await
        }
        async fn set_tender_label(&self, tender_id: i64, label: Label) -> Result<(), StoreError> {
            self.inner.set_tender_label(tender_id, label).await
        }
        async fn digest_stats(&self, today: NaiveDate) -> Result<DigestStats, StoreError> {
            self.inner.digest_stats(today).await
        }
        async fn digest_candidates(
            &self,
            today: NaiveDate,
            limit: i64,
        ) -> Result<Vec<DigestCandidate>, StoreError> {
            self.inner.digest_candidates(today, limit).await
        }
        async fn insert_run_log(&self, log: &NewRunLog) -> Result<i64, StoreError> {
            self.inner.insert_run_log(log).await
        }
        async fn recent_run_logs(&self, limit: i64) -> Result<Vec<AgentRunLog>, StoreError> {
            self.inner.recent_run_logs(limit).await
        }
        async fn last_run(&self, agent_name: &str) -> Result<Option<AgentRunLog>, StoreError> {
            self.inner.last_run(agent_name).await
        }
    }

    const SINGLE_FEED: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>EMSD</title>
<item><title>Event management services EMSD(T)23/2025</title><link>https://www.emsd.gov.hk/t/23</link>
<guid>EMSD-23</guid></item>
</channel></rss>"#;

    #[tokio::test]
    async fn capture_left_unnormalized_is_retried_next_run() {
        let store = FlakyUpsertStore::default();
        store
            .insert_source(&source("hk-emsd", FEED_URL, SourceKind::RssXml), now())
            .await
            .unwrap();
        let fetcher = StaticFetcher::new().with_page(FEED_URL, SINGLE_FEED);
        let config = SyncConfig::default();
        let assist = AssistSuite::deterministic();

        let cx = AgentContext::new(&store, &fetcher, &assist, &config, now());
        let first = run_ingestion(cx, Duration::zero()).await;
        assert_eq!(first.status, RunStatus::Partial);
        assert_eq!(first.new_raw_captures, 1);
        assert_eq!(first.tenders_inserted, 0);
        assert_eq!(first.errors[0].scope, "hk-emsd/EMSD-23");
        assert_eq!(store.pending_captures("hk-emsd").await.unwrap().len(), 1);

        let later = now() + Duration::hours(1);
        let cx = AgentContext::new(&store, &fetcher, &assist, &config, later);
        let second = run_ingestion(cx, Duration::zero()).await;
        assert_eq!(second.status, RunStatus::Success, "{:?}", second.errors);
        assert_eq!(second.new_raw_captures, 0);
        assert_eq!(second.tenders_inserted, 1);
        assert!(store.pending_captures("hk-emsd").await.unwrap().is_empty());

        let page = store.query_tenders(&TenderQuery::default()).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.tenders[0].tender_ref, "EMSD(T)23/2025");
        let captures = store.inner.captures().await;
        assert_eq!(captures.len(), 1);
        assert_eq!(captures[0].tender_id, Some(page.tenders[0].id));
    }

    #[tokio::test]
    async fn hubs_are_not_ingested() {
        let store = MemoryStore::new();
        let mut hub = source("hk-hub", "https://www.gov.hk/rss.htm", SourceKind::HtmlHub);
        hub.hub_url = hub.feed_url.take();
        store.insert_source(&hub, now()).await.unwrap();
        let fetcher = StaticFetcher::new();
        let config = SyncConfig::default();
        let assist = AssistSuite::deterministic();

        let cx = AgentContext::new(&store, &fetcher, &assist, &config, now());
        let summary = run_ingestion(cx, Duration::zero()).await;
        assert_eq!(summary.sources_processed, 0);
        assert!(fetcher.requests().is_empty());
    }
}
