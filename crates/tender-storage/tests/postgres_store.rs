//! Postgres store behaviour against a live database.
//!
//! Set `DATABASE_URL` to a scratch database to run these; without it every
//! test returns early. Rows are keyed by a fresh uuid so runs never collide.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, TimeZone, Utc};
use tender_core::{
    BudgetSource, Jurisdiction, Label, NewEvaluation, NewRawCapture, NewSource, PreExtracted,
    RawFormat, ScoringWeights, SignalBreakdown, SourceKind, SourceStatus, TenderDraft,
    TenderStatus,
};
use tender_storage::{InsertOutcome, PgStore, TenderStore, UpsertOutcome};
use uuid::Uuid;

/// Connected store with migrations applied, or `None` when no database is configured.
async fn test_store() -> Option<PgStore> {
    let Ok(url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL not set; skipping postgres test");
        return None;
    };
    let store = PgStore::connect(&url).await.expect("connect to DATABASE_URL");
    store.migrate().await.expect("apply migrations");
    Some(store)
}

fn at(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, day, 9, 0, 0).single().unwrap()
}

fn unique(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4().simple())
}

fn new_source(id: &str) -> NewSource {
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
        feed_url: Some(format!("https://example.gov.hk/{id}.xml")),
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
        source_id: "pg-test".into(),
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

fn evaluation(tender_id: i64, tender_ref: &str, label: Label, day: u32) -> NewEvaluation {
    NewEvaluation {
        tender_id,
        tender_ref: tender_ref.into(),
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
        evaluated_at: at(day),
    }
}

#[tokio::test]
async fn repeated_capture_is_a_duplicate() {
    let Some(store) = test_store().await else {
        return;
    };
    let source_id = unique("pg-src");
    assert!(store.insert_source(&new_source(&source_id), at(1)).await.unwrap());
    assert!(!store.insert_source(&new_source(&source_id), at(1)).await.unwrap());

    let capture = NewRawCapture {
        source_id: source_id.clone(),
        format: RawFormat::RssXml,
        payload: "<item/>".into(),
        pre: PreExtracted::default(),
        item_url: None,
        guid: "g1".into(),
        captured_at: at(1),
    };
    let first = store.insert_raw_capture(&capture).await.unwrap();
    let Some(capture_id) = first.inserted_id() else {
        panic!("first insert should store the capture");
    };
    assert_eq!(
        store.insert_raw_capture(&capture).await.unwrap(),
        InsertOutcome::Duplicate
    );

    assert!(store.known_guids(&source_id).await.unwrap().is_empty());
    let pending = store.pending_captures(&source_id).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, capture_id);
    assert_eq!(pending[0].format, RawFormat::RssXml);

    store.mark_capture_normalized(capture_id, None).await.unwrap();
    assert!(store.known_guids(&source_id).await.unwrap().contains("g1"));
    assert!(store.pending_captures(&source_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn upsert_refreshes_without_regressing_first_seen() {
    let Some(store) = test_store().await else {
        return;
    };
    let reference = unique("PG");
    let first = store
        .upsert_tender(&draft(&reference, "Lift maintenance"), at(1))
        .await
        .unwrap();
    assert!(first.is_insert());

    let second = store
        .upsert_tender(&draft(&reference, "Lift maintenance (amended)"), at(3))
        .await
        .unwrap();
    assert_eq!(second, UpsertOutcome::Refreshed(first.id()));

    let tender = store.get_tender(first.id()).await.unwrap().unwrap();
    assert_eq!(tender.title, "Lift maintenance (amended)");
    assert_eq!(tender.first_seen_at, at(1));
    assert_eq!(tender.last_seen_at, at(3));
}

#[tokio::test]
async fn exactly_one_latest_evaluation() {
    let Some(store) = test_store().await else {
        return;
    };
    let reference = unique("PG");
    let id = store
        .upsert_tender(&draft(&reference, "Event"), at(1))
        .await
        .unwrap()
        .id();
    store
        .record_evaluation(&evaluation(id, &reference, Label::Consider, 2))
        .await
        .unwrap();
    store
        .record_evaluation(&evaluation(id, &reference, Label::Priority, 3))
        .await
        .unwrap();

    let evaluations = store.evaluations_for(id).await.unwrap();
    assert_eq!(evaluations.len(), 2);
    assert_eq!(evaluations.iter().filter(|e| e.is_latest).count(), 1);
    assert!(evaluations[0].is_latest);
    assert_eq!(evaluations[0].body.label, Label::Priority);

    let tender = store.get_tender(id).await.unwrap().unwrap();
    assert_eq!(tender.label, Label::Priority);
}

#[tokio::test]
async fn digest_skips_tenders_past_their_closing_date() {
    let Some(store) = test_store().await else {
        return;
    };
    let today = at(10).date_naive();
    let mut stale = draft(&unique("PG-STALE"), "Closed last week");
    stale.closing_date = Some(today - Duration::days(3));
    stale.status = TenderStatus::Open;
    let mut live = draft(&unique("PG-LIVE"), "Closes today");
    live.closing_date = Some(today);
    live.status = TenderStatus::Open;
    let stale_id = store.upsert_tender(&stale, at(1)).await.unwrap().id();
    let live_id = store.upsert_tender(&live, at(1)).await.unwrap().id();

    let ids: Vec<i64> = store
        .digest_candidates(today, 10_000)
        .await
        .unwrap()
        .iter()
        .map(|c| c.tender.id)
        .collect();
    assert!(ids.contains(&live_id));
    assert!(!ids.contains(&stale_id));
}
