//! Persistence contract shared by the Postgres and in-memory stores.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tender_core::{
    AgentRunLog, Evaluation, Jurisdiction, Label, NewDecision, NewEvaluation, NewRawCapture,
    NewRunLog, NewSource, RawCapture, Source, SourceHealth, SourceStatus, Tender, TenderDraft, TenderStatus,
    UnknownVariant,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("invalid stored value: {0}")]
    InvalidValue(#[from] UnknownVariant),
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
    #[error("constraint violated: {0}")]
    Constraint(String),
}

/// Result of an idempotent insert. `Duplicate` only ever comes from the uniqueness
/// constraint the insert is keyed on; every other failure is a [`StoreError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted(i64),
    Duplicate,
}

impl InsertOutcome {
    pub fn inserted_id(&self) -> Option<i64> {
        match self {
            InsertOutcome::Inserted(id) => Some(*id),
            InsertOutcome::Duplicate => None,
        }
    }
}

/// Result of the canonical tender upsert on `(tender_ref, jurisdiction)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted(i64),
    Refreshed(i64),
}

impl UpsertOutcome {
    pub fn id(&self) -> i64 {
        match self {
            UpsertOutcome::Inserted(id) | UpsertOutcome::Refreshed(id) => *id,
        }
    }

    pub fn is_insert(&self) -> bool {
        matches!(self, UpsertOutcome::Inserted(_))
    }
}

pub const DEFAULT_PAGE_SIZE: i64 = 50;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenderQuery {
    pub jurisdiction: Option<Jurisdiction>,
    pub label: Option<Label>,
    pub status: Option<TenderStatus>,
    pub search: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

impl Default for TenderQuery {
    fn default() -> Self {
        Self {
            jurisdiction: None,
            label: None,
            status: None,
            search: None,
            limit: DEFAULT_PAGE_SIZE,
            offset: 0,
        }
    }
}

impl TenderQuery {
    /// Lowercased search term, if any non-blank one was given.
    pub fn search_term(&self) -> Option<String> {
        self.search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase)
    }

    pub fn matches(&self, tender: &Tender) -> bool {
        if self.jurisdiction.as_ref().is_some_and(|j| *j != tender.jurisdiction) {
            return false;
        }
        if self.label.is_some_and(|l| l != tender.label) {
            return false;
        }
        if self.status.is_some_and(|s| s != tender.status) {
            return false;
        }
        match self.search_term() {
            None => true,
            Some(term) => {
                tender.title.to_lowercase().contains(&term)
                    || tender.tender_ref.to_lowercase().contains(&term)
                    || tender
                        .agency
                        .as_deref()
                        .is_some_and(|a| a.to_lowercase().contains(&term))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenderPage {
    pub tenders: Vec<Tender>,
    pub total: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceQuery {
    pub jurisdiction: Option<Jurisdiction>,
    pub status: Option<SourceStatus>,
}

impl SourceQuery {
    pub fn matches(&self, source: &Source) -> bool {
        self.jurisdiction.as_ref().map_or(true, |j| *j == source.jurisdiction)
            && self.status.map_or(true, |s| s == source.status)
    }
}

/// Raw counts behind the digest header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigestStats {
    pub new_today: i64,
    pub open_priority: i64,
    pub closing_soon: i64,
    pub sources_ok: i64,
    pub sources_active: i64,
}

/// A digest row: an open tender plus its latest evaluation, if scored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DigestCandidate {
    pub tender: Tender,
    pub source_name: Option<String>,
    pub latest: Option<Evaluation>,
}

#[async_trait]
pub trait TenderStore: Send + Sync {
    async fn count_sources(&self) -> Result<i64, StoreError>;

    /// Inserts unless the id or feed URL is already registered. Returns whether a row was added.
    async fn insert_source(
        &self,
        source: &NewSource,
        created_at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Registry listing ordered by priority then id.
    async fn list_sources(&self, query: &SourceQuery) -> Result<Vec<Source>, StoreError>;

    /// Active or pending sources the orchestrator can ingest, ordered by priority then id.
    async fn ingestible_sources(&self) -> Result<Vec<Source>, StoreError>;

    /// Non-disabled hub sources, ordered by priority then id.
    async fn hub_sources(&self) -> Result<Vec<Source>, StoreError>;

    /// True when any source already uses `url` as its feed, base or hub URL.
    async fn source_url_known(&self, url: &str) -> Result<bool, StoreError>;

    async fn record_source_health(
        &self,
        source_id: &str,
        health: &SourceHealth,
    ) -> Result<(), StoreError>;

    /// Guids of captures already normalized for this source. A capture whose
    /// normalization never finished is left out so it can be retried.
    async fn known_guids(&self, source_id: &str) -> Result<HashSet<String>, StoreError>;

    /// Captures stored for this source that were never normalized, oldest first.
    async fn pending_captures(&self, source_id: &str) -> Result<Vec<RawCapture>, StoreError>;

    /// Idempotent on `(source_id, guid)`.
    async fn insert_raw_capture(&self, capture: &NewRawCapture)
        -> Result<InsertOutcome, StoreError>;

    async fn mark_capture_normalized(
        &self,
        capture_id: i64,
        tender_id: Option<i64>,
    ) -> Result<(), StoreError>;

    /// Inserts a canonical tender or refreshes the mutable fields of the existing one.
    /// `first_seen_at`, label and evaluation state are never reset.
    async fn upsert_tender(
        &self,
        draft: &TenderDraft,
        seen_at: DateTime<Utc>,
    ) -> Result<UpsertOutcome, StoreError>;

    async fn get_tender(&self, tender_id: i64) -> Result<Option<Tender>, StoreError>;

    /// Filtered page ordered by publish date, newest first.
    async fn query_tenders(&self, query: &TenderQuery) -> Result<TenderPage, StoreError>;

    /// Tenders awaiting evaluation, newest first.
    async fn pending_tenders(&self, limit: i64) -> Result<Vec<Tender>, StoreError>;

    /// Agencies of tenders that received a `track` decision.
    async fn tracked_agencies(&self) -> Result<Vec<String>, StoreError>;

    /// Atomically supersedes the current latest evaluation, inserts this one as latest
    /// and stamps the tender's label and evaluation status.
    async fn record_evaluation(&self, evaluation: &NewEvaluation) -> Result<i64, StoreError>;

    /// All evaluations for a tender, newest first.
    async fn evaluations_for(&self, tender_id: i64) -> Result<Vec<Evaluation>, StoreError>;

    async fn insert_decision(&self, decision: &NewDecision) -> Result<i64, StoreError>;

    async fn set_tender_label(&self, tender_id: i64, label: Label) -> Result<(), StoreError>;

    async fn digest_stats(&self, today: NaiveDate) -> Result<DigestStats, StoreError>;

    /// Non-ignored tenders still open on `today`, ranked by label then closing date.
    /// Openness is derived from the closing date, not the stored status.
    async fn digest_candidates(
        &self,
        today: NaiveDate,
        limit: i64,
    ) -> Result<Vec<DigestCandidate>, StoreError>;

    async fn insert_run_log(&self, log: &NewRunLog) -> Result<i64, StoreError>;

    /// Newest first.
    async fn recent_run_logs(&self, limit: i64) -> Result<Vec<AgentRunLog>, StoreError>;

    async fn last_run(&self, agent_name: &str) -> Result<Option<AgentRunLog>, StoreError>;
}
