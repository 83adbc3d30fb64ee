//! Tender intelligence agents and the service façade that runs them.

pub mod assist;
pub mod config;
pub mod decision;
pub mod digest;
pub mod discovery;
pub mod evaluate;
pub mod ingest;
pub mod schedule;
pub mod scoring;
pub mod seed;

use std::fmt;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tender_core::{AgentRunLog, CapabilityProfile, NewRunLog, RunStatus, Source};
use tender_storage::{
    HttpFetcher, MemoryStore, PageFetcher, PgStore, SourceQuery, TenderPage, TenderQuery,
    TenderStore,
};
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

pub use assist::AssistSuite;
pub use config::{AssistConfig, SyncConfig};
pub use decision::{DecisionAction, DecisionError, DecisionReceipt, DecisionRequest};
pub use digest::{Digest, DigestEntry, DIGEST_AGENT};
pub use discovery::{DiscoverySummary, DISCOVERY_AGENT};
pub use evaluate::{EvaluationSummary, EVALUATOR_AGENT};
pub use ingest::{IngestSummary, INGESTOR_AGENT};

pub const CRATE_NAME: &str = "tender-sync";

const RUN_IN_PROGRESS: &str = "run already in progress";

/// A failure scoped to one source, hub, tender or run stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunError {
    pub scope: String,
    pub error: String,
}

impl RunError {
    pub fn new(scope: impl Into<String>, error: impl fmt::Display) -> Self {
        Self {
            scope: scope.into(),
            error: error.to_string(),
        }
    }
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.scope, self.error)
    }
}

/// Streamed while ingestion or discovery runs. `source_id` is the hub URL for
/// configured hubs that are not in the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    Init {
        run_id: Uuid,
        agent: String,
        total: usize,
    },
    SourceStart {
        source_id: String,
        index: usize,
        total: usize,
    },
    SourceDone {
        source_id: String,
        items: usize,
        new_items: usize,
        tenders: usize,
    },
    SourceError {
        source_id: String,
        error: String,
    },
    Done {
        processed: usize,
        skipped: usize,
        new_items: usize,
        errors: usize,
        duration_ms: i64,
    },
}

pub(crate) fn emit(progress: Option<&UnboundedSender<ProgressEvent>>, event: ProgressEvent) {
    if let Some(tx) = progress {
        // A dropped receiver only means nobody is watching.
        let _ = tx.send(event);
    }
}

/// Everything one agent run needs, borrowed for the length of the run.
#[derive(Clone, Copy)]
pub struct AgentContext<'a> {
    pub store: &'a dyn TenderStore,
    pub fetcher: &'a dyn PageFetcher,
    pub assist: &'a AssistSuite,
    pub config: &'a SyncConfig,
    pub run_id: Uuid,
    pub now: DateTime<Utc>,
    pub progress: Option<&'a UnboundedSender<ProgressEvent>>,
}

impl<'a> AgentContext<'a> {
    pub fn new(
        store: &'a dyn TenderStore,
        fetcher: &'a dyn PageFetcher,
        assist: &'a AssistSuite,
        config: &'a SyncConfig,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            store,
            fetcher,
            assist,
            config,
            run_id: Uuid::new_v4(),
            now,
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: &'a UnboundedSender<ProgressEvent>) -> Self {
        self.progress = Some(progress);
        self
    }
}

pub(crate) struct RunOutline<'a> {
    pub agent: &'static str,
    pub status: RunStatus,
    pub items_processed: i64,
    pub new_items: i64,
    pub detail: String,
    pub errors: &'a [RunError],
    pub metadata: serde_json::Value,
    pub duration_ms: i64,
}

/// Appends the run's log row. A failed write is logged, never propagated.
pub(crate) async fn write_run_log(cx: AgentContext<'_>, outline: RunOutline<'_>) {
    let error_detail = (!outline.errors.is_empty()).then(|| {
        outline
            .errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    });
    let log = NewRunLog {
        run_id: cx.run_id,
        agent_name: outline.agent.to_string(),
        status: outline.status,
        items_processed: outline.items_processed,
        new_items: outline.new_items,
        detail: Some(outline.detail),
        error_detail,
        metadata: outline.metadata,
        started_at: cx.now,
        finished_at: cx.now + Duration::milliseconds(outline.duration_ms),
    };
    if let Err(err) = cx.store.insert_run_log(&log).await {
        warn!(run_id = %cx.run_id, agent = outline.agent, error = %err, "could not write run log");
    }
}

struct RunLocks {
    ingest: Mutex<()>,
    evaluate: Mutex<()>,
    discovery: Mutex<()>,
}

impl Default for RunLocks {
    fn default() -> Self {
        Self {
            ingest: Mutex::new(()),
            evaluate: Mutex::new(()),
            discovery: Mutex::new(()),
        }
    }
}

/// The service surface: every agent run and query the dashboard or CLI calls.
pub struct TenderIntel {
    store: Arc<dyn TenderStore>,
    fetcher: Arc<dyn PageFetcher>,
    assist: AssistSuite,
    config: SyncConfig,
    profile: CapabilityProfile,
    locks: RunLocks,
}

impl TenderIntel {
    pub fn new(
        store: Arc<dyn TenderStore>,
        fetcher: Arc<dyn PageFetcher>,
        assist: AssistSuite,
        config: SyncConfig,
        profile: CapabilityProfile,
    ) -> Self {
        Self {
            store,
            fetcher,
            assist,
            config,
            profile,
            locks: RunLocks::default(),
        }
    }

    /// Postgres when `DATABASE_URL` is set (migrations applied), otherwise an
    /// in-memory store that forgets everything on exit.
    pub async fn from_env() -> Result<Self> {
        let config = SyncConfig::from_env();
        let store: Arc<dyn TenderStore> = match &config.database_url {
            Some(url) => {
                let pg = PgStore::connect(url)
                    .await
                    .context("connecting to DATABASE_URL")?;
                pg.migrate().await.context("applying migrations")?;
                Arc::new(pg)
            }
            None => {
                warn!("DATABASE_URL not set; using the in-memory store");
                Arc::new(MemoryStore::new())
            }
        };
        let fetcher = Arc::new(HttpFetcher::new(config.http_client_config())?);
        let assist_config = AssistConfig::from_env();
        if !assist_config.is_enabled() {
            info!("LLM_API_KEY not set; assisted steps use deterministic fallbacks");
        }
        let assist = AssistSuite::from_config(
            &assist_config,
            config.assist_timeout,
            config.narrative_timeout,
        );
        let profile = config::load_profile(&config.profile_file)?;
        Ok(Self::new(store, fetcher, assist, config, profile))
    }

    pub fn store(&self) -> &Arc<dyn TenderStore> {
        &self.store
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn profile(&self) -> &CapabilityProfile {
        &self.profile
    }

    /// Freshness window used by scheduled runs.
    pub fn cron_window(&self) -> Duration {
        Duration::hours(self.config.cron_skip_hours)
    }

    fn context(&self, now: DateTime<Utc>) -> AgentContext<'_> {
        AgentContext::new(
            self.store.as_ref(),
            self.fetcher.as_ref(),
            &self.assist,
            &self.config,
            now,
        )
    }

    async fn log_skipped(&self, agent: &'static str) {
        warn!(agent, "{RUN_IN_PROGRESS}; skipping");
        let cx = self.context(Utc::now());
        let errors = [RunError::new("run", RUN_IN_PROGRESS)];
        write_run_log(
            cx,
            RunOutline {
                agent,
                status: RunStatus::Skipped,
                items_processed: 0,
                new_items: 0,
                detail: RUN_IN_PROGRESS.to_string(),
                errors: &errors,
                metadata: serde_json::Value::Null,
                duration_ms: 0,
            },
        )
        .await;
    }

    pub async fn seed_sources(&self) -> Result<usize> {
        seed::seed_sources_if_empty(self.store.as_ref(), &self.config.sources_file, Utc::now())
            .await
    }

    pub async fn run_ingestion(
        &self,
        skip_recent: Duration,
        progress: Option<&UnboundedSender<ProgressEvent>>,
    ) -> IngestSummary {
        let Ok(_guard) = self.locks.ingest.try_lock() else {
            self.log_skipped(INGESTOR_AGENT).await;
            return IngestSummary::skipped(Uuid::new_v4(), RUN_IN_PROGRESS);
        };
        let mut cx = self.context(Utc::now());
        cx.progress = progress;
        ingest::run_ingestion(cx, skip_recent).await
    }

    /// Scores pending tenders with the loaded profile, or `profile_override` for this run only.
    pub async fn run_evaluation(
        &self,
        profile_override: Option<&CapabilityProfile>,
    ) -> EvaluationSummary {
        let profile = profile_override.unwrap_or(&self.profile);
        let Ok(_guard) = self.locks.evaluate.try_lock() else {
            self.log_skipped(EVALUATOR_AGENT).await;
            return EvaluationSummary::skipped(Uuid::new_v4(), &profile.version, RUN_IN_PROGRESS);
        };
        evaluate::run_evaluation(self.context(Utc::now()), profile).await
    }

    pub async fn run_source_discovery(
        &self,
        skip_recent: Duration,
        progress: Option<&UnboundedSender<ProgressEvent>>,
    ) -> DiscoverySummary {
        let Ok(_guard) = self.locks.discovery.try_lock() else {
            self.log_skipped(DISCOVERY_AGENT).await;
            return DiscoverySummary::skipped(Uuid::new_v4(), RUN_IN_PROGRESS);
        };
        let mut cx = self.context(Utc::now());
        cx.progress = progress;
        discovery::run_source_discovery(cx, skip_recent).await
    }

    pub async fn get_tenders(&self, query: &TenderQuery) -> Result<TenderPage> {
        self.store
            .query_tenders(query)
            .await
            .context("querying tenders")
    }

    pub async fn get_sources(&self, query: &SourceQuery) -> Result<Vec<Source>> {
        self.store
            .list_sources(query)
            .await
            .context("listing sources")
    }

    pub async fn get_logs(&self, limit: i64) -> Result<Vec<AgentRunLog>> {
        self.store
            .recent_run_logs(limit)
            .await
            .context("reading run logs")
    }

    pub async fn get_digest(&self) -> Result<Digest> {
        digest::build_digest(self.context(Utc::now()), &self.profile)
            .await
            .context("building digest")
    }

    pub async fn record_decision(
        &self,
        request: DecisionRequest,
    ) -> Result<DecisionReceipt, DecisionError> {
        decision::record_decision(self.store.as_ref(), request, Utc::now()).await
    }
}
