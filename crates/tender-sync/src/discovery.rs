//! Source discovery: scans hub pages for feeds the registry does not know yet.

use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tender_adapters::{collect_hrefs, find_feed_links, HREF_CAP};
use tender_core::{
    identity_hash, HealthStatus, Jurisdiction, NewSource, RunStatus, Source, SourceHealth,
    SourceKind, SourceStatus,
};
use tender_storage::Url;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{emit, write_run_log, AgentContext, ProgressEvent, RunError, RunOutline};

pub const DISCOVERY_AGENT: &str = "SourceDiscoveryAgent";

const DISCOVERED_PRIORITY: i32 = 3;
const CONFIGURED_HUB_PRIORITY: i32 = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredSource {
    pub source_id: String,
    pub url: String,
    pub kind: SourceKind,
    pub jurisdiction: Jurisdiction,
    pub hub_url: String,
    /// `pattern` or `assist`.
    pub found_by: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoverySummary {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub new_sources: Vec<DiscoveredSource>,
    pub errors: Vec<RunError>,
    pub hubs_scanned: usize,
    pub hubs_skipped: usize,
    pub duration_ms: i64,
}

impl DiscoverySummary {
    pub fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            status: RunStatus::Success,
            new_sources: Vec::new(),
            errors: Vec::new(),
            hubs_scanned: 0,
            hubs_skipped: 0,
            duration_ms: 0,
        }
    }

    pub fn skipped(run_id: Uuid, reason: &str) -> Self {
        Self {
            status: RunStatus::Skipped,
            errors: vec![RunError::new("run", reason)],
            ..Self::new(run_id)
        }
    }
}

/// One registered hub page to scan.
#[derive(Debug, Clone)]
struct Hub {
    url: String,
    source: Source,
}

impl Hub {
    fn label(&self) -> &str {
        &self.source.source_id
    }
}

fn looks_like_feed_url(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    let path = lower.split(['?', '#']).next().unwrap_or_default();
    [".xml", ".rss", ".atom", "/rss", "/feed", "/atom"]
        .iter()
        .any(|suffix| path.trim_end_matches('/').ends_with(suffix))
}

/// Jurisdiction from the host's country suffix, else the hub's.
fn infer_jurisdiction(url: &str, hub: Option<&Jurisdiction>) -> Jurisdiction {
    let host = Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_ascii_lowercase))
        .unwrap_or_default();
    if host.ends_with(".hk") {
        Jurisdiction::Hk
    } else if host.ends_with(".sg") {
        Jurisdiction::Sg
    } else {
        hub.cloned()
            .unwrap_or_else(|| Jurisdiction::Other("UNKNOWN".to_string()))
    }
}

/// Registry entry for a URL found on `hub_url`, awaiting validation.
pub fn discovered_source(
    url: &str,
    hub_url: &str,
    hub_jurisdiction: Option<&Jurisdiction>,
    found_by: &str,
    now: DateTime<Utc>,
) -> NewSource {
    let is_feed = looks_like_feed_url(url);
    let host = Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(ToString::to_string))
        .unwrap_or_else(|| url.to_string());
    NewSource {
        source_id: format!("disc-{}", identity_hash(&[url])),
        name: format!("Discovered feed on {host}"),
        organisation: None,
        jurisdiction: infer_jurisdiction(url, hub_jurisdiction),
        owner_type: "government".to_string(),
        kind: if is_feed {
            SourceKind::RssXml
        } else {
            SourceKind::HtmlReference
        },
        access: "public".to_string(),
        priority: DISCOVERED_PRIORITY,
        status: SourceStatus::PendingValidation,
        feed_url: is_feed.then(|| url.to_string()),
        base_url: (!is_feed).then(|| url.to_string()),
        hub_url: None,
        field_map: Default::default(),
        category_tags_default: Vec::new(),
        parsing_notes: Some(format!("found by {found_by} matching on {hub_url}")),
        discovered_from: Some(hub_url.to_string()),
        discovered_at: Some(now),
    }
}

/// Registry entry for a hub page named in configuration.
pub fn configured_hub(url: &str) -> NewSource {
    let host = Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(ToString::to_string))
        .unwrap_or_else(|| url.to_string());
    NewSource {
        source_id: format!("hub-{}", identity_hash(&[url])),
        name: format!("Feed directory on {host}"),
        organisation: None,
        jurisdiction: infer_jurisdiction(url, None),
        owner_type: "government".to_string(),
        kind: SourceKind::HtmlHub,
        access: "public".to_string(),
        priority: CONFIGURED_HUB_PRIORITY,
        status: SourceStatus::Active,
        feed_url: None,
        base_url: None,
        hub_url: Some(url.to_string()),
        field_map: Default::default(),
        category_tags_default: Vec::new(),
        parsing_notes: Some("registered from configured hub URLs".to_string()),
        discovered_from: None,
        discovered_at: None,
    }
}

/// Configured hub URLs are registered as `html_hub` sources first so every
/// hub shares the freshness skip and health tracking.
async fn collect_hubs(cx: AgentContext<'_>, summary: &mut DiscoverySummary) -> Vec<Hub> {
    for url in &cx.config.hub_urls {
        let registered = match cx.store.source_url_known(url).await {
            Ok(true) => continue,
            Ok(false) => cx.store.insert_source(&configured_hub(url), cx.now).await,
            Err(err) => Err(err),
        };
        match registered {
            Ok(true) => info!(hub = %url, "registered configured hub"),
            Ok(false) => {}
            Err(err) => {
                warn!(hub = %url, error = %err, "could not register configured hub");
                summary.errors.push(RunError::new(url.as_str(), err));
            }
        }
    }

    match cx.store.hub_sources().await {
        Ok(sources) => sources
            .into_iter()
            .filter_map(|source| {
                let url = source.hub_url.clone().or_else(|| source.base_url.clone())?;
                Some(Hub { url, source })
            })
            .collect(),
        Err(err) => {
            warn!(error = %err, "could not load hub sources");
            summary.errors.push(RunError::new("load_hubs", err));
            Vec::new()
        }
    }
}

pub async fn run_source_discovery(cx: AgentContext<'_>, skip_recent: Duration) -> DiscoverySummary {
    let started = Instant::now();
    let mut summary = DiscoverySummary::new(cx.run_id);
    let hubs = collect_hubs(cx, &mut summary).await;

    info!(run_id = %cx.run_id, hubs = hubs.len(), "discovery run starting");
    emit(
        cx.progress,
        ProgressEvent::Init {
            run_id: cx.run_id,
            agent: DISCOVERY_AGENT.to_string(),
            total: hubs.len(),
        },
    );

    let total = hubs.len();
    for (index, hub) in hubs.iter().enumerate() {
        if hub.source.checked_within(cx.now, skip_recent) {
            debug!(hub = hub.label(), "hub checked recently; skipping");
            summary.hubs_skipped += 1;
            continue;
        }
        emit(
            cx.progress,
            ProgressEvent::SourceStart {
                source_id: hub.label().to_string(),
                index,
                total,
            },
        );
        summary.hubs_scanned += 1;

        let health = match scan_hub(cx, hub, &mut summary).await {
            Ok((candidates, inserted)) => {
                emit(
                    cx.progress,
                    ProgressEvent::SourceDone {
                        source_id: hub.label().to_string(),
                        items: candidates,
                        new_items: inserted,
                        tenders: 0,
                    },
                );
                SourceHealth {
                    status: HealthStatus::Ok,
                    detail: format!("{candidates} candidates, {inserted} new sources"),
                    checked_at: cx.now,
                }
            }
            Err(err) => {
                warn!(hub = hub.label(), error = %err, "hub scan failed");
                summary.errors.push(RunError::new(hub.label(), &err));
                emit(
                    cx.progress,
                    ProgressEvent::SourceError {
                        source_id: hub.label().to_string(),
                        error: err.to_string(),
                    },
                );
                SourceHealth {
                    status: HealthStatus::Error,
                    detail: err.to_string(),
                    checked_at: cx.now,
                }
            }
        };

        if let Err(err) = cx.store.record_source_health(hub.label(), &health).await {
            warn!(source_id = hub.label(), error = %err, "could not record hub health");
            summary
                .errors
                .push(RunError::new(format!("{}/health", hub.label()), err));
        }
    }

    if !summary.errors.is_empty() {
        summary.status = RunStatus::Partial;
    }
    summary.duration_ms = started.elapsed().as_millis() as i64;
    emit(
        cx.progress,
        ProgressEvent::Done {
            processed: summary.hubs_scanned,
            skipped: summary.hubs_skipped,
            new_items: summary.new_sources.len(),
            errors: summary.errors.len(),
            duration_ms: summary.duration_ms,
        },
    );
    info!(
        run_id = %cx.run_id,
        scanned = summary.hubs_scanned,
        new_sources = summary.new_sources.len(),
        errors = summary.errors.len(),
        "discovery run finished"
    );
    record(cx, &summary).await;
    summary
}

/// Returns `(candidates, inserted)` for one hub.
async fn scan_hub(
    cx: AgentContext<'_>,
    hub: &Hub,
    summary: &mut DiscoverySummary,
) -> anyhow::Result<(usize, usize)> {
    let page = cx
        .fetcher
        .fetch_text(cx.run_id, hub.label(), &hub.url, cx.config.scrape_timeout)
        .await?;

    let mut candidates = find_feed_links(&page.body, &page.final_url)?;
    let mut found_by = "pattern";
    if candidates.is_empty() {
        let hrefs = collect_hrefs(&page.body, &page.final_url, HREF_CAP)?;
        debug!(hub = hub.label(), hrefs = hrefs.len(), "no pattern matches; asking link extractor");
        candidates = cx
            .assist
            .links
            .extract_candidate_urls(&page.final_url, &hrefs)
            .await;
        found_by = "assist";
    }

    let mut inserted = 0;
    for url in &candidates {
        if cx.store.source_url_known(url).await? {
            continue;
        }
        let jurisdiction = Some(&hub.source.jurisdiction);
        let source = discovered_source(url, &hub.url, jurisdiction, found_by, cx.now);
        if cx.store.insert_source(&source, cx.now).await? {
            info!(source_id = %source.source_id, url = %url, hub = %hub.url, "discovered new source");
            inserted += 1;
            summary.new_sources.push(DiscoveredSource {
                source_id: source.source_id,
                url: url.clone(),
                kind: source.kind,
                jurisdiction: source.jurisdiction,
                hub_url: hub.url.clone(),
                found_by: found_by.to_string(),
            });
        }
    }
    Ok((candidates.len(), inserted))
}

async fn record(cx: AgentContext<'_>, summary: &DiscoverySummary) {
    let outline = RunOutline {
        agent: DISCOVERY_AGENT,
        status: summary.status,
        items_processed: summary.hubs_scanned as i64,
        new_items: summary.new_sources.len() as i64,
        detail: format!(
            "{} hubs scanned, {} new sources",
            summary.hubs_scanned,
            summary.new_sources.len()
        ),
        errors: &summary.errors,
        metadata: serde_json::json!({
            "hubs_skipped": summary.hubs_skipped,
            "new_sources": summary
                .new_sources
                .iter()
                .map(|s| s.url.as_str())
                .collect::<Vec<_>>(),
        }),
        duration_ms: summary.duration_ms,
    };
    write_run_log(cx, outline).await;
}
