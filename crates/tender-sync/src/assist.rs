//! Optional language-model assistance with deterministic fallbacks.
//!
//! Each assisted step sits behind a narrow trait. The deterministic
//! implementation is always available; the assisted one wraps a
//! [`CompletionBackend`] and falls back to it on any failure, so no run ever
//! depends on the remote service.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tender_adapters::accept_candidate;
use tender_core::Tender;
use tender_storage::DigestStats;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::AssistConfig;
use crate::digest::DigestEntry;
use crate::scoring::Scorecard;

#[derive(Debug, Error)]
pub enum AssistError {
    #[error("assist backend is not configured")]
    NotConfigured,
    #[error("assist request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("assist returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("assist timed out after {0:?}")]
    Timeout(Duration),
    #[error("malformed assist response: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[async_trait]
pub trait CompletionBackend: Send + Sync {
    fn model(&self) -> &str;

    async fn complete(
        &self,
        request: &CompletionRequest,
        timeout: Duration,
    ) -> Result<String, AssistError>;
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatBody<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI-compatible chat-completions client.
pub struct ChatCompletionsClient {
    http: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
}

impl ChatCompletionsClient {
    pub fn from_config(config: &AssistConfig) -> Result<Self, AssistError> {
        let api_key = config.api_key.clone().ok_or(AssistError::NotConfigured)?;
        let http = reqwest::Client::builder().build()?;
        Ok(Self {
            http,
            api_url: config.api_url.clone(),
            api_key,
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl CompletionBackend for ChatCompletionsClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
        timeout: Duration,
    ) -> Result<String, AssistError> {
        let body = ChatBody {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.user,
                },
            ],
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };

        let send = self
            .http
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .timeout(timeout)
            .json(&body)
            .send();
        let response = tokio::time::timeout(timeout, send)
            .await
            .map_err(|_| AssistError::Timeout(timeout))??;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AssistError::Status {
                status: status.as_u16(),
                body: body.chars().take(300).collect(),
            });
        }

        let parsed: ChatResponse = response.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or_else(|| AssistError::Malformed("no completion content".to_string()))
    }
}

/// Replays canned completions in order and records every request.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    responses: Mutex<VecDeque<Result<String, String>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, text: impl Into<String>) -> Self {
        self.push(Ok(text.into()));
        self
    }

    pub fn fail(self, message: impl Into<String>) -> Self {
        self.push(Err(message.into()));
        self
    }

    fn push(&self, response: Result<String, String>) {
        if let Ok(mut queue) = self.responses.lock() {
            queue.push_back(response);
        }
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl CompletionBackend for ScriptedBackend {
    fn model(&self) -> &str {
        "scripted"
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
        _timeout: Duration,
    ) -> Result<String, AssistError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        let next = self
            .responses
            .lock()
            .ok()
            .and_then(|mut queue| queue.pop_front());
        match next {
            Some(Ok(text)) => Ok(text),
            Some(Err(message)) => Err(AssistError::Malformed(message)),
            None => Err(AssistError::Malformed("no scripted response left".to_string())),
        }
    }
}

/// Text plus the model that wrote it; `None` for the deterministic path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Authored {
    pub text: String,
    pub model: Option<String>,
}

impl Authored {
    fn template(text: String) -> Self {
        Self { text, model: None }
    }
}

#[async_trait]
pub trait RationaleWriter: Send + Sync {
    async fn rationale(&self, tender: &Tender, card: &Scorecard) -> Authored;
}

#[async_trait]
pub trait LinkExtractor: Send + Sync {
    /// Candidate feed URLs among `hrefs`, already resolved against `hub_url`.
    async fn extract_candidate_urls(&self, hub_url: &str, hrefs: &[String]) -> Vec<String>;
}

#[async_trait]
pub trait DigestNarrator: Send + Sync {
    async fn narrative(&self, stats: &DigestStats, entries: &[DigestEntry]) -> Authored;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateRationale;

pub fn template_rationale(card: &Scorecard) -> String {
    let (top, concern) = card.highlights();
    let strengths = top
        .iter()
        .map(|(name, value)| format!("{name} {value:.2}"))
        .collect::<Vec<_>>()
        .join(" and ");
    let mut text = format!(
        "Scored {} at {:.2} (capability fit {:.2}, business potential {:.2}). Strongest signals: {strengths}.",
        card.label, card.overall, card.capability_fit, card.business_potential
    );
    if let Some((name, value)) = concern {
        text.push_str(&format!(" Main concern: {name} {value:.2}."));
    }
    text
}

#[async_trait]
impl RationaleWriter for TemplateRationale {
    async fn rationale(&self, _tender: &Tender, card: &Scorecard) -> Authored {
        Authored::template(template_rationale(card))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoLinkExtraction;

#[async_trait]
impl LinkExtractor for NoLinkExtraction {
    async fn extract_candidate_urls(&self, _hub_url: &str, _hrefs: &[String]) -> Vec<String> {
        Vec::new()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CountNarrator;

pub fn count_narrative(stats: &DigestStats, entries: &[DigestEntry]) -> String {
    if entries.is_empty() {
        return format!(
            "No open tenders to review today. {} of {} active sources reported healthy.",
            stats.sources_ok, stats.sources_active
        );
    }
    let count = |label: tender_core::Label| entries.iter().filter(|e| e.label == label).count();
    format!(
        "{} open tenders in today's digest: {} priority, {} to consider, {} partner-only. \
         {} close within 7 days and {} were first seen today. {} of {} active sources reported healthy.",
        entries.len(),
        count(tender_core::Label::Priority),
        count(tender_core::Label::Consider),
        count(tender_core::Label::PartnerOnly),
        stats.closing_soon,
        stats.new_today,
        stats.sources_ok,
        stats.sources_active
    )
}

#[async_trait]
impl DigestNarrator for CountNarrator {
    async fn narrative(&self, stats: &DigestStats, entries: &[DigestEntry]) -> Authored {
        Authored::template(count_narrative(stats, entries))
    }
}

pub struct AssistedRationale {
    backend: Arc<dyn CompletionBackend>,
    timeout: Duration,
}

impl AssistedRationale {
    pub fn new(backend: Arc<dyn CompletionBackend>, timeout: Duration) -> Self {
        Self { backend, timeout }
    }
}

pub fn rationale_request(tender: &Tender, card: &Scorecard) -> CompletionRequest {
    let details = serde_json::json!({
        "tender_ref": tender.tender_ref,
        "title": tender.title,
        "agency": tender.agency,
        "jurisdiction": tender.jurisdiction,
        "category_tags": tender.category_tags,
        "closing_date": tender.closing_date,
        "capability_fit": card.capability_fit,
        "business_potential": card.business_potential,
        "overall": card.overall,
        "label": card.label,
        "signals": card.signals,
    });
    CompletionRequest {
        system: "You are a tender evaluation assistant for a digital, marketing and events agency \
                 operating in Hong Kong and Singapore. You explain relevance scores to business \
                 development staff."
            .to_string(),
        user: format!(
            "Tender and scores:\n{details}\n\nWrite 2-3 sentences explaining why this tender scored \
             {label}. Mention the top 2 positive signals and the top 1 concern. Plain text only.",
            label = card.label
        ),
        max_tokens: 200,
        temperature: 0.3,
    }
}

#[async_trait]
impl RationaleWriter for AssistedRationale {
    async fn rationale(&self, tender: &Tender, card: &Scorecard) -> Authored {
        let request = rationale_request(tender, card);
        match self.backend.complete(&request, self.timeout).await {
            Ok(text) => Authored {
                text,
                model: Some(self.backend.model().to_string()),
            },
            Err(err) => {
                warn!(tender_ref = %tender.tender_ref, error = %err, "rationale assist failed; using template");
                Authored::template(template_rationale(card))
            }
        }
    }
}

pub struct AssistedLinkExtractor {
    backend: Arc<dyn CompletionBackend>,
    timeout: Duration,
}

impl AssistedLinkExtractor {
    pub fn new(backend: Arc<dyn CompletionBackend>, timeout: Duration) -> Self {
        Self { backend, timeout }
    }
}

/// Parses a strict JSON array of strings and keeps only acceptable candidates.
pub fn parse_candidate_urls(hub_url: &str, response: &str) -> Result<Vec<String>, AssistError> {
    let raw: Vec<String> = serde_json::from_str(response.trim())
        .map_err(|e| AssistError::Malformed(format!("expected a JSON array of strings: {e}")))?;
    let mut seen = HashSet::new();
    Ok(raw
        .iter()
        .filter_map(|candidate| accept_candidate(hub_url, candidate))
        .filter(|url| seen.insert(url.clone()))
        .collect())
}

#[async_trait]
impl LinkExtractor for AssistedLinkExtractor {
    async fn extract_candidate_urls(&self, hub_url: &str, hrefs: &[String]) -> Vec<String> {
        if hrefs.is_empty() {
            return Vec::new();
        }
        let request = CompletionRequest {
            system: "You identify machine-readable procurement feeds on government web pages."
                .to_string(),
            user: format!(
                "Page: {hub_url}\nLinks:\n{}\n\nReturn only a JSON array of the link URLs that are \
                 likely RSS, Atom or XML feeds of tender or procurement notices. Return [] if none.",
                hrefs.join("\n")
            ),
            max_tokens: 800,
            temperature: 0.0,
        };
        let response = match self.backend.complete(&request, self.timeout).await {
            Ok(text) => text,
            Err(err) => {
                warn!(hub_url, error = %err, "link extraction assist failed");
                return Vec::new();
            }
        };
        match parse_candidate_urls(hub_url, &response) {
            Ok(urls) => {
                debug!(hub_url, candidates = urls.len(), "link extraction assist answered");
                urls
            }
            Err(err) => {
                warn!(hub_url, error = %err, "rejecting link extraction response");
                Vec::new()
            }
        }
    }
}

pub struct AssistedNarrator {
    backend: Arc<dyn CompletionBackend>,
    timeout: Duration,
}

impl AssistedNarrator {
    pub fn new(backend: Arc<dyn CompletionBackend>, timeout: Duration) -> Self {
        Self { backend, timeout }
    }
}

#[async_trait]
impl DigestNarrator for AssistedNarrator {
    async fn narrative(&self, stats: &DigestStats, entries: &[DigestEntry]) -> Authored {
        if entries.is_empty() {
            return Authored::template(count_narrative(stats, entries));
        }
        let top: Vec<_> = entries
            .iter()
            .take(10)
            .map(|e| {
                serde_json::json!({
                    "title": e.title,
                    "agency": e.agency,
                    "jurisdiction": e.jurisdiction,
                    "label": e.label,
                    "days_to_close": e.days_to_close,
                    "budget": e.budget_display,
                })
            })
            .collect();
        let request = CompletionRequest {
            system: "You are a senior tender analyst briefing a business development team."
                .to_string(),
            user: format!(
                "Today's statistics: {}\nTop tenders:\n{}\n\nWrite a 1-2 paragraph overview of the \
                 themes across today's top tenders and where the team should focus.",
                serde_json::json!(stats),
                serde_json::Value::Array(top)
            ),
            max_tokens: 400,
            temperature: 0.4,
        };
        match self.backend.complete(&request, self.timeout).await {
            Ok(text) => Authored {
                text,
                model: Some(self.backend.model().to_string()),
            },
            Err(err) => {
                warn!(error = %err, "digest narrative assist failed; using counts");
                Authored::template(count_narrative(stats, entries))
            }
        }
    }
}

/// The three assisted steps wired together.
#[derive(Clone)]
pub struct AssistSuite {
    pub rationale: Arc<dyn RationaleWriter>,
    pub links: Arc<dyn LinkExtractor>,
    pub narrator: Arc<dyn DigestNarrator>,
}

impl AssistSuite {
    pub fn deterministic() -> Self {
        Self {
            rationale: Arc::new(TemplateRationale),
            links: Arc::new(NoLinkExtraction),
            narrator: Arc::new(CountNarrator),
        }
    }

    pub fn with_backend(
        backend: Arc<dyn CompletionBackend>,
        assist_timeout: Duration,
        narrative_timeout: Duration,
    ) -> Self {
        Self {
            rationale: Arc::new(AssistedRationale::new(backend.clone(), assist_timeout)),
            links: Arc::new(AssistedLinkExtractor::new(backend.clone(), assist_timeout)),
            narrator: Arc::new(AssistedNarrator::new(backend, narrative_timeout)),
        }
    }

    /// Assisted when a key is configured, deterministic otherwise.
    pub fn from_config(
        config: &AssistConfig,
        assist_timeout: Duration,
        narrative_timeout: Duration,
    ) -> Self {
        if !config.is_enabled() {
            return Self::deterministic();
        }
        match ChatCompletionsClient::from_config(config) {
            Ok(client) => Self::with_backend(Arc::new(client), assist_timeout, narrative_timeout),
            Err(err) => {
                warn!(error = %err, "assist client unavailable; using deterministic fallbacks");
                Self::deterministic()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::{score_tender, KnownAgencies};
    use chrono::{NaiveDate, TimeZone, Utc};
    use tender_core::{
        BudgetSource, CapabilityProfile, Jurisdiction, Label, TenderDraft, TenderStatus,
    };

    fn sample() -> (Tender, Scorecard) {
        let today = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        let draft = TenderDraft {
            source_id: "hk-emsd".into(),
            raw_capture_id: None,
            jurisdiction: Jurisdiction::Hk,
            owner_type: "government".into(),
            source_url: None,
            mapping_version: "v1.0".into(),
            tender_ref: "EMSD(T)23/2025".into(),
            reference_is_synthetic: false,
            title: "Event management for open day".into(),
            description_snippet: None,
            agency: Some("EMSD".into()),
            category_tags: vec!["events_experiential".into()],
            raw_category: None,
            publish_date: Some(today),
            publish_date_estimated: false,
            closing_date: None,
            status: TenderStatus::Open,
            budget_min: None,
            budget_max: None,
            currency: Some("HKD".into()),
            budget_source: BudgetSource::Unknown,
        };
        let seen = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).single().unwrap();
        let tender = Tender::from_draft(7, draft, seen);
        let card = score_tender(
            &tender,
            &CapabilityProfile::default(),
            &KnownAgencies::default(),
            today,
        );
        (tender, card)
    }

    #[tokio::test]
    async fn assisted_rationale_records_model() {
        let (tender, card) = sample();
        let backend = Arc::new(ScriptedBackend::new().reply("Strong events fit."));
        let writer = AssistedRationale::new(backend.clone(), Duration::from_secs(1));
        let out = writer.rationale(&tender, &card).await;
        assert_eq!(out.text, "Strong events fit.");
        assert_eq!(out.model.as_deref(), Some("scripted"));
        let requests = backend.requests();
        assert!(requests[0].user.contains("top 2 positive signals"));
        assert!(requests[0].user.contains("EMSD(T)23/2025"));
    }

    #[tokio::test]
    async fn failed_rationale_falls_back_to_template() {
        let (tender, card) = sample();
        let backend = Arc::new(ScriptedBackend::new().fail("boom"));
        let writer = AssistedRationale::new(backend, Duration::from_secs(1));
        let out = writer.rationale(&tender, &card).await;
        assert!(out.model.is_none());
        assert_eq!(out.text, template_rationale(&card));
        assert!(out.text.contains("Main concern"));
    }

    #[test]
    fn candidate_parsing_is_strict() {
        let hub = "https://www.gov.sg/procurement";
        let urls = parse_candidate_urls(
            hub,
            r#"["/rss/tenders.xml", "relative.xml", "https://data.gov.sg/feed", "/rss/tenders.xml"]"#,
        )
        .expect("array");
        assert_eq!(
            urls,
            vec![
                "https://www.gov.sg/rss/tenders.xml".to_string(),
                "https://data.gov.sg/feed".to_string(),
            ]
        );
        assert!(parse_candidate_urls(hub, "Sure! Here are the feeds: /rss.xml").is_err());
        assert!(parse_candidate_urls(hub, r#"{"urls": []}"#).is_err());
    }

    #[tokio::test]
    async fn malformed_link_answer_yields_nothing() {
        let backend = Arc::new(ScriptedBackend::new().reply("not json"));
        let extractor = AssistedLinkExtractor::new(backend, Duration::from_secs(1));
        let urls = extractor
            .extract_candidate_urls("https://www.gov.sg/", &["https://www.gov.sg/a".to_string()])
            .await;
        assert!(urls.is_empty());
    }

    #[tokio::test]
    async fn narrator_falls_back_to_counts() {
        let stats = DigestStats {
            new_today: 2,
            open_priority: 1,
            closing_soon: 1,
            sources_ok: 3,
            sources_active: 4,
        };
        let out = CountNarrator.narrative(&stats, &[]).await;
        assert!(out.text.starts_with("No open tenders"));
        assert!(out.text.contains("3 of 4"));
    }

    #[test]
    fn sample_tender_is_worth_considering() {
        let (_, card) = sample();
        assert_eq!(card.label, Label::Consider);
        assert!(template_rationale(&card).starts_with("Scored consider at 0.61"));
    }
}
