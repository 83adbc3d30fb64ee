//! Core domain model and normalization rules for tender intelligence.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

pub mod categorize;
pub mod dates;
pub mod normalize;
pub mod profile;
pub mod reference;

pub use profile::{
    BudgetBand, BusinessWeights, CapabilityProfile, CapabilityWeights, OverallWeights,
    ScoringWeights,
};

pub const CRATE_NAME: &str = "tender-core";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} value: {value:?}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

/// Declares a fieldless enum persisted and serialized as a fixed snake_case string.
macro_rules! str_enum {
    ($(#[$meta:meta])* pub enum $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $text)] $variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim() {
                    $($text => Ok($name::$variant),)+
                    other => Err(UnknownVariant {
                        kind: stringify!($name),
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

str_enum! {
    /// How a source publishes its listings.
    pub enum SourceKind {
        RssXml => "rss_xml",
        ApiXml => "api_xml",
        HtmlList => "html_list",
        HtmlHub => "html_hub",
        HtmlReference => "html_reference",
    }
}

impl SourceKind {
    pub fn is_feed(&self) -> bool {
        matches!(self, SourceKind::RssXml | SourceKind::ApiXml)
    }
}

str_enum! {
    pub enum SourceStatus {
        Active => "active",
        PendingValidation => "pending_validation",
        Error => "error",
        Disabled => "disabled",
    }
}

impl SourceStatus {
    pub fn is_ingestible(&self) -> bool {
        matches!(self, SourceStatus::Active | SourceStatus::PendingValidation)
    }
}

str_enum! {
    /// Outcome of the most recent check against a source.
    pub enum HealthStatus {
        Ok => "ok",
        Error => "error",
    }
}

str_enum! {
    pub enum RawFormat {
        RssXml => "rss_xml",
        AtomXml => "atom_xml",
        TabularXml => "tabular_xml",
        HtmlRow => "html_row",
    }
}

str_enum! {
    pub enum TenderStatus {
        Open => "open",
        Closed => "closed",
        UnknownClosing => "unknown_closing",
    }
}

str_enum! {
    pub enum BudgetSource {
        Stated => "stated",
        Proxy => "proxy",
        Unknown => "unknown",
    }
}

str_enum! {
    pub enum EvaluationStatus {
        Pending => "pending",
        Scored => "scored",
    }
}

str_enum! {
    /// Verdict shown to reviewers, set by the evaluator or a human decision.
    pub enum Label {
        Unscored => "unscored",
        Priority => "priority",
        Consider => "consider",
        PartnerOnly => "partner_only",
        Ignore => "ignore",
    }
}

impl Label {
    /// Ordering used by the digest: lower ranks first.
    pub fn digest_rank(&self) -> u8 {
        match self {
            Label::Priority => 0,
            Label::Consider => 1,
            Label::PartnerOnly => 2,
            Label::Unscored | Label::Ignore => 3,
        }
    }
}

str_enum! {
    /// Persisted decision vocabulary.
    pub enum DecisionKind {
        Track => "track",
        Ignore => "ignore",
        PartnerNeeded => "partner_needed",
        NotForUs => "not_for_us",
        Assigned => "assigned",
    }
}

impl DecisionKind {
    /// Label a decision projects onto its tender, if any.
    pub fn implied_label(&self) -> Option<Label> {
        match self {
            DecisionKind::Track => Some(Label::Priority),
            DecisionKind::Ignore | DecisionKind::NotForUs => Some(Label::Ignore),
            DecisionKind::PartnerNeeded => Some(Label::PartnerOnly),
            DecisionKind::Assigned => None,
        }
    }
}

str_enum! {
    pub enum RunStatus {
        Success => "success",
        Partial => "partial",
        Failed => "failed",
        Skipped => "skipped",
    }
}

/// Governing territory of a source or tender. Unknown codes are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Jurisdiction {
    Hk,
    Sg,
    Other(String),
}

impl Jurisdiction {
    pub fn code(&self) -> &str {
        match self {
            Jurisdiction::Hk => "HK",
            Jurisdiction::Sg => "SG",
            Jurisdiction::Other(code) => code,
        }
    }

    pub fn default_currency(&self) -> Option<&'static str> {
        match self {
            Jurisdiction::Hk => Some("HKD"),
            Jurisdiction::Sg => Some("SGD"),
            Jurisdiction::Other(_) => None,
        }
    }
}

impl From<&str> for Jurisdiction {
    fn from(value: &str) -> Self {
        let code = value.trim().to_ascii_uppercase();
        match code.as_str() {
            "HK" => Jurisdiction::Hk,
            "SG" => Jurisdiction::Sg,
            _ => Jurisdiction::Other(code),
        }
    }
}

impl From<String> for Jurisdiction {
    fn from(value: String) -> Self {
        Jurisdiction::from(value.as_str())
    }
}

impl From<Jurisdiction> for String {
    fn from(value: Jurisdiction) -> Self {
        value.code().to_string()
    }
}

impl fmt::Display for Jurisdiction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Short hex digest over `parts` joined with `|`; used for synthetic guids and refs.
pub fn identity_hash(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(parts.join("|").as_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..16].to_string()
}

/// A feed or site definition as stored in the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub source_id: String,
    pub name: String,
    pub organisation: Option<String>,
    pub jurisdiction: Jurisdiction,
    pub owner_type: String,
    pub kind: SourceKind,
    pub access: String,
    pub priority: i32,
    pub status: SourceStatus,
    pub feed_url: Option<String>,
    pub base_url: Option<String>,
    pub hub_url: Option<String>,
    pub field_map: BTreeMap<String, String>,
    pub category_tags_default: Vec<String>,
    pub parsing_notes: Option<String>,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub last_status: Option<HealthStatus>,
    pub last_status_detail: Option<String>,
    pub discovered_from: Option<String>,
    pub discovered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Source {
    /// URL the agents should fetch for this source's kind.
    pub fn fetch_url(&self) -> Option<&str> {
        match self.kind {
            SourceKind::HtmlHub => self
                .hub_url
                .as_deref()
                .or(self.feed_url.as_deref())
                .or(self.base_url.as_deref()),
            SourceKind::HtmlList | SourceKind::HtmlReference => {
                self.feed_url.as_deref().or(self.base_url.as_deref())
            }
            SourceKind::RssXml | SourceKind::ApiXml => self.feed_url.as_deref(),
        }
    }

    /// True when the source was checked less than `window` ago.
    pub fn checked_within(&self, now: DateTime<Utc>, window: Duration) -> bool {
        if window <= Duration::zero() {
            return false;
        }
        self.last_checked_at
            .map(|checked| now - checked < window)
            .unwrap_or(false)
    }
}

fn default_owner_type() -> String {
    "government".to_string()
}

fn default_access() -> String {
    "public".to_string()
}

fn default_priority() -> i32 {
    2
}

fn default_status() -> SourceStatus {
    SourceStatus::Active
}

/// Registry insert payload; also the shape of each entry in the seed file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSource {
    pub source_id: String,
    pub name: String,
    #[serde(default)]
    pub organisation: Option<String>,
    pub jurisdiction: Jurisdiction,
    #[serde(default = "default_owner_type")]
    pub owner_type: String,
    pub kind: SourceKind,
    #[serde(default = "default_access")]
    pub access: String,
    #[serde(default = "default_priority")]
    pub priority: i32,
    #[serde(default = "default_status")]
    pub status: SourceStatus,
    #[serde(default)]
    pub feed_url: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub hub_url: Option<String>,
    #[serde(default)]
    pub field_map: BTreeMap<String, String>,
    #[serde(default)]
    pub category_tags_default: Vec<String>,
    #[serde(default)]
    pub parsing_notes: Option<String>,
    #[serde(default)]
    pub discovered_from: Option<String>,
    #[serde(default)]
    pub discovered_at: Option<DateTime<Utc>>,
}

impl NewSource {
    pub fn into_source(self, created_at: DateTime<Utc>) -> Source {
        Source {
            source_id: self.source_id,
            name: self.name,
            organisation: self.organisation,
            jurisdiction: self.jurisdiction,
            owner_type: self.owner_type,
            kind: self.kind,
            access: self.access,
            priority: self.priority,
            status: self.status,
            feed_url: self.feed_url,
            base_url: self.base_url,
            hub_url: self.hub_url,
            field_map: self.field_map,
            category_tags_default: self.category_tags_default,
            parsing_notes: self.parsing_notes,
            last_checked_at: None,
            last_status: None,
            last_status_detail: None,
            discovered_from: self.discovered_from,
            discovered_at: self.discovered_at,
            created_at,
        }
    }
}

/// Health fields written after every check of a source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceHealth {
    pub status: HealthStatus,
    pub detail: String,
    pub checked_at: DateTime<Utc>,
}

/// Fields a source hands over directly, before any normalization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreExtracted {
    pub title: Option<String>,
    pub publish_date: Option<String>,
    pub closing_date: Option<String>,
    pub agency: Option<String>,
    pub raw_category: Option<String>,
    pub tender_ref: Option<String>,
    pub description_snippet: Option<String>,
    pub budget: Option<String>,
    pub source_url: Option<String>,
}

/// One parsed item with a stable identity, as produced by the parsers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawItem {
    pub guid: String,
    pub title: String,
    pub link: Option<String>,
    pub published_at: Option<String>,
    pub description: Option<String>,
    pub format: RawFormat,
    pub payload: String,
    pub pre: PreExtracted,
}

/// Capture insert payload. Unique per `(source_id, guid)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRawCapture {
    pub source_id: String,
    pub format: RawFormat,
    pub payload: String,
    pub pre: PreExtracted,
    pub item_url: Option<String>,
    pub guid: String,
    pub captured_at: DateTime<Utc>,
}

impl NewRawCapture {
    pub fn from_item(source: &Source, item: RawItem, captured_at: DateTime<Utc>) -> Self {
        let item_url = item
            .link
            .clone()
            .or_else(|| item.pre.source_url.clone())
            .or_else(|| source.fetch_url().map(ToString::to_string));
        Self {
            source_id: source.source_id.clone(),
            format: item.format,
            payload: item.payload,
            pre: item.pre,
            item_url,
            guid: item.guid,
            captured_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawCapture {
    pub id: i64,
    pub source_id: String,
    pub format: RawFormat,
    pub payload: String,
    pub pre: PreExtracted,
    pub item_url: Option<String>,
    pub guid: String,
    pub captured_at: DateTime<Utc>,
    pub normalized: bool,
    pub tender_id: Option<i64>,
}

/// Normalized tender ready to be upserted on `(tender_ref, jurisdiction)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenderDraft {
    pub source_id: String,
    pub raw_capture_id: Option<i64>,
    pub jurisdiction: Jurisdiction,
    pub owner_type: String,
    pub source_url: Option<String>,
    pub mapping_version: String,
    pub tender_ref: String,
    pub reference_is_synthetic: bool,
    pub title: String,
    pub description_snippet: Option<String>,
    pub agency: Option<String>,
    pub category_tags: Vec<String>,
    pub raw_category: Option<String>,
    pub publish_date: Option<NaiveDate>,
    pub publish_date_estimated: bool,
    pub closing_date: Option<NaiveDate>,
    pub status: TenderStatus,
    pub budget_min: Option<f64>,
    pub budget_max: Option<f64>,
    pub currency: Option<String>,
    pub budget_source: BudgetSource,
}

/// Canonical persisted tender.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tender {
    pub id: i64,
    pub source_id: String,
    pub raw_capture_id: Option<i64>,
    pub jurisdiction: Jurisdiction,
    pub owner_type: String,
    pub source_url: Option<String>,
    pub mapping_version: String,
    pub tender_ref: String,
    pub reference_is_synthetic: bool,
    pub title: String,
    pub description_snippet: Option<String>,
    pub agency: Option<String>,
    pub category_tags: Vec<String>,
    pub raw_category: Option<String>,
    pub publish_date: Option<NaiveDate>,
    pub publish_date_estimated: bool,
    pub closing_date: Option<NaiveDate>,
    pub status: TenderStatus,
    pub budget_min: Option<f64>,
    pub budget_max: Option<f64>,
    pub currency: Option<String>,
    pub budget_source: BudgetSource,
    pub is_canonical: bool,
    pub canonical_id: Option<i64>,
    pub evaluation_status: EvaluationStatus,
    pub label: Label,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Tender {
    pub fn from_draft(id: i64, draft: TenderDraft, seen_at: DateTime<Utc>) -> Self {
        Self {
            id,
            source_id: draft.source_id,
            raw_capture_id: draft.raw_capture_id,
            jurisdiction: draft.jurisdiction,
            owner_type: draft.owner_type,
            source_url: draft.source_url,
            mapping_version: draft.mapping_version,
            tender_ref: draft.tender_ref,
            reference_is_synthetic: draft.reference_is_synthetic,
            title: draft.title,
            description_snippet: draft.description_snippet,
            agency: draft.agency,
            category_tags: draft.category_tags,
            raw_category: draft.raw_category,
            publish_date: draft.publish_date,
            publish_date_estimated: draft.publish_date_estimated,
            closing_date: draft.closing_date,
            status: draft.status,
            budget_min: draft.budget_min,
            budget_max: draft.budget_max,
            currency: draft.currency,
            budget_source: draft.budget_source,
            is_canonical: true,
            canonical_id: None,
            evaluation_status: EvaluationStatus::Pending,
            label: Label::Unscored,
            first_seen_at: seen_at,
            last_seen_at: seen_at,
            updated_at: seen_at,
        }
    }

    /// Published budget, only when the source actually stated one.
    pub fn stated_budget(&self) -> Option<f64> {
        if self.budget_source != BudgetSource::Stated {
            return None;
        }
        self.budget_max.or(self.budget_min)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CapabilitySignals {
    pub category_match: f64,
    pub agency_familiarity: f64,
    pub delivery_scale: f64,
    pub keyword_overlap: f64,
    pub geographic_fit: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BusinessSignals {
    pub budget: f64,
    pub budget_proxy: f64,
    pub strategic_beachhead: f64,
    pub category_growth: f64,
    pub time_to_deadline: f64,
    pub recurrence_potential: f64,
}

/// Raw 0–1 signal values behind one evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SignalBreakdown {
    pub capability: CapabilitySignals,
    pub business: BusinessSignals,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEvaluation {
    pub tender_id: i64,
    pub tender_ref: String,
    pub capability_fit: f64,
    pub business_potential: f64,
    pub overall: f64,
    pub label: Label,
    pub rationale: String,
    pub signals: SignalBreakdown,
    pub weights: ScoringWeights,
    pub profile_version: String,
    pub profile_snapshot: serde_json::Value,
    pub model_used: Option<String>,
    pub evaluated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub id: i64,
    pub is_latest: bool,
    #[serde(flatten)]
    pub body: NewEvaluation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDecision {
    pub tender_id: i64,
    pub decision: DecisionKind,
    pub notes: Option<String>,
    pub assignee: Option<String>,
    pub pipeline_stage: Option<String>,
    pub decided_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub id: i64,
    #[serde(flatten)]
    pub body: NewDecision,
}

/// One row per agent run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRunLog {
    pub run_id: Uuid,
    pub agent_name: String,
    pub status: RunStatus,
    pub items_processed: i64,
    pub new_items: i64,
    pub detail: Option<String>,
    pub error_detail: Option<String>,
    pub metadata: serde_json::Value,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl NewRunLog {
    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRunLog {
    pub id: i64,
    #[serde(flatten)]
    pub body: NewRunLog,
}
