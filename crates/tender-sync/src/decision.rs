//! Decision recorder: appends a human decision and projects it onto the tender's label.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tender_core::{DecisionKind, Label, NewDecision};
use tender_storage::{StoreError, TenderStore};
use thiserror::Error;
use tracing::info;

/// Caller-facing decision vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionAction {
    Track,
    Ignore,
    PartnerOnly,
    NotForUs,
    AssignToTeam,
}

impl DecisionAction {
    pub fn persisted(&self) -> DecisionKind {
        match self {
            DecisionAction::Track => DecisionKind::Track,
            DecisionAction::Ignore => DecisionKind::Ignore,
            DecisionAction::PartnerOnly => DecisionKind::PartnerNeeded,
            DecisionAction::NotForUs => DecisionKind::NotForUs,
            DecisionAction::AssignToTeam => DecisionKind::Assigned,
        }
    }
}

#[derive(Debug, Error)]
pub enum DecisionError {
    #[error("unknown decision action: {0}")]
    UnknownAction(String),
    #[error("tender {0} not found")]
    TenderNotFound(i64),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl FromStr for DecisionAction {
    type Err = DecisionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "track" => Ok(DecisionAction::Track),
            "ignore" => Ok(DecisionAction::Ignore),
            "partner_only" | "partner" => Ok(DecisionAction::PartnerOnly),
            "not_for_us" | "not-for-us" => Ok(DecisionAction::NotForUs),
            "assign_to_team" | "assign" => Ok(DecisionAction::AssignToTeam),
            other => Err(DecisionError::UnknownAction(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionRequest {
    pub tender_id: i64,
    pub action: DecisionAction,
    pub notes: Option<String>,
    pub assignee: Option<String>,
    pub pipeline_stage: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionReceipt {
    pub decision_id: i64,
    pub tender_id: i64,
    pub decision: DecisionKind,
    /// Label the tender now carries, when the decision changed it.
    pub label: Option<Label>,
}

pub async fn record_decision(
    store: &dyn TenderStore,
    request: DecisionRequest,
    now: DateTime<Utc>,
) -> Result<DecisionReceipt, DecisionError> {
    if store.get_tender(request.tender_id).await?.is_none() {
        return Err(DecisionError::TenderNotFound(request.tender_id));
    }
    let decision = request.action.persisted();
    let decision_id = store
        .insert_decision(&NewDecision {
            tender_id: request.tender_id,
            decision,
            notes: request.notes,
            assignee: request.assignee,
            pipeline_stage: request.pipeline_stage,
            decided_at: now,
        })
        .await?;

    let label = decision.implied_label();
    if let Some(label) = label {
        store.set_tender_label(request.tender_id, label).await?;
    }
    info!(tender_id = request.tender_id, decision = %decision, "decision recorded");
    Ok(DecisionReceipt {
        decision_id,
        tender_id: request.tender_id,
        decision,
        label,
    })
}
