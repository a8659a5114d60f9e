//! Persistence surface for the pipeline: one trait, a PostgREST-backed
//! implementation for production, and an in-memory one for tests and
//! keyless local runs.
//!
//! Writes are best-effort from the pipeline's point of view; the error
//! kinds here let it tell an expected row-level-security denial apart from
//! an outage.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::message::{Category, MessageRecord, RiskLevel, SenderHistory, Sentiment, Urgency};

pub mod memory;
pub mod rest;

pub use memory::MemoryStore;
pub use rest::RestStore;

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Row-level security said no. Expected for some writes under the anon
    /// role; callers log it quietly instead of alerting.
    #[error("store denied the operation: {0}")]
    Denied(String),
    #[error("record not found: {0}")]
    NotFound(String),
    /// Unique-constraint collision, e.g. a tag that already exists.
    #[error("duplicate record: {0}")]
    Conflict(String),
    /// Network failure, timeout, or 5xx from the store.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// The store answered but the payload or request shape was wrong.
    #[error("malformed store payload: {0}")]
    Invalid(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Which pipeline stage produced an audit row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    BaselineModeration,
    ContextualAnalysis,
    SelfHarmAssessment,
    Moderation,
    Categorization,
    Priority,
    CrisisAlert,
}

impl PipelineStage {
    pub fn as_str(self) -> &'static str {
        match self {
            PipelineStage::BaselineModeration => "baseline_moderation",
            PipelineStage::ContextualAnalysis => "contextual_analysis",
            PipelineStage::SelfHarmAssessment => "self_harm_assessment",
            PipelineStage::Moderation => "moderation",
            PipelineStage::Categorization => "categorization",
            PipelineStage::Priority => "priority",
            PipelineStage::CrisisAlert => "crisis_alert",
        }
    }
}

/// One audit row: what a stage concluded for a message and how long it took.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingLogEntry {
    pub message_id: String,
    pub stage: PipelineStage,
    pub result: serde_json::Value,
    pub elapsed_ms: u64,
    pub created_at: DateTime<Utc>,
}

impl ProcessingLogEntry {
    pub fn new(
        message_id: &str,
        stage: PipelineStage,
        result: serde_json::Value,
        elapsed_ms: u64,
    ) -> Self {
        Self {
            message_id: message_id.to_string(),
            stage,
            result,
            elapsed_ms,
            created_at: Utc::now(),
        }
    }
}

/// Fields the moderation stage writes onto a message.
#[derive(Debug, Clone)]
pub struct ModerationUpdate {
    pub moderation_score: f32,
    pub is_flagged: bool,
    /// Provider category names the baseline layer marked true.
    pub categories: Vec<String>,
    pub self_harm_risk: RiskLevel,
    /// When the self-harm layer was degraded, merge instead of overwrite:
    /// a risk level already on record is never lowered by a blind default.
    pub merge_risk: bool,
}

/// Fields the categorization stage writes onto a message.
#[derive(Debug, Clone, Copy)]
pub struct CategorizationUpdate {
    pub category: Category,
    pub sentiment: Sentiment,
    pub urgency: Urgency,
}

/// Store operations the pipeline needs. Message updates carry the run's
/// start time so a concurrent newer run is never overwritten by a stale
/// one: implementations skip the write (returning `Ok(false)`) when the
/// stored `processed_at` is already past `run_started_at`.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn fetch_message(&self, id: &str) -> StoreResult<MessageRecord>;

    /// Prior messages from the same link, newest first, excluding the
    /// message under processing. Also reports the total count beyond the
    /// sampled window.
    async fn sender_history(
        &self,
        vent_link_id: &str,
        exclude_id: &str,
        depth: usize,
    ) -> StoreResult<SenderHistory>;

    async fn apply_moderation(
        &self,
        id: &str,
        update: &ModerationUpdate,
        run_started_at: DateTime<Utc>,
    ) -> StoreResult<bool>;

    async fn apply_categorization(&self, id: &str, update: &CategorizationUpdate)
        -> StoreResult<()>;

    async fn apply_priority(
        &self,
        id: &str,
        score: i32,
        run_started_at: DateTime<Utc>,
    ) -> StoreResult<bool>;

    /// Returns `false` when the tag was already present.
    async fn insert_tag(&self, message_id: &str, tag: &str) -> StoreResult<bool>;

    /// Find a folder by owner and name, creating it on first use. Returns
    /// the folder id.
    async fn find_or_create_folder(&self, owner_id: &str, name: &str) -> StoreResult<String>;

    /// Returns `false` when the message was already in the folder.
    async fn assign_folder(&self, message_id: &str, folder_id: &str) -> StoreResult<bool>;

    async fn append_log(&self, entry: &ProcessingLogEntry) -> StoreResult<()>;
}

/// Trait object alias used by the pipeline and handlers.
pub type DynStore = Arc<dyn MessageStore>;
