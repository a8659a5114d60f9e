//! Stage orchestration: fan the inference layers out, fold their answers
//! into verdicts, and persist through the store with the stale-write guard.
//!
//! Every stage degrades instead of failing: a dead inference layer falls
//! back to its safe default, a denied write keeps the result in the
//! response, and only a genuinely unavailable store aborts a run.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::categorize;
use crate::config::{ModerationWeights, ScoringHandle};
use crate::inference::{
    BaselineModeration, CategorizationResult, ContextualAnalysis, DynInference, InferenceError,
    PriorityContext, SelfHarmAssessment,
};
use crate::message::{
    Category, MessageRecord, RiskLevel, SenderHistory, Sentiment, Severity, Urgency,
};
use crate::moderation::{self, ModerationInputs, ModerationVerdict};
use crate::notify::{CrisisAlert, CrisisNotifier, DispatchReport};
use crate::priority::{self, PriorityInputs, PriorityResult};
use crate::signals;
use crate::store::{
    CategorizationUpdate, DynStore, ModerationUpdate, PipelineStage, ProcessingLogEntry,
    StoreError, StoreResult,
};

/// Tag attached to messages the queue decision picks up.
pub const NEEDS_RESPONSE_TAG: &str = "needs-response";

/// Timing and failure record for one inference layer, kept for the audit
/// trail alongside the layer's actual output inside the verdict.
#[derive(Debug, Clone, Serialize)]
pub struct LayerReport {
    pub stage: PipelineStage,
    pub ok: bool,
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Store-free moderation output, shared by the pre-submission check and the
/// stored-message run.
#[derive(Debug, Clone, Serialize)]
pub struct ModerationOutcome {
    pub verdict: ModerationVerdict,
    pub layers: Vec<LayerReport>,
    pub elapsed_ms: u64,
}

/// Moderation of a stored message, including what made it to the store.
#[derive(Debug, Clone, Serialize)]
pub struct ModerationRun {
    pub verdict: ModerationVerdict,
    pub layers: Vec<LayerReport>,
    /// False when the write was skipped (stale run) or denied.
    pub persisted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert: Option<DispatchReport>,
}

/// Categorization of a stored message. `result` is `None` when the model
/// was unavailable; nothing is written in that case.
#[derive(Debug, Clone, Serialize)]
pub struct CategorizationRun {
    pub result: Option<CategorizationResult>,
    pub new_tags: Vec<String>,
    pub folder: Option<&'static str>,
    pub persisted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Priority scoring of a stored message.
#[derive(Debug, Clone, Serialize)]
pub struct PriorityRun {
    pub result: PriorityResult,
    pub persisted: bool,
}

/// Caller-supplied stand-ins for fields categorization has not filled yet.
#[derive(Debug, Clone, Copy, Default)]
pub struct PriorityOverrides {
    pub category: Option<Category>,
    pub sentiment: Option<Sentiment>,
    pub urgency: Option<Urgency>,
}

/// Outcome of a full three-stage run. Stages that hit a store failure are
/// absent here and described in `errors`; the others still completed.
#[derive(Debug, Serialize)]
pub struct ProcessSummary {
    pub message_id: String,
    pub moderation: Option<ModerationRun>,
    pub categorization: Option<CategorizationRun>,
    pub priority: Option<PriorityRun>,
    pub errors: Vec<String>,
    pub elapsed_ms: u64,
}

pub struct Pipeline {
    inference: DynInference,
    store: DynStore,
    scoring: ScoringHandle,
    notifier: Arc<CrisisNotifier>,
}

impl Pipeline {
    pub fn new(
        inference: DynInference,
        store: DynStore,
        scoring: ScoringHandle,
        notifier: Arc<CrisisNotifier>,
    ) -> Self {
        Self {
            inference,
            store,
            scoring,
            notifier,
        }
    }

    pub fn store(&self) -> &DynStore {
        &self.store
    }

    pub fn scoring(&self) -> &ScoringHandle {
        &self.scoring
    }

    /// Run the three moderation layers concurrently and merge them with the
    /// local signals. Never touches the store, so it also serves
    /// pre-submission checks on unsaved drafts.
    pub async fn moderate_text(&self, body: &str, history: &SenderHistory) -> ModerationOutcome {
        let started = Instant::now();
        let signals = signals::extract(body);

        let baseline_fut = timed(self.inference.baseline_moderation(body));
        let contextual_fut = timed(self.inference.contextual_analysis(body, &history.recent));
        let self_harm_fut = timed(self.inference.self_harm_assessment(body, &history.recent));
        let (baseline_out, contextual_out, self_harm_out) =
            tokio::join!(baseline_fut, contextual_fut, self_harm_fut);

        let mut layers = Vec::with_capacity(3);
        let (baseline, baseline_available) = settle(
            PipelineStage::BaselineModeration,
            baseline_out,
            BaselineModeration::unavailable,
            &mut layers,
        );
        let (contextual, contextual_available) = settle(
            PipelineStage::ContextualAnalysis,
            contextual_out,
            ContextualAnalysis::unavailable,
            &mut layers,
        );
        let (self_harm, self_harm_available) = settle(
            PipelineStage::SelfHarmAssessment,
            self_harm_out,
            SelfHarmAssessment::unavailable,
            &mut layers,
        );

        let weights = self.scoring.current().moderation;
        let verdict = moderation::combine(
            ModerationInputs {
                baseline,
                baseline_available,
                contextual,
                contextual_available,
                self_harm,
                self_harm_available,
                signals,
            },
            &weights,
        );

        if verdict.flagged {
            counter!("messages_flagged_total").increment(1);
        }
        let elapsed_ms = started.elapsed().as_millis() as u64;
        histogram!("stage_elapsed_ms", "stage" => "moderation").record(elapsed_ms as f64);
        ModerationOutcome {
            verdict,
            layers,
            elapsed_ms,
        }
    }

    /// Moderate a stored message: history-aware layers, persisted verdict,
    /// audit rows, and the crisis path. Callers that already hold the
    /// sender's history (the trigger request carries it) pass it in;
    /// otherwise it is fetched from the store.
    pub async fn moderate_message(
        &self,
        msg: &MessageRecord,
        history: Option<SenderHistory>,
        run_started_at: DateTime<Utc>,
    ) -> StoreResult<ModerationRun> {
        counter!("scoring_runs_total", "stage" => "moderation").increment(1);
        let history = match history {
            Some(h) => h,
            None => self.history_for(msg).await,
        };
        let outcome = self.moderate_text(&msg.body, &history).await;
        let ModerationOutcome {
            verdict,
            layers,
            elapsed_ms,
        } = outcome;

        // A degraded self-harm layer must not overwrite a risk level already
        // on record with its blind default.
        let self_harm_degraded = verdict.degraded_layers.contains(&"self_harm_assessment");
        let update = ModerationUpdate {
            moderation_score: verdict.combined_score,
            is_flagged: verdict.stored_flag(),
            categories: verdict.baseline.flagged_categories(),
            self_harm_risk: verdict.self_harm.risk_level,
            merge_risk: self_harm_degraded,
        };
        let persisted = match self
            .store
            .apply_moderation(&msg.id, &update, run_started_at)
            .await
        {
            Ok(wrote) => {
                if !wrote {
                    debug!(message = %msg.id, "moderation write skipped; newer run already on record");
                }
                wrote
            }
            Err(StoreError::Denied(reason)) => {
                counter!("store_write_failures_total", "stage" => "moderation").increment(1);
                debug!(message = %msg.id, %reason, "moderation write denied; verdict kept in response only");
                false
            }
            Err(e) => {
                counter!("store_write_failures_total", "stage" => "moderation").increment(1);
                warn!(message = %msg.id, error = %e, "moderation write failed");
                return Err(e);
            }
        };

        for layer in layers.iter().filter(|l| !l.ok) {
            self.audit(ProcessingLogEntry::new(
                &msg.id,
                layer.stage,
                json!({ "error": layer.error }),
                layer.elapsed_ms,
            ))
            .await;
        }
        self.audit(ProcessingLogEntry::new(
            &msg.id,
            PipelineStage::Moderation,
            json!({
                "flagged": verdict.flagged,
                "severity": verdict.severity,
                "combined_score": verdict.combined_score,
                "requires_human_review": verdict.requires_human_review,
                "recommended_action": verdict.recommended_action,
                "degraded_layers": verdict.degraded_layers,
                "persisted": persisted,
            }),
            elapsed_ms,
        ))
        .await;

        let alert = if verdict.self_harm.needs_alert() {
            counter!("crisis_alerts_total").increment(1);
            let alert = CrisisAlert {
                message_id: msg.id.clone(),
                vent_link_id: msg.vent_link_id.clone(),
                risk_level: verdict.self_harm.risk_level,
                requires_immediate_attention: verdict.self_harm.requires_immediate_attention,
                indicators: verdict.self_harm.indicators.clone(),
                recommended_action: verdict.self_harm.recommended_action,
                ts: Utc::now(),
            };
            let report = self.notifier.dispatch(&alert).await;
            self.audit(ProcessingLogEntry::new(
                &msg.id,
                PipelineStage::CrisisAlert,
                json!({
                    "risk_level": alert.risk_level,
                    "indicators": alert.indicators,
                    "recommended_action": alert.recommended_action,
                    "suppressed": report.suppressed,
                    "unconfigured": report.unconfigured,
                    "delivered": report.delivered,
                    "failed": report.failed,
                }),
                0,
            ))
            .await;
            Some(report)
        } else {
            None
        };

        Ok(ModerationRun {
            verdict,
            layers,
            persisted,
            alert,
        })
    }

    /// Categorize a stored message and execute the idempotent write plan.
    /// A dead model skips the stage entirely rather than filing under a
    /// guessed category.
    pub async fn categorize_message(&self, msg: &MessageRecord) -> StoreResult<CategorizationRun> {
        counter!("scoring_runs_total", "stage" => "categorization").increment(1);
        let (outcome, elapsed_ms) = timed(self.inference.categorize(&msg.body)).await;
        histogram!("stage_elapsed_ms", "stage" => "categorization").record(elapsed_ms as f64);

        let result = match outcome {
            Ok(r) => r,
            Err(e) => {
                counter!("inference_layer_failures_total", "layer" => "categorization")
                    .increment(1);
                warn!(message = %msg.id, error = %e, "categorization unavailable; leaving message unfiled");
                self.audit(ProcessingLogEntry::new(
                    &msg.id,
                    PipelineStage::Categorization,
                    json!({ "error": e.to_string() }),
                    elapsed_ms,
                ))
                .await;
                return Ok(CategorizationRun {
                    result: None,
                    new_tags: Vec::new(),
                    folder: None,
                    persisted: false,
                    error: Some(e.to_string()),
                });
            }
        };

        // Dedup against tags already on the message rides on the store's
        // idempotent insert, so the plan only needs batch-local hygiene.
        let plan = categorize::plan(result, &[]);
        let update = CategorizationUpdate {
            category: plan.result.category,
            sentiment: plan.result.sentiment,
            urgency: plan.result.urgency,
        };
        let persisted = match self.store.apply_categorization(&msg.id, &update).await {
            Ok(()) => true,
            Err(StoreError::Denied(reason)) => {
                counter!("store_write_failures_total", "stage" => "categorization").increment(1);
                debug!(message = %msg.id, %reason, "categorization write denied");
                false
            }
            Err(e) => {
                counter!("store_write_failures_total", "stage" => "categorization").increment(1);
                warn!(message = %msg.id, error = %e, "categorization write failed");
                return Err(e);
            }
        };

        let mut applied_tags = Vec::new();
        for tag in &plan.new_tags {
            match self.store.insert_tag(&msg.id, tag).await {
                Ok(true) => applied_tags.push(tag.clone()),
                Ok(false) | Err(StoreError::Conflict(_)) => {}
                Err(e) => {
                    counter!("store_write_failures_total", "stage" => "tags").increment(1);
                    warn!(message = %msg.id, tag = %tag, error = %e, "tag insert failed");
                }
            }
        }

        let folder = match (&msg.owner_id, plan.folder) {
            (Some(owner_id), Some(name)) => match self.file_into_folder(msg, owner_id, name).await
            {
                Ok(()) => Some(name),
                Err(e) => {
                    counter!("store_write_failures_total", "stage" => "folders").increment(1);
                    warn!(message = %msg.id, folder = name, error = %e, "folder assignment failed");
                    None
                }
            },
            (None, Some(name)) => {
                debug!(message = %msg.id, folder = name, "no owner on record; skipping folder assignment");
                None
            }
            _ => None,
        };

        self.audit(ProcessingLogEntry::new(
            &msg.id,
            PipelineStage::Categorization,
            json!({
                "category": plan.result.category,
                "sentiment": plan.result.sentiment,
                "urgency": plan.result.urgency,
                "confidence": plan.result.confidence,
                "new_tags": applied_tags,
                "folder": folder,
                "persisted": persisted,
            }),
            elapsed_ms,
        ))
        .await;

        Ok(CategorizationRun {
            result: Some(plan.result),
            new_tags: applied_tags,
            folder,
            persisted,
            error: None,
        })
    }

    async fn file_into_folder(
        &self,
        msg: &MessageRecord,
        owner_id: &str,
        name: &'static str,
    ) -> StoreResult<()> {
        let folder_id = self.store.find_or_create_folder(owner_id, name).await?;
        self.store.assign_folder(&msg.id, &folder_id).await?;
        Ok(())
    }

    /// Score a stored message's priority and persist the rank. Overrides
    /// stand in for category fields when categorization has not run yet.
    pub async fn prioritize_message(
        &self,
        msg: &MessageRecord,
        overrides: PriorityOverrides,
        run_started_at: DateTime<Utc>,
    ) -> StoreResult<PriorityRun> {
        counter!("scoring_runs_total", "stage" => "priority").increment(1);
        let cfg = self.scoring.current();
        let history = self.history_for(msg).await;
        let now = Utc::now();
        let moderation_severity = stored_severity(msg, &cfg.moderation);

        let ctx = PriorityContext {
            body: msg.body.clone(),
            category: overrides.category.or(msg.category),
            sentiment: overrides.sentiment.or(msg.sentiment),
            urgency: overrides.urgency.or(msg.urgency),
            moderation_severity,
            self_harm_risk: msg.self_harm_risk,
            age_hours: priority::age_hours(msg.created_at, now),
            has_response: msg.has_response,
            history,
        };

        let (model_out, elapsed_ms) = timed(self.inference.score_priority(&ctx)).await;
        histogram!("stage_elapsed_ms", "stage" => "priority").record(elapsed_ms as f64);
        let (model, degraded, layer_error) = match model_out {
            Ok(m) => (m, false, None),
            Err(e) => {
                counter!("inference_layer_failures_total", "layer" => "priority").increment(1);
                warn!(message = %msg.id, error = %e, "priority model unavailable; using heuristic base");
                (
                    priority::fallback_model(&msg.body, &cfg.priority),
                    true,
                    Some(e.to_string()),
                )
            }
        };

        let inputs = PriorityInputs {
            created_at: msg.created_at,
            has_response: msg.has_response,
            self_harm_risk: msg.self_harm_risk,
            moderation_severity,
        };
        let result = priority::compute(&model, &inputs, &cfg.priority, now, degraded);

        let persisted = match self
            .store
            .apply_priority(&msg.id, result.priority_score, run_started_at)
            .await
        {
            Ok(wrote) => {
                if !wrote {
                    debug!(message = %msg.id, "priority write skipped; newer run already on record");
                }
                wrote
            }
            Err(StoreError::Denied(reason)) => {
                counter!("store_write_failures_total", "stage" => "priority").increment(1);
                debug!(message = %msg.id, %reason, "priority write denied; score kept in response only");
                false
            }
            Err(e) => {
                counter!("store_write_failures_total", "stage" => "priority").increment(1);
                warn!(message = %msg.id, error = %e, "priority write failed");
                return Err(e);
            }
        };

        if result.queue_for_response {
            match self.store.insert_tag(&msg.id, NEEDS_RESPONSE_TAG).await {
                Ok(_) | Err(StoreError::Conflict(_)) => {}
                Err(e) => {
                    counter!("store_write_failures_total", "stage" => "tags").increment(1);
                    warn!(message = %msg.id, error = %e, "queue tag insert failed");
                }
            }
        }

        self.audit(ProcessingLogEntry::new(
            &msg.id,
            PipelineStage::Priority,
            json!({
                "priority_score": result.priority_score,
                "base_score": result.base_score,
                "time_decay_applied": result.time_decay_applied,
                "response_dampened": result.response_dampened,
                "is_question": result.is_question,
                "is_complaint": result.is_complaint,
                "is_crisis": result.is_crisis,
                "queue_for_response": result.queue_for_response,
                "degraded": degraded,
                "error": layer_error,
                "persisted": persisted,
            }),
            elapsed_ms,
        ))
        .await;

        Ok(PriorityRun { result, persisted })
    }

    /// Full run: moderation, categorization, priority, in that order. A
    /// store failure in one stage is recorded and the rest still run; only
    /// a failed initial fetch aborts.
    pub async fn process_message(&self, message_id: &str) -> StoreResult<ProcessSummary> {
        let started = Instant::now();
        let run_started_at = Utc::now();
        let mut msg = self.store.fetch_message(message_id).await?;
        let mut errors = Vec::new();

        let moderation = match self.moderate_message(&msg, None, run_started_at).await {
            Ok(run) => Some(run),
            Err(e) => {
                errors.push(format!("moderation: {e}"));
                None
            }
        };
        // Later stages read moderation fields off the record; mirror what
        // was just written instead of refetching.
        if let Some(run) = &moderation {
            msg.moderation_score = Some(run.verdict.combined_score);
            msg.is_flagged = run.verdict.stored_flag();
            msg.moderation_categories = run.verdict.baseline.flagged_categories();
            if !run.verdict.degraded_layers.contains(&"self_harm_assessment") {
                msg.self_harm_risk = Some(run.verdict.self_harm.risk_level);
            }
        }

        let categorization = match self.categorize_message(&msg).await {
            Ok(run) => Some(run),
            Err(e) => {
                errors.push(format!("categorization: {e}"));
                None
            }
        };
        if let Some(result) = categorization.as_ref().and_then(|run| run.result.as_ref()) {
            msg.category = Some(result.category);
            msg.sentiment = Some(result.sentiment);
            msg.urgency = Some(result.urgency);
        }

        let priority = match self
            .prioritize_message(&msg, PriorityOverrides::default(), run_started_at)
            .await
        {
            Ok(run) => Some(run),
            Err(e) => {
                errors.push(format!("priority: {e}"));
                None
            }
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        counter!("messages_processed_total").increment(1);
        info!(
            message = %message_id,
            link = %signals::anon_hash(&msg.vent_link_id),
            flagged = moderation.as_ref().map(|m| m.verdict.flagged).unwrap_or(false),
            priority = priority.as_ref().map(|p| p.result.priority_score).unwrap_or(0),
            stage_errors = errors.len(),
            elapsed_ms,
            "message processed"
        );

        Ok(ProcessSummary {
            message_id: message_id.to_string(),
            moderation,
            categorization,
            priority,
            errors,
            elapsed_ms,
        })
    }

    /// Fetch a message for the single-stage endpoints.
    pub async fn fetch_message(&self, message_id: &str) -> StoreResult<MessageRecord> {
        self.store.fetch_message(message_id).await
    }

    /// Recent history for the message's link. History is context, not
    /// ground truth, so a store failure degrades to an empty window.
    async fn history_for(&self, msg: &MessageRecord) -> SenderHistory {
        let depth = self.scoring.current().priority.history_depth;
        match self
            .store
            .sender_history(&msg.vent_link_id, &msg.id, depth)
            .await
        {
            Ok(history) => history,
            Err(e) => {
                warn!(
                    link = %signals::anon_hash(&msg.vent_link_id),
                    error = %e,
                    "sender history unavailable; scoring without context"
                );
                SenderHistory::default()
            }
        }
    }

    /// Audit rows are best-effort: losing one is logged, never fatal.
    async fn audit(&self, entry: ProcessingLogEntry) {
        if let Err(e) = self.store.append_log(&entry).await {
            counter!("store_write_failures_total", "stage" => "processing_log").increment(1);
            warn!(stage = entry.stage.as_str(), error = %e, "audit append failed");
        }
    }
}

async fn timed<T>(
    fut: impl std::future::Future<Output = Result<T, InferenceError>>,
) -> (Result<T, InferenceError>, u64) {
    let started = Instant::now();
    let out = fut.await;
    (out, started.elapsed().as_millis() as u64)
}

/// Resolve one layer future: record its report, count failures, and fall
/// back to the layer's safe default when it did not answer.
fn settle<T>(
    stage: PipelineStage,
    out: (Result<T, InferenceError>, u64),
    unavailable: fn() -> T,
    layers: &mut Vec<LayerReport>,
) -> (T, bool) {
    let (result, elapsed_ms) = out;
    histogram!("inference_layer_ms", "layer" => stage.as_str()).record(elapsed_ms as f64);
    match result {
        Ok(value) => {
            layers.push(LayerReport {
                stage,
                ok: true,
                elapsed_ms,
                error: None,
            });
            (value, true)
        }
        Err(e) => {
            counter!("inference_layer_failures_total", "layer" => stage.as_str()).increment(1);
            warn!(layer = stage.as_str(), error = %e, "inference layer degraded");
            layers.push(LayerReport {
                stage,
                ok: false,
                elapsed_ms,
                error: Some(e.to_string()),
            });
            (unavailable(), false)
        }
    }
}

/// Reconstruct a severity band from what the message row stores, mirroring
/// the verdict ladder. `None` when the message has never been moderated.
fn stored_severity(msg: &MessageRecord, weights: &ModerationWeights) -> Option<Severity> {
    if msg.self_harm_risk.is_none() && msg.moderation_score.is_none() {
        return None;
    }
    let risk = msg.self_harm_risk.unwrap_or_default();
    let score = msg.moderation_score.unwrap_or(0.0);
    Some(if risk == RiskLevel::Critical {
        Severity::Critical
    } else if risk == RiskLevel::High || score > weights.severity_high {
        Severity::High
    } else if score > weights.severity_medium {
        Severity::Medium
    } else if score > weights.severity_low {
        Severity::Low
    } else {
        Severity::None
    })
}
