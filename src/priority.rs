//! Priority scoring: deterministic post-processing of the model's base
//! score into the final 1-100 rank, with time decay, crisis overrides,
//! responded-message dampening, and the needs-response queue decision.
//!
//! Like the moderation verdict, `compute` is pure: all clock and store
//! access stays in the pipeline.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::PriorityRules;
use crate::inference::{PriorityFactors, PriorityModel};
use crate::message::{clamp_priority, RiskLevel, Severity};
use crate::signals;

/// Message-level facts the deterministic steps need beyond the model output.
#[derive(Debug, Clone)]
pub struct PriorityInputs {
    pub created_at: DateTime<Utc>,
    pub has_response: bool,
    pub self_harm_risk: Option<RiskLevel>,
    pub moderation_severity: Option<Severity>,
}

/// Final priority outcome for one message.
#[derive(Debug, Clone, Serialize)]
pub struct PriorityResult {
    /// Final rank in 1..=100.
    pub priority_score: i32,
    /// Model base after clamping, before decay/overrides.
    pub base_score: i32,
    /// Score after decay/overrides, before response dampening.
    pub time_decay_adjusted: i32,
    pub time_decay_applied: bool,
    pub response_dampened: bool,
    pub factors: PriorityFactors,
    pub is_question: bool,
    pub is_complaint: bool,
    pub is_crisis: bool,
    pub requires_response: Option<bool>,
    pub queue_for_response: bool,
    pub reasoning: String,
    pub recommendations: Vec<String>,
    /// True when the model was unavailable and the heuristic base was used.
    pub degraded: bool,
}

/// Non-negative message age in fractional hours.
pub fn age_hours(created_at: DateTime<Utc>, now: DateTime<Utc>) -> f32 {
    let secs = (now - created_at).num_seconds();
    (secs.max(0) as f32) / 3600.0
}

/// Linear decay multiplier over the configured window, never below the
/// floor.
pub fn decay_multiplier(age_hours: f32, rules: &PriorityRules) -> f32 {
    (1.0 - age_hours / rules.decay_window_hours).max(rules.decay_floor)
}

/// Stand-in model output when the scoring call failed: fixed base with the
/// cheap question heuristic, so overrides and queueing still work.
pub fn fallback_model(body: &str, rules: &PriorityRules) -> PriorityModel {
    PriorityModel {
        base_score: rules.fallback_base_score as i64,
        is_question: signals::looks_like_question(body),
        reasoning: "priority model unavailable; heuristic fallback".to_string(),
        ..Default::default()
    }
}

/// Apply the deterministic steps to a model judgment.
pub fn compute(
    model: &PriorityModel,
    inputs: &PriorityInputs,
    rules: &PriorityRules,
    now: DateTime<Utc>,
    degraded: bool,
) -> PriorityResult {
    let base_score = clamp_priority(model.base_score);
    let age = age_hours(inputs.created_at, now);
    let risk = inputs.self_harm_risk.unwrap_or_default();
    let is_crisis = model.is_crisis || risk.is_crisis();

    // 1) Overrides, highest first. The crisis override returns a pinned 100
    //    and skips both decay and response dampening; a critical moderation
    //    verdict pins 95 but still dampens later.
    let crisis_pinned = risk.is_crisis();
    let exempt_from_decay = model.is_question || model.is_complaint || is_crisis;
    let (time_decay_adjusted, time_decay_applied) = if crisis_pinned {
        (100, false)
    } else if inputs.moderation_severity == Some(Severity::Critical) {
        (95, false)
    } else if !exempt_from_decay && age > rules.decay_min_age_hours {
        let decayed = (base_score as f32 * decay_multiplier(age, rules)).round() as i32;
        (decayed, true)
    } else {
        (base_score, false)
    };

    // 2) Responded messages drop to a fraction of their rank. Crisis keeps
    //    its pinned score so the owner still sees it on top.
    let (score, response_dampened) = if inputs.has_response && !crisis_pinned {
        let dampened = (time_decay_adjusted as f32 * rules.responded_dampening)
            .round()
            .max(1.0) as i32;
        (dampened, true)
    } else {
        (time_decay_adjusted, false)
    };

    // 3) Clamp into the band the dashboard sorts on.
    let priority_score = clamp_priority(score as i64);

    // 4) Needs-response queue. Responded messages never queue again.
    let queue_for_response = !inputs.has_response
        && ((priority_score >= rules.queue_general_threshold
            && model.requires_response != Some(false))
            || is_crisis
            || (model.is_question && priority_score >= rules.queue_question_threshold)
            || (model.is_complaint && priority_score >= rules.queue_complaint_threshold));

    PriorityResult {
        priority_score,
        base_score,
        time_decay_adjusted,
        time_decay_applied,
        response_dampened,
        factors: model.factors,
        is_question: model.is_question,
        is_complaint: model.is_complaint,
        is_crisis,
        requires_response: model.requires_response,
        queue_for_response,
        reasoning: model.reasoning.clone(),
        recommendations: model.recommendations.clone(),
        degraded,
    }
}
