//! Moderation verdict: merge the three inference layers and the local
//! signals into one flag/severity decision.
//!
//! `combine` is a pure function so the whole decision table is unit-testable
//! without any network or store. The pipeline owns fetching inputs and
//! persisting the outcome.

use serde::Serialize;

use crate::config::ModerationWeights;
use crate::inference::{BaselineModeration, ContextualAnalysis, SelfHarmAssessment};
use crate::message::{clamp01, FalsePositiveRisk, RecommendedAction, RiskLevel, Severity};
use crate::signals::SignalReport;

/// Message shown to a sender whose draft tripped the crisis path.
pub const BLOCK_REASON_CRISIS: &str = "It sounds like you might be going through a difficult time. \
Before this message is sent, please consider reaching out for support - in the US you can call or \
text 988 (Suicide & Crisis Lifeline), or find international options at findahelpline.com.";

/// Message shown for ordinary content-rule blocks.
pub const BLOCK_REASON_CONTENT: &str =
    "This message can't be delivered because it doesn't meet the content guidelines for this inbox.";

/// Everything `combine` needs: each layer's result plus whether the layer
/// actually answered (a degraded layer carries its safe default).
#[derive(Debug, Clone, Default)]
pub struct ModerationInputs {
    pub baseline: BaselineModeration,
    pub baseline_available: bool,
    pub contextual: ContextualAnalysis,
    pub contextual_available: bool,
    pub self_harm: SelfHarmAssessment,
    pub self_harm_available: bool,
    pub signals: SignalReport,
}

impl ModerationInputs {
    /// Names of layers that did not answer, for the audit trail.
    pub fn degraded_layers(&self) -> Vec<&'static str> {
        let mut out = Vec::new();
        if !self.baseline_available {
            out.push("baseline_moderation");
        }
        if !self.contextual_available {
            out.push("contextual_analysis");
        }
        if !self.self_harm_available {
            out.push("self_harm_assessment");
        }
        out
    }
}

/// Final moderation outcome for one message.
#[derive(Debug, Clone, Serialize)]
pub struct ModerationVerdict {
    pub flagged: bool,
    pub severity: Severity,
    pub combined_score: f32,
    pub requires_human_review: bool,
    pub recommended_action: RecommendedAction,
    pub baseline: BaselineModeration,
    pub contextual: ContextualAnalysis,
    pub self_harm: SelfHarmAssessment,
    pub signals: SignalReport,
    pub degraded_layers: Vec<&'static str>,
}

impl ModerationVerdict {
    /// True when the self-harm layer calls for the crisis path.
    pub fn is_crisis(&self) -> bool {
        self.self_harm.is_crisis()
    }

    /// Sender-facing reason for a pre-submission block. `None` when the
    /// message is not blocked at all.
    pub fn block_reason(&self) -> Option<&'static str> {
        if !self.flagged {
            return None;
        }
        if self.is_crisis() {
            Some(BLOCK_REASON_CRISIS)
        } else {
            Some(BLOCK_REASON_CONTENT)
        }
    }

    /// Flag value written onto the stored message row. Decoupled from
    /// `flagged`: a suppressed auto-flag still marks the row once severity
    /// reaches high, and a signal-only flag below that leaves the row clear.
    pub fn stored_flag(&self) -> bool {
        self.severity >= Severity::High || self.self_harm.requires_immediate_attention
    }
}

/// Merge layer outputs and local signals into a verdict.
pub fn combine(inputs: ModerationInputs, cfg: &ModerationWeights) -> ModerationVerdict {
    let degraded_layers = inputs.degraded_layers();
    let ModerationInputs {
        baseline,
        contextual,
        self_harm,
        signals,
        ..
    } = inputs;

    // 1) Combined score: weighted sum of layer scores with gated signal
    //    contributions. Spam counts only above its gate; threat likewise,
    //    clamped to 1.0 before weighting.
    let baseline_score = baseline.max_score();
    let advanced_score = contextual.overall_risk.weight();
    let spam_part = if signals.spam_score > cfg.spam_gate {
        signals.spam_score
    } else {
        0.0
    };
    let threat_part = if signals.threat_score > cfg.threat_gate {
        signals.threat_score.min(1.0)
    } else {
        0.0
    };
    let combined_score = clamp01(
        cfg.w_baseline * baseline_score
            + cfg.w_contextual * advanced_score
            + cfg.w_spam * spam_part
            + cfg.w_threat * threat_part,
    );

    // 2) Flag decision. A high false-positive read from the contextual layer
    //    suppresses the score- and baseline-driven paths, never the
    //    self-harm or hard signal paths.
    let fp_high = contextual.false_positive_risk == FalsePositiveRisk::High;
    let flagged = self_harm.risk_level.is_crisis()
        || self_harm.requires_immediate_attention
        || (combined_score > cfg.flag_threshold && !fp_high)
        || (baseline.flagged && !fp_high)
        || (signals.is_repetitive && signals.spam_score > cfg.repetitive_spam_gate)
        || (signals.threat_score > cfg.threat_actionable && contextual.issues.threats);

    // 3) Severity ladder. Self-harm risk dominates its band; otherwise the
    //    combined score decides.
    let severity = if self_harm.risk_level == RiskLevel::Critical {
        Severity::Critical
    } else if self_harm.risk_level == RiskLevel::High || combined_score > cfg.severity_high {
        Severity::High
    } else if combined_score > cfg.severity_medium {
        Severity::Medium
    } else if combined_score > cfg.severity_low {
        Severity::Low
    } else {
        Severity::None
    };

    // 4) Human review: the contextual layer can ask for it outright, a
    //    suppressed auto-flag goes to a person instead, and medium self-harm
    //    risk always gets eyes on it.
    let requires_human_review = contextual.requires_human_review
        || (fp_high && combined_score > cfg.flag_threshold)
        || self_harm.risk_level == RiskLevel::Medium;

    // 5) Recommended action from the most severe applicable band.
    let recommended_action = if self_harm.is_crisis() || severity == Severity::Critical {
        RecommendedAction::Intervene
    } else if severity == Severity::High {
        RecommendedAction::Alert
    } else if severity == Severity::Medium {
        RecommendedAction::Monitor
    } else if flagged {
        RecommendedAction::Flag
    } else {
        RecommendedAction::None
    };

    ModerationVerdict {
        flagged,
        severity,
        combined_score,
        requires_human_review,
        recommended_action,
        baseline,
        contextual,
        self_harm,
        signals,
        degraded_layers,
    }
}
