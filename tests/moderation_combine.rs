// tests/moderation_combine.rs
//
// Randomized sweep over the moderation verdict. The unit tests pin the
// decision table; this file throws arbitrary layer outputs (including
// out-of-range provider scores) at `combine` and checks the invariants
// that must survive any input.

use rand::{rngs::StdRng, Rng, SeedableRng};

use ghostinbox_scoring::config::ModerationWeights;
use ghostinbox_scoring::inference::{BaselineModeration, ContextualAnalysis, SelfHarmAssessment};
use ghostinbox_scoring::message::{FalsePositiveRisk, RiskLevel, Severity};
use ghostinbox_scoring::moderation::{combine, ModerationInputs};
use ghostinbox_scoring::signals::SignalReport;

const SWEEP: usize = 600;

const RISKS: [RiskLevel; 5] = [
    RiskLevel::None,
    RiskLevel::Low,
    RiskLevel::Medium,
    RiskLevel::High,
    RiskLevel::Critical,
];

fn random_inputs(rng: &mut StdRng) -> ModerationInputs {
    let mut baseline = BaselineModeration {
        flagged: rng.random_bool(0.2),
        ..Default::default()
    };
    for key in ["harassment", "hate", "violence"] {
        if rng.random_bool(0.5) {
            // deliberately allows scores outside [0, 1]
            baseline
                .category_scores
                .insert(key.to_string(), rng.random_range(-0.5..2.0));
        }
    }

    let mut contextual = ContextualAnalysis {
        overall_risk: RISKS[rng.random_range(0..RISKS.len())],
        confidence: rng.random_range(0.0..1.0),
        ..Default::default()
    };
    contextual.issues.threats = rng.random_bool(0.3);
    contextual.issues.spam = rng.random_bool(0.3);
    contextual.false_positive_risk = match rng.random_range(0..3) {
        0 => FalsePositiveRisk::Low,
        1 => FalsePositiveRisk::Medium,
        _ => FalsePositiveRisk::High,
    };
    contextual.requires_human_review = rng.random_bool(0.2);

    let self_harm = SelfHarmAssessment {
        risk_level: RISKS[rng.random_range(0..RISKS.len())],
        requires_immediate_attention: rng.random_bool(0.15),
        ..Default::default()
    };

    ModerationInputs {
        baseline,
        baseline_available: rng.random_bool(0.9),
        contextual,
        contextual_available: rng.random_bool(0.9),
        self_harm,
        self_harm_available: rng.random_bool(0.9),
        signals: SignalReport {
            spam_score: rng.random_range(0.0..1.0),
            is_repetitive: rng.random_bool(0.2),
            threat_score: rng.random_range(0.0..3.0),
        },
    }
}

#[test]
fn combined_score_is_always_a_unit_score() {
    let cfg = ModerationWeights::default();
    let mut rng = StdRng::seed_from_u64(3);

    for i in 0..SWEEP {
        let v = combine(random_inputs(&mut rng), &cfg);
        assert!(
            (0.0..=1.0).contains(&v.combined_score),
            "case {i}: combined score {} escaped [0, 1]",
            v.combined_score
        );
    }
}

#[test]
fn self_harm_crisis_always_flags_and_dominates_severity() {
    let cfg = ModerationWeights::default();
    let mut rng = StdRng::seed_from_u64(5);

    for i in 0..SWEEP {
        let mut inputs = random_inputs(&mut rng);
        inputs.self_harm.risk_level = if rng.random_bool(0.5) {
            RiskLevel::High
        } else {
            RiskLevel::Critical
        };
        let critical = inputs.self_harm.risk_level == RiskLevel::Critical;
        let v = combine(inputs, &cfg);
        assert!(v.flagged, "case {i}: crisis risk must flag");
        assert!(v.is_crisis(), "case {i}");
        assert!(v.block_reason().is_some(), "case {i}");
        if critical {
            assert_eq!(v.severity, Severity::Critical, "case {i}");
        } else {
            assert!(v.severity >= Severity::High, "case {i}: got {:?}", v.severity);
        }
    }
}

#[test]
fn critical_severity_only_comes_from_critical_risk() {
    let cfg = ModerationWeights::default();
    let mut rng = StdRng::seed_from_u64(13);

    for i in 0..SWEEP {
        let inputs = random_inputs(&mut rng);
        let risk = inputs.self_harm.risk_level;
        let v = combine(inputs, &cfg);
        if v.severity == Severity::Critical {
            assert_eq!(
                risk,
                RiskLevel::Critical,
                "case {i}: score alone must cap at high"
            );
        }
    }
}

#[test]
fn false_positive_read_only_suppresses_score_paths() {
    let cfg = ModerationWeights::default();
    let mut rng = StdRng::seed_from_u64(17);

    for i in 0..SWEEP {
        let mut inputs = random_inputs(&mut rng);
        inputs.contextual.false_positive_risk = FalsePositiveRisk::High;
        // strip every path the suppression does not apply to
        inputs.self_harm.risk_level = RiskLevel::None;
        inputs.self_harm.requires_immediate_attention = false;
        inputs.signals.is_repetitive = false;
        inputs.contextual.issues.threats = false;
        let v = combine(inputs, &cfg);
        assert!(
            !v.flagged,
            "case {i}: with hard paths stripped, fp_high must suppress the flag"
        );
    }
}

#[test]
fn clean_inputs_never_flag() {
    let cfg = ModerationWeights::default();
    let inputs = ModerationInputs {
        baseline_available: true,
        contextual_available: true,
        self_harm_available: true,
        ..Default::default()
    };
    let v = combine(inputs, &cfg);
    assert!(!v.flagged);
    assert_eq!(v.severity, Severity::None);
    assert!(v.degraded_layers.is_empty());
}
