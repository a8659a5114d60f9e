//! Core domain types shared across the scoring pipeline: message records,
//! sender history, and the enums that moderation, categorization, and
//! priority scoring agree on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Hard cap on message body length accepted by the API, in characters.
pub const MAX_BODY_CHARS: usize = 5000;

/// Self-harm / contextual risk ladder. Variant order matters: `Ord` is used
/// for monotonic merges (a risk level on record is never silently lowered).
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    #[default]
    None,
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// Numeric weight used by the combined-moderation-score formula.
    pub fn weight(self) -> f32 {
        match self {
            RiskLevel::None => 0.1,
            RiskLevel::Low => 0.3,
            RiskLevel::Medium => 0.6,
            RiskLevel::High => 0.8,
            RiskLevel::Critical => 1.0,
        }
    }

    /// High and critical levels trigger the crisis path.
    pub fn is_crisis(self) -> bool {
        matches!(self, RiskLevel::High | RiskLevel::Critical)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RiskLevel::None => "none",
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }
}

/// Moderation severity assigned to a verdict. Ordered like [`RiskLevel`].
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    #[default]
    None,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::None => "none",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

/// Message category produced by the categorization stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Question,
    Compliment,
    Criticism,
    Support,
    Feedback,
    Suggestion,
    #[default]
    Other,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Question => "question",
            Category::Compliment => "compliment",
            Category::Criticism => "criticism",
            Category::Support => "support",
            Category::Feedback => "feedback",
            Category::Suggestion => "suggestion",
            Category::Other => "other",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sentiment {
    Positive,
    Negative,
    #[default]
    Neutral,
    Mixed,
}

impl Sentiment {
    pub fn as_str(self) -> &'static str {
        match self {
            Sentiment::Positive => "positive",
            Sentiment::Negative => "negative",
            Sentiment::Neutral => "neutral",
            Sentiment::Mixed => "mixed",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    #[default]
    Low,
    Medium,
    High,
}

impl Urgency {
    pub fn as_str(self) -> &'static str {
        match self {
            Urgency::Low => "low",
            Urgency::Medium => "medium",
            Urgency::High => "high",
        }
    }
}

/// What the pipeline recommends a human (or the alerting layer) do next.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendedAction {
    #[default]
    None,
    Monitor,
    Flag,
    Alert,
    Intervene,
}

/// How likely the contextual layer thinks its own verdict is a false alarm.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FalsePositiveRisk {
    #[default]
    Low,
    Medium,
    High,
}

/// A message row as the pipeline sees it. Scoring fields are `Option` until
/// the corresponding stage has run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: String,
    pub vent_link_id: String,
    #[serde(default)]
    pub owner_id: Option<String>,
    pub body: String,
    #[serde(default)]
    pub mood: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub has_response: bool,
    #[serde(default)]
    pub moderation_score: Option<f32>,
    #[serde(default)]
    pub is_flagged: bool,
    #[serde(default)]
    pub moderation_categories: Vec<String>,
    #[serde(default)]
    pub category: Option<Category>,
    #[serde(default)]
    pub sentiment: Option<Sentiment>,
    #[serde(default)]
    pub urgency: Option<Urgency>,
    #[serde(default)]
    pub self_harm_risk: Option<RiskLevel>,
    #[serde(default)]
    pub priority_score: Option<i32>,
    #[serde(default)]
    pub processed_at: Option<DateTime<Utc>>,
}

impl MessageRecord {
    /// Minimal record for a body that has not been persisted yet
    /// (pre-submission checks).
    pub fn draft(vent_link_id: &str, body: &str) -> Self {
        Self {
            id: String::new(),
            vent_link_id: vent_link_id.to_string(),
            owner_id: None,
            body: body.to_string(),
            mood: None,
            created_at: Utc::now(),
            has_response: false,
            moderation_score: None,
            is_flagged: false,
            moderation_categories: Vec::new(),
            category: None,
            sentiment: None,
            urgency: None,
            self_harm_risk: None,
            priority_score: None,
            processed_at: None,
        }
    }
}

/// One earlier message from the same anonymous link, as far back as the
/// history window reaches.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryItem {
    pub body: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub has_response: bool,
}

impl HistoryItem {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            created_at: None,
            has_response: false,
        }
    }
}

/// Sender history summary handed to the priority stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SenderHistory {
    /// Most recent prior messages, newest first.
    pub recent: Vec<HistoryItem>,
    /// Total prior messages from this link, beyond the sampled window.
    pub total_messages: u32,
    /// Share of the sampled window that already has a response, in [0, 1].
    pub response_rate: f32,
}

impl SenderHistory {
    pub fn from_recent(recent: Vec<HistoryItem>, total_messages: u32) -> Self {
        let responded = recent.iter().filter(|h| h.has_response).count();
        let response_rate = if recent.is_empty() {
            0.0
        } else {
            responded as f32 / recent.len() as f32
        };
        Self {
            recent,
            total_messages,
            response_rate,
        }
    }
}

/// Clamp a unit-interval score, squashing NaN to 0.
pub fn clamp01(x: f32) -> f32 {
    if x.is_nan() {
        0.0
    } else {
        x.clamp(0.0, 1.0)
    }
}

/// Clamp a priority score into the 1..=100 band the dashboard sorts on.
pub fn clamp_priority(score: i64) -> i32 {
    score.clamp(1, 100) as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn risk_levels_order_none_to_critical() {
        assert!(RiskLevel::None < RiskLevel::Low);
        assert!(RiskLevel::Low < RiskLevel::Medium);
        assert!(RiskLevel::Medium < RiskLevel::High);
        assert!(RiskLevel::High < RiskLevel::Critical);
        assert_eq!(
            RiskLevel::Medium.max(RiskLevel::Critical),
            RiskLevel::Critical
        );
    }

    #[test]
    fn risk_weights_match_combined_score_table() {
        assert_eq!(RiskLevel::Critical.weight(), 1.0);
        assert_eq!(RiskLevel::High.weight(), 0.8);
        assert_eq!(RiskLevel::Medium.weight(), 0.6);
        assert_eq!(RiskLevel::Low.weight(), 0.3);
        assert_eq!(RiskLevel::None.weight(), 0.1);
    }

    #[test]
    fn only_high_and_critical_are_crisis() {
        assert!(RiskLevel::High.is_crisis());
        assert!(RiskLevel::Critical.is_crisis());
        assert!(!RiskLevel::Medium.is_crisis());
        assert!(!RiskLevel::None.is_crisis());
    }

    #[test]
    fn enums_serialize_snake_case() {
        assert_eq!(
            serde_json::to_string(&RiskLevel::Critical).unwrap(),
            "\"critical\""
        );
        assert_eq!(
            serde_json::to_string(&Category::Question).unwrap(),
            "\"question\""
        );
        assert_eq!(
            serde_json::to_string(&Sentiment::Mixed).unwrap(),
            "\"mixed\""
        );
        assert_eq!(
            serde_json::to_string(&RecommendedAction::Intervene).unwrap(),
            "\"intervene\""
        );
    }

    #[test]
    fn clamps_hold_at_extremes() {
        assert_eq!(clamp01(f32::NAN), 0.0);
        assert_eq!(clamp01(3.7), 1.0);
        assert_eq!(clamp01(-0.5), 0.0);
        assert_eq!(clamp_priority(0), 1);
        assert_eq!(clamp_priority(-40), 1);
        assert_eq!(clamp_priority(100_000), 100);
        assert_eq!(clamp_priority(55), 55);
    }

    #[test]
    fn history_summary_computes_response_rate() {
        let mut a = HistoryItem::new("first");
        a.has_response = true;
        let b = HistoryItem::new("second");
        let history = SenderHistory::from_recent(vec![a, b], 7);
        assert_eq!(history.total_messages, 7);
        assert!((history.response_rate - 0.5).abs() < f32::EPSILON);
    }
}
