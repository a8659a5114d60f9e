//! LLM inference client: provider abstraction over the OpenAI-compatible
//! API, typed response contracts for every layer, and deterministic
//! mock/disabled clients for tests and keyless deployments.
//!
//! Every call returns `Result`; callers decide how a failed layer degrades.
//! A response that does not match the declared schema is an error here, not
//! a silent default, so the pipeline can audit it.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::InferenceConfig;
use crate::message::{
    clamp01, Category, FalsePositiveRisk, HistoryItem, RecommendedAction, RiskLevel, SenderHistory,
    Sentiment, Severity, Urgency,
};

// ------------------------------------------------------------
// Errors
// ------------------------------------------------------------

#[derive(Debug, Clone, Error)]
pub enum InferenceError {
    /// No credential configured; the client never attempts a call.
    #[error("inference disabled: {0}")]
    Disabled(&'static str),
    /// Network-level failure (DNS, connect, timeout, broken body).
    #[error("inference transport error: {0}")]
    Transport(String),
    /// The provider answered with a non-success status.
    #[error("inference service returned {status}: {body}")]
    Status { status: u16, body: String },
    /// The provider answered 2xx but the payload failed schema validation.
    #[error("inference response failed schema validation: {0}")]
    Schema(String),
}

pub type InferenceResult<T> = Result<T, InferenceError>;

// ------------------------------------------------------------
// Response contracts
// ------------------------------------------------------------

/// Outcome of the provider's dedicated moderation endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BaselineModeration {
    pub flagged: bool,
    #[serde(default)]
    pub categories: BTreeMap<String, bool>,
    #[serde(default)]
    pub category_scores: BTreeMap<String, f32>,
}

impl BaselineModeration {
    /// Highest per-category score, clamped into [0, 1].
    pub fn max_score(&self) -> f32 {
        clamp01(
            self.category_scores
                .values()
                .copied()
                .fold(0.0_f32, f32::max),
        )
    }

    /// Safe default when the endpoint is unreachable: nothing flagged.
    pub fn unavailable() -> Self {
        Self::default()
    }

    /// Names of the categories the provider marked true, in stable order.
    pub fn flagged_categories(&self) -> Vec<String> {
        self.categories
            .iter()
            .filter(|(_, &hit)| hit)
            .map(|(name, _)| name.clone())
            .collect()
    }
}

/// Per-issue flags from the contextual layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextualIssues {
    pub spam: bool,
    pub harassment: bool,
    pub threats: bool,
    pub hate_speech: bool,
    pub sexual_content: bool,
    pub violence: bool,
}

/// Pattern-aware analysis of the message in sender context.
///
/// `overall_risk` is deliberately required: a payload missing it is treated
/// as malformed rather than quietly read as "no risk".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextualAnalysis {
    pub overall_risk: RiskLevel,
    #[serde(default)]
    pub issues: ContextualIssues,
    #[serde(default)]
    pub confidence: f32,
    #[serde(default)]
    pub false_positive_risk: FalsePositiveRisk,
    #[serde(default)]
    pub requires_human_review: bool,
}

impl ContextualAnalysis {
    pub fn unavailable() -> Self {
        Self::default()
    }
}

/// Dedicated self-harm screen. Same rule: `risk_level` is required.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SelfHarmAssessment {
    pub risk_level: RiskLevel,
    #[serde(default)]
    pub requires_immediate_attention: bool,
    #[serde(default)]
    pub crisis_resources_needed: bool,
    #[serde(default)]
    pub indicators: Vec<String>,
    #[serde(default)]
    pub recommended_action: RecommendedAction,
    #[serde(default)]
    pub reasoning: String,
}

impl SelfHarmAssessment {
    pub fn unavailable() -> Self {
        Self::default()
    }

    /// Crisis means high/critical risk or the model explicitly asking for
    /// immediate attention.
    pub fn is_crisis(&self) -> bool {
        self.risk_level.is_crisis() || self.requires_immediate_attention
    }

    /// Alert dispatch is narrower than the crisis label: critical risk or an
    /// explicit immediate-attention request. High risk alone stays in the
    /// audit trail and the verdict.
    pub fn needs_alert(&self) -> bool {
        self.risk_level == RiskLevel::Critical || self.requires_immediate_attention
    }
}

/// Factor breakdown reported by the priority model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriorityFactors {
    pub content_type: i64,
    pub sentiment: i64,
    pub urgency: i64,
    pub engagement: i64,
    pub crisis: i64,
}

/// Raw priority judgment before deterministic post-processing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PriorityModel {
    /// Required; values outside 1..=100 are clamped downstream.
    pub base_score: i64,
    #[serde(default)]
    pub factors: PriorityFactors,
    #[serde(default)]
    pub is_question: bool,
    #[serde(default)]
    pub is_complaint: bool,
    #[serde(default)]
    pub is_crisis: bool,
    #[serde(default)]
    pub requires_response: Option<bool>,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

/// Single-call categorization output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CategorizationResult {
    pub category: Category,
    #[serde(default)]
    pub sentiment: Sentiment,
    #[serde(default)]
    pub urgency: Urgency,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub confidence: f32,
}

/// Everything the priority model gets to see about one message.
#[derive(Debug, Clone, Default)]
pub struct PriorityContext {
    pub body: String,
    pub category: Option<Category>,
    pub sentiment: Option<Sentiment>,
    pub urgency: Option<Urgency>,
    pub moderation_severity: Option<Severity>,
    pub self_harm_risk: Option<RiskLevel>,
    pub age_hours: f32,
    pub has_response: bool,
    pub history: SenderHistory,
}

// ------------------------------------------------------------
// Client trait
// ------------------------------------------------------------

#[async_trait]
pub trait InferenceClient: Send + Sync {
    async fn baseline_moderation(&self, body: &str) -> InferenceResult<BaselineModeration>;
    async fn contextual_analysis(
        &self,
        body: &str,
        history: &[HistoryItem],
    ) -> InferenceResult<ContextualAnalysis>;
    async fn self_harm_assessment(
        &self,
        body: &str,
        history: &[HistoryItem],
    ) -> InferenceResult<SelfHarmAssessment>;
    async fn score_priority(&self, ctx: &PriorityContext) -> InferenceResult<PriorityModel>;
    async fn categorize(&self, body: &str) -> InferenceResult<CategorizationResult>;
    /// Provider name for diagnostics/logs.
    fn provider_name(&self) -> &'static str;
}

/// Trait object alias used by the pipeline and handlers.
pub type DynInference = Arc<dyn InferenceClient>;

/// Factory: build a client from environment-resolved config.
///
/// * `AI_TEST_MODE=mock` returns the deterministic mock client.
/// * A missing credential returns the disabled client; every layer then
///   degrades to its safe default instead of blocking message flow.
pub fn build_inference_client(cfg: &InferenceConfig) -> DynInference {
    if cfg.mock_mode {
        info!("AI_TEST_MODE=mock; using deterministic mock inference");
        return Arc::new(MockInference::benign());
    }
    match OpenAiInference::new(cfg) {
        Ok(client) => {
            info!(model = %cfg.model, "inference client ready");
            Arc::new(client)
        }
        Err(e) => {
            warn!(error = %e, "inference unavailable; layers will degrade to safe defaults");
            Arc::new(DisabledInference)
        }
    }
}

// ------------------------------------------------------------
// Prompts
// ------------------------------------------------------------

const CONTEXTUAL_SYSTEM_PROMPT: &str = r#"You are a trust-and-safety analyst for an anonymous messaging inbox. Evaluate the newest message, using earlier messages from the same sender only as context for patterns (escalation, fixation, coordinated spam).

Respond with ONLY a JSON object, no prose, in exactly this shape:
{
  "overall_risk": "none" | "low" | "medium" | "high" | "critical",
  "issues": {
    "spam": bool,
    "harassment": bool,
    "threats": bool,
    "hate_speech": bool,
    "sexual_content": bool,
    "violence": bool
  },
  "confidence": number between 0 and 1,
  "false_positive_risk": "low" | "medium" | "high",
  "requires_human_review": bool
}

Anonymous venting is often blunt; set "false_positive_risk" to "high" when the message is plausibly dark humor, song lyrics, or venting rather than a genuine threat."#;

const SELF_HARM_SYSTEM_PROMPT: &str = r#"You are a careful crisis-screening assistant for an anonymous messaging inbox. Assess ONLY self-harm and suicide risk expressed by the sender about themselves. Threats toward others are out of scope here.

Respond with ONLY a JSON object, no prose:
{
  "risk_level": "none" | "low" | "medium" | "high" | "critical",
  "requires_immediate_attention": bool,
  "crisis_resources_needed": bool,
  "indicators": [short strings naming what you saw],
  "recommended_action": "none" | "monitor" | "alert" | "intervene",
  "reasoning": "one or two sentences"
}

Err on the side of a higher risk level when intent, plan, or timeline is mentioned."#;

const PRIORITY_SYSTEM_PROMPT: &str = r#"You rank messages for an inbox owner who cannot read everything. Score how urgently this message deserves the owner's attention on a 1-100 scale (100 = drop everything).

Respond with ONLY a JSON object, no prose:
{
  "base_score": integer 1-100,
  "factors": {
    "content_type": integer,
    "sentiment": integer,
    "urgency": integer,
    "engagement": integer,
    "crisis": integer
  },
  "is_question": bool,
  "is_complaint": bool,
  "is_crisis": bool,
  "requires_response": bool or null,
  "reasoning": "one sentence",
  "recommendations": [up to 3 short strings]
}

Factors are signed contributions that explain the base score. Direct questions and time-sensitive requests score high; casual reactions score low."#;

const CATEGORIZE_SYSTEM_PROMPT: &str = r#"You sort anonymous inbox messages for display. Classify the message.

Respond with ONLY a JSON object, no prose:
{
  "category": "question" | "compliment" | "criticism" | "support" | "feedback" | "suggestion" | "other",
  "sentiment": "positive" | "negative" | "neutral" | "mixed",
  "urgency": "low" | "medium" | "high",
  "tags": [1 to 5 short lowercase topic tags],
  "summary": "at most 15 words",
  "confidence": number between 0 and 1
}"#;

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max).collect();
        format!("{cut}...")
    }
}

fn history_block(history: &[HistoryItem]) -> String {
    if history.is_empty() {
        return "No prior messages from this sender.".to_string();
    }
    let mut out = String::from("Prior messages from the same sender, newest first:\n");
    for (i, item) in history.iter().take(3).enumerate() {
        out.push_str(&format!("{}. {}\n", i + 1, truncate_chars(&item.body, 280)));
    }
    out
}

fn opt_label<T: Copy>(value: Option<T>, to_str: fn(T) -> &'static str) -> &'static str {
    value.map(to_str).unwrap_or("unknown")
}

fn priority_user_prompt(ctx: &PriorityContext) -> String {
    let mut out = String::new();
    out.push_str(&format!("Message: {}\n", truncate_chars(&ctx.body, 1500)));
    out.push_str(&format!(
        "Category: {}\n",
        opt_label(ctx.category, Category::as_str)
    ));
    out.push_str(&format!(
        "Sentiment: {}\n",
        opt_label(ctx.sentiment, Sentiment::as_str)
    ));
    out.push_str(&format!(
        "Urgency: {}\n",
        opt_label(ctx.urgency, Urgency::as_str)
    ));
    out.push_str(&format!(
        "Moderation severity: {}\n",
        opt_label(ctx.moderation_severity, Severity::as_str)
    ));
    out.push_str(&format!(
        "Self-harm risk: {}\n",
        opt_label(ctx.self_harm_risk, RiskLevel::as_str)
    ));
    out.push_str(&format!("Age in hours: {:.1}\n", ctx.age_hours));
    out.push_str(&format!("Already responded: {}\n", ctx.has_response));
    out.push_str(&format!(
        "Prior messages from this sender: {} (response rate {:.0}%)\n",
        ctx.history.total_messages,
        ctx.history.response_rate * 100.0
    ));
    out.push_str(&history_block(&ctx.history.recent));
    out
}

// ------------------------------------------------------------
// OpenAI-compatible client
// ------------------------------------------------------------

pub struct OpenAiInference {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAiInference {
    pub fn new(cfg: &InferenceConfig) -> anyhow::Result<Self> {
        let api_key = cfg
            .api_key
            .clone()
            .ok_or_else(|| anyhow::anyhow!("OPENAI_API_KEY is not set"))?;
        let http = reqwest::Client::builder()
            .user_agent(concat!("ghostinbox-scoring/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(4))
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            api_key,
            model: cfg.model.clone(),
            base_url: cfg.base_url.clone(),
        })
    }

    /// One chat call that must come back as a JSON object of type `T`.
    /// Retries once on transport errors, 429, and 5xx.
    async fn chat_json<T: DeserializeOwned>(
        &self,
        system: &str,
        user: String,
        max_tokens: u32,
    ) -> InferenceResult<T> {
        #[derive(Serialize)]
        struct Msg<'a> {
            role: &'a str,
            content: &'a str,
        }
        #[derive(Serialize)]
        struct ResponseFormat {
            #[serde(rename = "type")]
            kind: &'static str,
        }
        #[derive(Serialize)]
        struct Req<'a> {
            model: &'a str,
            messages: Vec<Msg<'a>>,
            temperature: f32,
            max_tokens: u32,
            response_format: ResponseFormat,
        }
        #[derive(Deserialize)]
        struct Resp {
            choices: Vec<Choice>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: ChoiceMsg,
        }
        #[derive(Deserialize)]
        struct ChoiceMsg {
            content: String,
        }

        let req = Req {
            model: &self.model,
            messages: vec![
                Msg {
                    role: "system",
                    content: system,
                },
                Msg {
                    role: "user",
                    content: &user,
                },
            ],
            temperature: 0.1,
            max_tokens,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        let url = format!("{}/chat/completions", self.base_url);
        let resp = self
            .send_with_retry(|| self.http.post(&url).bearer_auth(&self.api_key).json(&req))
            .await?;

        let body: Resp = resp
            .json()
            .await
            .map_err(|e| InferenceError::Transport(e.to_string()))?;
        let content = body
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .ok_or_else(|| InferenceError::Schema("empty choices array".to_string()))?;
        parse_json_payload(content)
    }

    async fn send_with_retry(
        &self,
        build: impl Fn() -> reqwest::RequestBuilder,
    ) -> InferenceResult<reqwest::Response> {
        let mut last_err = None;
        for attempt in 0..2 {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_millis(350)).await;
            }
            match build().send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return Ok(resp);
                    }
                    let retryable = status.as_u16() == 429 || status.is_server_error();
                    let body = resp.text().await.unwrap_or_default();
                    let err = InferenceError::Status {
                        status: status.as_u16(),
                        body: truncate_chars(&body, 200),
                    };
                    if !retryable {
                        return Err(err);
                    }
                    debug!(status = status.as_u16(), attempt, "inference call retrying");
                    last_err = Some(err);
                }
                Err(e) => {
                    debug!(error = %e, attempt, "inference transport error, retrying");
                    last_err = Some(InferenceError::Transport(e.to_string()));
                }
            }
        }
        Err(last_err
            .unwrap_or_else(|| InferenceError::Transport("request not attempted".to_string())))
    }
}

/// Parse a model reply as `T`, tolerating stray prose around the outermost
/// JSON object (some models add it despite json_object mode).
fn parse_json_payload<T: DeserializeOwned>(content: &str) -> InferenceResult<T> {
    let trimmed = content.trim();
    match serde_json::from_str(trimmed) {
        Ok(v) => Ok(v),
        Err(first_err) => {
            if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
                if start < end {
                    if let Ok(v) = serde_json::from_str(&trimmed[start..=end]) {
                        return Ok(v);
                    }
                }
            }
            Err(InferenceError::Schema(first_err.to_string()))
        }
    }
}

#[async_trait]
impl InferenceClient for OpenAiInference {
    async fn baseline_moderation(&self, body: &str) -> InferenceResult<BaselineModeration> {
        #[derive(Serialize)]
        struct Req<'a> {
            input: &'a str,
        }
        #[derive(Deserialize)]
        struct Resp {
            results: Vec<BaselineModeration>,
        }

        let url = format!("{}/moderations", self.base_url);
        let resp = self
            .send_with_retry(|| {
                self.http
                    .post(&url)
                    .bearer_auth(&self.api_key)
                    .json(&Req { input: body })
            })
            .await?;
        let parsed: Resp = resp
            .json()
            .await
            .map_err(|e| InferenceError::Schema(e.to_string()))?;
        parsed
            .results
            .into_iter()
            .next()
            .ok_or_else(|| InferenceError::Schema("empty results array".to_string()))
    }

    async fn contextual_analysis(
        &self,
        body: &str,
        history: &[HistoryItem],
    ) -> InferenceResult<ContextualAnalysis> {
        let user = format!(
            "{}\nNewest message to evaluate: {}",
            history_block(history),
            truncate_chars(body, 2000)
        );
        self.chat_json(CONTEXTUAL_SYSTEM_PROMPT, user, 400).await
    }

    async fn self_harm_assessment(
        &self,
        body: &str,
        history: &[HistoryItem],
    ) -> InferenceResult<SelfHarmAssessment> {
        let user = format!(
            "{}\nNewest message to assess: {}",
            history_block(history),
            truncate_chars(body, 2000)
        );
        self.chat_json(SELF_HARM_SYSTEM_PROMPT, user, 400).await
    }

    async fn score_priority(&self, ctx: &PriorityContext) -> InferenceResult<PriorityModel> {
        self.chat_json(PRIORITY_SYSTEM_PROMPT, priority_user_prompt(ctx), 400)
            .await
    }

    async fn categorize(&self, body: &str) -> InferenceResult<CategorizationResult> {
        let user = format!("Message: {}", truncate_chars(body, 2000));
        self.chat_json(CATEGORIZE_SYSTEM_PROMPT, user, 300).await
    }

    fn provider_name(&self) -> &'static str {
        "openai"
    }
}

// ------------------------------------------------------------
// Disabled client
// ------------------------------------------------------------

/// Errors every call; used when no credential is configured. The pipeline
/// turns these into safe defaults plus an audit entry.
pub struct DisabledInference;

#[async_trait]
impl InferenceClient for DisabledInference {
    async fn baseline_moderation(&self, _body: &str) -> InferenceResult<BaselineModeration> {
        Err(InferenceError::Disabled("no inference credential"))
    }
    async fn contextual_analysis(
        &self,
        _body: &str,
        _history: &[HistoryItem],
    ) -> InferenceResult<ContextualAnalysis> {
        Err(InferenceError::Disabled("no inference credential"))
    }
    async fn self_harm_assessment(
        &self,
        _body: &str,
        _history: &[HistoryItem],
    ) -> InferenceResult<SelfHarmAssessment> {
        Err(InferenceError::Disabled("no inference credential"))
    }
    async fn score_priority(&self, _ctx: &PriorityContext) -> InferenceResult<PriorityModel> {
        Err(InferenceError::Disabled("no inference credential"))
    }
    async fn categorize(&self, _body: &str) -> InferenceResult<CategorizationResult> {
        Err(InferenceError::Disabled("no inference credential"))
    }
    fn provider_name(&self) -> &'static str {
        "disabled"
    }
}

// ------------------------------------------------------------
// Mock client
// ------------------------------------------------------------

/// Deterministic mock for tests and `AI_TEST_MODE=mock` runs. Each layer
/// returns a canned result (or error); calls are recorded for assertions.
pub struct MockInference {
    baseline: InferenceResult<BaselineModeration>,
    contextual: InferenceResult<ContextualAnalysis>,
    self_harm: InferenceResult<SelfHarmAssessment>,
    priority: InferenceResult<PriorityModel>,
    categorization: InferenceResult<CategorizationResult>,
    calls: Mutex<Vec<&'static str>>,
}

impl MockInference {
    /// All layers succeed with harmless outputs.
    pub fn benign() -> Self {
        Self {
            baseline: Ok(BaselineModeration::default()),
            contextual: Ok(ContextualAnalysis {
                overall_risk: RiskLevel::None,
                confidence: 0.9,
                ..Default::default()
            }),
            self_harm: Ok(SelfHarmAssessment::default()),
            priority: Ok(PriorityModel {
                base_score: 40,
                reasoning: "routine message".to_string(),
                ..Default::default()
            }),
            categorization: Ok(CategorizationResult {
                category: Category::Other,
                confidence: 0.8,
                ..Default::default()
            }),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_baseline(mut self, value: BaselineModeration) -> Self {
        self.baseline = Ok(value);
        self
    }

    pub fn with_contextual(mut self, value: ContextualAnalysis) -> Self {
        self.contextual = Ok(value);
        self
    }

    pub fn with_self_harm(mut self, value: SelfHarmAssessment) -> Self {
        self.self_harm = Ok(value);
        self
    }

    pub fn with_priority(mut self, value: PriorityModel) -> Self {
        self.priority = Ok(value);
        self
    }

    pub fn with_categorization(mut self, value: CategorizationResult) -> Self {
        self.categorization = Ok(value);
        self
    }

    pub fn fail_baseline(mut self) -> Self {
        self.baseline = Err(InferenceError::Transport("mock outage".to_string()));
        self
    }

    pub fn fail_contextual(mut self) -> Self {
        self.contextual = Err(InferenceError::Transport("mock outage".to_string()));
        self
    }

    pub fn fail_self_harm(mut self) -> Self {
        self.self_harm = Err(InferenceError::Transport("mock outage".to_string()));
        self
    }

    pub fn fail_priority(mut self) -> Self {
        self.priority = Err(InferenceError::Transport("mock outage".to_string()));
        self
    }

    pub fn fail_categorization(mut self) -> Self {
        self.categorization = Err(InferenceError::Transport("mock outage".to_string()));
        self
    }

    pub fn fail_all(self) -> Self {
        self.fail_baseline()
            .fail_contextual()
            .fail_self_harm()
            .fail_priority()
            .fail_categorization()
    }

    /// Layer names in call order, for fan-out assertions.
    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn record(&self, layer: &'static str) {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(layer);
    }
}

#[async_trait]
impl InferenceClient for MockInference {
    async fn baseline_moderation(&self, _body: &str) -> InferenceResult<BaselineModeration> {
        self.record("baseline");
        self.baseline.clone()
    }
    async fn contextual_analysis(
        &self,
        _body: &str,
        _history: &[HistoryItem],
    ) -> InferenceResult<ContextualAnalysis> {
        self.record("contextual");
        self.contextual.clone()
    }
    async fn self_harm_assessment(
        &self,
        _body: &str,
        _history: &[HistoryItem],
    ) -> InferenceResult<SelfHarmAssessment> {
        self.record("self_harm");
        self.self_harm.clone()
    }
    async fn score_priority(&self, _ctx: &PriorityContext) -> InferenceResult<PriorityModel> {
        self.record("priority");
        self.priority.clone()
    }
    async fn categorize(&self, _body: &str) -> InferenceResult<CategorizationResult> {
        self.record("categorize");
        self.categorization.clone()
    }
    fn provider_name(&self) -> &'static str {
        "mock"
    }
}
