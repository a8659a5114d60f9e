//! Runtime configuration: hot-reloaded scoring knobs from
//! `config/scoring.toml` plus environment-driven inference settings.
//!
//! On each `current()` call we check the file's modified time and reload if
//! changed, so thresholds can be tuned without a redeploy. Absent or broken
//! files fall back to the built-in defaults, which match the published
//! scoring rules.

use serde::Deserialize;
use std::{
    env, fs, io,
    path::{Path, PathBuf},
    sync::{Arc, RwLock},
    time::SystemTime,
};

/// Default on-disk location of the scoring knobs.
pub const DEFAULT_SCORING_CONFIG_PATH: &str = "config/scoring.toml";
/// Env var overriding the scoring config location.
pub const ENV_SCORING_CONFIG_PATH: &str = "SCORING_CONFIG_PATH";

/// Weights and gates for the combined moderation score.
#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default)]
pub struct ModerationWeights {
    pub w_baseline: f32,
    pub w_contextual: f32,
    pub w_spam: f32,
    pub w_threat: f32,
    /// Spam only contributes when strictly above this gate.
    pub spam_gate: f32,
    /// Threat only contributes when strictly above this gate.
    pub threat_gate: f32,
    /// Combined score above this flags (unless false-positive risk is high).
    pub flag_threshold: f32,
    pub severity_low: f32,
    pub severity_medium: f32,
    pub severity_high: f32,
    /// Repetitive messages flag once spam exceeds this.
    pub repetitive_spam_gate: f32,
    /// Threat level considered actionable alongside contextual confirmation.
    pub threat_actionable: f32,
}

impl Default for ModerationWeights {
    fn default() -> Self {
        Self {
            w_baseline: 0.3,
            w_contextual: 0.4,
            w_spam: 0.1,
            w_threat: 0.2,
            spam_gate: 0.5,
            threat_gate: 0.3,
            flag_threshold: 0.7,
            severity_low: 0.4,
            severity_medium: 0.6,
            severity_high: 0.8,
            repetitive_spam_gate: 0.6,
            threat_actionable: 0.5,
        }
    }
}

/// Knobs for priority scoring, time decay, and the needs-response queue.
#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default)]
pub struct PriorityRules {
    /// Linear decay window in hours (score reaches the floor at its end).
    pub decay_window_hours: f32,
    /// Decay never multiplies below this.
    pub decay_floor: f32,
    /// Messages younger than this many hours never decay.
    pub decay_min_age_hours: f32,
    /// Multiplier applied once a message has at least one response.
    pub responded_dampening: f32,
    /// Base used when the priority model is unavailable.
    pub fallback_base_score: i32,
    pub queue_general_threshold: i32,
    pub queue_question_threshold: i32,
    pub queue_complaint_threshold: i32,
    /// How many prior messages from the same link to sample.
    pub history_depth: usize,
}

impl Default for PriorityRules {
    fn default() -> Self {
        Self {
            decay_window_hours: 240.0,
            decay_floor: 0.5,
            decay_min_age_hours: 24.0,
            responded_dampening: 0.3,
            fallback_base_score: 50,
            queue_general_threshold: 70,
            queue_question_threshold: 50,
            queue_complaint_threshold: 60,
            history_depth: 5,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub moderation: ModerationWeights,
    pub priority: PriorityRules,
}

impl ScoringConfig {
    /// Clamp every knob into a usable range. A config file can slow the
    /// pipeline down or speed it up, but never push scores out of band.
    pub fn sanitized(mut self) -> Self {
        let m = &mut self.moderation;
        for w in [
            &mut m.w_baseline,
            &mut m.w_contextual,
            &mut m.w_spam,
            &mut m.w_threat,
            &mut m.spam_gate,
            &mut m.threat_gate,
            &mut m.flag_threshold,
            &mut m.severity_low,
            &mut m.severity_medium,
            &mut m.severity_high,
            &mut m.repetitive_spam_gate,
            &mut m.threat_actionable,
        ] {
            if !w.is_finite() {
                *w = 0.0;
            }
            *w = w.clamp(0.0, 1.0);
        }
        // Keep the severity ladder ordered low <= medium <= high.
        if m.severity_low > m.severity_medium {
            std::mem::swap(&mut m.severity_low, &mut m.severity_medium);
        }
        if m.severity_medium > m.severity_high {
            std::mem::swap(&mut m.severity_medium, &mut m.severity_high);
        }
        if m.severity_low > m.severity_medium {
            std::mem::swap(&mut m.severity_low, &mut m.severity_medium);
        }

        let p = &mut self.priority;
        if !p.decay_window_hours.is_finite() || p.decay_window_hours < 1.0 {
            p.decay_window_hours = PriorityRules::default().decay_window_hours;
        }
        if !p.decay_floor.is_finite() {
            p.decay_floor = PriorityRules::default().decay_floor;
        }
        p.decay_floor = p.decay_floor.clamp(0.0, 1.0);
        if !p.decay_min_age_hours.is_finite() || p.decay_min_age_hours < 0.0 {
            p.decay_min_age_hours = PriorityRules::default().decay_min_age_hours;
        }
        if !p.responded_dampening.is_finite() {
            p.responded_dampening = PriorityRules::default().responded_dampening;
        }
        p.responded_dampening = p.responded_dampening.clamp(0.0, 1.0);
        p.fallback_base_score = p.fallback_base_score.clamp(1, 100);
        p.queue_general_threshold = p.queue_general_threshold.clamp(1, 100);
        p.queue_question_threshold = p.queue_question_threshold.clamp(1, 100);
        p.queue_complaint_threshold = p.queue_complaint_threshold.clamp(1, 100);
        p.history_depth = p.history_depth.clamp(1, 20);
        self
    }
}

/// Load a scoring config directly (no caching). Public for tests/tools.
pub fn load_scoring_file(path: &Path) -> io::Result<ScoringConfig> {
    let text = fs::read_to_string(path)?;
    let cfg: ScoringConfig =
        toml::from_str(&text).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    Ok(cfg.sanitized())
}

/// Hot-reload wrapper: reloads when the config file mtime changes.
#[derive(Debug)]
pub struct HotReloadScoring {
    path: PathBuf,
    inner: RwLock<State>,
}

#[derive(Debug)]
struct State {
    config: ScoringConfig,
    last_modified: Option<SystemTime>,
}

pub type ScoringHandle = Arc<HotReloadScoring>;

impl HotReloadScoring {
    /// Create with a path (defaults to `config/scoring.toml` if `None`).
    pub fn new(path: Option<&Path>) -> Self {
        let path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SCORING_CONFIG_PATH));
        Self {
            path,
            inner: RwLock::new(State {
                config: ScoringConfig::default(),
                last_modified: None,
            }),
        }
    }

    /// Resolve the path from `SCORING_CONFIG_PATH`, falling back to the
    /// default location.
    pub fn from_env() -> ScoringHandle {
        let path = env::var(ENV_SCORING_CONFIG_PATH).ok().map(PathBuf::from);
        Arc::new(Self::new(path.as_deref()))
    }

    /// Get the latest config, reloading if the file changed.
    pub fn current(&self) -> ScoringConfig {
        let needs_reload = match fs::metadata(&self.path).and_then(|m| m.modified()) {
            Ok(mtime) => {
                let guard = self.inner.read().unwrap_or_else(|e| e.into_inner());
                guard.last_modified != Some(mtime)
            }
            // File missing: keep whatever we have (defaults at worst).
            Err(_) => false,
        };

        if !needs_reload {
            let guard = self.inner.read().unwrap_or_else(|e| e.into_inner());
            return guard.config;
        }

        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        // Double-check in case of races.
        if let Ok(meta) = fs::metadata(&self.path) {
            if let Ok(mtime) = meta.modified() {
                if guard.last_modified != Some(mtime) {
                    match load_scoring_file(&self.path) {
                        Ok(cfg) => {
                            guard.config = cfg;
                            guard.last_modified = Some(mtime);
                            tracing::info!(path = %self.path.display(), "scoring config reloaded");
                        }
                        Err(e) => {
                            tracing::warn!(path = %self.path.display(), error = %e, "scoring config reload failed; keeping previous values");
                            guard.last_modified = Some(mtime);
                        }
                    }
                }
            }
        }
        guard.config
    }
}

/// Inference settings resolved from the environment at startup.
#[derive(Debug, Clone)]
pub struct InferenceConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    pub timeout_secs: u64,
    /// `AI_TEST_MODE=mock` swaps in the deterministic mock client.
    pub mock_mode: bool,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            timeout_secs: 20,
            mock_mode: false,
        }
    }
}

impl InferenceConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let api_key = env::var("OPENAI_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty());
        let model = env::var("INFERENCE_MODEL").unwrap_or(defaults.model);
        let base_url = env::var("INFERENCE_BASE_URL")
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or(defaults.base_url);
        let timeout_secs = env::var("INFERENCE_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|v| (1..=120).contains(v))
            .unwrap_or(defaults.timeout_secs);
        let mock_mode = env::var("AI_TEST_MODE")
            .map(|v| v.eq_ignore_ascii_case("mock"))
            .unwrap_or(false);
        Self {
            api_key,
            model,
            base_url,
            timeout_secs,
            mock_mode,
        }
    }
}
