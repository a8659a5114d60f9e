// tests/env_config.rs
//
// Environment-driven configuration resolution. Everything here mutates
// process env, so tests are serialized.

use std::sync::Arc;
use std::{env, fs, path::PathBuf};

use ghostinbox_scoring::config::{HotReloadScoring, InferenceConfig, ENV_SCORING_CONFIG_PATH};
use ghostinbox_scoring::inference::MockInference;
use ghostinbox_scoring::notify::CrisisNotifier;
use ghostinbox_scoring::store::MemoryStore;
use ghostinbox_scoring::{AppState, Pipeline};

const INFERENCE_VARS: [&str; 5] = [
    "OPENAI_API_KEY",
    "INFERENCE_MODEL",
    "INFERENCE_BASE_URL",
    "INFERENCE_TIMEOUT_SECS",
    "AI_TEST_MODE",
];

fn clear_inference_env() {
    for var in INFERENCE_VARS {
        env::remove_var(var);
    }
}

fn unique_tmp_dir() -> PathBuf {
    let mut dir = env::temp_dir();
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    dir.push(format!("env_cfg_test_{}", nanos));
    fs::create_dir_all(&dir).unwrap();
    dir
}

fn test_pipeline() -> Arc<Pipeline> {
    Arc::new(Pipeline::new(
        Arc::new(MockInference::benign()),
        Arc::new(MemoryStore::new()),
        Arc::new(HotReloadScoring::new(None)),
        Arc::new(CrisisNotifier::disabled()),
    ))
}

#[serial_test::serial]
#[test]
fn inference_defaults_hold_without_env() {
    clear_inference_env();

    let cfg = InferenceConfig::from_env();
    assert_eq!(cfg.api_key, None);
    assert_eq!(cfg.model, "gpt-4o-mini");
    assert_eq!(cfg.base_url, "https://api.openai.com/v1");
    assert_eq!(cfg.timeout_secs, 20);
    assert!(!cfg.mock_mode);
}

#[serial_test::serial]
#[test]
fn inference_env_overrides_every_knob() {
    clear_inference_env();
    env::set_var("OPENAI_API_KEY", "sk-test");
    env::set_var("INFERENCE_MODEL", "inbox-scoring-ft");
    env::set_var("INFERENCE_BASE_URL", "https://llm.internal.example/v1/");
    env::set_var("INFERENCE_TIMEOUT_SECS", "9");

    let cfg = InferenceConfig::from_env();
    assert_eq!(cfg.api_key.as_deref(), Some("sk-test"));
    assert_eq!(cfg.model, "inbox-scoring-ft");
    // trailing slash is stripped so URL joining stays predictable
    assert_eq!(cfg.base_url, "https://llm.internal.example/v1");
    assert_eq!(cfg.timeout_secs, 9);

    clear_inference_env();
}

#[serial_test::serial]
#[test]
fn blank_api_key_counts_as_missing_and_mock_mode_is_case_insensitive() {
    clear_inference_env();
    env::set_var("OPENAI_API_KEY", "   ");
    env::set_var("AI_TEST_MODE", "MOCK");

    let cfg = InferenceConfig::from_env();
    assert_eq!(cfg.api_key, None);
    assert!(cfg.mock_mode);

    clear_inference_env();
}

#[serial_test::serial]
#[test]
fn out_of_range_timeouts_fall_back_to_default() {
    clear_inference_env();
    for bad in ["0", "9999", "soon", ""] {
        env::set_var("INFERENCE_TIMEOUT_SECS", bad);
        let cfg = InferenceConfig::from_env();
        assert_eq!(cfg.timeout_secs, 20, "value '{bad}' should be rejected");
    }
    clear_inference_env();
}

#[serial_test::serial]
#[test]
fn scoring_config_path_env_override_is_honored() {
    let tmpdir = unique_tmp_dir();
    let path = tmpdir.join("scoring.toml");
    fs::write(&path, "[priority]\nqueue_general_threshold = 85\n").unwrap();

    env::set_var(ENV_SCORING_CONFIG_PATH, path.display().to_string());
    let handle = HotReloadScoring::from_env();
    let cfg = handle.current();
    assert_eq!(cfg.priority.queue_general_threshold, 85);
    // untouched sections keep their defaults
    assert!((cfg.moderation.flag_threshold - 0.7).abs() < f32::EPSILON);

    env::remove_var(ENV_SCORING_CONFIG_PATH);
    let _ = fs::remove_file(&path);
    let _ = fs::remove_dir_all(&tmpdir);
}

#[serial_test::serial]
#[test]
fn internal_api_key_gates_the_app_state() {
    env::remove_var("INTERNAL_API_KEY");
    let state = AppState::new(test_pipeline());
    assert_eq!(state.internal_key, None, "no key means open endpoints");

    env::set_var("INTERNAL_API_KEY", "hunter2");
    let state = AppState::new(test_pipeline());
    assert_eq!(state.internal_key.as_deref(), Some("hunter2"));

    // whitespace-only keys would lock everyone out with no way to auth
    env::set_var("INTERNAL_API_KEY", "   ");
    let state = AppState::new(test_pipeline());
    assert_eq!(state.internal_key, None);

    env::remove_var("INTERNAL_API_KEY");
}
