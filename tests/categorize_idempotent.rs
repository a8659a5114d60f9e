// tests/categorize_idempotent.rs
//
// Re-running categorization over the same message must not duplicate
// tags, folders, or assignments. The trigger can fire twice for one
// message (retries, redeliveries), so this is load-bearing.

use std::sync::Arc;

use ghostinbox_scoring::config::HotReloadScoring;
use ghostinbox_scoring::inference::{CategorizationResult, MockInference};
use ghostinbox_scoring::message::{Category, MessageRecord};
use ghostinbox_scoring::notify::CrisisNotifier;
use ghostinbox_scoring::pipeline::Pipeline;
use ghostinbox_scoring::store::MemoryStore;

fn pipeline_with(mock: MockInference, store: Arc<MemoryStore>) -> Pipeline {
    Pipeline::new(
        Arc::new(mock),
        store,
        Arc::new(HotReloadScoring::new(None)),
        Arc::new(CrisisNotifier::disabled()),
    )
}

fn question_result() -> CategorizationResult {
    CategorizationResult {
        category: Category::Question,
        tags: vec!["Advice".to_string(), "school".to_string()],
        confidence: 0.9,
        ..Default::default()
    }
}

#[tokio::test]
async fn second_run_plans_no_new_writes() {
    let store = Arc::new(MemoryStore::new());
    let mut msg = MessageRecord::draft("link-1", "what electives should I pick?");
    msg.id = "m-1".to_string();
    msg.owner_id = Some("owner-1".to_string());
    store.insert_message(msg.clone());

    let pipeline = pipeline_with(
        MockInference::benign().with_categorization(question_result()),
        store.clone(),
    );

    let first = pipeline.categorize_message(&msg).await.expect("first run");
    assert_eq!(first.new_tags, vec!["advice", "school"]);
    assert_eq!(first.folder, Some("Questions"));

    let second = pipeline.categorize_message(&msg).await.expect("second run");
    assert!(
        second.new_tags.is_empty(),
        "identical rerun must not re-insert tags, got {:?}",
        second.new_tags
    );
    assert_eq!(second.folder, Some("Questions"));

    // state after two runs is exactly the state after one
    assert_eq!(store.tags("m-1"), vec!["advice", "school"]);
    assert_eq!(store.folder_names().len(), 1, "one folder row");
    assert_eq!(store.assignments("m-1").len(), 1, "one assignment row");
    assert_eq!(store.message("m-1").unwrap().category, Some(Category::Question));
}

#[tokio::test]
async fn rerun_with_more_tags_only_adds_the_difference() {
    let store = Arc::new(MemoryStore::new());
    let mut msg = MessageRecord::draft("link-1", "what electives should I pick?");
    msg.id = "m-1".to_string();
    store.insert_message(msg.clone());

    let pipeline = pipeline_with(
        MockInference::benign().with_categorization(question_result()),
        store.clone(),
    );
    pipeline.categorize_message(&msg).await.expect("first run");

    // a later model run sees one extra topic
    let mut wider = question_result();
    wider.tags.push("electives".to_string());
    let pipeline = pipeline_with(
        MockInference::benign().with_categorization(wider),
        store.clone(),
    );
    let run = pipeline.categorize_message(&msg).await.expect("second run");
    assert_eq!(run.new_tags, vec!["electives"]);
    assert_eq!(store.tags("m-1"), vec!["advice", "school", "electives"]);
}
