//! Categorization post-processing: tag hygiene, folder mapping, and the
//! idempotent write plan the pipeline executes against the store.
//!
//! The model proposes a category, tags, and a summary; everything here is
//! deterministic cleanup so re-running the stage never duplicates state.

use serde::Serialize;

use crate::inference::CategorizationResult;
use crate::message::Category;

/// Upper bound on tags kept per message.
pub const MAX_TAGS: usize = 5;

/// Folder a category files into, if any. `other` stays loose in the inbox.
pub fn folder_for(category: Category) -> Option<&'static str> {
    match category {
        Category::Question => Some("Questions"),
        Category::Compliment => Some("Compliments"),
        Category::Criticism | Category::Feedback => Some("Feedback"),
        Category::Suggestion => Some("Suggestions"),
        Category::Support => Some("Support"),
        Category::Other => None,
    }
}

/// Canonical tag form: trimmed, whitespace collapsed, lowercased. Empty
/// results mean the tag should be dropped.
pub fn normalize_tag(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Normalize incoming tags, drop blanks and anything already present, and
/// cap the result. Existing tags are assumed canonical (they were written
/// by this function).
pub fn plan_new_tags(existing: &[String], incoming: &[String], cap: usize) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for raw in incoming {
        let tag = normalize_tag(raw);
        if tag.is_empty() {
            continue;
        }
        if existing.iter().any(|e| e == &tag) || out.iter().any(|e| e == &tag) {
            continue;
        }
        out.push(tag);
        if out.len() == cap {
            break;
        }
    }
    out
}

/// Everything the pipeline should write for one categorization run.
#[derive(Debug, Clone, Serialize)]
pub struct CategorizationPlan {
    pub result: CategorizationResult,
    /// Tags not yet on the message, canonical form, capped.
    pub new_tags: Vec<String>,
    /// Folder to file into, if the category maps to one.
    pub folder: Option<&'static str>,
}

/// Build the write plan from a model result and the message's current tags.
pub fn plan(result: CategorizationResult, existing_tags: &[String]) -> CategorizationPlan {
    let new_tags = plan_new_tags(existing_tags, &result.tags, MAX_TAGS);
    let folder = folder_for(result.category);
    CategorizationPlan {
        result,
        new_tags,
        folder,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Sentiment, Urgency};

    fn result_with_tags(tags: &[&str]) -> CategorizationResult {
        CategorizationResult {
            category: Category::Question,
            sentiment: Sentiment::Neutral,
            urgency: Urgency::Low,
            tags: tags.iter().map(|t| t.to_string()).collect(),
            summary: String::new(),
            confidence: 0.9,
        }
    }

    #[test]
    fn folder_table_matches_categories() {
        assert_eq!(folder_for(Category::Question), Some("Questions"));
        assert_eq!(folder_for(Category::Compliment), Some("Compliments"));
        assert_eq!(folder_for(Category::Criticism), Some("Feedback"));
        assert_eq!(folder_for(Category::Feedback), Some("Feedback"));
        assert_eq!(folder_for(Category::Suggestion), Some("Suggestions"));
        assert_eq!(folder_for(Category::Support), Some("Support"));
        assert_eq!(folder_for(Category::Other), None);
    }

    #[test]
    fn tags_are_canonicalized() {
        assert_eq!(normalize_tag("  Music   Taste "), "music taste");
        assert_eq!(normalize_tag("ADVICE"), "advice");
        assert_eq!(normalize_tag("   "), "");
    }

    #[test]
    fn near_duplicate_tags_collapse() {
        let plan = plan_new_tags(&[], &["Advice".into(), " advice ".into(), "ADVICE".into()], 5);
        assert_eq!(plan, vec!["advice"]);
    }

    #[test]
    fn existing_tags_are_not_rewritten() {
        let existing = vec!["advice".to_string(), "school".to_string()];
        let plan = plan_new_tags(
            &existing,
            &["Advice".into(), "friends".into(), "School".into()],
            5,
        );
        assert_eq!(plan, vec!["friends"]);
    }

    #[test]
    fn tag_cap_applies_after_dedup() {
        let incoming: Vec<String> = (0..10).map(|i| format!("tag{i}")).collect();
        let plan = plan_new_tags(&[], &incoming, MAX_TAGS);
        assert_eq!(plan.len(), MAX_TAGS);
    }

    #[test]
    fn plan_is_idempotent() {
        let first = plan(result_with_tags(&["Advice", "school"]), &[]);
        assert_eq!(first.new_tags, vec!["advice", "school"]);
        assert_eq!(first.folder, Some("Questions"));

        // Re-running against the state the first run wrote plans nothing new.
        let second = plan(result_with_tags(&["Advice", "school"]), &first.new_tags);
        assert!(second.new_tags.is_empty());
        assert_eq!(second.folder, Some("Questions"));
    }

    #[test]
    fn blank_tags_are_dropped() {
        let plan = plan_new_tags(&[], &["  ".into(), "real".into(), "".into()], 5);
        assert_eq!(plan, vec!["real"]);
    }
}
