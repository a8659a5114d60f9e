//! In-memory store: a `Mutex`-guarded set of tables mirroring the real
//! schema. Used by tests and by keyless local runs, where losing state on
//! restart is acceptable.
//!
//! Write counters exist so tests can assert that a code path performed no
//! writes at all (pre-submission checks must be read-only).

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::message::{HistoryItem, MessageRecord, SenderHistory};

use super::{
    CategorizationUpdate, MessageStore, ModerationUpdate, ProcessingLogEntry, StoreError,
    StoreResult,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteCounts {
    pub message_updates: u32,
    pub tag_inserts: u32,
    pub folder_writes: u32,
    pub log_appends: u32,
}

impl WriteCounts {
    pub fn total(&self) -> u32 {
        self.message_updates + self.tag_inserts + self.folder_writes + self.log_appends
    }
}

#[derive(Debug, Clone)]
struct FolderRow {
    id: String,
    owner_id: String,
    name: String,
}

#[derive(Debug, Default)]
struct Inner {
    messages: HashMap<String, MessageRecord>,
    /// message id -> canonical tags, insertion order kept.
    tags: HashMap<String, Vec<String>>,
    folders: Vec<FolderRow>,
    folder_seq: u32,
    /// (message id, folder id)
    assignments: HashSet<(String, String)>,
    log: Vec<ProcessingLogEntry>,
    counts: WriteCounts,
    deny_message_updates: bool,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_message(record: MessageRecord) -> Self {
        let store = Self::new();
        store.insert_message(record);
        store
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn insert_message(&self, record: MessageRecord) {
        self.lock().messages.insert(record.id.clone(), record);
    }

    /// Make every message update come back as a row-level-security denial.
    pub fn deny_message_updates(&self) {
        self.lock().deny_message_updates = true;
    }

    pub fn message(&self, id: &str) -> Option<MessageRecord> {
        self.lock().messages.get(id).cloned()
    }

    pub fn tags(&self, message_id: &str) -> Vec<String> {
        self.lock().tags.get(message_id).cloned().unwrap_or_default()
    }

    /// Folder ids the message has been filed into.
    pub fn assignments(&self, message_id: &str) -> Vec<String> {
        let inner = self.lock();
        inner
            .assignments
            .iter()
            .filter(|(m, _)| m == message_id)
            .map(|(_, f)| f.clone())
            .collect()
    }

    /// (owner id, folder name) pairs currently existing.
    pub fn folder_names(&self) -> Vec<(String, String)> {
        self.lock()
            .folders
            .iter()
            .map(|f| (f.owner_id.clone(), f.name.clone()))
            .collect()
    }

    pub fn log_entries(&self) -> Vec<ProcessingLogEntry> {
        self.lock().log.clone()
    }

    pub fn write_counts(&self) -> WriteCounts {
        self.lock().counts
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn fetch_message(&self, id: &str) -> StoreResult<MessageRecord> {
        self.lock()
            .messages
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn sender_history(
        &self,
        vent_link_id: &str,
        exclude_id: &str,
        depth: usize,
    ) -> StoreResult<SenderHistory> {
        let inner = self.lock();
        let mut matching: Vec<&MessageRecord> = inner
            .messages
            .values()
            .filter(|m| m.vent_link_id == vent_link_id && m.id != exclude_id)
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let total = matching.len() as u32;
        let recent: Vec<HistoryItem> = matching
            .into_iter()
            .take(depth)
            .map(|m| HistoryItem {
                body: m.body.clone(),
                created_at: Some(m.created_at),
                has_response: m.has_response,
            })
            .collect();
        Ok(SenderHistory::from_recent(recent, total))
    }

    async fn apply_moderation(
        &self,
        id: &str,
        update: &ModerationUpdate,
        run_started_at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut inner = self.lock();
        if inner.deny_message_updates {
            return Err(StoreError::Denied("row-level security".to_string()));
        }
        let msg = inner
            .messages
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if msg.processed_at.is_some_and(|p| p > run_started_at) {
            return Ok(false);
        }
        let risk = if update.merge_risk {
            update.self_harm_risk.max(msg.self_harm_risk.unwrap_or_default())
        } else {
            update.self_harm_risk
        };
        msg.moderation_score = Some(update.moderation_score);
        msg.is_flagged = update.is_flagged;
        msg.moderation_categories = update.categories.clone();
        msg.self_harm_risk = Some(risk);
        msg.processed_at = Some(Utc::now());
        inner.counts.message_updates += 1;
        Ok(true)
    }

    async fn apply_categorization(
        &self,
        id: &str,
        update: &CategorizationUpdate,
    ) -> StoreResult<()> {
        let mut inner = self.lock();
        if inner.deny_message_updates {
            return Err(StoreError::Denied("row-level security".to_string()));
        }
        let msg = inner
            .messages
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        msg.category = Some(update.category);
        msg.sentiment = Some(update.sentiment);
        msg.urgency = Some(update.urgency);
        inner.counts.message_updates += 1;
        Ok(())
    }

    async fn apply_priority(
        &self,
        id: &str,
        score: i32,
        run_started_at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut inner = self.lock();
        if inner.deny_message_updates {
            return Err(StoreError::Denied("row-level security".to_string()));
        }
        let msg = inner
            .messages
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if msg.processed_at.is_some_and(|p| p > run_started_at) {
            return Ok(false);
        }
        msg.priority_score = Some(score);
        msg.processed_at = Some(Utc::now());
        inner.counts.message_updates += 1;
        Ok(true)
    }

    async fn insert_tag(&self, message_id: &str, tag: &str) -> StoreResult<bool> {
        let mut inner = self.lock();
        let tags = inner.tags.entry(message_id.to_string()).or_default();
        if tags.iter().any(|t| t == tag) {
            return Ok(false);
        }
        tags.push(tag.to_string());
        inner.counts.tag_inserts += 1;
        Ok(true)
    }

    async fn find_or_create_folder(&self, owner_id: &str, name: &str) -> StoreResult<String> {
        let mut inner = self.lock();
        if let Some(existing) = inner
            .folders
            .iter()
            .find(|f| f.owner_id == owner_id && f.name == name)
        {
            return Ok(existing.id.clone());
        }
        inner.folder_seq += 1;
        let id = format!("folder-{}", inner.folder_seq);
        inner.folders.push(FolderRow {
            id: id.clone(),
            owner_id: owner_id.to_string(),
            name: name.to_string(),
        });
        inner.counts.folder_writes += 1;
        Ok(id)
    }

    async fn assign_folder(&self, message_id: &str, folder_id: &str) -> StoreResult<bool> {
        let mut inner = self.lock();
        let added = inner
            .assignments
            .insert((message_id.to_string(), folder_id.to_string()));
        if added {
            inner.counts.folder_writes += 1;
        }
        Ok(added)
    }

    async fn append_log(&self, entry: &ProcessingLogEntry) -> StoreResult<()> {
        let mut inner = self.lock();
        inner.log.push(entry.clone());
        inner.counts.log_appends += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::RiskLevel;
    use crate::store::PipelineStage;
    use chrono::Duration;

    fn record(id: &str, link: &str) -> MessageRecord {
        let mut r = MessageRecord::draft(link, "hello there");
        r.id = id.to_string();
        r
    }

    #[tokio::test]
    async fn fetch_round_trips() {
        let store = MemoryStore::with_message(record("m1", "l1"));
        let got = store.fetch_message("m1").await.unwrap();
        assert_eq!(got.body, "hello there");
        assert!(matches!(
            store.fetch_message("nope").await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn sender_history_excludes_current_and_sorts_newest_first() {
        let store = MemoryStore::new();
        for (id, age_hours, responded) in [("a", 3, true), ("b", 1, false), ("c", 9, false)] {
            let mut r = record(id, "link");
            r.created_at = Utc::now() - Duration::hours(age_hours);
            r.has_response = responded;
            store.insert_message(r);
        }
        store.insert_message(record("current", "link"));
        let other = record("other-link-msg", "elsewhere");
        store.insert_message(other);

        let history = store.sender_history("link", "current", 2).await.unwrap();
        assert_eq!(history.total_messages, 3);
        assert_eq!(history.recent.len(), 2);
        assert!(history.recent[0].created_at > history.recent[1].created_at);
    }

    #[tokio::test]
    async fn stale_writes_are_skipped() {
        let mut r = record("m1", "l1");
        r.processed_at = Some(Utc::now());
        let store = MemoryStore::with_message(r);

        let stale_run = Utc::now() - Duration::minutes(10);
        let update = ModerationUpdate {
            moderation_score: 0.4,
            is_flagged: true,
            categories: vec!["harassment".to_string()],
            self_harm_risk: RiskLevel::None,
            merge_risk: false,
        };
        assert!(!store.apply_moderation("m1", &update, stale_run).await.unwrap());
        assert!(!store.message("m1").unwrap().is_flagged);
        assert!(store.message("m1").unwrap().moderation_categories.is_empty());

        let fresh_run = Utc::now() + Duration::seconds(1);
        assert!(store.apply_moderation("m1", &update, fresh_run).await.unwrap());
        let row = store.message("m1").unwrap();
        assert!(row.is_flagged);
        assert_eq!(row.moderation_categories, vec!["harassment"]);
    }

    #[tokio::test]
    async fn merge_risk_never_lowers_recorded_level() {
        let mut r = record("m1", "l1");
        r.self_harm_risk = Some(RiskLevel::High);
        let store = MemoryStore::with_message(r);

        let update = ModerationUpdate {
            moderation_score: 0.1,
            is_flagged: false,
            categories: Vec::new(),
            self_harm_risk: RiskLevel::None,
            merge_risk: true,
        };
        store
            .apply_moderation("m1", &update, Utc::now())
            .await
            .unwrap();
        assert_eq!(store.message("m1").unwrap().self_harm_risk, Some(RiskLevel::High));

        // without merge the write wins
        let update = ModerationUpdate {
            merge_risk: false,
            ..update
        };
        store
            .apply_moderation("m1", &update, Utc::now() + Duration::seconds(2))
            .await
            .unwrap();
        assert_eq!(store.message("m1").unwrap().self_harm_risk, Some(RiskLevel::None));
    }

    #[tokio::test]
    async fn tag_and_folder_writes_are_idempotent() {
        let store = MemoryStore::with_message(record("m1", "l1"));
        assert!(store.insert_tag("m1", "advice").await.unwrap());
        assert!(!store.insert_tag("m1", "advice").await.unwrap());
        assert_eq!(store.tags("m1"), vec!["advice"]);

        let f1 = store.find_or_create_folder("owner", "Questions").await.unwrap();
        let f2 = store.find_or_create_folder("owner", "Questions").await.unwrap();
        assert_eq!(f1, f2);
        assert_eq!(store.folder_names().len(), 1);

        assert!(store.assign_folder("m1", &f1).await.unwrap());
        assert!(!store.assign_folder("m1", &f1).await.unwrap());
        assert_eq!(store.assignments("m1"), vec![f1]);
    }

    #[tokio::test]
    async fn write_counts_track_everything() {
        let store = MemoryStore::with_message(record("m1", "l1"));
        assert_eq!(store.write_counts().total(), 0);

        store.insert_tag("m1", "x").await.unwrap();
        store
            .append_log(&ProcessingLogEntry::new(
                "m1",
                PipelineStage::Moderation,
                serde_json::json!({}),
                3,
            ))
            .await
            .unwrap();
        let counts = store.write_counts();
        assert_eq!(counts.tag_inserts, 1);
        assert_eq!(counts.log_appends, 1);
        assert_eq!(counts.total(), 2);
    }

    #[tokio::test]
    async fn denied_updates_surface_as_denied() {
        let store = MemoryStore::with_message(record("m1", "l1"));
        store.deny_message_updates();
        let update = ModerationUpdate {
            moderation_score: 0.2,
            is_flagged: false,
            categories: Vec::new(),
            self_harm_risk: RiskLevel::None,
            merge_risk: false,
        };
        assert!(matches!(
            store.apply_moderation("m1", &update, Utc::now()).await,
            Err(StoreError::Denied(_))
        ));
    }
}
