//! PostgREST-backed store (Supabase in production). All access goes through
//! the service role; per-request `Prefer` headers drive conditional writes
//! and representation returns.
//!
//! Filter values are passed via `query()` so reqwest percent-encodes them;
//! never format user-derived strings into the URL path.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::message::{
    Category, HistoryItem, MessageRecord, RiskLevel, SenderHistory, Sentiment, Urgency,
};

use super::{
    CategorizationUpdate, MessageStore, ModerationUpdate, ProcessingLogEntry, StoreError,
    StoreResult,
};

const ENV_BASE_URL: &str = "SUPABASE_URL";
const ENV_SERVICE_KEY: &str = "SUPABASE_SERVICE_KEY";

pub struct RestStore {
    http: reqwest::Client,
    base_url: String,
}

/// Message row as stored; the body column is named `content` there.
#[derive(Debug, Deserialize)]
struct MessageRow {
    id: String,
    vent_link_id: String,
    #[serde(default)]
    owner_id: Option<String>,
    content: String,
    #[serde(default)]
    mood: Option<String>,
    created_at: DateTime<Utc>,
    #[serde(default)]
    has_response: bool,
    #[serde(default)]
    moderation_score: Option<f32>,
    #[serde(default)]
    is_flagged: bool,
    #[serde(default)]
    moderation_categories: Vec<String>,
    #[serde(default)]
    category: Option<Category>,
    #[serde(default)]
    sentiment: Option<Sentiment>,
    #[serde(default)]
    urgency: Option<Urgency>,
    #[serde(default)]
    self_harm_risk: Option<RiskLevel>,
    #[serde(default)]
    priority_score: Option<i32>,
    #[serde(default)]
    processed_at: Option<DateTime<Utc>>,
}

impl From<MessageRow> for MessageRecord {
    fn from(row: MessageRow) -> Self {
        MessageRecord {
            id: row.id,
            vent_link_id: row.vent_link_id,
            owner_id: row.owner_id,
            body: row.content,
            mood: row.mood,
            created_at: row.created_at,
            has_response: row.has_response,
            moderation_score: row.moderation_score,
            is_flagged: row.is_flagged,
            moderation_categories: row.moderation_categories,
            category: row.category,
            sentiment: row.sentiment,
            urgency: row.urgency,
            self_harm_risk: row.self_harm_risk,
            priority_score: row.priority_score,
            processed_at: row.processed_at,
        }
    }
}

#[derive(Debug, Deserialize)]
struct HistoryRow {
    content: String,
    created_at: DateTime<Utc>,
    #[serde(default)]
    has_response: bool,
}

#[derive(Debug, Deserialize)]
struct IdRow {
    id: String,
}

/// RFC 3339 with microseconds in UTC, the form PostgREST filters expect.
fn pg_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Total row count from a `Content-Range: 0-4/27` header.
fn parse_content_range_total(value: &str) -> Option<u32> {
    value.split('/').nth(1)?.trim().parse().ok()
}

impl RestStore {
    pub fn new(base_url: &str, service_key: &str) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert("apikey", HeaderValue::from_str(service_key)?);
        let mut bearer = HeaderValue::from_str(&format!("Bearer {service_key}"))?;
        bearer.set_sensitive(true);
        headers.insert(AUTHORIZATION, bearer);

        let http = reqwest::Client::builder()
            .user_agent(concat!("ghostinbox-scoring/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(4))
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Build from `SUPABASE_URL` / `SUPABASE_SERVICE_KEY`.
    pub fn from_env() -> anyhow::Result<Self> {
        let base_url = std::env::var(ENV_BASE_URL)
            .map_err(|_| anyhow::anyhow!("{ENV_BASE_URL} is not set"))?;
        let service_key = std::env::var(ENV_SERVICE_KEY)
            .map_err(|_| anyhow::anyhow!("{ENV_SERVICE_KEY} is not set"))?;
        Self::new(&base_url, &service_key)
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    /// Map a response into our error kinds; success passes through.
    async fn check(&self, resp: reqwest::Response) -> StoreResult<reqwest::Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        let detail: String = body.chars().take(200).collect();
        Err(match status.as_u16() {
            401 | 403 => StoreError::Denied(detail),
            404 => StoreError::NotFound(detail),
            409 => StoreError::Conflict(detail),
            400 | 422 => StoreError::Invalid(detail),
            _ => StoreError::Unavailable(format!("{status}: {detail}")),
        })
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> StoreResult<reqwest::Response> {
        let resp = req
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        self.check(resp).await
    }

    async fn json_rows<T: serde::de::DeserializeOwned>(
        &self,
        resp: reqwest::Response,
    ) -> StoreResult<Vec<T>> {
        resp.json()
            .await
            .map_err(|e| StoreError::Invalid(e.to_string()))
    }

    /// Conditional message PATCH guarded by the stale-write filter. Returns
    /// whether any row was actually updated.
    async fn patch_message_guarded<T: Serialize>(
        &self,
        id: &str,
        run_started_at: DateTime<Utc>,
        patch: &T,
    ) -> StoreResult<bool> {
        let guard = format!(
            "(processed_at.is.null,processed_at.lt.{})",
            pg_timestamp(run_started_at)
        );
        let resp = self
            .send(
                self.http
                    .patch(self.table_url("messages"))
                    .query(&[("id", format!("eq.{id}").as_str()), ("or", guard.as_str())])
                    .header("Prefer", "return=representation")
                    .json(patch),
            )
            .await?;
        let rows: Vec<serde_json::Value> = self.json_rows(resp).await?;
        Ok(!rows.is_empty())
    }
}

#[async_trait]
impl MessageStore for RestStore {
    async fn fetch_message(&self, id: &str) -> StoreResult<MessageRecord> {
        let resp = self
            .send(
                self.http
                    .get(self.table_url("messages"))
                    .query(&[("id", format!("eq.{id}").as_str()), ("limit", "1")]),
            )
            .await?;
        let rows: Vec<MessageRow> = self.json_rows(resp).await?;
        rows.into_iter()
            .next()
            .map(MessageRecord::from)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn sender_history(
        &self,
        vent_link_id: &str,
        exclude_id: &str,
        depth: usize,
    ) -> StoreResult<SenderHistory> {
        let resp = self
            .send(
                self.http
                    .get(self.table_url("messages"))
                    .query(&[
                        ("vent_link_id", format!("eq.{vent_link_id}").as_str()),
                        ("id", format!("neq.{exclude_id}").as_str()),
                        ("select", "content,created_at,has_response"),
                        ("order", "created_at.desc"),
                        ("limit", depth.to_string().as_str()),
                    ])
                    .header("Prefer", "count=exact"),
            )
            .await?;

        let total_header = resp
            .headers()
            .get("content-range")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_range_total);

        let rows: Vec<HistoryRow> = self.json_rows(resp).await?;
        let total = total_header.unwrap_or(rows.len() as u32);
        let recent = rows
            .into_iter()
            .map(|r| HistoryItem {
                body: r.content,
                created_at: Some(r.created_at),
                has_response: r.has_response,
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
        // PostgREST cannot take the max of old and new server-side, so the
        // merge path reads first. The race window is benign: both writers
        // hold a level >= the recorded one.
        let mut risk = update.self_harm_risk;
        if update.merge_risk {
            if let Ok(current) = self.fetch_message(id).await {
                risk = risk.max(current.self_harm_risk.unwrap_or_default());
            }
        }

        #[derive(Serialize)]
        struct Patch<'a> {
            moderation_score: f32,
            is_flagged: bool,
            moderation_categories: &'a [String],
            self_harm_risk: RiskLevel,
            processed_at: DateTime<Utc>,
        }
        self.patch_message_guarded(
            id,
            run_started_at,
            &Patch {
                moderation_score: update.moderation_score,
                is_flagged: update.is_flagged,
                moderation_categories: &update.categories,
                self_harm_risk: risk,
                processed_at: Utc::now(),
            },
        )
        .await
    }

    async fn apply_categorization(
        &self,
        id: &str,
        update: &CategorizationUpdate,
    ) -> StoreResult<()> {
        #[derive(Serialize)]
        struct Patch {
            category: Category,
            sentiment: Sentiment,
            urgency: Urgency,
        }
        let resp = self
            .send(
                self.http
                    .patch(self.table_url("messages"))
                    .query(&[("id", format!("eq.{id}").as_str())])
                    .header("Prefer", "return=minimal")
                    .json(&Patch {
                        category: update.category,
                        sentiment: update.sentiment,
                        urgency: update.urgency,
                    }),
            )
            .await?;
        debug!(status = resp.status().as_u16(), id, "categorization patched");
        Ok(())
    }

    async fn apply_priority(
        &self,
        id: &str,
        score: i32,
        run_started_at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        #[derive(Serialize)]
        struct Patch {
            priority_score: i32,
            processed_at: DateTime<Utc>,
        }
        self.patch_message_guarded(
            id,
            run_started_at,
            &Patch {
                priority_score: score,
                processed_at: Utc::now(),
            },
        )
        .await
    }

    async fn insert_tag(&self, message_id: &str, tag: &str) -> StoreResult<bool> {
        // Cheap existence check first; the unique constraint still backstops
        // concurrent inserts.
        let resp = self
            .send(
                self.http
                    .get(self.table_url("message_tags"))
                    .query(&[
                        ("message_id", format!("eq.{message_id}").as_str()),
                        ("tag", format!("eq.{tag}").as_str()),
                        ("select", "id"),
                        ("limit", "1"),
                    ]),
            )
            .await?;
        let existing: Vec<IdRow> = self.json_rows(resp).await?;
        if !existing.is_empty() {
            return Ok(false);
        }

        #[derive(Serialize)]
        struct NewTag<'a> {
            message_id: &'a str,
            tag: &'a str,
        }
        let result = self
            .send(
                self.http
                    .post(self.table_url("message_tags"))
                    .header("Prefer", "return=minimal")
                    .json(&NewTag { message_id, tag }),
            )
            .await;
        match result {
            Ok(_) => Ok(true),
            Err(StoreError::Conflict(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn find_or_create_folder(&self, owner_id: &str, name: &str) -> StoreResult<String> {
        let resp = self
            .send(
                self.http
                    .get(self.table_url("folders"))
                    .query(&[
                        ("owner_id", format!("eq.{owner_id}").as_str()),
                        ("name", format!("eq.{name}").as_str()),
                        ("select", "id"),
                        ("limit", "1"),
                    ]),
            )
            .await?;
        let existing: Vec<IdRow> = self.json_rows(resp).await?;
        if let Some(row) = existing.into_iter().next() {
            return Ok(row.id);
        }

        #[derive(Serialize)]
        struct NewFolder<'a> {
            owner_id: &'a str,
            name: &'a str,
        }
        let created = self
            .send(
                self.http
                    .post(self.table_url("folders"))
                    .header("Prefer", "return=representation")
                    .json(&NewFolder { owner_id, name }),
            )
            .await;
        match created {
            Ok(resp) => {
                let rows: Vec<IdRow> = self.json_rows(resp).await?;
                rows.into_iter()
                    .next()
                    .map(|r| r.id)
                    .ok_or_else(|| StoreError::Invalid("folder insert returned no row".to_string()))
            }
            // Lost a create race; the folder exists now.
            Err(StoreError::Conflict(_)) => {
                let resp = self
                    .send(
                        self.http
                            .get(self.table_url("folders"))
                            .query(&[
                                ("owner_id", format!("eq.{owner_id}").as_str()),
                                ("name", format!("eq.{name}").as_str()),
                                ("select", "id"),
                                ("limit", "1"),
                            ]),
                    )
                    .await?;
                let rows: Vec<IdRow> = self.json_rows(resp).await?;
                rows.into_iter()
                    .next()
                    .map(|r| r.id)
                    .ok_or_else(|| StoreError::NotFound(format!("folder {name}")))
            }
            Err(e) => Err(e),
        }
    }

    async fn assign_folder(&self, message_id: &str, folder_id: &str) -> StoreResult<bool> {
        #[derive(Serialize)]
        struct NewAssignment<'a> {
            message_id: &'a str,
            folder_id: &'a str,
        }
        let result = self
            .send(
                self.http
                    .post(self.table_url("folder_assignments"))
                    .header("Prefer", "return=minimal")
                    .json(&NewAssignment {
                        message_id,
                        folder_id,
                    }),
            )
            .await;
        match result {
            Ok(_) => Ok(true),
            Err(StoreError::Conflict(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn append_log(&self, entry: &ProcessingLogEntry) -> StoreResult<()> {
        self.send(
            self.http
                .post(self.table_url("processing_log"))
                .header("Prefer", "return=minimal")
                .json(entry),
        )
        .await?;
        Ok(())
    }
}
