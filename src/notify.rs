//! Crisis alert dispatch: webhook and SMTP sinks behind a per-link
//! cooldown, so a flagged message reaches a human fast without paging the
//! same inbox owner for every message in a burst.
//!
//! Sinks are configured from the environment and default to none. An
//! unconfigured notifier still reports the gap loudly; silence would hide
//! the one alert that matters.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use lettre::message::{header, Mailbox, Message};
use lettre::transport::smtp::{authentication::Credentials, AsyncSmtpTransport};
use lettre::{AsyncTransport, Tokio1Executor};
use serde::Serialize;
use tracing::{info, warn};

use crate::message::{RecommendedAction, RiskLevel};

/// Default per-link quiet period between alerts: 15 minutes.
pub const DEFAULT_COOLDOWN_SECS: i64 = 900;

/// What the alerting layer is allowed to see. Deliberately excludes the
/// message body; indicators are short model-produced labels.
#[derive(Debug, Clone, Serialize)]
pub struct CrisisAlert {
    pub message_id: String,
    pub vent_link_id: String,
    pub risk_level: RiskLevel,
    pub requires_immediate_attention: bool,
    pub indicators: Vec<String>,
    pub recommended_action: RecommendedAction,
    pub ts: DateTime<Utc>,
}

#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn send(&self, alert: &CrisisAlert) -> Result<()>;
    fn name(&self) -> &'static str;
}

// ------------------------------------------------------------
// Webhook sink
// ------------------------------------------------------------

pub struct WebhookSink {
    url: String,
    client: reqwest::Client,
    timeout: Duration,
    max_retries: u8,
}

impl WebhookSink {
    pub fn new(url: String) -> Self {
        Self {
            url,
            client: reqwest::Client::new(),
            timeout: Duration::from_secs(5),
            max_retries: 3,
        }
    }
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    /// Human-readable line for chat-style consumers.
    text: String,
    alert: &'a CrisisAlert,
}

#[async_trait]
impl AlertSink for WebhookSink {
    async fn send(&self, alert: &CrisisAlert) -> Result<()> {
        let payload = WebhookPayload {
            text: format!(
                "Crisis alert: {} risk on inbox link {} (message {})",
                alert.risk_level.as_str(),
                alert.vent_link_id,
                alert.message_id
            ),
            alert,
        };

        let mut attempt: u8 = 0;
        loop {
            attempt += 1;
            let res = self
                .client
                .post(&self.url)
                .timeout(self.timeout)
                .json(&payload)
                .send()
                .await;

            match res {
                Ok(rsp) => {
                    if let Err(e) = rsp.error_for_status_ref() {
                        if attempt < self.max_retries {
                            tokio::time::sleep(Duration::from_millis(500u64 << (attempt - 1)))
                                .await;
                            continue;
                        }
                        return Err(anyhow!("crisis webhook HTTP error: {e}"));
                    }
                    return Ok(());
                }
                Err(e) => {
                    if attempt < self.max_retries {
                        tokio::time::sleep(Duration::from_millis(500u64 << (attempt - 1))).await;
                        continue;
                    }
                    return Err(anyhow!("crisis webhook request failed: {e}"));
                }
            }
        }
    }

    fn name(&self) -> &'static str {
        "webhook"
    }
}

// ------------------------------------------------------------
// Email sink
// ------------------------------------------------------------

pub struct EmailSink {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Mailbox,
}

impl EmailSink {
    /// Build from `SMTP_HOST`/`SMTP_USER`/`SMTP_PASS` plus
    /// `CRISIS_EMAIL_FROM`/`CRISIS_EMAIL_TO`. Errors when any is missing
    /// or malformed.
    pub fn try_from_env() -> Result<Self> {
        let host = std::env::var("SMTP_HOST").context("SMTP_HOST missing")?;
        let user = std::env::var("SMTP_USER").context("SMTP_USER missing")?;
        let pass = std::env::var("SMTP_PASS").context("SMTP_PASS missing")?;
        let from_addr = std::env::var("CRISIS_EMAIL_FROM").context("CRISIS_EMAIL_FROM missing")?;
        let to_addr = std::env::var("CRISIS_EMAIL_TO").context("CRISIS_EMAIL_TO missing")?;

        let creds = Credentials::new(user, pass);
        let mailer = AsyncSmtpTransport::<Tokio1Executor>::relay(&host)
            .context("invalid SMTP_HOST")?
            .credentials(creds)
            .build();

        let from = from_addr.parse().context("invalid CRISIS_EMAIL_FROM")?;
        let to = to_addr.parse().context("invalid CRISIS_EMAIL_TO")?;
        Ok(Self { mailer, from, to })
    }
}

#[async_trait]
impl AlertSink for EmailSink {
    async fn send(&self, alert: &CrisisAlert) -> Result<()> {
        let subject = format!(
            "Crisis alert ({}) on inbox link {}",
            alert.risk_level.as_str(),
            alert.vent_link_id
        );
        let indicators = if alert.indicators.is_empty() {
            "-".to_string()
        } else {
            alert.indicators.join(", ")
        };
        let body = format!(
            "Risk level: {}\nImmediate attention: {}\nIndicators: {}\nMessage id: {}\nTime (UTC): {}\n",
            alert.risk_level.as_str(),
            alert.requires_immediate_attention,
            indicators,
            alert.message_id,
            alert.ts.to_rfc3339()
        );

        let msg = Message::builder()
            .from(self.from.clone())
            .to(self.to.clone())
            .subject(subject)
            .header(header::ContentType::TEXT_PLAIN)
            .body(body)
            .context("build crisis email")?;

        self.mailer.send(msg).await.context("send crisis email")?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "email"
    }
}

// ------------------------------------------------------------
// Notifier with per-link cooldown
// ------------------------------------------------------------

/// What happened with one dispatch attempt, for the audit trail.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DispatchReport {
    /// Alert fell inside the per-link cooldown window.
    pub suppressed: bool,
    /// No sink is configured at all.
    pub unconfigured: bool,
    pub delivered: Vec<&'static str>,
    pub failed: Vec<&'static str>,
}

pub struct CrisisNotifier {
    sinks: Vec<Box<dyn AlertSink>>,
    cooldown: ChronoDuration,
    last_sent: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl CrisisNotifier {
    pub fn with_sinks(sinks: Vec<Box<dyn AlertSink>>, cooldown_secs: i64) -> Self {
        Self {
            sinks,
            cooldown: ChronoDuration::seconds(cooldown_secs.max(0)),
            last_sent: Mutex::new(HashMap::new()),
        }
    }

    /// No sinks, nothing ever sent. For tests and explicit opt-out.
    pub fn disabled() -> Self {
        Self::with_sinks(Vec::new(), 0)
    }

    /// Assemble sinks from the environment: `CRISIS_WEBHOOK_URL` for the
    /// webhook, `SMTP_*` plus `CRISIS_EMAIL_*` for email,
    /// `CRISIS_ALERT_COOLDOWN_SECS` for the quiet period.
    pub fn from_env() -> Self {
        let mut sinks: Vec<Box<dyn AlertSink>> = Vec::new();

        match std::env::var("CRISIS_WEBHOOK_URL") {
            Ok(url) if !url.trim().is_empty() => {
                sinks.push(Box::new(WebhookSink::new(url)));
            }
            _ => {}
        }

        if std::env::var("SMTP_HOST").is_ok() {
            match EmailSink::try_from_env() {
                Ok(sink) => sinks.push(Box::new(sink)),
                Err(e) => warn!(error = %e, "SMTP crisis sink misconfigured; skipping"),
            }
        }

        let cooldown_secs = std::env::var("CRISIS_ALERT_COOLDOWN_SECS")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(DEFAULT_COOLDOWN_SECS);

        if sinks.is_empty() {
            warn!(
                "no crisis alert sink configured; crisis verdicts will only be logged and audited"
            );
        } else {
            info!(sinks = sinks.len(), cooldown_secs, "crisis notifier ready");
        }
        Self::with_sinks(sinks, cooldown_secs)
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    /// Cooldown check for one link. Mutating: a passing check reserves the
    /// window immediately so concurrent dispatches can't double-send.
    fn claim_window(&self, vent_link_id: &str, now: DateTime<Utc>) -> bool {
        let mut guard = self.last_sent.lock().unwrap_or_else(|e| e.into_inner());
        match guard.get(vent_link_id) {
            Some(ts) if now.signed_duration_since(*ts) < self.cooldown => false,
            _ => {
                guard.insert(vent_link_id.to_string(), now);
                true
            }
        }
    }

    /// Give a claimed window back after a dispatch that reached nobody, so
    /// the next alert for the link retries instead of sitting out the
    /// cooldown.
    fn release_window(&self, vent_link_id: &str) {
        let mut guard = self.last_sent.lock().unwrap_or_else(|e| e.into_inner());
        guard.remove(vent_link_id);
    }

    pub async fn dispatch(&self, alert: &CrisisAlert) -> DispatchReport {
        let mut report = DispatchReport::default();

        if self.sinks.is_empty() {
            report.unconfigured = true;
            warn!(
                message = %alert.message_id,
                risk = alert.risk_level.as_str(),
                "crisis alert raised but no notification sink is configured"
            );
            return report;
        }

        if !self.claim_window(&alert.vent_link_id, alert.ts) {
            report.suppressed = true;
            info!(
                message = %alert.message_id,
                link = %alert.vent_link_id,
                "crisis alert suppressed by cooldown"
            );
            return report;
        }

        for sink in &self.sinks {
            match sink.send(alert).await {
                Ok(()) => report.delivered.push(sink.name()),
                Err(e) => {
                    warn!(sink = sink.name(), error = %e, "crisis alert delivery failed");
                    report.failed.push(sink.name());
                }
            }
        }
        // Every sink failed: the claim must not mute the next attempt.
        if report.delivered.is_empty() {
            self.release_window(&alert.vent_link_id);
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    struct RecordingSink {
        seen: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    #[async_trait]
    impl AlertSink for RecordingSink {
        async fn send(&self, alert: &CrisisAlert) -> Result<()> {
            self.seen.lock().unwrap().push(alert.message_id.clone());
            if self.fail {
                Err(anyhow!("boom"))
            } else {
                Ok(())
            }
        }
        fn name(&self) -> &'static str {
            "recording"
        }
    }

    fn alert(message_id: &str, link: &str) -> CrisisAlert {
        CrisisAlert {
            message_id: message_id.to_string(),
            vent_link_id: link.to_string(),
            risk_level: RiskLevel::High,
            requires_immediate_attention: true,
            indicators: vec!["direct statement".to_string()],
            recommended_action: RecommendedAction::Intervene,
            ts: Utc::now(),
        }
    }

    #[tokio::test]
    async fn unconfigured_notifier_reports_the_gap() {
        let n = CrisisNotifier::disabled();
        let report = n.dispatch(&alert("m1", "l1")).await;
        assert!(report.unconfigured);
        assert!(report.delivered.is_empty());
    }

    #[tokio::test]
    async fn cooldown_suppresses_same_link_bursts() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = RecordingSink {
            seen: seen.clone(),
            fail: false,
        };
        let n = CrisisNotifier::with_sinks(vec![Box::new(sink)], 900);

        let first = n.dispatch(&alert("m1", "link-a")).await;
        assert_eq!(first.delivered, vec!["recording"]);

        let second = n.dispatch(&alert("m2", "link-a")).await;
        assert!(second.suppressed);

        // a different link is unaffected
        let other = n.dispatch(&alert("m3", "link-b")).await;
        assert_eq!(other.delivered, vec!["recording"]);

        assert_eq!(*seen.lock().unwrap(), vec!["m1", "m3"]);
    }

    #[tokio::test]
    async fn cooldown_expires() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = RecordingSink {
            seen: seen.clone(),
            fail: false,
        };
        let n = CrisisNotifier::with_sinks(vec![Box::new(sink)], 900);

        let mut first = alert("m1", "link-a");
        first.ts = Utc::now() - ChronoDuration::seconds(901);
        assert_eq!(n.dispatch(&first).await.delivered, vec!["recording"]);

        // later than cooldown after the first
        let second = alert("m2", "link-a");
        assert_eq!(n.dispatch(&second).await.delivered, vec!["recording"]);
    }

    #[tokio::test]
    async fn failed_sinks_are_reported_not_fatal() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let ok = RecordingSink {
            seen: seen.clone(),
            fail: false,
        };
        let bad = RecordingSink {
            seen: seen.clone(),
            fail: true,
        };
        let n = CrisisNotifier::with_sinks(vec![Box::new(bad), Box::new(ok)], 0);
        let report = n.dispatch(&alert("m1", "l1")).await;
        assert_eq!(report.failed, vec!["recording"]);
        assert_eq!(report.delivered, vec!["recording"]);
    }

    #[tokio::test]
    async fn total_delivery_failure_releases_the_cooldown_claim() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let bad = RecordingSink {
            seen: seen.clone(),
            fail: true,
        };
        let n = CrisisNotifier::with_sinks(vec![Box::new(bad)], 900);

        let first = n.dispatch(&alert("m1", "link-a")).await;
        assert!(first.delivered.is_empty());

        // the failed attempt did not burn the window
        let second = n.dispatch(&alert("m2", "link-a")).await;
        assert!(!second.suppressed);
        assert_eq!(*seen.lock().unwrap(), vec!["m1", "m2"]);
    }

    #[tokio::test]
    async fn partial_delivery_keeps_the_claim() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let ok = RecordingSink {
            seen: seen.clone(),
            fail: false,
        };
        let bad = RecordingSink {
            seen: seen.clone(),
            fail: true,
        };
        let n = CrisisNotifier::with_sinks(vec![Box::new(ok), Box::new(bad)], 900);

        let first = n.dispatch(&alert("m1", "link-a")).await;
        assert_eq!(first.delivered, vec!["recording"]);
        assert_eq!(first.failed, vec!["recording"]);

        let second = n.dispatch(&alert("m2", "link-a")).await;
        assert!(second.suppressed);
        assert_eq!(*seen.lock().unwrap(), vec!["m1", "m1"]);
    }
}
