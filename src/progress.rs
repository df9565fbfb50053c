//! Review progress reporting.
//!
//! Every review run emits a sequence of [`ProgressEvent`]s through a
//! [`ProgressReporter`]. Two families of reporter exist:
//!
//! - [`ProgressRegistry`]: the per-contract live channel behind the
//!   WebSocket endpoint. At most one subscriber per contract; events for a
//!   contract nobody watches are dropped. Nothing is buffered or replayed,
//!   so clients that miss events re-fetch state over HTTP.
//! - [`StderrProgress`] / [`JsonProgress`] / [`NoProgress`]: CLI output on
//!   **stderr**, so stdout stays parseable for scripts.
//!
//! Wire shape (WebSocket and `--progress json`):
//!
//! ```json
//! {"step":"OCR","status":"COMPLETED","data":"# Lease ...","timestamp":1760000000000}
//! ```

use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use tokio::sync::mpsc;

/// Pipeline step an event belongs to.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Connection,
    ReviewStart,
    Ocr,
    KgBuild,
    ReviewAll,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageStatus {
    Connected,
    Processing,
    Completed,
    Failed,
    Skipped,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Connection => "CONNECTION",
            Stage::ReviewStart => "REVIEW_START",
            Stage::Ocr => "OCR",
            Stage::KgBuild => "KG_BUILD",
            Stage::ReviewAll => "REVIEW_ALL",
        }
    }
}

impl StageStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StageStatus::Connected => "CONNECTED",
            StageStatus::Processing => "PROCESSING",
            StageStatus::Completed => "COMPLETED",
            StageStatus::Failed => "FAILED",
            StageStatus::Skipped => "SKIPPED",
        }
    }
}

/// One progress message.
#[derive(Clone, Debug, Serialize)]
pub struct ProgressEvent {
    #[serde(skip)]
    pub contract_id: i64,
    pub step: Stage,
    pub status: StageStatus,
    pub data: Value,
    /// Unix epoch milliseconds.
    pub timestamp: i64,
}

impl ProgressEvent {
    pub fn new(contract_id: i64, step: Stage, status: StageStatus, data: Value) -> Self {
        Self {
            contract_id,
            step,
            status,
            data,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// First message on every freshly opened channel.
    pub fn connected(contract_id: i64) -> Self {
        Self::new(
            contract_id,
            Stage::Connection,
            StageStatus::Connected,
            Value::String(format!("watching contract {}", contract_id)),
        )
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Receives progress events. Called from the review pipeline; must not block.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

// ═══════════════════════════════════════════════════════════════════════
// Live per-contract channel
// ═══════════════════════════════════════════════════════════════════════

struct Subscriber {
    id: u64,
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

/// Registry of live subscribers keyed by contract id.
#[derive(Default)]
pub struct ProgressRegistry {
    subscribers: RwLock<HashMap<i64, Subscriber>>,
    next_id: AtomicU64,
}

/// Receiving half handed to a subscriber.
pub struct Subscription {
    pub contract_id: i64,
    pub id: u64,
    pub events: mpsc::UnboundedReceiver<ProgressEvent>,
}

impl ProgressRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a subscriber for `contract_id`, replacing (and thereby
    /// closing) any previous one.
    pub fn subscribe(&self, contract_id: i64) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, events) = mpsc::unbounded_channel();
        let previous = self
            .subscribers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(contract_id, Subscriber { id, tx });
        if previous.is_some() {
            tracing::debug!(contract_id, "progress subscriber replaced");
        }
        Subscription {
            contract_id,
            id,
            events,
        }
    }

    /// Removes the registration only if it still belongs to `subscription_id`,
    /// so a replaced subscriber cannot evict its successor.
    pub fn unsubscribe(&self, contract_id: i64, subscription_id: u64) {
        let mut subs = self.subscribers.write().unwrap_or_else(|e| e.into_inner());
        if subs.get(&contract_id).map(|s| s.id) == Some(subscription_id) {
            subs.remove(&contract_id);
        }
    }

    pub fn is_subscribed(&self, contract_id: i64) -> bool {
        self.subscribers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(&contract_id)
    }

    /// Fire-and-forget delivery to the current subscriber, if any.
    pub fn publish(&self, event: ProgressEvent) {
        let subs = self.subscribers.read().unwrap_or_else(|e| e.into_inner());
        match subs.get(&event.contract_id) {
            Some(sub) => {
                if sub.tx.send(event).is_err() {
                    tracing::debug!("progress subscriber already gone");
                }
            }
            None => {
                tracing::trace!(
                    contract_id = event.contract_id,
                    step = event.step.as_str(),
                    "no progress subscriber; event dropped"
                );
            }
        }
    }
}

impl ProgressReporter for ProgressRegistry {
    fn report(&self, event: ProgressEvent) {
        self.publish(event);
    }
}

// ═══════════════════════════════════════════════════════════════════════
// CLI reporters
// ═══════════════════════════════════════════════════════════════════════

/// Human-friendly progress on stderr: "review 42  OCR  COMPLETED  (1,234 chars)".
pub struct StderrProgress;

/// Short trailer for a stderr progress line. Long text is summarized by its
/// character count.
fn describe(data: &Value) -> String {
    match data {
        Value::Null => String::new(),
        Value::String(s) => {
            let chars = s.chars().count();
            if chars > 80 {
                format!("  ({} chars)", format_number(chars as u64))
            } else {
                format!("  {}", s)
            }
        }
        Value::Object(map) => {
            let nodes = map.get("nodes").and_then(Value::as_array).map(|a| a.len());
            let edges = map.get("edges").and_then(Value::as_array).map(|a| a.len());
            match (nodes, edges) {
                (Some(n), Some(e)) => format!("  ({} nodes, {} edges)", n, e),
                _ => String::new(),
            }
        }
        _ => String::new(),
    }
}

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ProgressEvent) {
        let line = format!(
            "review {}  {}  {}{}\n",
            event.contract_id,
            event.step.as_str(),
            event.status.as_str(),
            describe(&event.data)
        );
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ProgressEvent) {
        let _ = writeln!(std::io::stderr().lock(), "{}", event.to_json());
        let _ = std::io::stderr().lock().flush();
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
