//! Audit events and sinks.
//!
//! The engine emits exactly one [`AuditEvent`] per render attempt. Sinks must
//! not block the render path; persistence is the embedder's concern.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;

/// Event type used for render attempts.
pub const EVENT_RENDER: &str = "template_render";
/// Outcome recorded for a successful render.
pub const OUTCOME_SUCCESS: &str = "success";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub user: String,
    pub resource_id: String,
    /// `"success"` or an error code string such as `SECURITY_VIOLATION`.
    pub outcome: String,
    pub details: String,
}

impl AuditEvent {
    pub fn render(user: &str, resource_id: &str, outcome: &str, details: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            event_type: EVENT_RENDER.to_string(),
            user: user.to_string(),
            resource_id: resource_id.to_string(),
            outcome: outcome.to_string(),
            details: details.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == OUTCOME_SUCCESS
    }
}

pub trait AuditSink: Send + Sync {
    /// Must return promptly; implementations drop rather than block.
    fn emit(&self, event: AuditEvent);
}

/// Writes each event as a structured `tracing` record (target `tmplguard::audit`).
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: AuditEvent) {
        if event.is_success() {
            tracing::info!(
                target: "tmplguard::audit",
                event_type = %event.event_type,
                user = %event.user,
                resource_id = %event.resource_id,
                outcome = %event.outcome,
                timestamp = %event.timestamp.to_rfc3339(),
                "audit"
            );
        } else {
            tracing::warn!(
                target: "tmplguard::audit",
                event_type = %event.event_type,
                user = %event.user,
                resource_id = %event.resource_id,
                outcome = %event.outcome,
                details = %event.details,
                timestamp = %event.timestamp.to_rfc3339(),
                "audit"
            );
        }
    }
}

/// Forwards events to a bounded tokio channel. A full or closed channel drops
/// the event with a warning.
#[derive(Debug, Clone)]
pub struct ChannelAuditSink {
    tx: mpsc::Sender<AuditEvent>,
}

impl ChannelAuditSink {
    pub fn new(tx: mpsc::Sender<AuditEvent>) -> Self {
        Self { tx }
    }

    /// Convenience constructor returning the receiving half as well.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<AuditEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl AuditSink for ChannelAuditSink {
    fn emit(&self, event: AuditEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(ev)) => {
                tracing::warn!(resource_id = %ev.resource_id, outcome = %ev.outcome, "audit channel full, event dropped");
            }
            Err(mpsc::error::TrySendError::Closed(ev)) => {
                tracing::warn!(resource_id = %ev.resource_id, outcome = %ev.outcome, "audit channel closed, event dropped");
            }
        }
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        match self.events.lock() {
            Ok(g) => g.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn len(&self) -> usize {
        match self.events.lock() {
            Ok(g) => g.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AuditSink for MemoryAuditSink {
    fn emit(&self, event: AuditEvent) {
        match self.events.lock() {
            Ok(mut g) => g.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn channel_sink_drops_when_full() {
        let (sink, mut rx) = ChannelAuditSink::channel(1);
        sink.emit(AuditEvent::render("u", "t", OUTCOME_SUCCESS, ""));
        sink.emit(AuditEvent::render("u", "t", "RATE_LIMITED", "second"));

        let first = rx.try_recv().unwrap();
        assert!(first.is_success());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn event_serializes_with_rfc3339_timestamp() {
        let ev = AuditEvent::render("alice", "welcome", "PERMISSION_DENIED", "denied");
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["outcome"], "PERMISSION_DENIED");
        assert_eq!(v["event_type"], EVENT_RENDER);
        assert!(v["timestamp"].as_str().unwrap().contains('T'));
    }
}
