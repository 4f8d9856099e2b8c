//! Security audit events.
//!
//! The vault reports security-relevant incidents (nonce collisions, KDF
//! fallbacks, migrations) through a write-only sink provided by the
//! embedding application. Recording is fire-and-forget: it must never block
//! or replace the error propagation of the operation that produced the
//! event.

use chrono::Utc;
use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditSeverity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub severity: AuditSeverity,
    /// Stable machine-readable code, e.g. "nonce-collision".
    pub code: &'static str,
    pub message: String,
    /// Unix milliseconds.
    pub at: i64,
}

impl AuditEvent {
    pub fn new(severity: AuditSeverity, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            severity,
            code,
            message: message.into(),
            at: Utc::now().timestamp_millis(),
        }
    }
}

/// Write-only event sink.
pub trait AuditLog: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Discards every event.
#[derive(Debug, Default)]
pub struct NullAuditLog;

impl AuditLog for NullAuditLog {
    fn record(&self, _event: AuditEvent) {}
}

/// Collects events in memory; used in tests and by embedders that flush
/// batches themselves.
#[derive(Default)]
pub struct MemoryAuditLog {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().clone()
    }

    pub fn count_with_severity(&self, severity: AuditSeverity) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.severity == severity)
            .count()
    }
}

impl AuditLog for MemoryAuditLog {
    fn record(&self, event: AuditEvent) {
        self.events.lock().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_log_collects_events() {
        let log = MemoryAuditLog::new();
        log.record(AuditEvent::new(AuditSeverity::Info, "test-event", "one"));
        log.record(AuditEvent::new(AuditSeverity::Critical, "test-event", "two"));

        assert_eq!(log.events().len(), 2);
        assert_eq!(log.count_with_severity(AuditSeverity::Critical), 1);
        assert_eq!(log.count_with_severity(AuditSeverity::Warning), 0);
    }

    #[test]
    fn events_carry_timestamps() {
        let event = AuditEvent::new(AuditSeverity::Info, "test-event", "now");
        assert!(event.at > 0);
    }
}
