//! Layer status and report types
//!
//! Every lifecycle operation communicates its outcome by escalating the status object it was
//! handed. Severity only ever goes up; reasons accumulate in call order.

use std::sync::{
    atomic::{AtomicU8, Ordering},
    Mutex,
};

/// Severity of a layer status, totally ordered
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Severity {
    /// Fully functional
    Ok = 0,
    /// Degraded but usable
    Warn = 1,
    /// Not usable, recovery required
    Error = 2,
    /// No valid data / not brought up
    Stale = 3,
}

impl Severity {
    fn from_raw(value: u8) -> Severity {
        match value {
            0 => Severity::Ok,
            1 => Severity::Warn,
            2 => Severity::Error,
            _ => Severity::Stale,
        }
    }
}

impl core::fmt::Display for Severity {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            Severity::Ok => "OK",
            Severity::Warn => "WARN",
            Severity::Error => "ERROR",
            Severity::Stale => "STALE",
        };
        write!(f, "{name}")
    }
}

/// Monotonic status handed through a layer stack
///
/// Updates take the maximum of the current and the new severity, and append non-empty reasons
/// with a `"; "` separator. Writers serialize on an internal mutex; severity reads are atomic
/// and lock-free.
#[derive(Debug, Default)]
pub struct LayerStatus {
    severity: AtomicU8,
    reason: Mutex<String>,
}

impl LayerStatus {
    /// Create a status at [Severity::Ok] with no reason
    pub fn new() -> Self {
        Self::default()
    }

    fn set(&self, severity: Severity, reason: &str) {
        let mut current = self.reason.lock().unwrap();
        self.severity.fetch_max(severity as u8, Ordering::SeqCst);
        if !reason.is_empty() {
            if current.is_empty() {
                current.push_str(reason);
            } else {
                current.push_str("; ");
                current.push_str(reason);
            }
        }
    }

    /// The current severity
    pub fn severity(&self) -> Severity {
        Severity::from_raw(self.severity.load(Ordering::SeqCst))
    }

    /// Return true iff the current severity is at most `bound`
    pub fn bounded(&self, bound: Severity) -> bool {
        self.severity() <= bound
    }

    /// The accumulated reason trail, in escalation order
    pub fn reason(&self) -> String {
        self.reason.lock().unwrap().clone()
    }

    /// Escalate to at least [Severity::Warn]
    pub fn warn(&self, reason: &str) {
        self.set(Severity::Warn, reason);
    }

    /// Escalate to at least [Severity::Error]
    pub fn error(&self, reason: &str) {
        self.set(Severity::Error, reason);
    }

    /// Escalate to at least [Severity::Stale]
    pub fn stale(&self, reason: &str) {
        self.set(Severity::Stale, reason);
    }
}

/// A [LayerStatus] extended with ordered diagnostic key/value pairs
#[derive(Debug, Default)]
pub struct LayerReport {
    status: LayerStatus,
    values: Vec<(String, String)>,
}

impl LayerReport {
    /// Create a report at [Severity::Ok] with no values
    pub fn new() -> Self {
        Self::default()
    }

    /// The embedded status
    pub fn status(&self) -> &LayerStatus {
        &self.status
    }

    /// The current severity
    pub fn severity(&self) -> Severity {
        self.status.severity()
    }

    /// Return true iff the current severity is at most `bound`
    pub fn bounded(&self, bound: Severity) -> bool {
        self.status.bounded(bound)
    }

    /// The accumulated reason trail
    pub fn reason(&self) -> String {
        self.status.reason()
    }

    /// Escalate to at least [Severity::Warn]
    pub fn warn(&self, reason: &str) {
        self.status.warn(reason);
    }

    /// Escalate to at least [Severity::Error]
    pub fn error(&self, reason: &str) {
        self.status.error(reason);
    }

    /// Escalate to at least [Severity::Stale]
    pub fn stale(&self, reason: &str) {
        self.status.stale(reason);
    }

    /// Append a diagnostic key/value pair
    pub fn add(&mut self, key: &str, value: impl core::fmt::Display) {
        self.values.push((key.to_string(), value.to_string()));
    }

    /// The appended pairs, in diag order
    pub fn values(&self) -> &[(String, String)] {
        &self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_monotonic() {
        let status = LayerStatus::new();
        assert_eq!(status.severity(), Severity::Ok);

        status.error("boom");
        assert_eq!(status.severity(), Severity::Error);

        // A later warn must not lower the severity
        status.warn("late warning");
        assert_eq!(status.severity(), Severity::Error);

        status.stale("");
        assert_eq!(status.severity(), Severity::Stale);
    }

    #[test]
    fn test_reason_concatenation() {
        let status = LayerStatus::new();
        status.warn("first");
        status.error("");
        status.error("second");
        assert_eq!(status.reason(), "first; second");
    }

    #[test]
    fn test_bounded() {
        let status = LayerStatus::new();
        assert!(status.bounded(Severity::Ok));
        status.warn("w");
        assert!(status.bounded(Severity::Warn));
        assert!(!status.bounded(Severity::Ok));
        status.error("e");
        assert!(!status.bounded(Severity::Warn));
        assert!(status.bounded(Severity::Stale));
    }

    #[test]
    fn test_report_values_ordered() {
        let mut report = LayerReport::new();
        report.add("a", 1);
        report.add("b", "two");
        report.add("a", 3);
        let values = report.values();
        assert_eq!(values[0], ("a".to_string(), "1".to_string()));
        assert_eq!(values[1], ("b".to_string(), "two".to_string()));
        assert_eq!(values[2], ("a".to_string(), "3".to_string()));
    }
}
