use std::cell::RefCell;
use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Debug,
    Status,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Debug => write!(f, "debug"),
            Severity::Status => write!(f, "status"),
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusEvent {
    pub severity: Severity,
    pub message: String,
}

/// Receiver for debug/status/warning/error events. Expected misses are reported here
/// instead of being returned as errors.
pub trait StatusReporter {
    fn event(&self, event: StatusEvent);

    fn debug(&self, message: String) {
        self.event(StatusEvent {
            severity: Severity::Debug,
            message,
        });
    }

    fn status(&self, message: String) {
        self.event(StatusEvent {
            severity: Severity::Status,
            message,
        });
    }

    fn warning(&self, message: String) {
        self.event(StatusEvent {
            severity: Severity::Warning,
            message,
        });
    }

    fn error(&self, message: String) {
        self.event(StatusEvent {
            severity: Severity::Error,
            message,
        });
    }
}

impl<R: StatusReporter + ?Sized> StatusReporter for &R {
    fn event(&self, event: StatusEvent) {
        (**self).event(event)
    }
}

/// Forwards events to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl StatusReporter for TracingReporter {
    fn event(&self, event: StatusEvent) {
        match event.severity {
            Severity::Debug => tracing::debug!("{}", event.message),
            Severity::Status => tracing::info!("{}", event.message),
            Severity::Warning => tracing::warn!("{}", event.message),
            Severity::Error => tracing::error!("{}", event.message),
        }
    }
}

/// Keeps every event in memory and also forwards it to `tracing`.
#[derive(Debug, Default)]
pub struct RecordingReporter {
    events: RefCell<Vec<StatusEvent>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<StatusEvent> {
        self.events.borrow().clone()
    }

    pub fn messages(&self, severity: Severity) -> Vec<String> {
        self.events
            .borrow()
            .iter()
            .filter(|event| event.severity == severity)
            .map(|event| event.message.clone())
            .collect()
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.events
            .borrow()
            .iter()
            .filter(|event| event.severity == severity)
            .count()
    }

    pub fn clear(&self) {
        self.events.borrow_mut().clear();
    }
}

impl StatusReporter for RecordingReporter {
    fn event(&self, event: StatusEvent) {
        TracingReporter.event(event.clone());
        self.events.borrow_mut().push(event);
    }
}
