use std::io::{self, Write};

use serde::Serialize;

use crate::report::{Severity, StatusEvent, StatusReporter, TracingReporter};

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Human,
    Json,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

/// Reporter for the command line: everything goes to `tracing`, and warnings and errors
/// are echoed to stderr in human mode so they are visible without `RUST_LOG`.
#[derive(Debug, Clone, Copy)]
pub struct ConsoleReporter {
    mode: OutputMode,
}

impl ConsoleReporter {
    pub fn new(mode: OutputMode) -> Self {
        Self { mode }
    }
}

impl StatusReporter for ConsoleReporter {
    fn event(&self, event: StatusEvent) {
        if matches!(self.mode, OutputMode::Human) && event.severity >= Severity::Warning {
            eprintln!("{}: {}", event.severity, event.message);
        }
        TracingReporter.event(event);
    }
}
