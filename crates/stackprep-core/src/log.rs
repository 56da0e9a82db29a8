use std::fmt;

use tracing::{error, warn};

/// One line of the run log.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LogEntry {
    Success { title: String, message: String },
    Message(String),
    Warning(String),
    Error(String),
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success { title, message } if message.is_empty() => write!(f, "{title}"),
            Self::Success { title, message } => write!(f, "{title}: {message}"),
            Self::Message(m) => write!(f, "{m}"),
            Self::Warning(m) => write!(f, "*** Warning: {m}"),
            Self::Error(m) => write!(f, "!!! Error: {m}"),
        }
    }
}

/// Ordered, user-facing record of a preprocessing run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProcessLog {
    entries: Vec<LogEntry>,
}

impl ProcessLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_success(&mut self, title: impl Into<String>, message: impl Into<String>) {
        self.entries.push(LogEntry::Success {
            title: title.into(),
            message: message.into(),
        });
    }

    pub fn add_message(&mut self, message: impl Into<String>) {
        self.entries.push(LogEntry::Message(message.into()));
    }

    pub fn add_warning(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!("{message}");
        self.entries.push(LogEntry::Warning(message));
    }

    pub fn add_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        error!("{message}");
        self.entries.push(LogEntry::Error(message));
    }

    pub fn new_line(&mut self) {
        self.entries.push(LogEntry::Message(String::new()));
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn has_errors(&self) -> bool {
        self.entries.iter().any(|e| matches!(e, LogEntry::Error(_)))
    }

    pub fn warning_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e, LogEntry::Warning(_)))
            .count()
    }

    /// Whether any entry's text contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.entries.iter().any(|e| e.to_string().contains(needle))
    }
}

impl fmt::Display for ProcessLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.entries {
            writeln!(f, "{entry}")?;
        }
        Ok(())
    }
}
