//! Bounded diagnostics log for the embed controller.
//!
//! Entries are kept in memory only and mirrored to `tracing`.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::session::SessionToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Success,
    Warn,
    Error,
    Debug,
}

impl LogLevel {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Success => "success",
            Self::Warn => "warn",
            Self::Error => "error",
            Self::Debug => "debug",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogCategory {
    Session,
    Hygiene,
    Credential,
    Locator,
    Widget,
}

impl LogCategory {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Session => "session",
            Self::Hygiene => "hygiene",
            Self::Credential => "credential",
            Self::Locator => "locator",
            Self::Widget => "widget",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub at_unix_ms: u64,
    pub level: LogLevel,
    pub category: LogCategory,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionToken>,
}

#[derive(Debug, Clone)]
pub struct EmbedLog {
    entries: VecDeque<LogEntry>,
    capacity: usize,
    dropped: u64,
}

impl EmbedLog {
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            dropped: 0,
        }
    }

    pub fn push(&mut self, entry: LogEntry) {
        mirror_to_tracing(&entry);
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
            self.dropped = self.dropped.saturating_add(1);
        }
        self.entries.push_back(entry);
    }

    #[must_use]
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.iter().cloned().collect()
    }

    #[must_use]
    pub fn last(&self) -> Option<&LogEntry> {
        self.entries.back()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries evicted since creation.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

fn mirror_to_tracing(entry: &LogEntry) {
    let category = entry.category.as_str();
    let session = entry.session.map(SessionToken::get);
    match entry.level {
        LogLevel::Error => tracing::error!(category, ?session, "{}", entry.message),
        LogLevel::Warn => tracing::warn!(category, ?session, "{}", entry.message),
        LogLevel::Info | LogLevel::Success => {
            tracing::info!(
                category,
                ?session,
                log_level = entry.level.as_str(),
                "{}",
                entry.message
            );
        }
        LogLevel::Debug => tracing::debug!(category, ?session, "{}", entry.message),
    }
}
