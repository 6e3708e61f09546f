use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::CommandResult;

/// One executed command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CommandRecord {
    pub timestamp_ms: u64,
    pub command: String,
    pub output: String,
    pub success: bool,
    pub truncated: bool,
    pub duration_ms: u64,
}

/// Bounded command log shared between a session and its readers.
///
/// Cloning yields another handle to the same log, so the history can be read
/// while the session itself is locked by a running command.
#[derive(Debug, Clone)]
pub struct CommandLog {
    limit: usize,
    entries: Arc<Mutex<VecDeque<CommandRecord>>>,
}

impl CommandLog {
    /// A log keeping the `limit` most recent commands. Zero disables recording.
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            entries: Arc::new(Mutex::new(VecDeque::with_capacity(limit.min(64)))),
        }
    }

    fn guard(&self) -> MutexGuard<'_, VecDeque<CommandRecord>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn record(&self, result: &CommandResult) {
        if self.limit == 0 {
            return;
        }
        let mut entries = self.guard();
        while entries.len() >= self.limit {
            entries.pop_front();
        }
        entries.push_back(CommandRecord {
            timestamp_ms: now_ms(),
            command: result.command.clone(),
            output: result.output.clone(),
            success: result.success,
            truncated: result.truncated,
            duration_ms: result.duration_ms,
        });
    }

    /// Oldest first.
    pub fn entries(&self) -> Vec<CommandRecord> {
        self.guard().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.guard().len()
    }

    pub fn is_empty(&self) -> bool {
        self.guard().is_empty()
    }
}

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
