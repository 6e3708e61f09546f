//! Interactive shell sessions and their registry.
//!
//! This module turns a prompt-driven device CLI into a command/response API and
//! keeps track of every live session.
//!
//! # Main Components
//!
//! - [`ShellSession`] - login, prompt detection, pagination and command execution
//! - [`SessionRegistry`] - id to session table with idle reaping
//! - [`CommandLog`] - bounded per-session command history
//! - [`CommandResult`] - output of one command

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub use history::{CommandLog, CommandRecord, now_ms};
pub use id::ConnectionId;
pub use registry::{RegistrySettings, SessionHandle, SessionRegistry, SessionSummary};
pub use shell::{ShellSession, ShellSettings, default_slow_commands};

mod history;
mod id;
mod registry;
mod shell;

/// Lifecycle of a shell session. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Connecting,
    Ready,
    Closed,
}

/// Output of one executed command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CommandResult {
    pub command: String,
    /// Device output with echo, prompt and pager markers removed.
    pub output: String,
    pub duration_ms: u64,
    /// The deadline passed before the prompt came back.
    pub truncated: bool,
    /// False when the device printed a recognised error line.
    pub success: bool,
    /// Prompt that ended the command, if one was seen.
    pub prompt: Option<String>,
    /// Number of pager continuations that were answered.
    pub pages: u32,
}
