//! API request and response types.

use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::device::{Device, Protocol};
use crate::error::SessionError;
use crate::session::{CommandRecord, CommandResult, ConnectionId, SessionSummary, now_ms};

/// Body of `POST /api/connect/network`.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ConnectRequest {
    pub device: Device,
    /// Overrides `device.protocol`.
    #[serde(default)]
    pub protocol: Option<Protocol>,
}

/// Response for a successful connect.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ConnectResponse {
    pub connection_id: ConnectionId,
    pub status: String,
    pub message: String,
}

impl ConnectResponse {
    pub fn connected(id: ConnectionId, device: &Device, protocol: Protocol) -> Self {
        Self {
            connection_id: id,
            status: "connected".to_string(),
            message: format!("connected to {} ({}) over {}", device.name, device.ip_address, protocol),
        }
    }
}

/// Body of `POST /api/send_command/{id}`.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SendCommandRequest {
    pub command: String,
    /// Overrides the configured command deadline.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl SendCommandRequest {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

/// Response for command execution.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SendCommandResponse {
    pub command: String,
    pub output: String,
    pub truncated: bool,
    pub success: bool,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    pub timestamp_ms: u64,
}

impl From<CommandResult> for SendCommandResponse {
    fn from(result: CommandResult) -> Self {
        Self {
            command: result.command,
            output: result.output,
            truncated: result.truncated,
            success: result.success,
            duration_ms: result.duration_ms,
            prompt: result.prompt,
            timestamp_ms: now_ms(),
        }
    }
}

/// Response for `POST /api/disconnect/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DisconnectResponse {
    pub ok: bool,
    pub status: String,
    pub message: String,
}

impl DisconnectResponse {
    pub fn disconnected(id: ConnectionId) -> Self {
        Self {
            ok: true,
            status: "disconnected".to_string(),
            message: format!("{id} disconnected"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ListConnectionsResponse {
    pub count: usize,
    pub connections: Vec<SessionSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryResponse {
    pub connection_id: ConnectionId,
    pub count: usize,
    pub commands: Vec<CommandRecord>,
}

/// Generic API error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error code (e.g., "CONNECTION_NOT_FOUND").
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// Partial output of a command that timed out.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub truncated: Option<bool>,
}

impl ErrorResponse {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
            output: None,
            truncated: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new("BAD_REQUEST", message)
    }
}

impl From<&SessionError> for ErrorResponse {
    fn from(err: &SessionError) -> Self {
        let response = Self::new(err.code(), err.to_string());
        match err {
            SessionError::Timeout { partial } => Self {
                output: Some(partial.output.clone()),
                truncated: Some(true),
                ..response
            },
            SessionError::Closed(_) => response.with_details("reconnect to continue"),
            _ => response,
        }
    }
}
