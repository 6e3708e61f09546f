//! Error types for device sessions.
//!
//! Transport and protocol failures are converted into [`SessionError`] at the
//! shell-session boundary, so callers of the dispatcher never see raw network
//! errors.

use thiserror::Error;

use crate::session::{CommandResult, ConnectionId, SessionState};

/// Errors that can occur while connecting to, driving or parsing a device session.
#[derive(Error, Debug)]
pub enum SessionError {
    /// Host unreachable, connection refused, or the transport could not be set up.
    #[error("connect failed: {0}")]
    Connect(String),

    /// The device rejected the supplied credentials.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// No device prompt was matched before the login deadline.
    ///
    /// Carries whatever the device printed so far.
    #[error("handshake timeout: {0}")]
    HandshakeTimeout(String),

    /// The connection id is unknown, disconnected, or was reaped.
    #[error("connection {0} not found")]
    NotFound(ConnectionId),

    /// The command did not finish before its deadline.
    ///
    /// Non-fatal: the session survives and the partial result is attached.
    #[error("command '{}' timed out after {} ms", .partial.command, .partial.duration_ms)]
    Timeout { partial: CommandResult },

    /// The underlying channel died. The session is gone and the caller must reconnect.
    #[error("session closed: {0}")]
    Closed(String),

    /// Device output did not contain the expected patterns.
    #[error("parse error: {0}")]
    Parse(String),

    /// The caller sent something that cannot be executed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A device profile could not be built.
    #[error("invalid device profile: {0}")]
    InvalidProfile(String),

    /// The session is not in a state that accepts commands.
    #[error("session not ready: current state is {0:?}")]
    NotReady(SessionState),
}

impl SessionError {
    /// Stable machine-readable code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            SessionError::Connect(_) => "CONNECT_FAILED",
            SessionError::Auth(_) => "AUTH_FAILED",
            SessionError::HandshakeTimeout(_) => "HANDSHAKE_TIMEOUT",
            SessionError::NotFound(_) => "CONNECTION_NOT_FOUND",
            SessionError::Timeout { .. } => "COMMAND_TIMEOUT",
            SessionError::Closed(_) => "SESSION_CLOSED",
            SessionError::Parse(_) => "PARSE_ERROR",
            SessionError::InvalidRequest(_) => "BAD_REQUEST",
            SessionError::InvalidProfile(_) => "INVALID_PROFILE",
            SessionError::NotReady(_) => "SESSION_NOT_READY",
        }
    }

    /// Whether the session that produced this error is still usable.
    pub fn is_fatal_to_session(&self) -> bool {
        matches!(self, SessionError::Closed(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_mentions_connection_id() {
        let err = SessionError::NotFound(ConnectionId::from_raw(42));
        assert_eq!(err.to_string(), "connection conn-0000002a not found");
        assert_eq!(err.code(), "CONNECTION_NOT_FOUND");
    }

    #[test]
    fn timeout_display_includes_command_and_duration() {
        let err = SessionError::Timeout {
            partial: CommandResult {
                command: "show tech-support".to_string(),
                output: "partial".to_string(),
                duration_ms: 10_000,
                truncated: true,
                success: true,
                prompt: None,
                pages: 3,
            },
        };
        let text = err.to_string();
        assert!(text.contains("show tech-support"));
        assert!(text.contains("10000 ms"));
        assert!(!err.is_fatal_to_session());
    }

    #[test]
    fn only_closed_is_fatal() {
        assert!(SessionError::Closed("eof".into()).is_fatal_to_session());
        assert!(!SessionError::Auth("bad".into()).is_fatal_to_session());
        assert!(!SessionError::Connect("refused".into()).is_fatal_to_session());
    }
}
