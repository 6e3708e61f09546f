//! HTTP API.
//!
//! ## Endpoints
//!
//! - `GET /health` - health check
//! - `GET /api` - service information
//! - `GET /api/schema` - JSON Schemas of the request bodies
//! - `POST /api/connect/network` - open a session, returns its `connection_id`
//! - `POST /api/send_command/{id}` - run one command
//! - `POST /api/disconnect/{id}` - close a session
//! - `GET /api/device_info/{id}` - version and interface counts
//! - `GET /api/running_config/{id}` - running configuration, raw and split into sections
//! - `GET /api/connections` - live sessions
//! - `GET /api/connections/{id}/history` - commands run on a session
//!
//! Errors come back as `{code, message, details?, output?, truncated?}` with
//! 401 for rejected credentials, 502 for unreachable devices, 404 for unknown
//! ids, 504 for command timeouts (with the partial output) and 410 when the
//! device dropped the session.

pub mod handlers;
pub mod router;
pub mod types;

pub use handlers::{ApiError, AppState};
pub use router::{ServerConfig, create_router, serve};
pub use types::{
    ConnectRequest, ConnectResponse, DisconnectResponse, ErrorResponse, SendCommandRequest,
    SendCommandResponse,
};
