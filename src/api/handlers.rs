//! REST API handlers.

use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use log::debug;
use schemars::schema_for;

use super::types::{
    ConnectRequest, ConnectResponse, DisconnectResponse, ErrorResponse, HistoryResponse,
    ListConnectionsResponse, SendCommandRequest, SendCommandResponse,
};
use crate::device::Device;
use crate::dispatcher::{Dispatcher, RunningConfigReport};
use crate::error::SessionError;
use crate::parser::DeviceInfo;
use crate::session::ConnectionId;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Dispatcher,
}

impl AppState {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self { dispatcher }
    }
}

/// A [`SessionError`] rendered as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub StatusCode, pub ErrorResponse);

impl ApiError {
    pub fn status_for(err: &SessionError) -> StatusCode {
        match err {
            SessionError::Auth(_) => StatusCode::UNAUTHORIZED,
            SessionError::Connect(_) | SessionError::HandshakeTimeout(_) => StatusCode::BAD_GATEWAY,
            SessionError::NotFound(_) => StatusCode::NOT_FOUND,
            SessionError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            SessionError::Closed(_) => StatusCode::GONE,
            SessionError::InvalidRequest(_) | SessionError::InvalidProfile(_) => StatusCode::BAD_REQUEST,
            SessionError::NotReady(_) => StatusCode::CONFLICT,
            SessionError::Parse(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        Self(Self::status_for(&err), ErrorResponse::from(&err))
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(
            StatusCode::BAD_REQUEST,
            ErrorResponse::bad_request(rejection.body_text()),
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(self.1)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

/// Health check endpoint.
pub async fn health() -> &'static str {
    "OK"
}

/// API information endpoint.
pub async fn api_info(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
        "connections": state.dispatcher.connections().len(),
    }))
}

/// JSON Schemas of the request bodies.
pub async fn api_schema() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "connect": schema_for!(ConnectRequest),
        "send_command": schema_for!(SendCommandRequest),
        "device": schema_for!(Device),
    }))
}

/// Open a session to a device.
pub async fn connect(
    State(state): State<AppState>,
    body: Result<Json<ConnectRequest>, JsonRejection>,
) -> ApiResult<ConnectResponse> {
    let Json(req) = body?;
    let protocol = req.protocol.unwrap_or(req.device.protocol);
    let id = state.dispatcher.connect(&req.device, Some(protocol)).await?;
    Ok(Json(ConnectResponse::connected(id, &req.device, protocol)))
}

/// Execute one command on a session.
pub async fn send_command(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    body: Result<Json<SendCommandRequest>, JsonRejection>,
) -> ApiResult<SendCommandResponse> {
    let Json(req) = body?;
    let id = ConnectionId::from_raw(id);
    let result = state
        .dispatcher
        .send_command(id, &req.command, req.timeout())
        .await?;
    Ok(Json(result.into()))
}

/// Close a session. Succeeds for unknown ids too.
pub async fn disconnect(State(state): State<AppState>, Path(id): Path<u64>) -> Json<DisconnectResponse> {
    let id = ConnectionId::from_raw(id);
    state.dispatcher.disconnect(id).await;
    Json(DisconnectResponse::disconnected(id))
}

pub async fn device_info(State(state): State<AppState>, Path(id): Path<u64>) -> ApiResult<DeviceInfo> {
    let info = state.dispatcher.device_info(ConnectionId::from_raw(id)).await?;
    Ok(Json(info))
}

pub async fn running_config(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> ApiResult<RunningConfigReport> {
    let report = state
        .dispatcher
        .running_config(ConnectionId::from_raw(id))
        .await?;
    Ok(Json(report))
}

pub async fn list_connections(State(state): State<AppState>) -> Json<ListConnectionsResponse> {
    let connections = state.dispatcher.connections();
    Json(ListConnectionsResponse {
        count: connections.len(),
        connections,
    })
}

pub async fn connection_history(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> ApiResult<HistoryResponse> {
    let id = ConnectionId::from_raw(id);
    let commands = state.dispatcher.history(id).await?;
    debug!("{} history: {} entries", id, commands.len());
    Ok(Json(HistoryResponse {
        connection_id: id,
        count: commands.len(),
        commands,
    }))
}
