//! Routes websocket frames to session operations.

use serde::de::DeserializeOwned;
use serde_json::Value;

use pointy_core::requests::{
    FacilitatorRequest, JoinRequest, LoadRequest, StartRequest, VoteRequest,
};
use pointy_core::{ConnectionId, Message};
use pointy_engine::{OperationError, SessionService};

use crate::rpc::{RpcRequest, RpcResponse};

pub const ACTIONS: &[&str] = &[
    "session.start",
    "session.join",
    "session.load",
    "session.vote",
    "session.showVotes",
    "session.clearVotes",
];

/// Parse a raw frame and run it. Always yields a response frame.
pub async fn handle_frame(
    service: &SessionService,
    connection_id: &ConnectionId,
    text: &str,
) -> RpcResponse {
    match serde_json::from_str::<RpcRequest>(text) {
        Ok(request) => dispatch(service, connection_id, request).await,
        Err(e) => RpcResponse::parse_error(None, e),
    }
}

pub async fn dispatch(
    service: &SessionService,
    connection_id: &ConnectionId,
    request: RpcRequest,
) -> RpcResponse {
    let RpcRequest { action, data, id } = request;

    let outcome = match action.as_str() {
        "session.start" => match parse::<StartRequest>(data) {
            Ok(req) => service.start(connection_id, req).await,
            Err(resp) => return resp.with_id(id),
        },
        "session.join" => match parse::<JoinRequest>(data) {
            Ok(req) => service.join(connection_id, req).await,
            Err(resp) => return resp.with_id(id),
        },
        "session.load" => match parse::<LoadRequest>(data) {
            Ok(req) => service.load(connection_id, req).await,
            Err(resp) => return resp.with_id(id),
        },
        "session.vote" => match parse::<VoteRequest>(data) {
            Ok(req) => service.vote(connection_id, req).await,
            Err(resp) => return resp.with_id(id),
        },
        "session.showVotes" => match parse::<FacilitatorRequest>(data) {
            Ok(req) => service.show_votes(connection_id, req).await,
            Err(resp) => return resp.with_id(id),
        },
        "session.clearVotes" => match parse::<FacilitatorRequest>(data) {
            Ok(req) => service.clear_votes(connection_id, req).await,
            Err(resp) => return resp.with_id(id),
        },
        other => {
            tracing::debug!(action = other, %connection_id, "unknown action");
            return RpcResponse::unknown_action(id, other);
        }
    };

    respond(id, &action, outcome)
}

fn respond(id: Option<Value>, action: &str, outcome: Result<Message, OperationError>) -> RpcResponse {
    match outcome {
        Ok(message) => match serde_json::to_value(&message) {
            Ok(value) => RpcResponse::success(id, value),
            Err(e) => {
                tracing::error!(action, error = %e, "failed to encode result");
                RpcResponse::from_operation_error(
                    id,
                    &OperationError::Store(pointy_core::StoreError::Serialization(e.to_string())),
                )
            }
        },
        Err(e) => {
            tracing::debug!(action, kind = e.error_kind(), "operation failed");
            RpcResponse::from_operation_error(id, &e)
        }
    }
}

/// Absent `data` parses as an empty object so field validation reports
/// what's missing.
fn parse<T: DeserializeOwned>(data: Option<Value>) -> Result<T, RpcResponse> {
    let value = match data {
        Some(Value::Null) | None => Value::Object(Default::default()),
        Some(v) => v,
    };
    serde_json::from_value(value).map_err(|e| RpcResponse::parse_error(None, e))
}

impl RpcResponse {
    fn with_id(mut self, id: Option<Value>) -> Self {
        self.id = id;
        self
    }
}
