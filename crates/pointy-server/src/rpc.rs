use serde::{Deserialize, Serialize};
use serde_json::Value;

use pointy_engine::OperationError;

/// Client frame: `{ action, data?, id? }`.
#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    pub action: String,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub id: Option<Value>,
}

/// Reply frame: `{ id, success, result?, error? }`.
#[derive(Debug, Serialize)]
pub struct RpcResponse {
    pub id: Option<Value>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

#[derive(Debug, Serialize)]
pub struct RpcError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<String>>,
}

pub const VALIDATION_FAILED: &str = "VALIDATION_FAILED";
pub const PERMISSION_DENIED: &str = "PERMISSION_DENIED";
pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
pub const PARSE_ERROR: &str = "PARSE_ERROR";
pub const UNKNOWN_ACTION: &str = "UNKNOWN_ACTION";

impl RpcResponse {
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            id,
            success: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Option<Value>, code: &str, message: impl Into<String>) -> Self {
        Self {
            id,
            success: false,
            result: None,
            error: Some(RpcError {
                code: code.to_string(),
                message: message.into(),
                errors: None,
            }),
        }
    }

    pub fn parse_error(id: Option<Value>, detail: impl std::fmt::Display) -> Self {
        Self::error(id, PARSE_ERROR, format!("malformed request: {detail}"))
    }

    pub fn unknown_action(id: Option<Value>, action: &str) -> Self {
        Self::error(id, UNKNOWN_ACTION, format!("unknown action: {action}"))
    }

    /// Internal failures carry no detail beyond the code.
    pub fn from_operation_error(id: Option<Value>, err: &OperationError) -> Self {
        let code = match err {
            OperationError::Validation(_) => VALIDATION_FAILED,
            OperationError::PermissionDenied => PERMISSION_DENIED,
            OperationError::Lock(_) | OperationError::Store(_) => INTERNAL_ERROR,
        };
        let mut response = Self::error(id, code, err.public_message());
        if let (OperationError::Validation(errors), Some(error)) = (err, response.error.as_mut()) {
            error.errors = Some(errors.clone());
        }
        response
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"id":null,"success":false,"error":{"code":"INTERNAL_ERROR","message":"internal error"}}"#
                .to_string()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pointy_core::StoreError;
    use serde_json::json;

    #[test]
    fn request_without_data_or_id() {
        let req: RpcRequest = serde_json::from_str(r#"{"action":"session.load"}"#).unwrap();
        assert_eq!(req.action, "session.load");
        assert!(req.data.is_none());
        assert!(req.id.is_none());
    }

    #[test]
    fn success_omits_error() {
        let value: Value =
            serde_json::from_str(&RpcResponse::success(Some(json!(7)), json!({"ok": 1})).to_json())
                .unwrap();
        assert_eq!(value["id"], 7);
        assert_eq!(value["success"], true);
        assert!(value.get("error").is_none());
    }

    #[test]
    fn validation_lists_messages() {
        let err = OperationError::Validation(vec![
            "user name is required".into(),
            "session id is required".into(),
        ]);
        let value: Value =
            serde_json::from_str(&RpcResponse::from_operation_error(None, &err).to_json()).unwrap();
        assert_eq!(value["success"], false);
        assert_eq!(value["error"]["code"], VALIDATION_FAILED);
        assert_eq!(value["error"]["errors"][1], "session id is required");
        assert!(value.get("result").is_none());
    }

    #[test]
    fn internal_errors_are_opaque() {
        let err = OperationError::Store(StoreError::Database("no such table: sessions".into()));
        let response = RpcResponse::from_operation_error(Some(json!("r1")), &err);
        let error = response.error.unwrap();
        assert_eq!(error.code, INTERNAL_ERROR);
        assert_eq!(error.message, "internal error");
        assert!(error.errors.is_none());
    }

    #[test]
    fn permission_denied_code() {
        let response = RpcResponse::from_operation_error(None, &OperationError::PermissionDenied);
        assert_eq!(response.error.unwrap().code, PERMISSION_DENIED);
    }
}
