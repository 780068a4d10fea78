use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use flowforge_core::FlowForgeError;

/// Generic success/error envelope for the HTTP surface (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    pub fn success(data: serde_json::Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(error: RpcError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error),
        }
    }
}

/// Also returned, wrapped, as the 201 response body for
/// `POST /workflows/start`: `{workflow_id, workflow_type, status, message}`.
impl IntoResponse for RpcResponse {
    fn into_response(self) -> Response {
        let status = if self.success {
            StatusCode::OK
        } else {
            self.error
                .as_ref()
                .map(|e| e.status_code())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
        };

        (status, Json(self)).into_response()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: String,
    pub message: String,
}

impl RpcError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self.code.as_str() {
            "NOT_FOUND" => StatusCode::NOT_FOUND,
            "VALIDATION_ERROR" | "UNKNOWN_WORKFLOW_TYPE" | "DUPLICATE_WORKFLOW_TYPE"
            | "EMPTY_WORKFLOW_DEFINITION" | "UNKNOWN_STEP" => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("NOT_FOUND", message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new("VALIDATION_ERROR", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new("INTERNAL_ERROR", message)
    }
}

impl From<FlowForgeError> for RpcError {
    fn from(err: FlowForgeError) -> Self {
        match err {
            FlowForgeError::NotFound(msg) => Self::not_found(msg),
            FlowForgeError::Validation(msg) => Self::validation(msg),
            FlowForgeError::UnknownType(msg) => Self::new("UNKNOWN_WORKFLOW_TYPE", msg),
            FlowForgeError::DuplicateType(msg) => Self::new("DUPLICATE_WORKFLOW_TYPE", msg),
            FlowForgeError::EmptyWorkflow(msg) => Self::new("EMPTY_WORKFLOW_DEFINITION", msg),
            FlowForgeError::UnknownStep { workflow_type, step } => Self::new(
                "UNKNOWN_STEP",
                format!("unknown step '{step}' in workflow type '{workflow_type}'"),
            ),
            other => Self::internal(other.to_string()),
        }
    }
}
