use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::dpid::Dpid;

#[derive(Debug, thiserror::Error)]
pub enum FlowManagerError {
    #[error("{0}")]
    BadRequest(String),

    #[error("unsupported media type, expected application/json")]
    UnsupportedMediaType,

    #[error("switch {0} not found")]
    NotFound(Dpid),

    #[error("switch {0} is disabled")]
    SwitchDisabled(Dpid),

    #[error("invalid command {0:?}")]
    InvalidCommand(String),

    #[error("unsupported OpenFlow version 0x{0:02x}")]
    UnsupportedVersion(u8),

    #[error("persistence box could not be retrieved within the configured budget")]
    PersistenceUnavailable,

    #[error("switch reported an OpenFlow error: {0}")]
    OpenFlowError(String),
}

impl FlowManagerError {
    /// Maps internal errors onto the admin-facing HTTP surface described in §4.G:
    /// validation errors surface directly, routing failures become 404s, and
    /// anything else degrades to a 500 rather than leaking internals.
    fn status(&self) -> StatusCode {
        match self {
            FlowManagerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            FlowManagerError::UnsupportedMediaType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            FlowManagerError::NotFound(_) => StatusCode::NOT_FOUND,
            FlowManagerError::SwitchDisabled(_) => StatusCode::NOT_FOUND,
            FlowManagerError::InvalidCommand(_) => StatusCode::INTERNAL_SERVER_ERROR,
            FlowManagerError::UnsupportedVersion(_) => StatusCode::INTERNAL_SERVER_ERROR,
            FlowManagerError::PersistenceUnavailable => StatusCode::INTERNAL_SERVER_ERROR,
            FlowManagerError::OpenFlowError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for FlowManagerError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({ "response": self.to_string() }));

        (status, body).into_response()
    }
}
