use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::net::SocketAddr;
use thiserror::Error;
use tonic::Code;

#[derive(Debug, Error)]
pub enum ConsoleError {
    #[error("unknown method `{0}`")]
    UnknownMethod(String),

    #[error("invalid request body: {0}")]
    BadRequest(serde_json::Error),

    #[error("{}", .0.message())]
    Rpc(#[from] tonic::Status),

    #[error("failed to encode response: {0}")]
    Encode(serde_json::Error),

    #[error("gateway at {address} unreachable: {source}")]
    Dial {
        address: SocketAddr,
        source: std::io::Error,
    },

    #[error("invalid gateway endpoint: {0}")]
    Endpoint(#[from] tonic::transport::Error),

    #[error("reflection failed: {0}")]
    Reflection(String),
}

impl ConsoleError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ConsoleError::UnknownMethod(_) => StatusCode::NOT_FOUND,
            ConsoleError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ConsoleError::Rpc(status) => match status.code() {
                Code::NotFound => StatusCode::NOT_FOUND,
                Code::InvalidArgument => StatusCode::BAD_REQUEST,
                Code::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
                Code::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
                _ => StatusCode::BAD_GATEWAY,
            },
            ConsoleError::Encode(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ConsoleError::Reflection(_) => StatusCode::BAD_GATEWAY,
            ConsoleError::Dial { .. } | ConsoleError::Endpoint(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ConsoleError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = match &self {
            ConsoleError::Rpc(status) => format!("{:?}", status.code()),
            _ => status.canonical_reason().unwrap_or("Error").to_string(),
        };
        if status.is_server_error() {
            tracing::warn!(error = %self, status = status.as_u16(), "Console request failed");
        }
        let body = serde_json::json!({
            "error": self.to_string(),
            "code": code,
        });
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tonic::Status;

    #[test]
    fn rpc_codes_map_to_http() {
        let cases = [
            (Status::not_found("x"), StatusCode::NOT_FOUND),
            (Status::invalid_argument("x"), StatusCode::BAD_REQUEST),
            (Status::unavailable("x"), StatusCode::SERVICE_UNAVAILABLE),
            (Status::deadline_exceeded("x"), StatusCode::GATEWAY_TIMEOUT),
            (Status::internal("x"), StatusCode::BAD_GATEWAY),
            (Status::permission_denied("x"), StatusCode::BAD_GATEWAY),
        ];
        for (status, expected) in cases {
            assert_eq!(ConsoleError::Rpc(status).status_code(), expected);
        }
    }

    #[test]
    fn unknown_method_is_not_found() {
        let err = ConsoleError::UnknownMethod("Nope".to_string());
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    }
}
