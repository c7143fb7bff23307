//! Error types for the Kakiko service.
//!
//! This module defines the central `Error` enum and the [`ApiError`] body it
//! is rendered as. `Error` implements axum's `IntoResponse` so handlers can
//! return it directly; every variant maps to a stable error code.
//!
//! ## Error Cases
//! - `Syntax`: The converter did not produce a file. Every converter failure
//!   collapses into this one user-facing error.
//! - `InvalidRequest`: The request body was malformed or had unexpected
//!   fields.
//! - `Storage`: The drive failed to store the converted file.
//! - `ChannelError`: An internal communication failure between the request
//!   task and the conversion workers.
//! - `ServiceShutdown`: A request arrived while the service was shutting down.

use crate::storage::StorageError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

pub type Result<T> = core::result::Result<T, Error>;

/// Stable code reported when the converter rejects the input.
pub const SYNTAX_ERROR_CODE: &str = "MIDI_KAKIKO_ERROR";

/// Fixed message reported when the converter rejects the input.
pub const SYNTAX_ERROR_MESSAGE: &str = "MML Syntax Error.";

/// Unified error type for the Kakiko service.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The converter failed to produce a file for the given MML.
    #[error("MML Syntax Error.")]
    Syntax,

    /// The request body did not match `{"mml": string}`.
    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// The drive could not store the produced file.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Internal channel send/receive failure.
    #[error("Channel error: {context}")]
    ChannelError { context: String },

    /// The service is in the process of shutting down.
    #[error("Service is shutting down")]
    ServiceShutdown,
}

/// Who is at fault for an [`ApiError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    Client,
    Server,
}

/// The JSON error body returned to HTTP callers, nested under `"error"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApiError {
    #[serde(skip)]
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
    pub id: &'static str,
    pub kind: ErrorKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info: Option<String>,
}

#[derive(Serialize)]
struct ErrorEnvelope<'a> {
    error: &'a ApiError,
}

impl Error {
    /// Maps the error onto its user-safe representation.
    ///
    /// Internal failures are reported with a generic message; their details
    /// only reach the logs.
    pub fn to_api_error(&self) -> ApiError {
        match self {
            Error::Syntax => ApiError {
                status: StatusCode::BAD_REQUEST,
                code: SYNTAX_ERROR_CODE,
                message: SYNTAX_ERROR_MESSAGE.to_string(),
                id: SYNTAX_ERROR_CODE,
                kind: ErrorKind::Client,
                info: None,
            },
            Error::InvalidRequest { reason } => ApiError {
                status: StatusCode::BAD_REQUEST,
                code: "INVALID_PARAM",
                message: "Invalid param.".to_string(),
                id: "INVALID_PARAM",
                kind: ErrorKind::Client,
                info: Some(reason.clone()),
            },
            Error::Storage(_) | Error::ChannelError { .. } => ApiError {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                code: "INTERNAL_ERROR",
                message: "Internal error occurred.".to_string(),
                id: "INTERNAL_ERROR",
                kind: ErrorKind::Server,
                info: None,
            },
            Error::ServiceShutdown => ApiError {
                status: StatusCode::SERVICE_UNAVAILABLE,
                code: "SERVICE_UNAVAILABLE",
                message: "Service is shutting down.".to_string(),
                id: "SERVICE_UNAVAILABLE",
                kind: ErrorKind::Server,
                info: None,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status;
        (status, Json(ErrorEnvelope { error: &self })).into_response()
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        if matches!(self, Error::Storage(_) | Error::ChannelError { .. }) {
            tracing::error!(error = %self, "request failed");
        }
        self.to_api_error().into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use std::path::PathBuf;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn syntax_error_has_stable_code_and_message() {
        let response = Error::Syntax.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "MIDI_KAKIKO_ERROR");
        assert_eq!(body["error"]["message"], "MML Syntax Error.");
        assert_eq!(body["error"]["id"], "MIDI_KAKIKO_ERROR");
        assert_eq!(body["error"]["kind"], "client");
        assert!(body["error"].get("info").is_none());
    }

    #[tokio::test]
    async fn storage_error_does_not_leak_details() {
        let err = Error::from(StorageError::SourceUnreadable {
            path: PathBuf::from("/secret/tmp_abcdef.wav"),
            reason: "No such file or directory".to_string(),
        });
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "INTERNAL_ERROR");
        assert_eq!(body["error"]["kind"], "server");
        assert!(!body.to_string().contains("/secret"));
    }

    #[test]
    fn invalid_request_carries_reason_as_info() {
        let api = Error::InvalidRequest {
            reason: "missing field `mml`".to_string(),
        }
        .to_api_error();
        assert_eq!(api.status, StatusCode::BAD_REQUEST);
        assert_eq!(api.code, "INVALID_PARAM");
        assert_eq!(api.info.as_deref(), Some("missing field `mml`"));
    }

    #[test]
    fn shutdown_maps_to_unavailable() {
        let api = Error::ServiceShutdown.to_api_error();
        assert_eq!(api.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(api.kind, ErrorKind::Server);
    }
}
