use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::error::{SitrepError, StorageError, StoreError};

impl SitrepError {
    /// HTTP status and machine-readable kind for this error.
    pub fn status_and_kind(&self) -> (StatusCode, &'static str) {
        match self {
            SitrepError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            SitrepError::Store(StoreError::NotFound(_)) => (StatusCode::NOT_FOUND, "not_found"),
            SitrepError::Store(StoreError::DuplicateJob(_)) => {
                (StatusCode::CONFLICT, "duplicate_job")
            }
            SitrepError::Store(StoreError::InvalidTransition { .. }) => {
                (StatusCode::CONFLICT, "invalid_transition")
            }
            SitrepError::Storage(StorageError::ArtifactNotFound { .. }) => {
                (StatusCode::NOT_FOUND, "not_found")
            }
            SitrepError::SubscriptionTimeout { .. } => (StatusCode::REQUEST_TIMEOUT, "timeout"),
            SitrepError::StageFailure { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, "stage_failure")
            }
            SitrepError::Worker(_) => (StatusCode::SERVICE_UNAVAILABLE, "unavailable"),
            SitrepError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "config_error"),
            SitrepError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "storage_error"),
            SitrepError::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "io_error"),
        }
    }
}

impl IntoResponse for SitrepError {
    fn into_response(self) -> Response {
        let (status, kind) = self.status_and_kind();
        if status.is_server_error() {
            tracing::error!(kind, error = %self, "request failed");
        }
        let body = Json(json!({
            "error": self.to_string(),
            "kind": kind,
        }));
        (status, body).into_response()
    }
}
