use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sea_orm::error::DbErr;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

fn current_request_id() -> Option<String> {
    crate::tracing::current_request_id().map(|rid| rid.as_str().to_string())
}

/// Error body returned by every failing endpoint
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "Unprocessable Entity",
    "code": "invalid_quantity",
    "message": "Invalid quantity: supply quantity 4 exceeds remaining quantity 2",
    "request_id": "req-abc123xyz",
    "timestamp": "2026-10-19T10:30:00.000Z"
}))]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Conflict")
    pub error: String,
    /// Stable machine-readable error kind
    pub code: String,
    /// Human-readable reason
    pub message: String,
    /// Unique request identifier for support and debugging
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// ISO 8601 timestamp when the error occurred
    pub timestamp: String,
}

#[derive(Debug, thiserror::Error, Serialize)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(
        #[from]
        #[serde(skip)]
        DbErr,
    ),

    #[error("Persistence failure: {0}")]
    PersistenceFailure(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Invalid quantity: {0}")]
    InvalidQuantity(String),

    #[error("Invalid asset type: {0}")]
    InvalidAssetType(String),

    #[error("Concurrent modification: {0}")]
    ConcurrentModification(Uuid),

    #[error("Dependency unavailable: {0}")]
    DependencyUnavailable(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl ServiceError {
    /// Returns the HTTP status code for this error.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::DatabaseError(_) | Self::PersistenceFailure(_) | Self::InternalError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::ValidationError(_) => StatusCode::BAD_REQUEST,
            Self::InvalidTransition(_) | Self::ConcurrentModification(_) => StatusCode::CONFLICT,
            Self::InvalidQuantity(_) | Self::InvalidAssetType(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            Self::DependencyUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Stable machine-readable kind, one per variant family.
    pub fn code(&self) -> &'static str {
        match self {
            Self::DatabaseError(_) | Self::PersistenceFailure(_) => "persistence_failure",
            Self::NotFound(_) => "not_found",
            Self::Forbidden(_) => "forbidden",
            Self::Unauthorized(_) => "unauthorized",
            Self::ValidationError(_) => "validation_error",
            Self::InvalidTransition(_) => "invalid_transition",
            Self::InvalidQuantity(_) => "invalid_quantity",
            Self::InvalidAssetType(_) => "invalid_asset_type",
            Self::ConcurrentModification(_) => "concurrent_modification",
            Self::DependencyUnavailable(_) => "dependency_unavailable",
            Self::InternalError(_) => "internal_error",
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Internal errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) | Self::PersistenceFailure(_) => {
                "The operation could not be persisted and was rolled back".to_string()
            }
            Self::InternalError(_) => "Internal server error".to_string(),
            Self::ConcurrentModification(id) => format!(
                "Purchase order {} was modified concurrently; retry the request",
                id
            ),
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let err = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            code: self.code().to_string(),
            message: self.response_message(),
            request_id: current_request_id(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(err)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use rstest::rstest;

    #[tokio::test]
    async fn service_error_response_includes_request_id_and_code() {
        let response =
            crate::tracing::scope_request_id(crate::tracing::RequestId::new("req-123"), async {
                ServiceError::NotFound("missing".into()).into_response()
            })
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let payload: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(payload.request_id.as_deref(), Some("req-123"));
        assert_eq!(payload.code, "not_found");
    }

    #[rstest]
    #[case(ServiceError::NotFound("x".into()), StatusCode::NOT_FOUND, "not_found")]
    #[case(ServiceError::Forbidden("x".into()), StatusCode::FORBIDDEN, "forbidden")]
    #[case(ServiceError::Unauthorized("x".into()), StatusCode::UNAUTHORIZED, "unauthorized")]
    #[case(ServiceError::ValidationError("x".into()), StatusCode::BAD_REQUEST, "validation_error")]
    #[case(ServiceError::InvalidTransition("x".into()), StatusCode::CONFLICT, "invalid_transition")]
    #[case(ServiceError::InvalidQuantity("x".into()), StatusCode::UNPROCESSABLE_ENTITY, "invalid_quantity")]
    #[case(ServiceError::InvalidAssetType("x".into()), StatusCode::UNPROCESSABLE_ENTITY, "invalid_asset_type")]
    #[case(ServiceError::ConcurrentModification(Uuid::nil()), StatusCode::CONFLICT, "concurrent_modification")]
    #[case(ServiceError::DependencyUnavailable("x".into()), StatusCode::SERVICE_UNAVAILABLE, "dependency_unavailable")]
    #[case(ServiceError::PersistenceFailure("x".into()), StatusCode::INTERNAL_SERVER_ERROR, "persistence_failure")]
    #[case(ServiceError::DatabaseError(DbErr::Custom("boom".into())), StatusCode::INTERNAL_SERVER_ERROR, "persistence_failure")]
    fn each_kind_maps_to_a_stable_status_and_code(
        #[case] error: ServiceError,
        #[case] status: StatusCode,
        #[case] code: &str,
    ) {
        assert_eq!(error.status_code(), status);
        assert_eq!(error.code(), code);
    }

    #[test]
    fn response_message_hides_database_details() {
        let message = ServiceError::DatabaseError(DbErr::Custom(
            "relation \"assets\" does not exist".into(),
        ))
        .response_message();
        assert!(!message.contains("assets"));

        assert_eq!(
            ServiceError::InvalidQuantity("supply quantity must be positive".into())
                .response_message(),
            "Invalid quantity: supply quantity must be positive"
        );
    }
}
