use crate::{errors::ServiceError, ApiResponse};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::IntoParams;
use validator::Validate;

/// Standard success response
pub fn success_response<T: Serialize>(data: T) -> Response {
    (StatusCode::OK, Json(ApiResponse::success(data))).into_response()
}

/// Success response carrying a human-readable note alongside the data
pub fn success_with_message<T: Serialize>(data: T, message: impl Into<String>) -> Response {
    let mut body = ApiResponse::success(data);
    body.message = Some(message.into());
    (StatusCode::OK, Json(body)).into_response()
}

/// Standard created response
pub fn created_response<T: Serialize>(data: T) -> Response {
    (StatusCode::CREATED, Json(ApiResponse::success(data))).into_response()
}

/// Validate request input
pub fn validate_input<T: Validate>(input: &T) -> Result<(), ServiceError> {
    input
        .validate()
        .map_err(|e| ServiceError::ValidationError(format!("Validation failed: {}", e)))
}

/// Pagination parameters for list operations
#[derive(Debug, Default, Deserialize, Serialize, IntoParams)]
pub struct PaginationParams {
    /// 1-based page number
    pub page: Option<u64>,
    /// Page size, clamped to the configured maximum
    pub per_page: Option<u32>,
}

impl PaginationParams {
    pub fn page(&self) -> u64 {
        self.page.unwrap_or(1).max(1)
    }
}
