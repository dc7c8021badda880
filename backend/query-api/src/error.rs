use std::fmt;

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use error_handling::ServiceError;

/// Wraps [`ServiceError`] so it can implement actix's foreign
/// [`ResponseError`] trait; the mapping itself is `error-handling`'s
/// `to_response()`.
#[derive(Debug)]
pub struct ApiError(pub ServiceError);

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<ServiceError> for ApiError {
    fn from(e: ServiceError) -> Self {
        ApiError(e)
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(e: sqlx::Error) -> Self {
        ApiError(ServiceError::from(e))
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        // spec.md §6: `/publish` reports 422 on validation failure, the one
        // route where this façade's contract diverges from
        // `ServiceError`'s generic 400 mapping.
        if let ServiceError::ValidationError(_) = &self.0 {
            return StatusCode::UNPROCESSABLE_ENTITY;
        }
        StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(self.0.to_response())
    }
}
