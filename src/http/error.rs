//! Error responses.
//!
//! Every failure leaves the API as `{ "error": { "code", "class", "message", "retryable", "rebuild" } }`
//! so clients can tell a bad signature from a busy relay.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::pipeline::{ErrorClass, PipelineError};
use crate::relay::{PollError, SubmitError};
use crate::sponsor::SponsorshipDenied;

#[derive(Debug)]
pub enum ApiError {
    Pipeline(PipelineError),
    BadRequest(String),
    NotFound(String),
}

impl From<PipelineError> for ApiError {
    fn from(error: PipelineError) -> Self {
        ApiError::Pipeline(error)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Pipeline(error) => pipeline_status(error),
        }
    }
}

fn pipeline_status(error: &PipelineError) -> StatusCode {
    match error {
        PipelineError::AccountNotFound(_) | PipelineError::UnknownChain(_) => StatusCode::NOT_FOUND,
        PipelineError::Poll(PollError::UnknownChain(_)) => StatusCode::NOT_FOUND,
        PipelineError::Build(crate::userop::BuildError::AccountNotReady(_)) => StatusCode::CONFLICT,
        PipelineError::Sponsorship(SponsorshipDenied::LimitExceeded(_)) => StatusCode::PAYMENT_REQUIRED,
        PipelineError::Submit(SubmitError::TimedOut(_))
        | PipelineError::Poll(PollError::TimedOut(_)) => StatusCode::GATEWAY_TIMEOUT,
        PipelineError::CeremonyTimedOut(_) => StatusCode::REQUEST_TIMEOUT,
        PipelineError::UserCancelled => StatusCode::CONFLICT,
        other => match other.class() {
            ErrorClass::Input | ErrorClass::Encoding => StatusCode::BAD_REQUEST,
            ErrorClass::Relay => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorClass::Upstream => StatusCode::BAD_GATEWAY,
            ErrorClass::Interactive => StatusCode::FORBIDDEN,
        },
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            ApiError::Pipeline(error) => {
                if status.is_server_error() {
                    tracing::warn!(code = error.code(), error = %error, "Request failed upstream");
                }
                json!({
                    "error": {
                        "code": error.code(),
                        "class": error.class(),
                        "message": error.to_string(),
                        "retryable": error.is_retryable(),
                        "rebuild": error.requires_rebuild(),
                    }
                })
            }
            ApiError::BadRequest(message) => json!({
                "error": { "code": "invalid_input", "class": ErrorClass::Input, "message": message }
            }),
            ApiError::NotFound(message) => json!({
                "error": { "code": "not_found", "class": ErrorClass::Input, "message": message }
            }),
        };
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
