use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use kora_core::validation::ValidationError;
use metrics::counter;
use serde::Serialize;

#[derive(Debug, Serialize)]
struct ProblemDetails {
    #[serde(rename = "type")]
    problem_type: &'static str,
    title: &'static str,
    detail: String,
}

/// `application/problem+json` error body.
#[derive(Debug)]
pub struct ProblemResponse {
    status: StatusCode,
    body: ProblemDetails,
}

impl ProblemResponse {
    pub fn new<S: Into<String>>(status: StatusCode, problem_type: &'static str, detail: S) -> Self {
        Self {
            status,
            body: ProblemDetails {
                problem_type,
                title: status.canonical_reason().unwrap_or("error"),
                detail: detail.into(),
            },
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn problem_type(&self) -> &'static str {
        self.body.problem_type
    }
}

impl IntoResponse for ProblemResponse {
    fn into_response(self) -> Response {
        counter!("api_errors_total", "type" => self.body.problem_type).increment(1);
        let mut response = Json(self.body).into_response();
        *response.status_mut() = self.status;
        response.headers_mut().insert(
            axum::http::header::CONTENT_TYPE,
            axum::http::HeaderValue::from_static("application/problem+json"),
        );
        response
    }
}

impl From<ValidationError> for ProblemResponse {
    fn from(err: ValidationError) -> Self {
        ProblemResponse::new(StatusCode::UNPROCESSABLE_ENTITY, "invalid_input", err.to_string())
    }
}

pub fn bad_request(problem_type: &'static str, detail: impl Into<String>) -> ProblemResponse {
    ProblemResponse::new(StatusCode::BAD_REQUEST, problem_type, detail)
}

pub fn unauthorized(problem_type: &'static str, detail: impl Into<String>) -> ProblemResponse {
    ProblemResponse::new(StatusCode::UNAUTHORIZED, problem_type, detail)
}

pub fn forbidden(detail: impl Into<String>) -> ProblemResponse {
    ProblemResponse::new(StatusCode::FORBIDDEN, "forbidden", detail)
}

pub fn not_found(problem_type: &'static str, detail: impl Into<String>) -> ProblemResponse {
    ProblemResponse::new(StatusCode::NOT_FOUND, problem_type, detail)
}

pub fn conflict(problem_type: &'static str, detail: impl Into<String>) -> ProblemResponse {
    ProblemResponse::new(StatusCode::CONFLICT, problem_type, detail)
}

/// Callers log the underlying error; the body never carries it.
pub fn internal_error(detail: impl Into<String>) -> ProblemResponse {
    ProblemResponse::new(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", detail)
}

pub fn bad_gateway(detail: impl Into<String>) -> ProblemResponse {
    ProblemResponse::new(StatusCode::BAD_GATEWAY, "platform_unavailable", detail)
}
