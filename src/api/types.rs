//! API request and response bodies.

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::{Deserialize, Serialize};

use crate::errors::Error;

/// Maximum request body size (1MB)
pub const MAX_REQUEST_SIZE: usize = 1_048_576;

/// Body of `POST /api/v1/invoices`.
#[derive(Debug, Deserialize)]
pub struct InvoiceCreateBody {
    pub satoshis: u64,
    #[serde(default)]
    pub description: Option<String>,
}

/// Body of `GET /api/v1/balance`.
#[derive(Debug, Serialize, Deserialize)]
pub struct BalanceBody {
    pub satoshis: u64,
}

/// Body of `GET /health`.
#[derive(Debug, Serialize)]
pub struct HealthBody {
    pub status: &'static str,
}

/// Error body returned for non-protocol failures.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

/// Serialize `data` into a JSON response with the given status.
pub fn json_response<T: Serialize>(status: StatusCode, data: &T) -> Response<Full<Bytes>> {
    let body = serde_json::to_string(data).unwrap_or_else(|_| "{}".to_string());
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Content-Length", body.len())
        .body(Full::new(Bytes::from(body)))
        .unwrap()
}

/// Build an error response with a machine-readable code.
pub fn error_response(status: StatusCode, code: &str, message: &str) -> Response<Full<Bytes>> {
    json_response(
        status,
        &ErrorBody {
            code: code.to_owned(),
            message: message.to_owned(),
        },
    )
}

/// Map a service error onto transport status and code.
///
/// Definitive protocol rejections never reach this point; they travel as
/// acknowledgements with a `200`-class status.
pub fn error_response_for(err: &Error) -> Response<Full<Bytes>> {
    let (status, code) = match err {
        Error::Validation { .. } => (StatusCode::BAD_REQUEST, "VALIDATION"),
        Error::NotFound { .. } => (StatusCode::NOT_FOUND, "NOT_FOUND"),
        Error::Duplicate { .. } => (StatusCode::CONFLICT, "CONFLICT"),
        Error::Dependency { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        Error::Cancelled => (StatusCode::SERVICE_UNAVAILABLE, "SHUTTING_DOWN"),
    };
    error_response(status, code, &err.to_string())
}

/// Parse a JSON body, answering `400` when it does not fit `T`.
pub fn parse_json<T: serde::de::DeserializeOwned>(
    body: &Bytes,
) -> Result<T, Response<Full<Bytes>>> {
    serde_json::from_slice(body).map_err(|e| {
        error_response(
            StatusCode::BAD_REQUEST,
            "BAD_REQUEST",
            &format!("Invalid JSON body: {}", e),
        )
    })
}

pub fn method_not_allowed() -> Response<Full<Bytes>> {
    error_response(
        StatusCode::METHOD_NOT_ALLOWED,
        "METHOD_NOT_ALLOWED",
        "Method not supported for this endpoint",
    )
}

pub fn not_found(path: &str) -> Response<Full<Bytes>> {
    error_response(
        StatusCode::NOT_FOUND,
        "NOT_FOUND",
        &format!("Endpoint not found: {}", path),
    )
}
