//! Invoice management endpoints.

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Method, Response, StatusCode};

use super::server::ApiServer;
use super::types::{
    error_response_for, json_response, method_not_allowed, parse_json, InvoiceCreateBody,
};

/// `POST /api/v1/invoices` and `GET /api/v1/invoices`.
pub(super) fn handle_collection(
    server: &ApiServer,
    method: &Method,
    body: Bytes,
) -> Response<Full<Bytes>> {
    match *method {
        Method::POST => {
            let create: InvoiceCreateBody = match parse_json(&body) {
                Ok(create) => create,
                Err(resp) => return resp,
            };
            match server.invoices().create(create.satoshis, create.description) {
                Ok(invoice) => json_response(StatusCode::CREATED, &invoice),
                Err(e) => error_response_for(&e),
            }
        }
        Method::GET => match server.invoices().list() {
            Ok(invoices) => json_response(StatusCode::OK, &invoices),
            Err(e) => error_response_for(&e),
        },
        _ => method_not_allowed(),
    }
}

/// `GET /api/v1/invoices/{paymentID}` and `DELETE /api/v1/invoices/{paymentID}`.
pub(super) fn handle_item(
    server: &ApiServer,
    method: &Method,
    payment_id: &str,
) -> Response<Full<Bytes>> {
    match *method {
        Method::GET => match server.invoices().get(payment_id) {
            Ok(invoice) => json_response(StatusCode::OK, &invoice),
            Err(e) => error_response_for(&e),
        },
        Method::DELETE => match server.invoices().delete(payment_id) {
            Ok(()) => Response::builder()
                .status(StatusCode::NO_CONTENT)
                .body(Full::new(Bytes::new()))
                .unwrap(),
            Err(e) => error_response_for(&e),
        },
        _ => method_not_allowed(),
    }
}
