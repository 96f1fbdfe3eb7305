//! BIP-270 protocol endpoints.
//!
//! `GET /api/v1/payment/{paymentID}` returns the payment request and
//! `POST /api/v1/payment/{paymentID}` submits the settlement transaction.
//! Both answer with bare protocol JSON, not an API envelope, since the
//! caller is the payer's wallet.

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Method, Response, StatusCode};
use tokio_util::sync::CancellationToken;

use super::server::ApiServer;
use super::types::{error_response_for, json_response, method_not_allowed, parse_json};
use crate::bip270::Payment;

pub(super) async fn handle(
    server: &ApiServer,
    method: &Method,
    payment_id: &str,
    body: Bytes,
    cancel: &CancellationToken,
) -> Response<Full<Bytes>> {
    match *method {
        Method::GET => {
            match server
                .requests()
                .create_request(payment_id, server.hostname(), cancel)
                .await
            {
                Ok(request) => json_response(StatusCode::OK, &request),
                Err(e) => error_response_for(&e),
            }
        }
        Method::POST => {
            let payment: Payment = match parse_json(&body) {
                Ok(payment) => payment,
                Err(resp) => return resp,
            };
            match server.facade().settle(payment_id, payment, cancel).await {
                Ok(ack) => json_response(StatusCode::CREATED, &ack),
                Err(e) => error_response_for(&e),
            }
        }
        _ => method_not_allowed(),
    }
}
