//! Payment API server.
//!
//! A small hyper/http1 server carrying the BIP-270 protocol endpoints, the
//! invoice management API, the wallet balance and a health probe.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

use super::types::{
    error_response, error_response_for, json_response, method_not_allowed, not_found,
    BalanceBody, HealthBody, MAX_REQUEST_SIZE,
};
use super::{invoices, payment};
use crate::config::ServerConfig;
use crate::payment::{InvoiceService, PaymentFacade, PaymentRequestService};
use crate::storage::Store;

/// HTTP front of the payment daemon.
#[derive(Clone)]
pub struct ApiServer {
    addr: SocketAddr,
    hostname: String,
    store: Arc<Store>,
    invoices: Arc<InvoiceService>,
    requests: Arc<PaymentRequestService>,
    facade: Arc<PaymentFacade>,
}

impl ApiServer {
    pub fn new(
        config: &ServerConfig,
        store: Arc<Store>,
        invoices: Arc<InvoiceService>,
        requests: Arc<PaymentRequestService>,
        facade: Arc<PaymentFacade>,
    ) -> Self {
        Self {
            addr: config.listen_addr,
            hostname: config.hostname.clone(),
            store,
            invoices,
            requests,
            facade,
        }
    }

    pub(super) fn hostname(&self) -> &str {
        &self.hostname
    }

    pub(super) fn invoices(&self) -> &InvoiceService {
        &self.invoices
    }

    pub(super) fn requests(&self) -> &PaymentRequestService {
        &self.requests
    }

    pub(super) fn facade(&self) -> &PaymentFacade {
        &self.facade
    }

    /// Serve until the cancellation token fires.
    pub async fn start(&self, cancel: CancellationToken) -> Result<()> {
        let listener = TcpListener::bind(self.addr).await?;
        info!("Payment API listening on {}", self.addr);

        let server = Arc::new(self.clone());
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Payment API shutting down");
                    return Ok(());
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!("New API connection from {}", peer);
                        let server = Arc::clone(&server);
                        let cancel = cancel.clone();
                        tokio::spawn(async move {
                            let io = TokioIo::new(stream);
                            let service = service_fn(move |req| {
                                Self::handle_request(Arc::clone(&server), req, cancel.clone())
                            });
                            if let Err(e) =
                                http1::Builder::new().serve_connection(io, service).await
                            {
                                debug!("API connection error: {}", e);
                            }
                        });
                    }
                    Err(e) => error!("Failed to accept API connection: {}", e),
                },
            }
        }
    }

    /// Read the body within the size limit, then dispatch.
    async fn handle_request(
        server: Arc<Self>,
        req: Request<Incoming>,
        cancel: CancellationToken,
    ) -> Result<Response<Full<Bytes>>, hyper::Error> {
        let method = req.method().clone();
        let path = req.uri().path().to_owned();
        let request_id = Uuid::new_v4().to_string();
        debug!("API {} {} (request_id: {})", method, path, &request_id[..8]);

        if let Some(length) = req
            .headers()
            .get("content-length")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<usize>().ok())
        {
            if length > MAX_REQUEST_SIZE {
                return Ok(payload_too_large(length));
            }
        }

        let body = req.into_body().collect().await?.to_bytes();
        if body.len() > MAX_REQUEST_SIZE {
            return Ok(payload_too_large(body.len()));
        }

        Ok(server.route(&method, &path, body, &cancel).await)
    }

    /// Dispatch one request to its handler.
    ///
    /// Exposed so embedders and tests can drive the API without binding a
    /// socket; `start` wraps this with the hyper connection loop.
    pub async fn route(
        &self,
        method: &Method,
        path: &str,
        body: Bytes,
        cancel: &CancellationToken,
    ) -> Response<Full<Bytes>> {
        let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        match parts.as_slice() {
            ["health"] => match *method {
                Method::GET => json_response(StatusCode::OK, &HealthBody { status: "ok" }),
                _ => method_not_allowed(),
            },
            ["api", "v1", "payment", payment_id] => {
                payment::handle(self, method, payment_id, body, cancel).await
            }
            ["api", "v1", "invoices"] => invoices::handle_collection(self, method, body),
            ["api", "v1", "invoices", payment_id] => {
                invoices::handle_item(self, method, payment_id)
            }
            ["api", "v1", "balance"] => match *method {
                Method::GET => match self.store.transactions().unspent_balance() {
                    Ok(satoshis) => json_response(StatusCode::OK, &BalanceBody { satoshis }),
                    Err(e) => error_response_for(&e),
                },
                _ => method_not_allowed(),
            },
            _ => not_found(path),
        }
    }
}

fn payload_too_large(length: usize) -> Response<Full<Bytes>> {
    error_response(
        StatusCode::PAYLOAD_TOO_LARGE,
        "PAYLOAD_TOO_LARGE",
        &format!(
            "Request body too large: {} bytes (max: {} bytes)",
            length, MAX_REQUEST_SIZE
        ),
    )
}
