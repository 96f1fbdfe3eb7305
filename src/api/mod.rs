//! HTTP API surface: BIP-270 protocol endpoints plus invoice, balance and
//! health routes.

mod invoices;
mod payment;
mod server;
pub mod types;

pub use server::ApiServer;

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bytes::Bytes;
    use http_body_util::BodyExt;
    use hyper::{Method, StatusCode};
    use tokio_util::sync::CancellationToken;

    use super::types::BalanceBody;
    use super::ApiServer;
    use crate::bip270::{PaymentAck, PaymentRequest};
    use crate::codec::RawTxDecoder;
    use crate::config::{PaymentsConfig, ServerConfig, WalletConfig};
    use crate::payment::{
        InvoiceService, PaymentFacade, PaymentLocks, PaymentRequestService, SettlementMode,
        WalletSettlementService,
    };
    use crate::storage::{Invoice, Store};
    use crate::wallet::WalletKeychain;

    fn server() -> ApiServer {
        let store = Arc::new(Store::in_memory().unwrap());
        store.keys().get_or_create("masterkey").unwrap();
        let locks = Arc::new(PaymentLocks::new());
        let requests = Arc::new(PaymentRequestService::new(
            Arc::clone(&store),
            Arc::new(WalletKeychain::new()),
            Arc::clone(&locks),
            WalletConfig::default(),
            PaymentsConfig::default(),
        ));
        let wallet = WalletSettlementService::new(
            Arc::clone(&store),
            Arc::new(RawTxDecoder),
            Arc::clone(&locks),
        );
        let facade = Arc::new(PaymentFacade::new(
            SettlementMode::Wallet,
            Arc::new(wallet),
        ));
        let invoices = Arc::new(InvoiceService::new(Arc::clone(&store)));
        ApiServer::new(
            &ServerConfig::default(),
            store,
            invoices,
            requests,
            facade,
        )
    }

    async fn body_json<T: serde::de::DeserializeOwned>(
        resp: hyper::Response<http_body_util::Full<Bytes>>,
    ) -> T {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_invoice_lifecycle_over_routes() {
        let srv = server();
        let cancel = CancellationToken::new();

        let resp = srv
            .route(
                &Method::POST,
                "/api/v1/invoices",
                Bytes::from_static(br#"{"satoshis": 10000, "description": "widgets"}"#),
                &cancel,
            )
            .await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let invoice: Invoice = body_json(resp).await;
        assert_eq!(invoice.satoshis, 10_000);

        let path = format!("/api/v1/invoices/{}", invoice.payment_id);
        let resp = srv.route(&Method::GET, &path, Bytes::new(), &cancel).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = srv
            .route(&Method::DELETE, &path, Bytes::new(), &cancel)
            .await;
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);

        let resp = srv.route(&Method::GET, &path, Bytes::new(), &cancel).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_payment_request_round_trip_over_routes() {
        let srv = server();
        let cancel = CancellationToken::new();

        let resp = srv
            .route(
                &Method::POST,
                "/api/v1/invoices",
                Bytes::from_static(br#"{"satoshis": 10000}"#),
                &cancel,
            )
            .await;
        let invoice: Invoice = body_json(resp).await;

        let path = format!("/api/v1/payment/{}", invoice.payment_id);
        let resp = srv.route(&Method::GET, &path, Bytes::new(), &cancel).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let request: PaymentRequest = body_json(resp).await;
        assert_eq!(request.outputs[0].amount, 10_000);
        assert!(request
            .payment_url
            .ends_with(&format!("/api/v1/payment/{}", invoice.payment_id)));
    }

    #[tokio::test]
    async fn test_settlement_rejection_is_a_protocol_answer() {
        let srv = server();
        let cancel = CancellationToken::new();

        let resp = srv
            .route(
                &Method::POST,
                "/api/v1/invoices",
                Bytes::from_static(br#"{"satoshis": 10000}"#),
                &cancel,
            )
            .await;
        let invoice: Invoice = body_json(resp).await;

        // Submit garbage hex: a rejected ack, not a transport error.
        let path = format!("/api/v1/payment/{}", invoice.payment_id);
        let body = Bytes::from(r#"{"transaction": "zz"}"#.to_owned());
        let resp = srv.route(&Method::POST, &path, body, &cancel).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let ack: PaymentAck = body_json(resp).await;
        assert_eq!(ack.error, 1);
        assert_eq!(ack.success, "false");
    }

    #[tokio::test]
    async fn test_unknown_payment_is_transport_not_found() {
        let srv = server();
        let cancel = CancellationToken::new();
        let resp = srv
            .route(
                &Method::POST,
                "/api/v1/payment/missing",
                Bytes::from(r#"{"transaction": "00"}"#.to_owned()),
                &cancel,
            )
            .await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_balance_and_health_routes() {
        let srv = server();
        let cancel = CancellationToken::new();

        let resp = srv
            .route(&Method::GET, "/health", Bytes::new(), &cancel)
            .await;
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = srv
            .route(&Method::GET, "/api/v1/balance", Bytes::new(), &cancel)
            .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let balance: BalanceBody = body_json(resp).await;
        assert_eq!(balance.satoshis, 0);
    }

    #[tokio::test]
    async fn test_unknown_route_is_not_found() {
        let srv = server();
        let cancel = CancellationToken::new();
        let resp = srv
            .route(&Method::GET, "/api/v1/nope", Bytes::new(), &cancel)
            .await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
