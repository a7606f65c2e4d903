use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use voketag_anchor::anchor::{HttpLedgerClient, Ledger, TxStatus};
use voketag_anchor::error::{LedgerError, Retryable};

const ROOT: &str = "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08";

fn client(server: &MockServer, timeout: Duration) -> HttpLedgerClient {
    HttpLedgerClient::new(server.uri(), "polygon-amoy".to_string(), timeout).unwrap()
}

#[tokio::test]
async fn test_submit_returns_transaction() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/anchors"))
        .and(body_json(json!({"merkle_root": ROOT, "network": "polygon-amoy"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "transaction_id": "0xdeadbeef",
            "status": {"state": "pending"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let submission = client(&server, Duration::from_secs(5)).submit(ROOT).await.unwrap();
    assert_eq!(submission.transaction_id, "0xdeadbeef");
    assert_eq!(submission.status, TxStatus::Pending);
}

#[tokio::test]
async fn test_status_confirmed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/transactions/0xdeadbeef"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "state": "confirmed",
            "block_number": 4242,
            "gas_used": 51234
        })))
        .mount(&server)
        .await;

    let status = client(&server, Duration::from_secs(5)).status("0xdeadbeef").await.unwrap();
    assert_eq!(
        status,
        TxStatus::Confirmed {
            block_number: 4242,
            gas_used: 51234
        }
    );
}

#[tokio::test]
async fn test_server_error_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = client(&server, Duration::from_secs(5)).submit(ROOT).await.unwrap_err();
    assert!(matches!(err, LedgerError::Transient(_)));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_client_error_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(422).set_body_string("root already anchored"))
        .mount(&server)
        .await;

    let err = client(&server, Duration::from_secs(5)).submit(ROOT).await.unwrap_err();
    match err {
        LedgerError::Rejected(msg) => assert!(msg.contains("root already anchored")),
        other => panic!("expected rejection, got {:?}", other),
    }
}

#[tokio::test]
async fn test_slow_ledger_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"transaction_id": "0x1", "status": {"state": "pending"}}))
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&server)
        .await;

    let err = client(&server, Duration::from_millis(50)).submit(ROOT).await.unwrap_err();
    assert!(matches!(err, LedgerError::Timeout(_)));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_malformed_body_is_invalid_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let err = client(&server, Duration::from_secs(5)).submit(ROOT).await.unwrap_err();
    assert!(matches!(err, LedgerError::InvalidResponse(_)));
    assert!(!err.is_retryable());
}
