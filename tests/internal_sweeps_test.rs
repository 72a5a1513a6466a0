mod common;

use axum::http::{Method, StatusCode};
use chrono::Utc;
use checkout_payments::entities::OrderStatus;
use common::{
    body_json, mercadopago_payment_event, mercadopago_signature, pix_order_body, TestApp,
};
use serde_json::json;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

async fn create_pix_order(app: &TestApp, payment_id: &str) {
    let product = app.seed_product(9900);
    app.mount_pix_creation(payment_id).await;
    let response = app
        .request(
            Method::POST,
            "/api/v1/orders",
            Some(pix_order_body(product.id, None, "buyer@example.com")),
            &[],
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn internal_endpoints_require_the_shared_secret() {
    let app = TestApp::new().await;

    for uri in ["/internal/reconcile", "/internal/webhook-retries"] {
        let response = app.request(Method::POST, uri, None, &[]).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{uri}");

        let response = app
            .request(Method::POST, uri, None, &[("x-internal-secret", "wrong")])
            .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{uri}");
    }

    let response = app.internal_post("/internal/webhook-retries", None).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn internal_endpoints_are_closed_without_a_configured_secret() {
    let app = TestApp::with_config(|cfg| cfg.internal_secret = None).await;
    let response = app.internal_post("/internal/reconcile", None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn reconciliation_settles_missed_webhooks_once() {
    let app = TestApp::new().await;
    create_pix_order(&app, "4004").await;
    app.mount_payment_status("4004", "approved").await;

    let response = app.internal_post("/internal/reconcile", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let summary = body_json(response).await;
    assert_eq!(summary["data"]["scanned"], 1);
    assert_eq!(summary["data"]["updated"], 1);
    assert_eq!(summary["data"]["results"][0]["new_status"], "PAID");
    assert_eq!(app.store.orders()[0].status, OrderStatus::Paid);

    let response = app
        .internal_post("/internal/reconcile", Some(json!({"batch_size": 10})))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let summary = body_json(response).await;
    assert_eq!(summary["data"]["scanned"], 0);
    assert_eq!(summary["data"]["updated"], 0);
}

#[tokio::test]
async fn reconciliation_leaves_pending_payments_alone() {
    let app = TestApp::new().await;
    create_pix_order(&app, "5005").await;
    app.mount_payment_status("5005", "in_process").await;

    let response = app.internal_post("/internal/reconcile", None).await;
    let summary = body_json(response).await;
    assert_eq!(summary["data"]["scanned"], 1);
    assert_eq!(summary["data"]["skipped"], 1);
    assert_eq!(app.store.orders()[0].status, OrderStatus::Pending);
}

#[tokio::test]
async fn failed_merchant_webhooks_stop_at_the_retry_cap() {
    let app = TestApp::with_config(|cfg| cfg.webhooks.max_retries = 3).await;

    let merchant = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hooks"))
        .respond_with(ResponseTemplate::new(500).set_body_string("erp down"))
        .expect(3)
        .mount(&merchant)
        .await;
    app.seed_merchant_webhook(&format!("{}/hooks", merchant.uri()));

    create_pix_order(&app, "6006").await;
    app.mount_payment_status("6006", "approved").await;
    let headers = mercadopago_signature("6006", "mp-req-1", Utc::now().timestamp());
    let response = app
        .post_raw("/webhooks/mercadopago", &mercadopago_payment_event("6006"), &headers)
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let deliveries = app.store.deliveries();
    assert_eq!(deliveries.len(), 1);
    assert!(!deliveries[0].success);
    assert_eq!(deliveries[0].response_status, Some(500));

    for expected_selected in [1, 1, 0] {
        let response = app.internal_post("/internal/webhook-retries", None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let summary = body_json(response).await;
        assert_eq!(summary["data"]["selected"], expected_selected);
    }

    let deliveries = app.store.deliveries();
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].attempts, 3);
    assert!(!deliveries[0].success);
    assert_eq!(deliveries[0].response_body.as_deref(), Some("erp down"));
}
