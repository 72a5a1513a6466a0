mod common;

use axum::http::{Method, StatusCode};
use chrono::Utc;
use checkout_payments::{entities::OrderStatus, repositories::CheckoutStore};
use common::{
    body_json, mercadopago_payment_event, mercadopago_signature, pix_order_body, TestApp,
};
use serde_json::json;
use wiremock::{
    matchers::{header_exists, method, path},
    Mock, MockServer, ResponseTemplate,
};

#[tokio::test]
async fn pix_order_with_coupon_is_paid_once_and_notified_once() {
    let app = TestApp::new().await;
    let product = app.seed_product(9900);
    let coupon = app.seed_percentage_coupon(product.id, 10, Some(1));

    let merchant = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hooks"))
        .and(header_exists("X-Signature"))
        .and(header_exists("X-Event-Type"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .expect(1)
        .mount(&merchant)
        .await;
    app.seed_merchant_webhook(&format!("{}/hooks", merchant.uri()));

    app.mount_pix_creation("1001").await;
    app.mount_payment_status("1001", "approved").await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/orders",
            Some(pix_order_body(product.id, Some(coupon.id), "Maria@Example.com")),
            &[],
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = body_json(response).await;
    let data = &created["data"];
    assert_eq!(data["status"], "PENDING");
    assert_eq!(data["gateway"], "mercadopago");
    assert_eq!(data["gateway_payment_id"], "1001");
    assert_eq!(data["gross_amount_cents"], 9900);
    assert_eq!(data["discount_amount_cents"], 990);
    assert_eq!(data["net_amount_cents"], 8910);
    assert_eq!(data["coupon_code"], "PROMO10");
    assert!(data["pix"]["qr_code"].is_string());

    let event = mercadopago_payment_event("1001");
    let headers = mercadopago_signature("1001", "mp-req-1", Utc::now().timestamp());
    let response = app.post_raw("/webhooks/mercadopago", &event, &headers).await;
    assert_eq!(response.status(), StatusCode::OK);
    let outcome = body_json(response).await;
    assert_eq!(outcome["data"]["outcome"], "applied");
    assert_eq!(outcome["data"]["status"], "PAID");

    let orders = app.store.orders();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].status, OrderStatus::Paid);
    assert!(orders[0].paid_at.is_some());
    assert_eq!(orders[0].customer_email, "maria@example.com");
    assert_eq!(orders[0].customer_document.as_deref(), Some("12345678901"));

    let deliveries = app.store.deliveries();
    assert_eq!(deliveries.len(), 1);
    assert!(deliveries[0].success);
    assert_eq!(deliveries[0].attempts, 1);
    assert_eq!(deliveries[0].event_type, "purchase_approved");

    // Gateways resend notifications; a replay must not move or notify again
    let headers = mercadopago_signature("1001", "mp-req-2", Utc::now().timestamp());
    let response = app.post_raw("/webhooks/mercadopago", &event, &headers).await;
    assert_eq!(response.status(), StatusCode::OK);
    let outcome = body_json(response).await;
    assert_eq!(outcome["data"]["outcome"], "unchanged");
    assert_eq!(app.store.deliveries().len(), 1);

    let response = app
        .request(
            Method::GET,
            &format!("/api/v1/orders/{}", orders[0].id),
            None,
            &[],
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let fetched = body_json(response).await;
    assert_eq!(fetched["data"]["status"], "PAID");
}

#[tokio::test]
async fn refund_after_payment_notifies_the_merchant_once() {
    let app = TestApp::new().await;
    let product = app.seed_product(4990);

    let merchant = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hooks"))
        .respond_with(ResponseTemplate::new(200))
        .expect(2)
        .mount(&merchant)
        .await;
    app.seed_merchant_webhook_for(
        &format!("{}/hooks", merchant.uri()),
        &["purchase_approved", "purchase_refunded"],
    );

    app.mount_pix_creation("7007").await;
    app.mount_payment_status("7007", "approved").await;
    let response = app
        .request(
            Method::POST,
            "/api/v1/orders",
            Some(pix_order_body(product.id, None, "buyer@example.com")),
            &[],
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let event = mercadopago_payment_event("7007");
    let headers = mercadopago_signature("7007", "mp-req-1", Utc::now().timestamp());
    let response = app.post_raw("/webhooks/mercadopago", &event, &headers).await;
    assert_eq!(body_json(response).await["data"]["status"], "PAID");

    app.gateway.reset().await;
    app.mount_payment_status("7007", "refunded").await;

    for request_id in ["mp-req-2", "mp-req-3"] {
        let headers = mercadopago_signature("7007", request_id, Utc::now().timestamp());
        let response = app.post_raw("/webhooks/mercadopago", &event, &headers).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    assert_eq!(app.store.orders()[0].status, OrderStatus::Refunded);
    let mut events: Vec<String> = app
        .store
        .deliveries()
        .into_iter()
        .map(|d| d.event_type)
        .collect();
    events.sort();
    assert_eq!(events, vec!["purchase_approved", "purchase_refunded"]);
}

#[tokio::test]
async fn tampered_or_stale_gateway_webhooks_are_rejected() {
    let app = TestApp::new().await;
    let product = app.seed_product(5000);
    app.mount_pix_creation("2002").await;
    app.mount_payment_status("2002", "approved").await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/orders",
            Some(pix_order_body(product.id, None, "buyer@example.com")),
            &[],
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    // Signed for 2002, body says 2003
    let headers = mercadopago_signature("2002", "mp-req-1", Utc::now().timestamp());
    let response = app
        .post_raw("/webhooks/mercadopago", &mercadopago_payment_event("2003"), &headers)
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let stale = Utc::now().timestamp() - 3600;
    let headers = mercadopago_signature("2002", "mp-req-2", stale);
    let response = app
        .post_raw("/webhooks/mercadopago", &mercadopago_payment_event("2002"), &headers)
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .post_raw("/webhooks/mercadopago", &mercadopago_payment_event("2002"), &[])
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    assert_eq!(app.store.orders()[0].status, OrderStatus::Pending);
}

#[tokio::test]
async fn unknown_gateway_and_unknown_payment_are_handled() {
    let app = TestApp::new().await;

    let response = app.post_raw("/webhooks/stripe", "{}", &[]).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Signed correctly, but no order carries this payment id
    let headers = mercadopago_signature("9999", "mp-req-1", Utc::now().timestamp());
    let response = app
        .post_raw("/webhooks/mercadopago", &mercadopago_payment_event("9999"), &headers)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let outcome = body_json(response).await;
    assert_eq!(outcome["data"]["outcome"], "ignored");
}

#[tokio::test]
async fn coupon_cap_holds_under_concurrent_checkouts() {
    let app = TestApp::new().await;
    let product = app.seed_product(9900);
    let coupon = app.seed_percentage_coupon(product.id, 10, Some(1));
    app.mount_pix_creation("3003").await;

    let first = app.request(
        Method::POST,
        "/api/v1/orders",
        Some(pix_order_body(product.id, Some(coupon.id), "a@example.com")),
        &[],
    );
    let second = app.request(
        Method::POST,
        "/api/v1/orders",
        Some(pix_order_body(product.id, Some(coupon.id), "b@example.com")),
        &[],
    );
    let (first, second) = tokio::join!(first, second);
    assert_eq!(first.status(), StatusCode::CREATED);
    assert_eq!(second.status(), StatusCode::CREATED);

    let mut nets = vec![
        body_json(first).await["data"]["net_amount_cents"].as_i64(),
        body_json(second).await["data"]["net_amount_cents"].as_i64(),
    ];
    nets.sort();
    assert_eq!(nets, vec![Some(8910), Some(9900)]);
}

#[tokio::test]
async fn gateway_rejection_cancels_the_order() {
    let app = TestApp::new().await;
    let product = app.seed_product(4990);
    Mock::given(method("POST"))
        .and(path("/v1/payments"))
        .respond_with(
            ResponseTemplate::new(400)
                .set_body_json(json!({"message": "payer email invalid", "status": 400})),
        )
        .mount(&app.gateway)
        .await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/orders",
            Some(pix_order_body(product.id, None, "buyer@example.com")),
            &[],
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body = body_json(response).await;
    assert!(body["message"]
        .as_str()
        .unwrap_or_default()
        .contains("payer email invalid"));

    let orders = app.store.orders();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].status, OrderStatus::Cancelled);
}

#[tokio::test]
async fn invalid_requests_fail_before_any_gateway_call() {
    let app = TestApp::new().await;
    let product = app.seed_product(4990);

    let mut body = pix_order_body(product.id, None, "not-an-email");
    let response = app
        .request(Method::POST, "/api/v1/orders", Some(body.clone()), &[])
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    body["customer_email"] = json!("buyer@example.com");
    body["product_id"] = json!(uuid::Uuid::new_v4());
    let response = app
        .request(Method::POST, "/api/v1/orders", Some(body), &[])
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    assert!(app.store.orders().is_empty());
    assert!(app
        .gateway
        .received_requests()
        .await
        .unwrap_or_default()
        .is_empty());
}

#[tokio::test]
async fn coupon_preview_does_not_consume_usage() {
    let app = TestApp::new().await;
    let product = app.seed_product(9900);
    let coupon = app.seed_percentage_coupon(product.id, 10, Some(1));

    for _ in 0..2 {
        let response = app
            .request(
                Method::POST,
                "/api/v1/coupons/validate",
                Some(json!({"code": "promo-10", "product_id": product.id, "amount_cents": 9900})),
                &[],
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let preview = body_json(response).await;
        assert_eq!(preview["data"]["valid"], true);
        assert_eq!(preview["data"]["discount_cents"], 990);
        assert_eq!(preview["data"]["final_amount_cents"], 8910);
    }

    let stored = app
        .store
        .find_coupon(coupon.id)
        .await
        .unwrap()
        .expect("coupon stored");
    assert_eq!(stored.uses_count, 0);
}

#[tokio::test]
async fn health_reports_storage_and_gateways() {
    let app = TestApp::new().await;
    let response = app.request(Method::GET, "/health", None, &[]).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["storage"], "up");
    assert_eq!(body["gateways"], json!(["mercadopago"]));

    let response = app.request(Method::GET, "/health", None, &[]).await;
    assert!(response.headers().contains_key("x-request-id"));
}
