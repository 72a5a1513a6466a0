#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Method, Request},
    Router,
};
use chrono::Utc;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

use checkout_payments::{
    app_router,
    config::AppConfig,
    entities::{
        coupon::{self, DiscountType},
        outbound_webhook, product,
    },
    gateways::{mercadopago, GatewayRegistry},
    repositories::InMemoryStore,
    signing::hmac_sha256_hex,
    AppState,
};

pub const MP_WEBHOOK_SECRET: &str = "mp-test-webhook-secret";
pub const INTERNAL_SECRET: &str = "internal-test-secret-0123456789abcdef";

/// Application wired to an in-memory store, with MercadoPago pointed at a
/// local mock server.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub store: Arc<InMemoryStore>,
    pub gateway: MockServer,
    pub vendor_id: Uuid,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Builds the app after letting the caller tweak the test configuration.
    pub async fn with_config(tweak: impl FnOnce(&mut AppConfig)) -> Self {
        let gateway = MockServer::start().await;

        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        cfg.internal_secret = Some(INTERNAL_SECRET.to_string());
        cfg.notification_base_url = Some("https://pay.example.com".to_string());
        cfg.gateways.mercadopago.access_token = Some("TEST-access-token".to_string());
        cfg.gateways.mercadopago.webhook_secret = Some(MP_WEBHOOK_SECRET.to_string());
        cfg.gateways.mercadopago.base_url = gateway.uri();
        cfg.webhooks.allow_insecure_urls = true;
        cfg.webhooks.retry_backoff_secs = 0;
        cfg.reconciliation.min_age_secs = 0;
        tweak(&mut cfg);

        let store = Arc::new(InMemoryStore::new());
        let gateways =
            Arc::new(GatewayRegistry::from_config(&cfg).expect("gateway registry for tests"));
        let state = AppState::new(Arc::new(cfg), store.clone(), gateways)
            .expect("application state for tests");

        Self {
            router: app_router(state.clone()),
            state,
            store,
            gateway,
            vendor_id: Uuid::new_v4(),
        }
    }

    /// Send a request against the router with extra headers.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        headers: &[(&str, &str)],
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Posts a raw body, the way gateways deliver webhooks.
    pub async fn post_raw(
        &self,
        uri: &str,
        body: &str,
        headers: &[(&str, String)],
    ) -> axum::response::Response {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header("content-type", "application/json");
        for (name, value) in headers {
            builder = builder.header(*name, value.as_str());
        }
        let request = builder
            .body(Body::from(body.to_string()))
            .expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    pub async fn internal_post(&self, uri: &str, body: Option<Value>) -> axum::response::Response {
        self.request(
            Method::POST,
            uri,
            body,
            &[("x-internal-secret", INTERNAL_SECRET)],
        )
        .await
    }

    pub fn seed_product(&self, price_cents: i64) -> product::Model {
        let model = product::Model {
            id: Uuid::new_v4(),
            vendor_id: self.vendor_id,
            name: "Curso Completo".to_string(),
            price_cents,
            active: true,
            created_at: Utc::now(),
        };
        self.store.insert_product(model.clone());
        model
    }

    pub fn seed_percentage_coupon(
        &self,
        product_id: Uuid,
        percent: i64,
        max_uses: Option<i32>,
    ) -> coupon::Model {
        let model = coupon::Model {
            id: Uuid::new_v4(),
            vendor_id: self.vendor_id,
            code: "PROMO10".to_string(),
            discount_type: DiscountType::Percentage,
            discount_value: percent,
            active: true,
            starts_at: None,
            expires_at: None,
            max_uses,
            max_uses_per_customer: None,
            uses_count: 0,
            apply_to_order_bumps: false,
            created_at: Utc::now(),
        };
        self.store.insert_coupon(model.clone(), &[product_id]);
        model
    }

    pub fn seed_merchant_webhook(&self, url: &str) -> outbound_webhook::Model {
        self.seed_merchant_webhook_for(url, &["purchase_approved"])
    }

    pub fn seed_merchant_webhook_for(&self, url: &str, events: &[&str]) -> outbound_webhook::Model {
        let model = outbound_webhook::Model {
            id: Uuid::new_v4(),
            vendor_id: self.vendor_id,
            name: "ERP".to_string(),
            url: url.to_string(),
            secret: "merchant-secret".to_string(),
            events: json!(events),
            active: true,
            created_at: Utc::now(),
        };
        self.store.insert_webhook(model.clone());
        model
    }

    /// MercadoPago answers payment creation with a pending PIX charge.
    pub async fn mount_pix_creation(&self, payment_id: &str) {
        Mock::given(method("POST"))
            .and(path("/v1/payments"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": payment_id.parse::<i64>().expect("numeric payment id"),
                "status": "pending",
                "point_of_interaction": {
                    "transaction_data": {
                        "qr_code": "00020126pix-copy-paste",
                        "qr_code_base64": "iVBORw0KGgo="
                    }
                }
            })))
            .mount(&self.gateway)
            .await;
    }

    /// MercadoPago reports `status` for the payment.
    pub async fn mount_payment_status(&self, payment_id: &str, status: &str) {
        Mock::given(method("GET"))
            .and(path(format!("/v1/payments/{payment_id}")))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"id": payment_id, "status": status})),
            )
            .mount(&self.gateway)
            .await;
    }
}

pub fn pix_order_body(product_id: Uuid, coupon_id: Option<Uuid>, email: &str) -> Value {
    json!({
        "product_id": product_id,
        "coupon_id": coupon_id,
        "payment_method": "pix",
        "customer_name": "Maria Cliente",
        "customer_email": email,
        "customer_document": "123.456.789-01",
    })
}

pub fn mercadopago_payment_event(payment_id: &str) -> String {
    json!({"type": "payment", "action": "payment.updated", "data": {"id": payment_id}}).to_string()
}

/// Headers MercadoPago sends with a webhook signed at `ts`.
pub fn mercadopago_signature(payment_id: &str, request_id: &str, ts: i64) -> Vec<(&'static str, String)> {
    let manifest = mercadopago::signature_manifest(payment_id, request_id, &ts.to_string());
    let digest = hmac_sha256_hex(MP_WEBHOOK_SECRET.as_bytes(), manifest.as_bytes());
    vec![
        (mercadopago::SIGNATURE_HEADER, format!("ts={},v1={}", ts, digest)),
        (mercadopago::REQUEST_ID_HEADER, request_id.to_string()),
    ]
}

pub async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read response body");
    serde_json::from_slice(&bytes).expect("response body is json")
}
