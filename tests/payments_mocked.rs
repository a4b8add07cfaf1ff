/// Payment capture tests with the PayPal API mocked by wiremock.
use prospect_engine::config::Config;
use prospect_engine::errors::AppError;
use prospect_engine::models::NewPayment;
use prospect_engine::payments::{capture_order, create_checkout, CaptureStatus};
use prospect_engine::paypal::PayPalClient;
use prospect_engine::store::{MemoryStore, Store};
use uuid::Uuid;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ORDER_TOKEN: &str = "5O190127TN364715T";

async fn mount_token(mock_server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/v1/oauth2/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "A21AAtest",
            "token_type": "Bearer",
            "expires_in": 32400
        })))
        .mount(mock_server)
        .await;
}

async fn mount_capture(mock_server: &MockServer, status: u16, body: serde_json::Value) {
    Mock::given(method("POST"))
        .and(path(format!("/v2/checkout/orders/{}/capture", ORDER_TOKEN)))
        .and(header("authorization", "Bearer A21AAtest"))
        .respond_with(ResponseTemplate::new(status).set_body_json(body))
        .mount(mock_server)
        .await;
}

fn completed_for(user_id: &str, pack_id: &str) -> serde_json::Value {
    let custom_id = serde_json::json!({ "packId": pack_id, "userId": user_id }).to_string();
    serde_json::json!({
        "id": ORDER_TOKEN,
        "status": "COMPLETED",
        "purchase_units": [{
            "reference_id": "ref",
            "payments": { "captures": [{ "id": "CAP1", "status": "COMPLETED", "custom_id": custom_id }] }
        }]
    })
}

fn already_captured() -> serde_json::Value {
    serde_json::json!({
        "name": "UNPROCESSABLE_ENTITY",
        "message": "The requested action could not be performed.",
        "details": [{ "issue": "ORDER_ALREADY_CAPTURED", "description": "Order already captured." }]
    })
}

async fn setup() -> (MockServer, PayPalClient, MemoryStore, Uuid) {
    let mock_server = MockServer::start().await;
    mount_token(&mock_server).await;
    let paypal = PayPalClient::new(&Config::for_base_url(&mock_server.uri()));

    let store = MemoryStore::new();
    let user = store
        .create_user("buyer@example.com", 20, "buyer-key")
        .await
        .unwrap();

    (mock_server, paypal, store, user.id)
}

async fn credits_total(store: &MemoryStore, user_id: Uuid) -> i32 {
    store.get_user(user_id).await.unwrap().unwrap().credits_total
}

#[tokio::test]
async fn test_replayed_capture_credits_once() {
    let (mock_server, paypal, store, user_id) = setup().await;
    mount_capture(&mock_server, 201, completed_for(&user_id.to_string(), "pack_50")).await;

    let first = capture_order(&store, &paypal, ORDER_TOKEN, user_id)
        .await
        .unwrap();
    assert_eq!(first.status, CaptureStatus::Captured);
    assert_eq!(first.added_credits(), 50);
    assert_eq!(first.credits_total, 70);
    assert_eq!(first.pack_label, "Starter Pack");

    let second = capture_order(&store, &paypal, ORDER_TOKEN, user_id)
        .await
        .unwrap();
    assert_eq!(second.status, CaptureStatus::AlreadyProcessed);
    assert_eq!(second.added_credits(), 0);
    assert_eq!(second.pack_label, "Starter Pack");
    assert_eq!(second.credits_total, 70);

    assert_eq!(credits_total(&store, user_id).await, 70);
    assert_eq!(store.payment_count(), 1);
}

#[tokio::test]
async fn test_concurrent_captures_of_one_token_credit_once() {
    let (mock_server, paypal, store, user_id) = setup().await;
    mount_capture(&mock_server, 201, completed_for(&user_id.to_string(), "pack_150")).await;

    let (a, b) = tokio::join!(
        capture_order(&store, &paypal, ORDER_TOKEN, user_id),
        capture_order(&store, &paypal, ORDER_TOKEN, user_id),
    );
    let statuses = [a.unwrap().status, b.unwrap().status];

    assert!(statuses.contains(&CaptureStatus::Captured));
    assert!(statuses.contains(&CaptureStatus::AlreadyProcessed));
    assert_eq!(credits_total(&store, user_id).await, 170);
    assert_eq!(store.payment_count(), 1);
}

#[tokio::test]
async fn test_foreign_order_is_rejected_without_credit() {
    let (mock_server, paypal, store, user_id) = setup().await;
    mount_capture(
        &mock_server,
        201,
        completed_for(&Uuid::new_v4().to_string(), "pack_500"),
    )
    .await;

    let err = capture_order(&store, &paypal, ORDER_TOKEN, user_id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::SecurityViolation(_)));
    assert_eq!(credits_total(&store, user_id).await, 20);
    assert_eq!(store.payment_count(), 0);
}

#[tokio::test]
async fn test_unparseable_metadata_does_not_credit() {
    let (mock_server, paypal, store, user_id) = setup().await;
    mount_capture(
        &mock_server,
        201,
        serde_json::json!({
            "status": "COMPLETED",
            "purchase_units": [{ "custom_id": "not-json" }]
        }),
    )
    .await;

    let err = capture_order(&store, &paypal, ORDER_TOKEN, user_id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::SecurityViolation(_)));
    assert_eq!(store.payment_count(), 0);
}

#[tokio::test]
async fn test_unknown_pack_is_rejected() {
    let (mock_server, paypal, store, user_id) = setup().await;
    mount_capture(&mock_server, 201, completed_for(&user_id.to_string(), "pack_9000")).await;

    let err = capture_order(&store, &paypal, ORDER_TOKEN, user_id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));
    assert_eq!(err.user_message(), "Invalid credit pack detected in order.");
    assert_eq!(credits_total(&store, user_id).await, 20);
}

#[tokio::test]
async fn test_already_captured_with_local_record_replays() {
    let (mock_server, paypal, store, user_id) = setup().await;
    mount_capture(&mock_server, 422, already_captured()).await;

    store
        .record_payment_and_credit(&NewPayment {
            order_token: ORDER_TOKEN.into(),
            user_id,
            pack_id: "pack_150".into(),
            credits_added: 150,
        })
        .await
        .unwrap();

    let result = capture_order(&store, &paypal, ORDER_TOKEN, user_id)
        .await
        .unwrap();
    assert_eq!(result.status, CaptureStatus::AlreadyProcessed);
    assert_eq!(result.pack_label, "Growth Pack");
    assert_eq!(result.pack_credits, 150);
    assert_eq!(result.credits_total, 170);
    assert_eq!(credits_total(&store, user_id).await, 170);
}

#[tokio::test]
async fn test_already_captured_without_record_needs_reconciliation() {
    let (mock_server, paypal, store, user_id) = setup().await;
    mount_capture(&mock_server, 422, already_captured()).await;

    let err = capture_order(&store, &paypal, ORDER_TOKEN, user_id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ReconciliationRequired(_)));
    assert_eq!(credits_total(&store, user_id).await, 20);
}

#[tokio::test]
async fn test_already_captured_for_someone_else_is_rejected() {
    let (mock_server, paypal, store, user_id) = setup().await;
    mount_capture(&mock_server, 422, already_captured()).await;

    let owner = store
        .create_user("owner@example.com", 20, "owner-key")
        .await
        .unwrap();
    store
        .record_payment_and_credit(&NewPayment {
            order_token: ORDER_TOKEN.into(),
            user_id: owner.id,
            pack_id: "pack_50".into(),
            credits_added: 50,
        })
        .await
        .unwrap();

    let err = capture_order(&store, &paypal, ORDER_TOKEN, user_id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::SecurityViolation(_)));
    assert_eq!(credits_total(&store, user_id).await, 20);
}

#[tokio::test]
async fn test_declined_instrument() {
    let (mock_server, paypal, store, user_id) = setup().await;
    mount_capture(
        &mock_server,
        422,
        serde_json::json!({
            "name": "UNPROCESSABLE_ENTITY",
            "details": [{ "issue": "INSTRUMENT_DECLINED", "description": "The instrument presented was declined." }]
        }),
    )
    .await;

    let err = capture_order(&store, &paypal, ORDER_TOKEN, user_id)
        .await
        .unwrap_err();
    assert_eq!(err.user_message(), "Payment instrument was declined.");
    assert_eq!(store.payment_count(), 0);
}

#[tokio::test]
async fn test_pending_capture_surfaces_processor_message() {
    let (mock_server, paypal, store, user_id) = setup().await;
    mount_capture(
        &mock_server,
        200,
        serde_json::json!({ "status": "PENDING" }),
    )
    .await;

    let err = capture_order(&store, &paypal, ORDER_TOKEN, user_id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ExternalApiError(_)));
    assert_eq!(err.user_message(), "Payment not completed or pending.");
}

#[tokio::test]
async fn test_checkout_returns_approval_link_and_reuses_token() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/oauth2/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "A21AAtest"
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/v2/checkout/orders"))
        .and(header("authorization", "Bearer A21AAtest"))
        .and(body_partial_json(serde_json::json!({
            "intent": "CAPTURE",
            "purchase_units": [{ "amount": { "currency_code": "USD", "value": "49.00" } }]
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
            "id": ORDER_TOKEN,
            "status": "PAYER_ACTION_REQUIRED",
            "links": [
                { "href": "https://api.sandbox.paypal.com/v2/checkout/orders/x", "rel": "self" },
                { "href": "https://www.sandbox.paypal.com/checkoutnow?token=x", "rel": "payer-action" }
            ]
        })))
        .expect(2)
        .mount(&mock_server)
        .await;

    let paypal = PayPalClient::new(&Config::for_base_url(&mock_server.uri()));
    let user_id = Uuid::new_v4();

    for _ in 0..2 {
        let checkout = create_checkout(&paypal, "http://localhost:3000/", user_id, Some("pack_500"))
            .await
            .unwrap();
        assert_eq!(
            checkout.checkout_url,
            "https://www.sandbox.paypal.com/checkoutnow?token=x"
        );
    }
}

#[tokio::test]
async fn test_checkout_rejects_unknown_pack_before_calling_paypal() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&mock_server)
        .await;

    let paypal = PayPalClient::new(&Config::for_base_url(&mock_server.uri()));
    let err = create_checkout(&paypal, "http://localhost:3000", Uuid::new_v4(), Some("pack_1"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));
}

#[tokio::test]
async fn test_malformed_token_never_reaches_paypal() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/reporting/transactions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
        .expect(0)
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "A21AAtest"
        })))
        .expect(0)
        .mount(&mock_server)
        .await;

    let paypal = PayPalClient::new(&Config::for_base_url(&mock_server.uri()));
    let store = MemoryStore::new();
    let user = store
        .create_user("buyer@example.com", 20, "buyer-key")
        .await
        .unwrap();

    for token in ["../../../v1/reporting/transactions?", "ABC/../../x", "abc def"] {
        let err = capture_order(&store, &paypal, token, user.id)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }
    assert_eq!(credits_total(&store, user.id).await, 20);
}
