//! Stripe and PayPal clients against mocked provider APIs.

use cuanted_billing::paypal::{PaypalClient, PaypalConfig, TransmissionHeaders};
use cuanted_billing::stripe::{self, CheckoutParams, StripeClient, StripeConfig, StripeEvent};
use cuanted_billing::{BillingError, ProfileTarget};
use cuanted_db_postgres::BindValue;
use serde_json::json;
use wiremock::matchers::{basic_auth, bearer_token, body_json, body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn stripe_client(server: &MockServer) -> StripeClient {
    let config = StripeConfig {
        secret_key: Some("sk_test_123".into()),
        api_base: server.uri(),
        ..Default::default()
    };
    StripeClient::new(reqwest::Client::new(), &config).unwrap()
}

fn paypal_client(server: &MockServer) -> PaypalClient {
    let config = PaypalConfig {
        client_id: Some("client".into()),
        client_secret: Some("secret".into()),
        api_base: server.uri(),
        ..Default::default()
    };
    PaypalClient::new(reqwest::Client::new(), &config).unwrap()
}

async fn mount_paypal_token(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/v1/oauth2/token"))
        .and(basic_auth("client", "secret"))
        .and(body_string_contains("grant_type=client_credentials"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "A21-token",
            "expires_in": 32400
        })))
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn checkout_session_is_form_encoded() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/checkout/sessions"))
        .and(bearer_token("sk_test_123"))
        .and(body_string_contains("mode=subscription"))
        .and(body_string_contains("line_items%5B0%5D%5Bprice%5D=price_m"))
        .and(body_string_contains("subscription_data%5Btrial_period_days%5D=30"))
        .and(body_string_contains("metadata%5Bsupabase_user_id%5D=uid-1"))
        .and(body_string_contains("locale=es"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "cs_test_1",
            "url": "https://checkout.stripe.com/c/pay/cs_test_1"
        })))
        .mount(&server)
        .await;

    let session = stripe_client(&server)
        .create_checkout_session(&CheckoutParams {
            customer_id: "cus_1",
            price_id: "price_m",
            user_id: "uid-1",
            trial_days: 30,
            success_url: "https://app.example/ok",
            cancel_url: "https://app.example/cancel",
        })
        .await
        .unwrap();
    assert_eq!(session.id, "cs_test_1");
    assert!(session.url.unwrap().contains("cs_test_1"));
}

#[tokio::test]
async fn stripe_errors_carry_the_provider_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/billing_portal/sessions"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": {"message": "No such customer: 'cus_missing'", "type": "invalid_request_error"}
        })))
        .mount(&server)
        .await;

    let err = stripe_client(&server)
        .create_portal_session("cus_missing", "https://app.example/dashboard")
        .await
        .unwrap_err();
    match err {
        BillingError::Provider { status, message, .. } => {
            assert_eq!(status, 400);
            assert_eq!(message, "No such customer: 'cus_missing'");
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test]
async fn completed_checkout_upgrades_with_subscription_details() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/subscriptions/sub_1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "sub_1",
            "status": "trialing",
            "customer": "cus_1",
            "trial_end": 1_900_000_000,
            "items": {"data": [{"current_period_end": 1_900_000_000}]},
            "metadata": {"supabase_user_id": "uid-1"}
        })))
        .mount(&server)
        .await;

    let event: StripeEvent = serde_json::from_value(json!({
        "id": "evt_1",
        "type": "checkout.session.completed",
        "data": {"object": {
            "id": "cs_1",
            "customer": "cus_1",
            "subscription": "sub_1",
            "metadata": {"supabase_user_id": "uid-1"}
        }}
    }))
    .unwrap();

    let rec = stripe::reconcile(&event, &stripe_client(&server))
        .await
        .unwrap()
        .unwrap();
    let set = rec.change.as_update_set();
    assert_eq!(rec.target, ProfileTarget::Id("uid-1".into()));
    assert_eq!(set.get("plan"), Some(&BindValue::Text(Some("pro".into()))));
    assert_eq!(
        set.get("stripe_customer_id"),
        Some(&BindValue::Text(Some("cus_1".into())))
    );
    assert_eq!(
        set.get("stripe_subscription_status"),
        Some(&BindValue::Text(Some("trialing".into())))
    );
}

#[tokio::test]
async fn failed_invoice_marks_past_due() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/subscriptions/sub_2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "sub_2",
            "status": "past_due",
            "customer": "cus_2"
        })))
        .mount(&server)
        .await;

    let event: StripeEvent = serde_json::from_value(json!({
        "id": "evt_2",
        "type": "invoice.payment_failed",
        "data": {"object": {"id": "in_1", "subscription": "sub_2"}}
    }))
    .unwrap();

    let rec = stripe::reconcile(&event, &stripe_client(&server))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(rec.target, ProfileTarget::StripeCustomer("cus_2".into()));
    assert_eq!(
        rec.change.as_update_set().get("stripe_subscription_status"),
        Some(&BindValue::Text(Some("past_due".into())))
    );
    assert_eq!(rec.change.as_update_set().get("plan"), None);
}

#[tokio::test]
async fn paypal_token_is_reused_across_calls() {
    let server = MockServer::start().await;
    mount_paypal_token(&server).await;
    Mock::given(method("GET"))
        .and(path("/v1/billing/subscriptions/I-SUB"))
        .and(bearer_token("A21-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "I-SUB",
            "status": "ACTIVE",
            "subscriber": {"payer_id": "PAYER"}
        })))
        .expect(2)
        .mount(&server)
        .await;

    let client = paypal_client(&server);
    let first = client.get_subscription("I-SUB").await.unwrap();
    let second = client.get_subscription("I-SUB").await.unwrap();
    assert_eq!(first.payer_id(), Some("PAYER"));
    assert_eq!(second.status, "ACTIVE");
}

#[tokio::test]
async fn paypal_cancel_accepts_no_content() {
    let server = MockServer::start().await;
    mount_paypal_token(&server).await;
    Mock::given(method("POST"))
        .and(path("/v1/billing/subscriptions/I-SUB/cancel"))
        .and(body_json(json!({"reason": "Too expensive"})))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    paypal_client(&server)
        .cancel_subscription("I-SUB", "Too expensive")
        .await
        .unwrap();
}

#[tokio::test]
async fn paypal_webhook_verification_reports_status() {
    let server = MockServer::start().await;
    mount_paypal_token(&server).await;
    Mock::given(method("POST"))
        .and(path("/v1/notifications/verify-webhook-signature"))
        .and(body_string_contains("\"webhook_id\":\"WH-ID\""))
        .and(body_string_contains("\"transmission_id\":\"tx-1\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "verification_status": "FAILURE"
        })))
        .mount(&server)
        .await;

    let headers = TransmissionHeaders {
        transmission_id: "tx-1".into(),
        ..Default::default()
    };
    let verified = paypal_client(&server)
        .verify_webhook_signature("WH-ID", &headers, &json!({"event_type": "X"}))
        .await
        .unwrap();
    assert!(!verified);
}
