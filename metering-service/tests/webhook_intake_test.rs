//! Webhook intake tests: signature verification and at-most-once queueing.

mod common;

use common::{subscription_event, unhandled_event, TestApp, WEBHOOK_SECRET};
use metering_service::services::WebhookEventRepository;
use metering_service::MeteringError;
use service_core::utils::signature::signature_header;

#[tokio::test]
async fn signed_event_is_queued() {
    let app = TestApp::spawn().await;
    let body = unhandled_event("evt_queue_1", "invoice.paid");

    let receipt = app
        .services
        .intake
        .intake(&body, Some(&app.sign(&body)))
        .await
        .unwrap();

    assert!(receipt.queued);
    assert!(!receipt.duplicate);
    assert_eq!(receipt.event_id, "evt_queue_1");

    let stored = app.store.get_event("evt_queue_1").await.unwrap().unwrap();
    assert_eq!(stored.event_type, "invoice.paid");
    assert!(!stored.processed);
    assert!(stored.processed_at.is_none());
    assert_eq!(stored.payload["data"]["object"]["amount_paid"], 4200);
}

#[tokio::test]
async fn redelivery_is_not_queued_twice() {
    let app = TestApp::spawn().await;
    let body = unhandled_event("evt_dup", "invoice.paid");
    let signature = app.sign(&body);

    let first = app.services.intake.intake(&body, Some(&signature)).await.unwrap();
    let second = app.services.intake.intake(&body, Some(&signature)).await.unwrap();

    assert!(!first.duplicate);
    assert!(second.duplicate);
    assert!(second.queued);
    assert_eq!(app.services.processor.list_pending(10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn bad_signature_is_unauthorized() {
    let app = TestApp::spawn().await;
    let body = unhandled_event("evt_forged", "invoice.paid");
    let forged = signature_header("whsec_other", app.timestamp(), &body).unwrap();

    let err = app
        .services
        .intake
        .intake(&body, Some(&forged))
        .await
        .unwrap_err();
    assert!(matches!(err, MeteringError::Unauthorized(_)));
    assert!(app.store.get_event("evt_forged").await.unwrap().is_none());

    // Signed body tampered after signing.
    let signature = app.sign(&body);
    let mut tampered = body.clone();
    tampered.extend_from_slice(b" ");
    let err = app
        .services
        .intake
        .intake(&tampered, Some(&signature))
        .await
        .unwrap_err();
    assert!(matches!(err, MeteringError::Unauthorized(_)));
}

#[tokio::test]
async fn stale_signature_is_unauthorized() {
    let app = TestApp::spawn().await;
    let body = unhandled_event("evt_stale", "invoice.paid");
    let stale = signature_header(WEBHOOK_SECRET, app.timestamp() - 3_600, &body).unwrap();

    let err = app
        .services
        .intake
        .intake(&body, Some(&stale))
        .await
        .unwrap_err();
    assert!(matches!(err, MeteringError::Unauthorized(_)));
}

#[tokio::test]
async fn missing_signature_or_body_is_invalid() {
    let app = TestApp::spawn().await;
    let body = unhandled_event("evt_nosig", "invoice.paid");

    let err = app.services.intake.intake(&body, None).await.unwrap_err();
    assert!(matches!(err, MeteringError::Validation(_)));

    let err = app
        .services
        .intake
        .intake(b"", Some("t=1,v1=00"))
        .await
        .unwrap_err();
    assert!(matches!(err, MeteringError::Validation(_)));
}

#[tokio::test]
async fn signed_but_malformed_envelope_is_invalid() {
    let app = TestApp::spawn().await;
    let body = br#"{"type":"invoice.paid","data":{}}"#.to_vec();

    let err = app
        .services
        .intake
        .intake(&body, Some(&app.sign(&body)))
        .await
        .unwrap_err();
    assert!(matches!(err, MeteringError::Validation(_)));
}

#[tokio::test]
async fn webhook_endpoint_status_codes() {
    let app = TestApp::spawn().await;
    let body = subscription_event(
        "evt_http_codes",
        "customer.subscription.updated",
        "sub_unknown",
        "active",
        common::period_start(),
        common::period_end(),
    );

    // No signature header.
    let response = app
        .client
        .post(app.url("/webhooks/billing"))
        .body(body.clone())
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(response.status(), 400);

    // Wrong secret.
    let forged = signature_header("whsec_other", app.timestamp(), &body).unwrap();
    let response = app
        .client
        .post(app.url("/webhooks/billing"))
        .header("Billing-Signature", forged)
        .body(body.clone())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);

    // Valid delivery for a subscription we do not know: queued, not converged.
    let response = app.post_webhook(&body).await;
    assert_eq!(response.status(), 200);
    let ack: serde_json::Value = response.json().await.unwrap();
    assert_eq!(ack["queued"], true);
    assert_eq!(ack["event_id"], "evt_http_codes");
    assert_eq!(ack["converged"], false);
}
