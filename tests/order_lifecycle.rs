mod common;

use std::sync::atomic::Ordering;
use rust_decimal::Decimal;
use serde_json::json;
use common::*;
use storefront::domain::value_objects::{CancellationStep, OrderStatus, PaymentStatus, TransactionStatus};
use storefront::error::AppError;
use storefront::services::orders::{Caller, CreateOrderRequest, VerifyPaymentRequest};
use storefront::services::payment;
use storefront::store::OrderStore;

const CUSTOMER: i64 = 11;

fn request(lines: &[(i64, u32)]) -> CreateOrderRequest {
    serde_json::from_value(order_request(lines)).unwrap()
}

/// Places an order for `CUSTOMER`, opens a checkout and confirms it.
async fn paid_order(h: &Harness, lines: &[(i64, u32)]) -> i64 {
    let placed = h.state.orders.create(Some(CUSTOMER), request(lines)).await.unwrap();
    let id = placed.order.id;
    let checkout = h.state.orders.create_payment_for_order(id, Caller::user(CUSTOMER), json!({})).await.unwrap();
    let gateway_order_id = checkout["order"]["id"].as_str().unwrap().to_string();
    h.state.orders.verify_payment(Caller::user(CUSTOMER), VerifyPaymentRequest {
        order_id: id,
        razorpay_signature: payment_signature(&gateway_order_id, "pay_1"),
        razorpay_order_id: gateway_order_id,
        razorpay_payment_id: "pay_1".into(),
    }).await.unwrap();
    id
}

#[tokio::test]
async fn test_order_reserves_stock_all_or_nothing() {
    let h = harness();
    h.store.insert_product(product(1, 500, 5));
    h.store.insert_product(product(2, 800, 1));

    let err = h.state.orders.create(Some(CUSTOMER), request(&[(1, 2), (2, 2)])).await.unwrap_err();
    assert!(matches!(err, AppError::InsufficientStock { product_id: 2, available: 1, requested: 2, .. }));
    assert_eq!(h.store.product(1).unwrap().stock, 5);
    assert_eq!(h.store.product(2).unwrap().stock, 1);

    let placed = h.state.orders.create(Some(CUSTOMER), request(&[(1, 2), (2, 1)])).await.unwrap();
    assert_eq!(placed.items.len(), 2);
    assert_eq!(placed.order.total_amount, Decimal::new(1800, 0));
    assert_eq!(placed.order.status, OrderStatus::PendingPayment);
    assert_eq!(h.store.product(1).unwrap().stock, 3);
    assert_eq!(h.store.product(2).unwrap().stock, 0);
}

#[tokio::test]
async fn test_unknown_product_is_rejected() {
    let h = harness();
    let err = h.state.orders.create(None, request(&[(42, 1)])).await.unwrap_err();
    assert_eq!(err.to_string(), "Product 42 not found");
}

#[tokio::test]
async fn test_percentage_coupon_is_capped() {
    let h = harness();
    h.store.insert_product(product(1, 1000, 10));
    h.store.insert_coupon(percentage_coupon("SAVE10", 10, 50));

    let mut req = request(&[(1, 1)]);
    req.coupon_code = Some(" save10 ".into());
    req.shipping_cost = Some(Decimal::new(150, 0));
    let placed = h.state.orders.create(Some(CUSTOMER), req).await.unwrap();

    assert_eq!(placed.order.discount_amount, Decimal::new(50, 0));
    assert_eq!(placed.order.total_amount, Decimal::new(1100, 0));
    assert_eq!(placed.order.coupon_code.as_deref(), Some("SAVE10"));
    assert_eq!(h.store.coupon("SAVE10").unwrap().used_count, 1);
}

#[tokio::test]
async fn test_claimed_total_must_match() {
    let h = harness();
    h.store.insert_product(product(1, 1000, 10));
    let mut req = request(&[(1, 1)]);
    req.total_amount = Some(Decimal::new(10, 0));
    let err = h.state.orders.create(Some(CUSTOMER), req).await.unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
    assert_eq!(h.store.product(1).unwrap().stock, 10);
}

#[tokio::test]
async fn test_bad_signature_changes_nothing() {
    let h = harness();
    h.store.insert_product(product(1, 500, 5));
    let placed = h.state.orders.create(Some(CUSTOMER), request(&[(1, 1)])).await.unwrap();
    let id = placed.order.id;
    h.state.orders.create_payment_for_order(id, Caller::user(CUSTOMER), json!({})).await.unwrap();

    let err = h.state.orders.verify_payment(Caller::user(CUSTOMER), VerifyPaymentRequest {
        order_id: id,
        razorpay_order_id: "order_test_1".into(),
        razorpay_payment_id: "pay_1".into(),
        razorpay_signature: payment::sign("wrong_secret", b"order_test_1|pay_1"),
    }).await.unwrap_err();
    assert_eq!(err.to_string(), "Invalid payment signature");

    let order = h.store.order(id).await.unwrap().order;
    assert_eq!(order.status, OrderStatus::PendingPayment);
    assert_eq!(order.payment_status, PaymentStatus::Pending);
    assert!(order.gateway.razorpay_payment_id.is_none());
    assert!(h.store.transactions(id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_signature_for_another_checkout_is_refused() {
    let h = harness();
    h.store.insert_product(product(1, 500, 5));
    let placed = h.state.orders.create(Some(CUSTOMER), request(&[(1, 1)])).await.unwrap();
    let id = placed.order.id;
    h.state.orders.create_payment_for_order(id, Caller::user(CUSTOMER), json!({})).await.unwrap();

    let err = h.state.orders.verify_payment(Caller::user(CUSTOMER), VerifyPaymentRequest {
        order_id: id,
        razorpay_order_id: "order_other".into(),
        razorpay_payment_id: "pay_1".into(),
        razorpay_signature: payment_signature("order_other", "pay_1"),
    }).await.unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
    assert_eq!(h.store.order(id).await.unwrap().order.payment_status, PaymentStatus::Pending);
}

#[tokio::test]
async fn test_verified_payment_is_recorded_once() {
    let h = harness();
    h.store.insert_product(product(1, 500, 5));
    let id = paid_order(&h, &[(1, 1)]).await;

    let order = h.store.order(id).await.unwrap().order;
    assert_eq!(order.status, OrderStatus::Paid);
    assert_eq!(order.payment_status, PaymentStatus::Paid);
    assert_eq!(order.gateway.razorpay_payment_id.as_deref(), Some("pay_1"));

    h.state.orders.verify_payment(Caller::user(CUSTOMER), VerifyPaymentRequest {
        order_id: id,
        razorpay_order_id: "order_test_1".into(),
        razorpay_payment_id: "pay_1".into(),
        razorpay_signature: payment_signature("order_test_1", "pay_1"),
    }).await.unwrap();
    let txns = h.store.transactions(id).await.unwrap();
    assert_eq!(txns.len(), 1);
    assert_eq!(txns[0].status, TransactionStatus::Success);
}

#[tokio::test]
async fn test_other_users_cannot_touch_an_order() {
    let h = harness();
    h.store.insert_product(product(1, 500, 5));
    let placed = h.state.orders.create(Some(CUSTOMER), request(&[(1, 1)])).await.unwrap();
    let err = h.state.orders.cancel(placed.order.id, Caller::user(99)).await.unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));
    assert!(h.state.orders.get(placed.order.id, Caller::admin(1)).await.is_ok());
    assert_eq!(h.store.product(1).unwrap().stock, 4);
}

#[tokio::test]
async fn test_cancel_refunds_and_restores_stock_once() {
    let h = harness();
    h.store.insert_product(product(1, 500, 5));
    let id = paid_order(&h, &[(1, 2)]).await;
    assert_eq!(h.store.product(1).unwrap().stock, 3);

    let order = h.state.orders.cancel(id, Caller::user(CUSTOMER)).await.unwrap();
    assert_eq!(order.status, OrderStatus::Cancelled);
    assert_eq!(order.payment_status, PaymentStatus::Refunded);
    assert_eq!(order.cancellation_step, Some(CancellationStep::Completed));
    assert_eq!(h.store.product(1).unwrap().stock, 5);
    assert_eq!(h.gateway.refunds.lock().as_slice(), ["pay_1".to_string()]);

    let again = h.state.orders.cancel(id, Caller::user(CUSTOMER)).await.unwrap();
    assert_eq!(again.status, OrderStatus::Cancelled);
    assert_eq!(h.store.product(1).unwrap().stock, 5);
    assert_eq!(h.gateway.refunds.lock().len(), 1);
}

#[tokio::test]
async fn test_unpaid_cancel_skips_refund() {
    let h = harness();
    h.store.insert_product(product(1, 500, 5));
    let placed = h.state.orders.create(Some(CUSTOMER), request(&[(1, 1)])).await.unwrap();
    let order = h.state.orders.cancel(placed.order.id, Caller::user(CUSTOMER)).await.unwrap();
    assert_eq!(order.status, OrderStatus::Cancelled);
    assert!(h.gateway.refunds.lock().is_empty());
    assert_eq!(h.store.product(1).unwrap().stock, 5);
}

#[tokio::test]
async fn test_shipped_order_cannot_be_cancelled() {
    let h = harness();
    h.store.insert_product(product(1, 500, 5));
    let id = paid_order(&h, &[(1, 1)]).await;
    h.state.orders.update_status(id, "shipped", Caller::admin(1)).await.unwrap();

    let err = h.state.orders.cancel(id, Caller::user(CUSTOMER)).await.unwrap_err();
    assert_eq!(err.to_string(), "Cannot cancel shipped or delivered order");
    assert_eq!(h.store.product(1).unwrap().stock, 4);
}

#[tokio::test]
async fn test_admin_cancel_status_goes_through_cancellation() {
    let h = harness();
    h.store.insert_product(product(1, 500, 5));
    let id = paid_order(&h, &[(1, 3)]).await;
    let order = h.state.orders.update_status(id, "cancelled", Caller::admin(1)).await.unwrap();
    assert_eq!(order.status, OrderStatus::Cancelled);
    assert_eq!(h.store.product(1).unwrap().stock, 5);

    let err = h.state.orders.update_status(id, "bogus", Caller::admin(1)).await.unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
}

#[tokio::test]
async fn test_label_generation_resumes_after_awb_failure() {
    let h = harness();
    h.store.insert_product(product(1, 500, 5));
    let id = paid_order(&h, &[(1, 1)]).await;

    h.carrier.fail_next_awb.store(true, Ordering::SeqCst);
    assert!(h.state.orders.generate_label(id, 3).await.is_err());
    assert_eq!(h.carrier.shipments_created.load(Ordering::SeqCst), 1);

    let label = h.state.orders.generate_label(id, 3).await.unwrap();
    assert_eq!(h.carrier.shipments_created.load(Ordering::SeqCst), 1);
    assert_eq!(label.shipment_id, 9001);
    assert_eq!(label.awb_number, "AWB9001");
    assert_eq!(label.order_status, OrderStatus::Processing);

    let err = h.state.orders.generate_label(id, 3).await.unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
}

#[tokio::test]
async fn test_label_requires_payment() {
    let h = harness();
    h.store.insert_product(product(1, 500, 5));
    let placed = h.state.orders.create(Some(CUSTOMER), request(&[(1, 1)])).await.unwrap();
    assert!(h.state.orders.generate_label(placed.order.id, 3).await.is_err());
    assert_eq!(h.carrier.shipments_created.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_cancel_releases_carrier_shipment() {
    let h = harness();
    h.store.insert_product(product(1, 500, 5));
    let id = paid_order(&h, &[(1, 1)]).await;
    h.carrier.fail_next_awb.store(true, Ordering::SeqCst);
    let _ = h.state.orders.generate_label(id, 3).await;

    h.state.orders.cancel(id, Caller::admin(1)).await.unwrap();
    assert_eq!(h.carrier.cancelled.lock().as_slice(), [7001]);
}

/// Checkout for `CUSTOMER` without confirming it; returns (order id, gateway order id).
async fn open_checkout(h: &Harness, lines: &[(i64, u32)]) -> (i64, String) {
    let placed = h.state.orders.create(Some(CUSTOMER), request(lines)).await.unwrap();
    let id = placed.order.id;
    let checkout = h.state.orders.create_payment_for_order(id, Caller::user(CUSTOMER), json!({})).await.unwrap();
    (id, checkout["order"]["id"].as_str().unwrap().to_string())
}

#[tokio::test]
async fn test_payment_verified_mid_cancellation_is_refunded() {
    let h = harness();
    h.store.insert_product(product(1, 500, 5));
    let (id, gateway_order_id) = open_checkout(&h, &[(1, 1)]).await;
    h.store.begin_cancellation(id).await.unwrap();
    h.store.advance_cancellation(id, CancellationStep::ShipmentReleased).await.unwrap();

    h.state.orders.verify_payment(Caller::user(CUSTOMER), VerifyPaymentRequest {
        order_id: id,
        razorpay_signature: payment_signature(&gateway_order_id, "pay_late"),
        razorpay_order_id: gateway_order_id,
        razorpay_payment_id: "pay_late".into(),
    }).await.unwrap();
    let err = h.store.complete_cancellation(id).await.unwrap_err();
    assert!(matches!(AppError::from(err), AppError::Conflict(_)));

    let order = h.state.orders.cancel(id, Caller::user(CUSTOMER)).await.unwrap();
    assert_eq!(order.status, OrderStatus::Cancelled);
    assert_eq!(order.payment_status, PaymentStatus::Refunded);
    assert_eq!(h.gateway.refunds.lock().as_slice(), ["pay_late".to_string()]);
    assert_eq!(h.store.product(1).unwrap().stock, 5);
}

#[tokio::test]
async fn test_webhook_capture_mid_cancellation_is_refunded() {
    let h = harness();
    h.store.insert_product(product(1, 500, 5));
    let (id, gateway_order_id) = open_checkout(&h, &[(1, 2)]).await;
    h.store.begin_cancellation(id).await.unwrap();
    h.store.advance_cancellation(id, CancellationStep::ShipmentReleased).await.unwrap();

    let (body, sig) = signed_webhook("payment.captured", &gateway_order_id);
    h.state.orders.handle_payment_webhook(&body, Some(&sig)).await.unwrap();

    let order = h.state.orders.cancel(id, Caller::admin(1)).await.unwrap();
    assert_eq!((order.status, order.payment_status), (OrderStatus::Cancelled, PaymentStatus::Refunded));
    assert_eq!(h.gateway.refunds.lock().as_slice(), ["pay_w".to_string()]);
}

#[tokio::test]
async fn test_failed_refund_keeps_cancellation_open_until_retried() {
    let h = harness();
    h.store.insert_product(product(1, 500, 5));
    let id = paid_order(&h, &[(1, 1)]).await;

    h.gateway.fail_next_refund.store(true, Ordering::SeqCst);
    assert!(h.state.orders.cancel(id, Caller::user(CUSTOMER)).await.is_err());
    let order = h.store.order(id).await.unwrap().order;
    assert_eq!(order.cancellation_step, Some(CancellationStep::Requested));
    assert_eq!(order.payment_status, PaymentStatus::Paid);
    assert_eq!(h.store.product(1).unwrap().stock, 4);
    let err = h.state.orders.generate_label(id, 3).await.unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    let order = h.state.orders.cancel(id, Caller::user(CUSTOMER)).await.unwrap();
    assert_eq!((order.status, order.payment_status), (OrderStatus::Cancelled, PaymentStatus::Refunded));
    assert_eq!(h.gateway.refunds.lock().as_slice(), ["pay_1".to_string()]);
    assert_eq!(h.store.product(1).unwrap().stock, 5);
}

#[tokio::test]
async fn test_line_options_are_length_checked() {
    let h = harness();
    h.store.insert_product(product(1, 500, 5));
    let mut body = order_request(&[(1, 1)]);
    body["items"][0]["color"] = json!("x".repeat(51));
    let req: CreateOrderRequest = serde_json::from_value(body).unwrap();
    let err = h.state.orders.create(Some(CUSTOMER), req).await.unwrap_err();
    assert!(matches!(&err, AppError::Validation(msg) if msg.contains("items[0].color")), "{err}");
    assert_eq!(h.store.product(1).unwrap().stock, 5);
}

fn signed_webhook(event: &str, gateway_order_id: &str) -> (Vec<u8>, String) {
    let body = serde_json::to_vec(&json!({
        "event": event,
        "payload": { "payment": { "entity": { "id": "pay_w", "order_id": gateway_order_id } } },
    })).unwrap();
    let signature = payment::sign(WEBHOOK_SECRET, &body);
    (body, signature)
}

#[tokio::test]
async fn test_payment_webhooks() {
    let h = harness();
    h.store.insert_product(product(1, 500, 5));
    let captured = h.state.orders.create(None, request(&[(1, 1)])).await.unwrap().order.id;
    let failed = h.state.orders.create(None, request(&[(1, 1)])).await.unwrap().order.id;
    h.state.orders.create_payment_for_order(captured, Caller::guest(), json!({})).await.unwrap();
    h.state.orders.create_payment_for_order(failed, Caller::guest(), json!({})).await.unwrap();

    let (body, sig) = signed_webhook("payment.captured", "order_test_1");
    let ack = h.state.orders.handle_payment_webhook(&body, Some(&sig)).await.unwrap();
    assert_eq!(ack.status, "received");
    assert_eq!(h.store.order(captured).await.unwrap().order.status, OrderStatus::Paid);

    let (body, sig) = signed_webhook("payment.failed", "order_test_2");
    h.state.orders.handle_payment_webhook(&body, Some(&sig)).await.unwrap();
    let order = h.store.order(failed).await.unwrap().order;
    assert_eq!(order.status, OrderStatus::PaymentFailed);
    assert_eq!(order.payment_status, PaymentStatus::Failed);

    let (body, sig) = signed_webhook("payment.failed", "order_test_1");
    h.state.orders.handle_payment_webhook(&body, Some(&sig)).await.unwrap();
    assert_eq!(h.store.order(captured).await.unwrap().order.status, OrderStatus::Paid);
}

#[tokio::test]
async fn test_payment_webhook_rejects_and_ignores() {
    let h = harness();
    let (body, _) = signed_webhook("payment.captured", "order_test_1");
    let err = h.state.orders.handle_payment_webhook(&body, Some("deadbeef")).await.unwrap_err();
    assert_eq!(err.to_string(), "Invalid webhook signature");
    assert!(h.state.orders.handle_payment_webhook(&body, None).await.is_err());

    let (body, sig) = signed_webhook("refund.created", "order_test_1");
    assert_eq!(h.state.orders.handle_payment_webhook(&body, Some(&sig)).await.unwrap().status, "received");
    let (body, sig) = signed_webhook("payment.captured", "order_unknown");
    assert_eq!(h.state.orders.handle_payment_webhook(&body, Some(&sig)).await.unwrap().status, "received");
}

#[tokio::test]
async fn test_shipping_webhook_moves_order_forward() {
    let h = harness();
    h.store.insert_product(product(1, 500, 5));
    let id = paid_order(&h, &[(1, 1)]).await;
    h.state.orders.generate_label(id, 3).await.unwrap();

    let body = serde_json::to_vec(&json!({ "awb": "AWB9001", "current_status": "IN TRANSIT" })).unwrap();
    let sig = payment::sign(SHIPPING_WEBHOOK_SECRET, &body);
    h.state.orders.handle_shipping_webhook(&body, Some(&sig)).await.unwrap();
    let order = h.store.order(id).await.unwrap().order;
    assert_eq!(order.status, OrderStatus::Shipped);
    assert!(order.shipped_at.is_some());

    let body = serde_json::to_vec(&json!({ "awb": "AWB9001", "current_status": "DELIVERED" })).unwrap();
    let sig = payment::sign(SHIPPING_WEBHOOK_SECRET, &body);
    h.state.orders.handle_shipping_webhook(&body, Some(&sig)).await.unwrap();
    let order = h.store.order(id).await.unwrap().order;
    assert_eq!(order.status, OrderStatus::Delivered);
    assert!(order.delivered_at.is_some());

    let err = h.state.orders.handle_shipping_webhook(&body, Some("00")).await.unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
}

#[tokio::test]
async fn test_order_events_become_notifications() {
    let h = harness();
    h.store.insert_product(product(1, 500, 5));
    paid_order(&h, &[(1, 1)]).await;
    let kinds: Vec<String> = h.store.notifications().into_iter()
        .filter(|n| n.user_id == Some(CUSTOMER))
        .map(|n| n.kind)
        .collect();
    assert!(kinds.iter().any(|k| k == "order.created"));
    assert!(kinds.iter().any(|k| k == "order.paid"));
}
