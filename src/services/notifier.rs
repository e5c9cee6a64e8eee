//! Fans order lifecycle events out to live clients, NATS and the notification inbox.
//!
//! Delivery is best-effort: failures are logged and never fail the operation
//! that produced the event.

use std::sync::Arc;
use serde_json::json;
use tracing::{debug, warn};
use crate::domain::aggregates::{NewNotification, Order};
use crate::domain::events::{OrderEvent, OrderEventKind};
use crate::store::OrderStore;
use crate::ws::Hub;

pub const ADMIN_NEW_ORDER: &str = "admin.new_order";
pub const SUBJECT_PREFIX: &str = "storefront.orders";

#[derive(Clone)]
pub struct Notifier {
    hub: Arc<Hub>,
    store: Arc<dyn OrderStore>,
    nats: Option<async_nats::Client>,
}

impl Notifier {
    pub fn new(hub: Arc<Hub>, store: Arc<dyn OrderStore>, nats: Option<async_nats::Client>) -> Self {
        Self { hub, store, nats }
    }

    pub async fn order_event(&self, kind: OrderEventKind, order: &Order) {
        let event = OrderEvent::from_order(kind, order);
        let message_type = kind.message_type();

        if let Some(user_id) = order.user_id {
            let delivered = self.hub.send_to_user(user_id, &event.envelope(&message_type).to_string());
            debug!(order_id = order.id, user_id, delivered, event = %message_type, "order event pushed");

            let notification = NewNotification {
                user_id: Some(user_id),
                kind: message_type.clone(),
                title: kind.title().to_string(),
                message: event.message(),
                data: serde_json::to_value(&event).unwrap_or_default(),
            };
            if let Err(e) = self.store.push_notification(notification).await {
                warn!(order_id = order.id, error = %e, "failed to store notification");
            }
        }

        if kind == OrderEventKind::Created {
            let summary = json!({
                "type": ADMIN_NEW_ORDER,
                "data": {
                    "order_id": order.id,
                    "total_amount": order.total_amount,
                    "currency": order.currency,
                    "occurred_at": event.occurred_at,
                },
            });
            self.hub.broadcast(&summary.to_string());
        }

        if let Some(nats) = &self.nats {
            let subject = format!("{SUBJECT_PREFIX}.{}", kind.suffix());
            match serde_json::to_vec(&event) {
                Ok(body) => {
                    if let Err(e) = nats.publish(subject, body.into()).await {
                        warn!(order_id = order.id, error = %e, "failed to publish order event");
                    }
                }
                Err(e) => warn!(order_id = order.id, error = %e, "failed to encode order event"),
            }
        }
    }

    /// Event for a status the order just moved into, if that status has one.
    pub async fn status_changed(&self, order: &Order) {
        if let Some(kind) = OrderEventKind::for_status(order.status) {
            self.order_event(kind, order).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::order::sample_order;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn test_order_event_reaches_user_and_inbox() {
        let hub = Arc::new(Hub::new(8));
        let store = Arc::new(MemoryStore::new());
        let notifier = Notifier::new(hub.clone(), store.clone(), None);
        let (_id, mut user_rx) = hub.register(Some(5));
        let (_other, mut other_rx) = hub.register(Some(6));

        notifier.order_event(OrderEventKind::Created, &sample_order(10, Some(5))).await;

        let first: serde_json::Value = serde_json::from_str(&user_rx.recv().await.unwrap()).unwrap();
        assert_eq!(first["type"], "order.created");
        let admin: serde_json::Value = serde_json::from_str(&user_rx.recv().await.unwrap()).unwrap();
        assert_eq!(admin["type"], ADMIN_NEW_ORDER);
        let other: serde_json::Value = serde_json::from_str(&other_rx.recv().await.unwrap()).unwrap();
        assert_eq!(other["type"], ADMIN_NEW_ORDER);

        let inbox = store.notifications();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].kind, "order.created");
        assert_eq!(inbox[0].user_id, Some(5));
    }

    #[tokio::test]
    async fn test_guest_order_has_no_inbox_entry() {
        let hub = Arc::new(Hub::new(8));
        let store = Arc::new(MemoryStore::new());
        let notifier = Notifier::new(hub, store.clone(), None);
        notifier.order_event(OrderEventKind::Shipped, &sample_order(11, None)).await;
        assert!(store.notifications().is_empty());
    }
}
