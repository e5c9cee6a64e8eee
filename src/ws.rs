//! Live updates over WebSocket.
//!
//! The hub keeps one bounded outbound queue per connection. Senders never
//! wait: a connection whose queue is full or closed is dropped from the
//! registry and its socket is closed by its own task.

use std::collections::HashMap;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};
use uuid::Uuid;
use crate::http::extract::AppQuery;
use crate::state::AppState;

struct Client {
    user_id: Option<i64>,
    tx: mpsc::Sender<String>,
}

pub struct Hub {
    clients: RwLock<HashMap<Uuid, Client>>,
    buffer: usize,
}

impl Hub {
    pub fn new(buffer: usize) -> Self {
        Self { clients: RwLock::new(HashMap::new()), buffer: buffer.max(1) }
    }

    pub fn register(&self, user_id: Option<i64>) -> (Uuid, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(self.buffer);
        let id = Uuid::new_v4();
        self.clients.write().insert(id, Client { user_id, tx });
        info!(client_id = %id, ?user_id, "websocket client connected");
        (id, rx)
    }

    pub fn unregister(&self, id: Uuid) {
        if self.clients.write().remove(&id).is_some() {
            info!(client_id = %id, "websocket client disconnected");
        }
    }

    pub fn authenticate(&self, id: Uuid, user_id: i64) {
        if let Some(client) = self.clients.write().get_mut(&id) {
            client.user_id = Some(user_id);
            debug!(client_id = %id, user_id, "websocket client authenticated");
        }
    }

    pub fn client_count(&self) -> usize { self.clients.read().len() }

    /// Returns how many clients accepted the message.
    pub fn broadcast(&self, message: &str) -> usize { self.deliver(message, |_| true) }

    /// Returns how many of the user's clients accepted the message; zero when none are connected.
    pub fn send_to_user(&self, user_id: i64, message: &str) -> usize {
        self.deliver(message, |c| c.user_id == Some(user_id))
    }

    fn deliver(&self, message: &str, wanted: impl Fn(&Client) -> bool) -> usize {
        let mut delivered = 0;
        let mut dropped = Vec::new();
        {
            let clients = self.clients.read();
            for (id, client) in clients.iter().filter(|(_, c)| wanted(c)) {
                match client.tx.try_send(message.to_string()) {
                    Ok(()) => delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        warn!(client_id = %id, "websocket client too slow, dropping");
                        dropped.push(*id);
                    }
                    Err(TrySendError::Closed(_)) => dropped.push(*id),
                }
            }
        }
        if !dropped.is_empty() {
            let mut clients = self.clients.write();
            for id in dropped { clients.remove(&id); }
        }
        delivered
    }
}

#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    pub user_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct InboundMessage {
    #[serde(rename = "type")]
    kind: String,
    user_id: Option<i64>,
}

/// `GET /ws`
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    AppQuery(params): AppQuery<ConnectParams>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, params.user_id))
}

async fn handle_socket(socket: WebSocket, state: AppState, user_id: Option<i64>) {
    let hub = state.hub.clone();
    let (id, mut rx) = hub.register(user_id);
    let (mut sink, mut stream) = socket.split();

    let mut send_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if sink.send(Message::Text(message)).await.is_err() { break; }
        }
        let _ = sink.send(Message::Close(None)).await;
    });

    let reader_hub = hub.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = stream.next().await {
            match message {
                Message::Text(text) => {
                    if let Ok(InboundMessage { kind, user_id: Some(user_id) }) = serde_json::from_str(&text) {
                        if kind == "auth" { reader_hub.authenticate(id, user_id); }
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
    hub.unregister(id);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_to_user_with_no_clients_is_noop() {
        let hub = Hub::new(4);
        assert_eq!(hub.send_to_user(42, "hello"), 0);
        let (_id, _rx) = hub.register(Some(7));
        assert_eq!(hub.send_to_user(42, "hello"), 0);
        assert_eq!(hub.client_count(), 1);
    }

    #[tokio::test]
    async fn test_send_to_user_filters_by_user() {
        let hub = Hub::new(4);
        let (_a, mut rx_a) = hub.register(Some(1));
        let (_b, mut rx_b) = hub.register(Some(2));
        let (anon, mut rx_anon) = hub.register(None);
        assert_eq!(hub.send_to_user(1, "for-one"), 1);
        assert_eq!(rx_a.recv().await.as_deref(), Some("for-one"));
        assert!(rx_b.try_recv().is_err());

        hub.authenticate(anon, 2);
        assert_eq!(hub.send_to_user(2, "for-two"), 2);
        assert_eq!(rx_anon.recv().await.as_deref(), Some("for-two"));
        assert_eq!(hub.broadcast("all"), 3);
    }

    #[test]
    fn test_full_client_is_dropped() {
        let hub = Hub::new(1);
        let (_slow, _rx_slow) = hub.register(Some(1));
        let (_fast, mut rx_fast) = hub.register(Some(2));
        assert_eq!(hub.broadcast("one"), 2);
        rx_fast.try_recv().unwrap();
        assert_eq!(hub.broadcast("two"), 1);
        assert_eq!(hub.client_count(), 1);
        assert_eq!(hub.send_to_user(1, "three"), 0);
    }

    #[test]
    fn test_closed_client_is_dropped() {
        let hub = Hub::new(2);
        let (_id, rx) = hub.register(None);
        drop(rx);
        assert_eq!(hub.broadcast("x"), 0);
        assert_eq!(hub.client_count(), 0);
    }
}
