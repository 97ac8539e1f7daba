//! Broadcast hub: the set of connected stream clients.
//!
//! Each connection owns a bounded outbound queue drained by its own writer
//! task, so per-connection write order always matches enqueue order. The
//! hub never awaits a socket: a queue that is closed or full counts as a
//! failed write and only that connection is dropped.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use courier_shared::crypto::EnvelopeCipher;
use courier_shared::protocol::ServerEvent;

/// Outbound frames buffered per connection before it is considered stuck.
pub const QUEUE_CAPACITY: usize = 256;

pub type ConnectionId = Uuid;

#[derive(Clone)]
struct ClientHandle {
    tx: mpsc::Sender<String>,
    cipher: Option<EnvelopeCipher>,
}

/// Result of one fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastSummary {
    pub delivered: usize,
    pub dropped: usize,
}

#[derive(Clone, Default)]
pub struct Hub {
    clients: Arc<Mutex<HashMap<ConnectionId, ClientHandle>>>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection. Frames for it arrive on the returned receiver,
    /// already serialized and sealed when `cipher` is set.
    pub async fn add(&self, cipher: Option<EnvelopeCipher>) -> (ConnectionId, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let id = Uuid::new_v4();
        let encrypted = cipher.is_some();

        let mut clients = self.clients.lock().await;
        clients.insert(id, ClientHandle { tx, cipher });
        tracing::info!(connection = %id, encrypted, total = clients.len(), "client connected");

        (id, rx)
    }

    pub async fn remove(&self, id: ConnectionId) {
        let mut clients = self.clients.lock().await;
        if clients.remove(&id).is_some() {
            tracing::info!(connection = %id, total = clients.len(), "client removed");
        }
    }

    pub async fn connection_count(&self) -> usize {
        self.clients.lock().await.len()
    }

    pub async fn broadcast(&self, event: &ServerEvent) -> BroadcastSummary {
        self.broadcast_all(std::slice::from_ref(event)).await
    }

    /// Fan a batch out to every connection, keeping batch order per connection.
    pub async fn broadcast_all(&self, events: &[ServerEvent]) -> BroadcastSummary {
        if events.is_empty() {
            return BroadcastSummary::default();
        }

        let snapshot: Vec<(ConnectionId, ClientHandle)> = {
            let clients = self.clients.lock().await;
            clients.iter().map(|(id, h)| (*id, h.clone())).collect()
        };

        let mut summary = BroadcastSummary::default();
        let mut dead = Vec::new();
        for (id, handle) in &snapshot {
            if deliver(*id, handle, events) {
                summary.delivered += 1;
            } else {
                dead.push(*id);
            }
        }

        if !dead.is_empty() {
            let mut clients = self.clients.lock().await;
            for id in &dead {
                clients.remove(id);
            }
            summary.dropped = dead.len();
            tracing::warn!(dropped = dead.len(), remaining = clients.len(), "dropped unwritable clients");
        }

        tracing::debug!(
            events = events.len(),
            delivered = summary.delivered,
            dropped = summary.dropped,
            "broadcast"
        );
        summary
    }

    /// Queue a reply for a single connection (pong, error).
    pub async fn send_to(&self, id: ConnectionId, event: &ServerEvent) -> bool {
        let handle = {
            let clients = self.clients.lock().await;
            clients.get(&id).cloned()
        };
        let Some(handle) = handle else {
            return false;
        };
        if deliver(id, &handle, std::slice::from_ref(event)) {
            true
        } else {
            self.remove(id).await;
            false
        }
    }
}

fn deliver(id: ConnectionId, handle: &ClientHandle, events: &[ServerEvent]) -> bool {
    for event in events {
        let frame = match event.to_wire(handle.cipher.as_ref()) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(connection = %id, kind = event.kind(), error = %e, "failed to encode event");
                continue;
            }
        };
        if let Err(e) = handle.tx.try_send(frame) {
            tracing::debug!(connection = %id, error = %e, "client queue unwritable");
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn error_event(n: usize) -> ServerEvent {
        ServerEvent::Error {
            message: format!("e{n}"),
        }
    }

    #[tokio::test]
    async fn test_add_remove_count() {
        let hub = Hub::new();
        let (a, _rx_a) = hub.add(None).await;
        let (_b, _rx_b) = hub.add(None).await;
        assert_eq!(hub.connection_count().await, 2);
        hub.remove(a).await;
        hub.remove(a).await;
        assert_eq!(hub.connection_count().await, 1);
    }

    #[tokio::test]
    async fn test_broken_connection_is_isolated() {
        let hub = Hub::new();
        let (_a, mut rx_a) = hub.add(None).await;
        let (_b, rx_b) = hub.add(None).await;
        let (_c, mut rx_c) = hub.add(None).await;
        drop(rx_b);

        let summary = hub.broadcast(&ServerEvent::Pong).await;
        assert_eq!(summary, BroadcastSummary { delivered: 2, dropped: 1 });
        assert_eq!(hub.connection_count().await, 2);

        assert_eq!(rx_a.recv().await.unwrap(), r#"{"type":"pong"}"#);
        assert_eq!(rx_c.recv().await.unwrap(), r#"{"type":"pong"}"#);
    }

    #[tokio::test]
    async fn test_full_queue_drops_connection() {
        let hub = Hub::new();
        let (_slow, _rx_slow) = hub.add(None).await;
        let (_fast, mut rx_fast) = hub.add(None).await;

        for n in 0..QUEUE_CAPACITY {
            hub.broadcast(&error_event(n)).await;
            rx_fast.recv().await.unwrap();
        }
        let summary = hub.broadcast(&ServerEvent::Pong).await;
        assert_eq!(summary.dropped, 1);
        assert_eq!(hub.connection_count().await, 1);
    }

    #[tokio::test]
    async fn test_batch_order_preserved() {
        let hub = Hub::new();
        let (_a, mut rx) = hub.add(None).await;
        let batch: Vec<ServerEvent> = (0..5).map(error_event).collect();
        hub.broadcast_all(&batch).await;

        for expected in &batch {
            let frame = rx.recv().await.unwrap();
            assert_eq!(&ServerEvent::from_wire(&frame, None).unwrap(), expected);
        }
    }

    #[tokio::test]
    async fn test_encrypted_connection_gets_sealed_frames() {
        let hub = Hub::new();
        let cipher = EnvelopeCipher::from_secret("s3cret").unwrap();
        let (_plain, mut rx_plain) = hub.add(None).await;
        let (_sealed, mut rx_sealed) = hub.add(Some(cipher.clone())).await;

        hub.broadcast(&error_event(1)).await;

        let plain = rx_plain.recv().await.unwrap();
        let sealed = rx_sealed.recv().await.unwrap();
        assert!(plain.contains("e1"));
        assert!(!sealed.contains("e1"));
        assert_eq!(
            ServerEvent::from_wire(&sealed, Some(&cipher)).unwrap(),
            error_event(1)
        );
    }

    #[tokio::test]
    async fn test_send_to_single_connection() {
        let hub = Hub::new();
        let (a, mut rx_a) = hub.add(None).await;
        let (_b, mut rx_b) = hub.add(None).await;
        assert!(hub.send_to(a, &ServerEvent::Pong).await);
        assert!(rx_a.recv().await.is_some());
        assert!(rx_b.try_recv().is_err());
        assert!(!hub.send_to(Uuid::new_v4(), &ServerEvent::Pong).await);
    }
}
