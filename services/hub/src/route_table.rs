use ipc_protocol::Message;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;

/// Per-channel outbound queue to a connected Worker. Bounded: sends are
/// drop-if-full, never awaited behind a blocked peer (§5).
const WORKER_SEND_QUEUE_CAPACITY: usize = 256;

/// The Hub's in-memory channel_id -> connected-worker map, confined to a
/// single `RwLock` with no I/O performed while holding it, mirroring the
/// teacher's `AppState` registries.
#[derive(Default, Clone)]
pub struct RouteTable {
    inner: Arc<RwLock<HashMap<String, mpsc::Sender<Message>>>>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection for `channel_id`, returning the receiving half
    /// the connection's writer task should drain.
    pub fn register(&self, channel_id: String) -> mpsc::Receiver<Message> {
        let (tx, rx) = mpsc::channel(WORKER_SEND_QUEUE_CAPACITY);
        self.inner.write().unwrap().insert(channel_id, tx);
        rx
    }

    pub fn unregister(&self, channel_id: &str) {
        self.inner.write().unwrap().remove(channel_id);
    }

    /// Forward `msg` to the Worker routed for `channel_id`. Drops (counting
    /// at the caller) if no route exists or the queue is full.
    pub fn try_send(&self, channel_id: &str, msg: Message) -> bool {
        let table = self.inner.read().unwrap();
        match table.get(channel_id) {
            Some(tx) => tx.try_send(msg).is_ok(),
            None => false,
        }
    }

    pub fn is_routed(&self, channel_id: &str) -> bool {
        self.inner.read().unwrap().contains_key(channel_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ipc_protocol::EventsubEvent;

    #[tokio::test]
    async fn forwards_only_to_the_registered_channel() {
        let table = RouteTable::new();
        let mut rx = table.register("100".to_owned());

        let event = Message::EventsubEvent(EventsubEvent {
            channel_id: "100".to_owned(),
            topic: "stream.online".to_owned(),
            payload: serde_json::json!({}),
        });
        assert!(table.try_send("100", event.clone()));
        assert!(!table.try_send("200", event));

        let received = rx.recv().await.unwrap();
        assert!(matches!(received, Message::EventsubEvent(e) if e.channel_id == "100"));
    }

    #[test]
    fn unregister_drops_the_route() {
        let table = RouteTable::new();
        let _rx = table.register("100".to_owned());
        assert!(table.is_routed("100"));
        table.unregister("100");
        assert!(!table.is_routed("100"));
    }
}
