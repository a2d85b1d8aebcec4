use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast;

use corvid_protocol::{ClientInfo, Event};

/// Fan-out of server events to every subscribed client.
///
/// Also tracks which operator clients currently hold an event stream.
#[derive(Debug, Clone)]
pub struct EventBroker {
    tx: broadcast::Sender<Event>,
    clients: Arc<DashMap<u64, ClientInfo>>,
    next_client: Arc<AtomicU64>,
}

impl EventBroker {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            clients: Arc::new(DashMap::new()),
            next_client: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Publish to current subscribers. Events published while nobody listens
    /// are dropped.
    pub fn publish(&self, event: Event) {
        let kind = event.kind();
        match self.tx.send(event) {
            Ok(receivers) => tracing::trace!(kind, receivers, "Event published"),
            Err(_) => tracing::trace!(kind, "Event dropped, no subscribers"),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Record a connected client and publish `join`. The returned id is
    /// handed back to [`EventBroker::leave`].
    pub fn join(&self, client: ClientInfo) -> u64 {
        let id = self.next_client.fetch_add(1, Ordering::Relaxed);
        self.clients.insert(id, client.clone());
        self.publish(Event::Join { client });
        id
    }

    /// Forget a client and publish `leave`. Unknown ids are ignored.
    pub fn leave(&self, id: u64) {
        if let Some((_, client)) = self.clients.remove(&id) {
            self.publish(Event::Leave { client });
        }
    }

    /// Connected clients in join order.
    pub fn clients(&self) -> Vec<ClientInfo> {
        let mut clients: Vec<(u64, ClientInfo)> = self
            .clients
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();
        clients.sort_by_key(|(id, _)| *id);
        clients.into_iter().map(|(_, client)| client).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(name: &str) -> ClientInfo {
        ClientInfo { name: name.into() }
    }

    #[tokio::test]
    async fn subscribers_receive_in_order() {
        let broker = EventBroker::new(8);
        let mut rx = broker.subscribe();
        broker.publish(Event::task_callback_ready(1, "S1"));
        broker.publish(Event::task_done(1, "S1"));
        assert_eq!(rx.recv().await.unwrap().kind(), "task-callback-ready");
        assert_eq!(rx.recv().await.unwrap().kind(), "task-done");
    }

    #[test]
    fn publish_without_subscribers_is_fine() {
        let broker = EventBroker::new(0);
        broker.publish(Event::task_done(1, "S1"));
        assert_eq!(broker.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn join_and_leave_track_clients() {
        let broker = EventBroker::new(8);
        let mut rx = broker.subscribe();
        let a = broker.join(client("alice"));
        let b = broker.join(client("bob"));
        let _again = broker.join(client("alice"));
        assert_eq!(broker.clients(), vec![client("alice"), client("bob"), client("alice")]);

        broker.leave(a);
        broker.leave(a);
        assert_eq!(broker.clients(), vec![client("bob"), client("alice")]);
        broker.leave(b);

        let kinds: Vec<&str> = (0..5).map(|_| rx.try_recv().unwrap().kind()).collect();
        assert_eq!(kinds, vec!["join", "join", "join", "leave", "leave"]);
        assert!(rx.try_recv().is_err());
    }
}
