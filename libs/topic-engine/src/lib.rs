pub mod error;
mod delivery;

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{Notify, RwLock};

use pubsub_api::{
    Admin, Attributes, BackendError, BoxFuture, Delivery, InboundMessage, OutgoingMessage,
    Publisher, ReceiveSettings, Subscriber, SubscriptionInfo,
};

pub use delivery::MemoryDelivery;
pub use error::EngineError;

/// Topic name reported by subscriptions whose topic was deleted.
pub const DELETED_TOPIC: &str = "_deleted-topic_";

const DEFAULT_ACK_DEADLINE: Duration = Duration::from_secs(10);

// ═══════════════════════════════════════════════════════════════
//  SubscriptionQueue
// ═══════════════════════════════════════════════════════════════

#[derive(Default, Clone, Copy)]
struct Tally {
    acks: usize,
    nacks: usize,
}

/// Per-subscription message queue plus ack bookkeeping.
pub(crate) struct SubscriptionQueue {
    name: String,
    topic: Mutex<String>,
    pending: Mutex<VecDeque<InboundMessage>>,
    ledger: Mutex<HashMap<String, Tally>>,
    notify: Notify,
    deleted: AtomicBool,
}

impl SubscriptionQueue {
    fn new(name: String, topic: String) -> Self {
        Self {
            name,
            topic: Mutex::new(topic),
            pending: Mutex::new(VecDeque::new()),
            ledger: Mutex::new(HashMap::new()),
            notify: Notify::new(),
            deleted: AtomicBool::new(false),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    fn topic(&self) -> String {
        self.topic.lock().map(|t| t.clone()).unwrap_or_default()
    }

    fn detach(&self) {
        if let Ok(mut topic) = self.topic.lock() {
            *topic = DELETED_TOPIC.to_string();
        }
    }

    pub(crate) fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::Acquire)
    }

    fn push_back(&self, message: InboundMessage) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.push_back(message);
        }
        self.notify.notify_one();
    }

    /// Put a message back at the head of the queue for prompt redelivery.
    pub(crate) fn requeue(&self, mut message: InboundMessage) {
        message.delivery_attempt = Some(message.delivery_attempt.unwrap_or(1) + 1);
        if let Ok(mut pending) = self.pending.lock() {
            pending.push_front(message);
        }
        self.notify.notify_one();
    }

    pub(crate) fn pop(&self) -> Option<InboundMessage> {
        self.pending.lock().ok()?.pop_front()
    }

    pub(crate) fn notified(&self) -> tokio::sync::futures::Notified<'_> {
        self.notify.notified()
    }

    pub(crate) fn record_ack(&self, id: &str) {
        if let Ok(mut ledger) = self.ledger.lock() {
            ledger.entry(id.to_string()).or_default().acks += 1;
        }
    }

    pub(crate) fn record_nack(&self, id: &str) {
        if let Ok(mut ledger) = self.ledger.lock() {
            ledger.entry(id.to_string()).or_default().nacks += 1;
        }
    }

    fn tally(&self, id: &str) -> Tally {
        self.ledger
            .lock()
            .ok()
            .and_then(|l| l.get(id).copied())
            .unwrap_or_default()
    }

    fn pending_len(&self) -> usize {
        self.pending.lock().map(|p| p.len()).unwrap_or(0)
    }
}

// ═══════════════════════════════════════════════════════════════
//  Topic
// ═══════════════════════════════════════════════════════════════

/// Named channel fanning messages out to its attached subscriptions.
struct Topic {
    name: String,
    subscriptions: RwLock<Vec<Arc<SubscriptionQueue>>>,
}

impl Topic {
    fn new(name: String) -> Self {
        Self { name, subscriptions: RwLock::new(Vec::new()) }
    }

    async fn attach(&self, queue: Arc<SubscriptionQueue>) {
        self.subscriptions.write().await.push(queue);
    }

    /// Deliver a copy to every live subscription, dropping deleted ones.
    async fn fan_out(&self, message: InboundMessage) {
        let mut subs = self.subscriptions.write().await;
        let mut i = 0;
        while i < subs.len() {
            if subs[i].is_deleted() {
                subs.swap_remove(i);
                continue;
            }
            subs[i].push_back(message.clone());
            i += 1;
        }
        tracing::trace!(topic = %self.name, subscriptions = subs.len(), id = %message.id, "fanned out");
    }
}

// ═══════════════════════════════════════════════════════════════
//  MemoryBackend
// ═══════════════════════════════════════════════════════════════

/// In-process messaging backend. Implements the full backend contract:
/// publish, administration and flow-controlled delivery.
pub struct MemoryBackend {
    topics: RwLock<HashMap<String, Arc<Topic>>>,
    subscriptions: RwLock<HashMap<String, Arc<SubscriptionQueue>>>,
    next_id: AtomicU64,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            subscriptions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    async fn queue(&self, subscription: &str) -> Result<Arc<SubscriptionQueue>, EngineError> {
        self.subscriptions
            .read()
            .await
            .get(subscription)
            .cloned()
            .ok_or_else(|| EngineError::SubscriptionNotFound(subscription.to_string()))
    }

    /// Times message `id` was acked on `subscription`.
    pub async fn ack_count(&self, subscription: &str, id: &str) -> usize {
        match self.queue(subscription).await {
            Ok(q) => q.tally(id).acks,
            Err(_) => 0,
        }
    }

    /// Times message `id` was nacked on `subscription`.
    pub async fn nack_count(&self, subscription: &str, id: &str) -> usize {
        match self.queue(subscription).await {
            Ok(q) => q.tally(id).nacks,
            Err(_) => 0,
        }
    }

    /// Messages waiting for delivery on `subscription`.
    pub async fn pending(&self, subscription: &str) -> usize {
        match self.queue(subscription).await {
            Ok(q) => q.pending_len(),
            Err(_) => 0,
        }
    }

    async fn publish_inner(&self, topic: &str, message: OutgoingMessage) -> Result<String, EngineError> {
        let topic_arc = self
            .topics
            .read()
            .await
            .get(topic)
            .cloned()
            .ok_or_else(|| EngineError::TopicNotFound(topic.to_string()))?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed).to_string();
        let inbound = InboundMessage {
            id: id.clone(),
            publish_time: chrono::Utc::now(),
            data: message.data,
            attributes: message.attributes,
            ordering_key: String::new(),
            delivery_attempt: None,
        };
        topic_arc.fan_out(inbound).await;
        Ok(id)
    }

    async fn create_subscription_inner(&self, subscription: &str, topic: &str) -> Result<(), EngineError> {
        let topic_arc = self
            .topics
            .read()
            .await
            .get(topic)
            .cloned()
            .ok_or_else(|| EngineError::TopicNotFound(topic.to_string()))?;

        let mut subs = self.subscriptions.write().await;
        if subs.contains_key(subscription) {
            return Err(EngineError::SubscriptionExists(subscription.to_string()));
        }
        let queue = Arc::new(SubscriptionQueue::new(subscription.to_string(), topic.to_string()));
        subs.insert(subscription.to_string(), queue.clone());
        drop(subs);

        topic_arc.attach(queue).await;
        tracing::debug!(subscription, topic, "created subscription");
        Ok(())
    }

    fn info(queue: &SubscriptionQueue) -> SubscriptionInfo {
        SubscriptionInfo {
            name: queue.name.clone(),
            topic: queue.topic(),
            ack_deadline: DEFAULT_ACK_DEADLINE,
            retain_acked_messages: false,
        }
    }
}

impl Publisher for MemoryBackend {
    fn publish(&self, topic: &str, message: OutgoingMessage) -> BoxFuture<'_, Result<String, BackendError>> {
        let topic = topic.to_string();
        Box::pin(async move {
            self.publish_inner(&topic, message)
                .await
                .map_err(EngineError::into_backend_error)
        })
    }
}

impl Admin for MemoryBackend {
    fn topic_exists(&self, topic: &str) -> BoxFuture<'_, Result<bool, BackendError>> {
        let topic = topic.to_string();
        Box::pin(async move { Ok(self.topics.read().await.contains_key(&topic)) })
    }

    fn create_topic(&self, topic: &str) -> BoxFuture<'_, Result<(), BackendError>> {
        let topic = topic.to_string();
        Box::pin(async move {
            let mut topics = self.topics.write().await;
            if topics.contains_key(&topic) {
                return Err(EngineError::TopicExists(topic).into_backend_error());
            }
            topics.insert(topic.clone(), Arc::new(Topic::new(topic)));
            Ok(())
        })
    }

    fn delete_topic(&self, topic: &str) -> BoxFuture<'_, Result<(), BackendError>> {
        let topic = topic.to_string();
        Box::pin(async move {
            let removed = self
                .topics
                .write()
                .await
                .remove(&topic)
                .ok_or_else(|| EngineError::TopicNotFound(topic.clone()).into_backend_error())?;
            for queue in removed.subscriptions.read().await.iter() {
                queue.detach();
            }
            Ok(())
        })
    }

    fn list_topics(&self) -> BoxFuture<'_, Result<Vec<String>, BackendError>> {
        Box::pin(async move {
            let mut names: Vec<String> = self.topics.read().await.keys().cloned().collect();
            names.sort();
            Ok(names)
        })
    }

    fn subscription_exists(&self, subscription: &str) -> BoxFuture<'_, Result<bool, BackendError>> {
        let subscription = subscription.to_string();
        Box::pin(async move { Ok(self.subscriptions.read().await.contains_key(&subscription)) })
    }

    fn create_subscription(&self, subscription: &str, topic: &str) -> BoxFuture<'_, Result<(), BackendError>> {
        let subscription = subscription.to_string();
        let topic = topic.to_string();
        Box::pin(async move {
            self.create_subscription_inner(&subscription, &topic)
                .await
                .map_err(EngineError::into_backend_error)
        })
    }

    fn delete_subscription(&self, subscription: &str) -> BoxFuture<'_, Result<(), BackendError>> {
        let subscription = subscription.to_string();
        Box::pin(async move {
            let queue = self
                .subscriptions
                .write()
                .await
                .remove(&subscription)
                .ok_or_else(|| EngineError::SubscriptionNotFound(subscription.clone()).into_backend_error())?;
            queue.deleted.store(true, Ordering::Release);
            queue.notify.notify_waiters();
            Ok(())
        })
    }

    fn list_subscriptions(&self) -> BoxFuture<'_, Result<Vec<SubscriptionInfo>, BackendError>> {
        Box::pin(async move {
            let mut infos: Vec<SubscriptionInfo> =
                self.subscriptions.read().await.values().map(|q| Self::info(q)).collect();
            infos.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(infos)
        })
    }

    fn subscription_info(&self, subscription: &str) -> BoxFuture<'_, Result<SubscriptionInfo, BackendError>> {
        let subscription = subscription.to_string();
        Box::pin(async move {
            let queue = self.queue(&subscription).await.map_err(EngineError::into_backend_error)?;
            Ok(Self::info(&queue))
        })
    }
}

impl Subscriber for MemoryBackend {
    fn open_subscription(
        &self,
        subscription: &str,
        settings: ReceiveSettings,
    ) -> BoxFuture<'_, Result<Arc<dyn Delivery>, BackendError>> {
        let subscription = subscription.to_string();
        Box::pin(async move {
            let queue = self.queue(&subscription).await.map_err(EngineError::into_backend_error)?;
            tracing::debug!(
                subscription = %subscription,
                max_outstanding = settings.max_outstanding,
                "opened subscription"
            );
            Ok(Arc::new(MemoryDelivery::new(queue, settings)) as Arc<dyn Delivery>)
        })
    }
}

/// Convenience for tests: publish `data` with attributes built from pairs.
pub async fn publish_with(
    backend: &MemoryBackend,
    topic: &str,
    data: &[u8],
    attributes: &[(&str, &str)],
) -> Result<String, BackendError> {
    let attributes: Attributes = attributes
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    backend
        .publish(topic, OutgoingMessage::new(data).with_attributes(attributes))
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use pubsub_api::ErrorKind;

    async fn backend_with(topic: &str, subs: &[&str]) -> MemoryBackend {
        let backend = MemoryBackend::new();
        backend.create_topic(topic).await.unwrap();
        for s in subs {
            backend.create_subscription(s, topic).await.unwrap();
        }
        backend
    }

    #[tokio::test]
    async fn publish_requires_topic() {
        let backend = MemoryBackend::new();
        let err = backend.publish("missing", OutgoingMessage::new("x")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn publish_fans_out_to_every_subscription() {
        let backend = backend_with("orders", &["a", "b"]).await;
        publish_with(&backend, "orders", b"one", &[]).await.unwrap();
        publish_with(&backend, "orders", b"two", &[]).await.unwrap();
        assert_eq!(backend.pending("a").await, 2);
        assert_eq!(backend.pending("b").await, 2);
    }

    #[tokio::test]
    async fn duplicate_create_is_already_exists() {
        let backend = backend_with("orders", &["a"]).await;
        let err = backend.create_topic("orders").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
        let err = backend.create_subscription("a", "orders").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
        let err = backend.create_subscription("c", "nope").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn deleting_topic_detaches_subscriptions() {
        let backend = backend_with("orders", &["a"]).await;
        backend.delete_topic("orders").await.unwrap();
        assert!(!backend.topic_exists("orders").await.unwrap());
        let info = backend.subscription_info("a").await.unwrap();
        assert_eq!(info.topic, DELETED_TOPIC);
    }

    #[tokio::test]
    async fn listings_are_sorted() {
        let backend = MemoryBackend::new();
        for t in ["zeta", "alpha", "mid"] {
            backend.create_topic(t).await.unwrap();
        }
        backend.create_subscription("s2", "alpha").await.unwrap();
        backend.create_subscription("s1", "zeta").await.unwrap();
        assert_eq!(backend.list_topics().await.unwrap(), vec!["alpha", "mid", "zeta"]);
        let subs = backend.list_subscriptions().await.unwrap();
        assert_eq!(subs.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(), vec!["s1", "s2"]);
        assert_eq!(subs[0].topic, "zeta");
    }

    #[tokio::test]
    async fn deleted_subscription_stops_receiving() {
        let backend = backend_with("orders", &["a"]).await;
        backend.delete_subscription("a").await.unwrap();
        publish_with(&backend, "orders", b"x", &[]).await.unwrap();
        assert!(!backend.subscription_exists("a").await.unwrap());
        let err = backend.delete_subscription("a").await.unwrap_err();
        assert!(err.is_not_found());
    }
}
