use std::sync::Arc;

use crate::{BackendError, BoxFuture, InboundMessage, OutgoingMessage, ReceiveSettings, SubscriptionInfo};

// ════════════════════════════════════════════════════════════════
//  Backend contract
// ════════════════════════════════════════════════════════════════

/// Publishes messages to a topic.
pub trait Publisher: Send + Sync {
    /// Publish one message. Returns the server-assigned message id.
    /// Fails with `NotFound` if the topic does not exist.
    fn publish(&self, topic: &str, message: OutgoingMessage) -> BoxFuture<'_, Result<String, BackendError>>;
}

/// Topic and subscription administration, addressed by short name.
pub trait Admin: Send + Sync {
    fn topic_exists(&self, topic: &str) -> BoxFuture<'_, Result<bool, BackendError>>;

    fn create_topic(&self, topic: &str) -> BoxFuture<'_, Result<(), BackendError>>;

    fn delete_topic(&self, topic: &str) -> BoxFuture<'_, Result<(), BackendError>>;

    /// Short names of every topic in the project.
    fn list_topics(&self) -> BoxFuture<'_, Result<Vec<String>, BackendError>>;

    fn subscription_exists(&self, subscription: &str) -> BoxFuture<'_, Result<bool, BackendError>>;

    /// Create a subscription attached to `topic`.
    fn create_subscription(&self, subscription: &str, topic: &str) -> BoxFuture<'_, Result<(), BackendError>>;

    fn delete_subscription(&self, subscription: &str) -> BoxFuture<'_, Result<(), BackendError>>;

    fn list_subscriptions(&self) -> BoxFuture<'_, Result<Vec<SubscriptionInfo>, BackendError>>;

    fn subscription_info(&self, subscription: &str) -> BoxFuture<'_, Result<SubscriptionInfo, BackendError>>;
}

/// Opens subscriptions for delivery.
pub trait Subscriber: Send + Sync {
    fn open_subscription(
        &self,
        subscription: &str,
        settings: ReceiveSettings,
    ) -> BoxFuture<'_, Result<Arc<dyn Delivery>, BackendError>>;
}

/// Full backend: everything the command line needs.
pub trait Backend: Publisher + Admin + Subscriber {}

impl<T: Publisher + Admin + Subscriber> Backend for T {}

// ════════════════════════════════════════════════════════════════
//  Delivery
// ════════════════════════════════════════════════════════════════

/// An open subscription handing out messages to any number of workers.
///
/// At most `max_outstanding` messages are handed out and not yet acked or
/// nacked at any time; `next` waits for a slot.
pub trait Delivery: Send + Sync {
    /// Next delivered message. `None` = subscription stopped or closed.
    fn next(&self) -> BoxFuture<'_, Result<Option<Delivered>, BackendError>>;

    /// Stop handing out messages. Pending `next` calls resolve to `None`.
    fn stop(&self) -> BoxFuture<'_, ()>;

    /// Flush outstanding ack/nack bookkeeping. Call once every delivered
    /// message has been decided.
    fn close(&self) -> BoxFuture<'_, Result<(), BackendError>>;
}

/// The reply half of a delivery. Consumed by the first decision, so a
/// message cannot be both acked and nacked.
pub trait AckReply: Send {
    /// Acknowledge: the backend will not redeliver.
    fn ack(self: Box<Self>);

    /// Negative acknowledgement: the backend should redeliver promptly.
    fn nack(self: Box<Self>);
}

/// A message together with the handle used to settle it.
pub struct Delivered {
    pub message: InboundMessage,
    pub reply: Box<dyn AckReply>,
}

impl std::fmt::Debug for Delivered {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivered").field("message", &self.message).finish_non_exhaustive()
    }
}
