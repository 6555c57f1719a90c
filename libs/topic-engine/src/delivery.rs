use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use pubsub_api::{AckReply, BackendError, BoxFuture, Delivered, Delivery, InboundMessage, ReceiveSettings};

use crate::SubscriptionQueue;

// ═══════════════════════════════════════════════════════════════
//  MemoryDelivery
// ═══════════════════════════════════════════════════════════════

/// Open subscription over a `SubscriptionQueue`.
///
/// Each delivered message holds one of `max_outstanding` permits until it
/// is acked, nacked or dropped.
pub struct MemoryDelivery {
    queue: Arc<SubscriptionQueue>,
    permits: Arc<Semaphore>,
    stopped: CancellationToken,
}

impl MemoryDelivery {
    pub(crate) fn new(queue: Arc<SubscriptionQueue>, settings: ReceiveSettings) -> Self {
        Self {
            queue,
            permits: Arc::new(Semaphore::new(settings.max_outstanding.max(1))),
            stopped: CancellationToken::new(),
        }
    }

    async fn next_message(&self) -> Result<Option<Delivered>, BackendError> {
        let permit = tokio::select! {
            _ = self.stopped.cancelled() => return Ok(None),
            permit = self.permits.clone().acquire_owned() => {
                permit.map_err(|_| BackendError::cancelled())?
            }
        };

        loop {
            if self.queue.is_deleted() {
                return Err(BackendError::not_found(format!(
                    "subscription '{}' was deleted",
                    self.queue.name()
                )));
            }
            if let Some(message) = self.queue.pop() {
                let reply = MemoryReply {
                    queue: self.queue.clone(),
                    message: Some(message.clone()),
                    _permit: permit,
                };
                return Ok(Some(Delivered { message, reply: Box::new(reply) }));
            }
            tokio::select! {
                _ = self.stopped.cancelled() => return Ok(None),
                _ = self.queue.notified() => {}
            }
        }
    }
}

impl Delivery for MemoryDelivery {
    fn next(&self) -> BoxFuture<'_, Result<Option<Delivered>, BackendError>> {
        Box::pin(self.next_message())
    }

    fn stop(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.stopped.cancel();
        })
    }

    fn close(&self) -> BoxFuture<'_, Result<(), BackendError>> {
        Box::pin(async move { Ok(()) })
    }
}

// ═══════════════════════════════════════════════════════════════
//  MemoryReply
// ═══════════════════════════════════════════════════════════════

/// Settles one delivery. A reply dropped undecided behaves like an expired
/// ack deadline: the message goes back on the queue.
struct MemoryReply {
    queue: Arc<SubscriptionQueue>,
    message: Option<InboundMessage>,
    _permit: OwnedSemaphorePermit,
}

impl AckReply for MemoryReply {
    fn ack(mut self: Box<Self>) {
        if let Some(message) = self.message.take() {
            self.queue.record_ack(&message.id);
        }
    }

    fn nack(mut self: Box<Self>) {
        if let Some(message) = self.message.take() {
            self.queue.record_nack(&message.id);
            self.queue.requeue(message);
        }
    }
}

impl Drop for MemoryReply {
    fn drop(&mut self) {
        if let Some(message) = self.message.take() {
            tracing::debug!(subscription = %self.queue.name(), id = %message.id, "undecided delivery, requeueing");
            self.queue.requeue(message);
        }
    }
}
