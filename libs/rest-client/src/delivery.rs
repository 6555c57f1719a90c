use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use reqwest::Method;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use pubsub_api::{AckReply, BackendError, BoxFuture, Delivered, Delivery, InboundMessage, ReceiveSettings};

use crate::client::RestClient;
use crate::wire::{AcknowledgeRequest, ModifyAckDeadlineRequest, PullRequest, PullResponse};

/// Pause after an empty pull before asking again.
const EMPTY_PULL_BACKOFF: Duration = Duration::from_millis(250);
/// Upper bound of ack ids per acknowledge call.
const ACK_BATCH: usize = 1000;

#[derive(Debug)]
enum AckOp {
    Ack(String),
    Nack(String),
}

struct Pending {
    ack_id: String,
    message: InboundMessage,
    permit: OwnedSemaphorePermit,
}

// ═══════════════════════════════════════════════════════════════
//  RestDelivery
// ═══════════════════════════════════════════════════════════════

/// Pull-based subscription. A message holds a flow-control permit from the
/// moment it is pulled until its reply is settled.
pub struct RestDelivery {
    client: Arc<RestClient>,
    path: String,
    max_outstanding: usize,
    permits: Arc<Semaphore>,
    buffer: Arc<Mutex<VecDeque<Pending>>>,
    stopped: CancellationToken,
    acks: Mutex<Option<mpsc::UnboundedSender<AckOp>>>,
    acker: Mutex<Option<JoinHandle<()>>>,
}

impl RestDelivery {
    pub(crate) fn new(client: Arc<RestClient>, path: String, settings: ReceiveSettings) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let acker = tokio::spawn(run_acker(client.clone(), path.clone(), rx));
        let max_outstanding = settings.max_outstanding.max(1);
        Self {
            client,
            path,
            max_outstanding,
            permits: Arc::new(Semaphore::new(max_outstanding)),
            buffer: Arc::new(Mutex::new(VecDeque::new())),
            stopped: CancellationToken::new(),
            acks: Mutex::new(Some(tx)),
            acker: Mutex::new(Some(acker)),
        }
    }

    fn sender(&self) -> Option<mpsc::UnboundedSender<AckOp>> {
        self.acks.lock().ok()?.clone()
    }

    fn pop_buffered(&self) -> Option<Pending> {
        self.buffer.lock().ok()?.pop_front()
    }

    fn deliver(&self, pending: Pending) -> Result<Delivered, BackendError> {
        let acks = self.sender().ok_or_else(BackendError::cancelled)?;
        let reply = RestReply { ack_id: Some(pending.ack_id), acks, _permit: pending.permit };
        Ok(Delivered { message: pending.message, reply: Box::new(reply) })
    }

    async fn next_message(&self) -> Result<Option<Delivered>, BackendError> {
        loop {
            if self.stopped.is_cancelled() {
                return Ok(None);
            }
            if let Some(pending) = self.pop_buffered() {
                return self.deliver(pending).map(Some);
            }

            let first = tokio::select! {
                _ = self.stopped.cancelled() => return Ok(None),
                permit = self.permits.clone().acquire_owned() => {
                    permit.map_err(|_| BackendError::cancelled())?
                }
            };
            // Another worker may have buffered messages while we waited.
            if let Some(pending) = self.pop_buffered() {
                drop(first);
                return self.deliver(pending).map(Some);
            }

            let mut permits = vec![first];
            while permits.len() < self.max_outstanding {
                match self.permits.clone().try_acquire_owned() {
                    Ok(p) => permits.push(p),
                    Err(_) => break,
                }
            }

            let Some(acks) = self.sender() else { return Ok(None) };
            // The pull runs detached so a batch leased after `stop` is still
            // nacked instead of waiting out its ack deadline.
            let pull = tokio::spawn(pull_batch(PullJob {
                client: self.client.clone(),
                path: self.path.clone(),
                buffer: self.buffer.clone(),
                stopped: self.stopped.clone(),
                acks,
                permits,
            }));
            let landed = tokio::select! {
                _ = self.stopped.cancelled() => return Ok(None),
                joined = pull => joined.map_err(|e| BackendError::io(format!("pull worker: {e}")))??,
            };
            if landed == 0 {
                tokio::select! {
                    _ = self.stopped.cancelled() => return Ok(None),
                    _ = tokio::time::sleep(EMPTY_PULL_BACKOFF) => {}
                }
                continue;
            }
            tracing::debug!(subscription = %self.path, count = landed, "pulled messages");
        }
    }

    async fn shutdown(&self) -> Result<(), BackendError> {
        self.stopped.cancel();
        let leftover: Vec<Pending> = match self.buffer.lock() {
            Ok(mut buffer) => buffer.drain(..).collect(),
            Err(_) => Vec::new(),
        };
        let sender = self.acks.lock().ok().and_then(|mut s| s.take());
        if let Some(sender) = sender {
            for pending in leftover {
                let _ = sender.send(AckOp::Nack(pending.ack_id));
            }
        }
        let acker = self.acker.lock().ok().and_then(|mut a| a.take());
        if let Some(acker) = acker {
            acker
                .await
                .map_err(|e| BackendError::io(format!("ack worker: {e}")))?;
        }
        Ok(())
    }
}

impl Delivery for RestDelivery {
    fn next(&self) -> BoxFuture<'_, Result<Option<Delivered>, BackendError>> {
        Box::pin(self.next_message())
    }

    fn stop(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.stopped.cancel();
        })
    }

    fn close(&self) -> BoxFuture<'_, Result<(), BackendError>> {
        Box::pin(self.shutdown())
    }
}

struct PullJob {
    client: Arc<RestClient>,
    path: String,
    buffer: Arc<Mutex<VecDeque<Pending>>>,
    stopped: CancellationToken,
    acks: mpsc::UnboundedSender<AckOp>,
    permits: Vec<OwnedSemaphorePermit>,
}

/// One `:pull` sized to the held permits. Returns how many messages were
/// buffered.
async fn pull_batch(job: PullJob) -> Result<usize, BackendError> {
    let request = PullRequest { max_messages: job.permits.len() };
    let resp: PullResponse = job
        .client
        .call(Method::POST, &format!("{}:pull", job.path), Some(&request))
        .await?;
    let pulled = resp
        .received_messages
        .into_iter()
        .map(|m| m.into_parts())
        .collect::<Result<Vec<_>, _>>()?;
    Ok(land(&job.buffer, &job.stopped, &job.acks, pulled, job.permits))
}

/// Buffer a pulled batch with its permits, or nack all of it once the
/// subscription is stopped. The stop check happens under the buffer lock,
/// the same lock `close` drains under.
fn land(
    buffer: &Mutex<VecDeque<Pending>>,
    stopped: &CancellationToken,
    acks: &mpsc::UnboundedSender<AckOp>,
    pulled: Vec<(String, InboundMessage)>,
    permits: Vec<OwnedSemaphorePermit>,
) -> usize {
    let mut buffer = match buffer.lock() {
        Ok(buffer) => buffer,
        Err(poisoned) => poisoned.into_inner(),
    };
    if stopped.is_cancelled() {
        tracing::debug!(count = pulled.len(), "pulled after stop, nacking");
        for (ack_id, _) in pulled {
            let _ = acks.send(AckOp::Nack(ack_id));
        }
        return 0;
    }
    let count = pulled.len();
    for ((ack_id, message), permit) in pulled.into_iter().zip(permits) {
        buffer.push_back(Pending { ack_id, message, permit });
    }
    count
}

// ═══════════════════════════════════════════════════════════════
//  Replies and the ack worker
// ═══════════════════════════════════════════════════════════════

struct RestReply {
    ack_id: Option<String>,
    acks: mpsc::UnboundedSender<AckOp>,
    _permit: OwnedSemaphorePermit,
}

impl AckReply for RestReply {
    fn ack(mut self: Box<Self>) {
        if let Some(id) = self.ack_id.take() {
            let _ = self.acks.send(AckOp::Ack(id));
        }
    }

    fn nack(mut self: Box<Self>) {
        if let Some(id) = self.ack_id.take() {
            let _ = self.acks.send(AckOp::Nack(id));
        }
    }
}

impl Drop for RestReply {
    fn drop(&mut self) {
        if let Some(id) = self.ack_id.take() {
            let _ = self.acks.send(AckOp::Nack(id));
        }
    }
}

/// Sends acks and nacks in batches until every sender is gone.
async fn run_acker(client: Arc<RestClient>, path: String, mut rx: mpsc::UnboundedReceiver<AckOp>) {
    while let Some(op) = rx.recv().await {
        let mut batch = vec![op];
        while batch.len() < ACK_BATCH {
            match rx.try_recv() {
                Ok(op) => batch.push(op),
                Err(_) => break,
            }
        }
        let (acks, nacks) = split_batch(batch);
        if !acks.is_empty() {
            let body = AcknowledgeRequest { ack_ids: &acks };
            let res: Result<serde_json::Value, _> =
                client.call(Method::POST, &format!("{path}:acknowledge"), Some(&body)).await;
            if let Err(e) = res {
                tracing::warn!(subscription = %path, count = acks.len(), error = %e, "acknowledge failed");
            }
        }
        if !nacks.is_empty() {
            let body = ModifyAckDeadlineRequest { ack_ids: &nacks, ack_deadline_seconds: 0 };
            let res: Result<serde_json::Value, _> =
                client.call(Method::POST, &format!("{path}:modifyAckDeadline"), Some(&body)).await;
            if let Err(e) = res {
                tracing::warn!(subscription = %path, count = nacks.len(), error = %e, "nack failed");
            }
        }
    }
    tracing::debug!(subscription = %path, "ack worker stopped");
}

fn split_batch(batch: Vec<AckOp>) -> (Vec<String>, Vec<String>) {
    let mut acks = Vec::new();
    let mut nacks = Vec::new();
    for op in batch {
        match op {
            AckOp::Ack(id) => acks.push(id),
            AckOp::Nack(id) => nacks.push(id),
        }
    }
    (acks, nacks)
}
