use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Message attributes. Ordered so display output is deterministic.
pub type Attributes = BTreeMap<String, String>;

/// Number of concurrent delivery workers requested from a backend when more
/// than one message may be outstanding.
pub const DEFAULT_WORKER_POOL: usize = 10;

// ════════════════════════════════════════════════════════════════
//  Messages
// ════════════════════════════════════════════════════════════════

/// A message to be published. The server assigns id and publish time.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub data: Vec<u8>,
    pub attributes: Attributes,
}

impl OutgoingMessage {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self { data: data.into(), attributes: Attributes::new() }
    }

    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = attributes;
        self
    }
}

/// A message delivered from a subscription.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundMessage {
    /// Server-assigned message id.
    pub id: String,
    pub publish_time: DateTime<Utc>,
    pub data: Vec<u8>,
    pub attributes: Attributes,
    /// Empty when the publisher did not set one.
    pub ordering_key: String,
    /// Only reported by subscriptions with a dead-letter policy.
    pub delivery_attempt: Option<u32>,
}

// ════════════════════════════════════════════════════════════════
//  Subscriptions
// ════════════════════════════════════════════════════════════════

/// Subscription metadata as reported by the backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubscriptionInfo {
    pub name: String,
    pub topic: String,
    pub ack_deadline: Duration,
    pub retain_acked_messages: bool,
}

/// Flow-control settings for one receive invocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReceiveSettings {
    /// Delivered-but-undecided messages allowed at once. Always >= 1.
    pub max_outstanding: usize,
    /// Concurrent delivery workers the backend should run.
    pub workers: usize,
}

impl ReceiveSettings {
    /// Settings for a requested concurrency. Anything above one raises the
    /// backend worker count to the default pool size.
    pub fn for_concurrency(concurrency: usize) -> Self {
        let max_outstanding = concurrency.max(1);
        let workers = if max_outstanding > 1 { DEFAULT_WORKER_POOL } else { 1 };
        Self { max_outstanding, workers }
    }
}

impl Default for ReceiveSettings {
    fn default() -> Self {
        Self::for_concurrency(1)
    }
}
