use std::sync::atomic::{AtomicU64, Ordering};

use pubsub_api::Delivered;

// ═══════════════════════════════════════════════════════════════
//  FormattedRecord
// ═══════════════════════════════════════════════════════════════

/// What the decision stage did with a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Accept,
    Reject,
}

type Settle = Box<dyn FnOnce(Decision) + Send>;

/// A delivered message paired with its rendered output.
///
/// `accept` and `reject` both consume the record, so a message is settled
/// at most once.
pub struct FormattedRecord {
    display: String,
    settle: Settle,
}

impl FormattedRecord {
    pub fn new(display: String, settle: impl FnOnce(Decision) + Send + 'static) -> Self {
        Self { display, settle: Box::new(settle) }
    }

    /// Wrap a backend delivery. Accepting acks it and adds its payload to
    /// the counters; rejecting nacks it. With `no_ack` the backend is not
    /// told either way and nothing counts as accepted.
    pub fn from_delivery(
        delivered: Delivered,
        display: String,
        state: std::sync::Arc<ReceiveState>,
        no_ack: bool,
    ) -> Self {
        let Delivered { message, reply } = delivered;
        let bytes = message.data.len() as u64;
        Self::new(display, move |decision| match decision {
            Decision::Accept => {
                if !no_ack {
                    reply.ack();
                    state.record_accepted(bytes);
                }
            }
            Decision::Reject => {
                if !no_ack {
                    reply.nack();
                }
            }
        })
    }

    pub fn display(&self) -> &str {
        &self.display
    }

    /// Settle positively and hand back the text to print.
    pub fn accept(self) -> String {
        (self.settle)(Decision::Accept);
        self.display
    }

    pub fn reject(self) -> String {
        (self.settle)(Decision::Reject);
        self.display
    }
}

impl std::fmt::Debug for FormattedRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FormattedRecord").field("display", &self.display).finish_non_exhaustive()
    }
}

// ═══════════════════════════════════════════════════════════════
//  ReceiveState
// ═══════════════════════════════════════════════════════════════

/// Counters shared by every stage of one receive invocation.
#[derive(Debug, Default)]
pub struct ReceiveState {
    processed: AtomicU64,
    accepted: AtomicU64,
    accepted_bytes: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReceiveCounts {
    pub processed: u64,
    pub accepted: u64,
    pub accepted_bytes: u64,
}

impl ReceiveState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one message handed to the decision stage; returns the new total.
    pub fn record_processed(&self) -> u64 {
        self.processed.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn record_accepted(&self, bytes: u64) {
        self.accepted.fetch_add(1, Ordering::SeqCst);
        self.accepted_bytes.fetch_add(bytes, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> ReceiveCounts {
        ReceiveCounts {
            processed: self.processed.load(Ordering::SeqCst),
            accepted: self.accepted.load(Ordering::SeqCst),
            accepted_bytes: self.accepted_bytes.load(Ordering::SeqCst),
        }
    }
}
