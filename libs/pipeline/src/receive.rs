use std::sync::Arc;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use pubsub_api::{Delivery, format_bytes};

use crate::config::ReceiveOptions;
use crate::decision::DecisionStage;
use crate::display::Display;
use crate::error::ReceiveError;
use crate::intake::Intake;
use crate::record::{ReceiveCounts, ReceiveState};
use crate::writer::OutputWriter;

/// Final counters of one receive invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiveSummary {
    pub counts: ReceiveCounts,
}

impl ReceiveSummary {
    pub fn describe(&self, subscription: &str) -> String {
        format!(
            "Received {} messages ({}) from {}",
            self.counts.accepted,
            format_bytes(self.counts.accepted_bytes),
            subscription
        )
    }
}

// ═══════════════════════════════════════════════════════════════
//  ReceivePipeline
// ═══════════════════════════════════════════════════════════════

/// Intake workers → processing queue → decision stage → output queue → writer.
///
/// Every stage watches one cancellation token. Shutdown is two-phase: the
/// token fires, then every task is joined before the counters are read.
pub struct ReceivePipeline {
    options: ReceiveOptions,
}

impl ReceivePipeline {
    pub fn new(options: ReceiveOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ReceiveOptions {
        &self.options
    }

    /// Drive `delivery` until the termination policy, a backend failure or
    /// `cancel` stops it. Output goes to `out`, which is returned so callers
    /// and tests can inspect it.
    pub async fn run<W>(
        &self,
        delivery: Arc<dyn Delivery>,
        out: W,
        cancel: CancellationToken,
    ) -> Result<(ReceiveSummary, W), ReceiveError>
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let token = cancel.child_token();
        let state = Arc::new(ReceiveState::new());
        let opts = &self.options;
        let display = Display::resolve(opts.output, opts.quiet, opts.verbose);

        let (record_tx, record_rx) = mpsc::channel(1);
        let (line_tx, line_rx) = mpsc::channel(1);

        // ─── Phase 0: start stages, consumers first ───
        let writer = {
            let writer = OutputWriter { out, rx: line_rx, cancel: token.clone() };
            let token = token.clone();
            tokio::spawn(async move {
                let result = writer.run().await;
                if result.is_err() {
                    token.cancel();
                }
                result
            })
        };

        let decision = tokio::spawn(
            DecisionStage {
                policy: opts.policy,
                state: state.clone(),
                rx: record_rx,
                out: line_tx,
                cancel: token.clone(),
            }
            .run(),
        );

        let workers = opts.settings.max_outstanding.max(1);
        let intakes: Vec<JoinHandle<Result<(), ReceiveError>>> = (0..workers)
            .map(|worker| {
                tokio::spawn(
                    Intake {
                        worker,
                        delivery: delivery.clone(),
                        display,
                        state: state.clone(),
                        no_ack: opts.no_ack,
                        tx: record_tx.clone(),
                        cancel: token.clone(),
                    }
                    .run(),
                )
            })
            .collect();
        drop(record_tx);
        let mode = display;
        tracing::debug!(workers, ?mode, "receive pipeline started");

        // ─── Phase 1: signal ───
        token.cancelled().await;
        delivery.stop().await;

        // ─── Phase 2: join ───
        let mut first_error: Option<ReceiveError> = None;
        for handle in intakes {
            let outcome = handle.await.map_err(ReceiveError::from).and_then(|r| r);
            if let Err(e) = outcome {
                first_error.get_or_insert(e);
            }
        }
        let decided = decision.await;
        let written = match writer.await {
            Ok(result) => result.map_err(ReceiveError::from),
            Err(e) => Err(e.into()),
        };

        // Settlements already made must reach the backend even when a stage failed.
        let closed = delivery.close().await;
        if let Err(e) = &closed {
            tracing::warn!(error = %e, "closing subscription failed");
        }

        if let Err(e) = decided {
            first_error.get_or_insert(e.into());
        }
        let (mut out, lines) = match written {
            Ok(written) => written,
            Err(e) => return Err(first_error.unwrap_or(e)),
        };
        if let Err(e) = closed {
            first_error.get_or_insert(e.into());
        }

        let counts = state.snapshot();
        tracing::debug!(?counts, lines, "receive pipeline stopped");

        if display.emits_markers() && lines > 0 {
            out.write_all(b"\n").await?;
            out.flush().await?;
        }

        if let Some(e) = first_error {
            return Err(e);
        }
        if let Some(expected) = opts.policy.limit.expected() {
            if i64::try_from(counts.processed).ok() != Some(expected) {
                return Err(ReceiveError::ExpectationMismatch {
                    expected,
                    processed: counts.processed,
                    accepted: counts.accepted,
                });
            }
        }

        Ok((ReceiveSummary { counts }, out))
    }
}
