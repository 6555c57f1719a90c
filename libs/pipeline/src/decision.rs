use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::TerminationPolicy;
use crate::record::{FormattedRecord, ReceiveState};

/// The single consumer of the processing queue. Applies the termination
/// policy, settles each record and forwards accepted output in order.
pub(crate) struct DecisionStage {
    pub(crate) policy: TerminationPolicy,
    pub(crate) state: Arc<ReceiveState>,
    pub(crate) rx: mpsc::Receiver<FormattedRecord>,
    pub(crate) out: mpsc::Sender<String>,
    pub(crate) cancel: CancellationToken,
}

impl DecisionStage {
    pub(crate) async fn run(mut self) {
        tracing::debug!(policy = ?self.policy, "decision stage started");
        self.decide_loop().await;
        self.cancel.cancel();

        // Anything still queued was never judged; hand it back.
        self.rx.close();
        while let Some(record) = self.rx.recv().await {
            record.reject();
        }
        tracing::debug!("decision stage stopped");
    }

    async fn decide_loop(&mut self) {
        loop {
            let idle = idle_timer(self.policy.idle_timeout);
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return,
                next = self.rx.recv() => {
                    let Some(record) = next else { return };
                    if self.decide(record).await {
                        return;
                    }
                }
                _ = idle => {
                    if let Some(wait) = self.policy.idle_timeout {
                        tracing::info!(wait = ?wait, "no message within idle timeout, cancelling");
                    }
                    return;
                }
            }
        }
    }

    /// Returns true when the policy says to stop after this record.
    async fn decide(&mut self, record: FormattedRecord) -> bool {
        let n = self.state.record_processed();
        let verdict = self.policy.limit.judge(n);
        // Fire before settling: a nack frees a permit the intakes must not reuse.
        if verdict.stop {
            self.cancel.cancel();
        }
        if verdict.accept {
            let line = record.accept();
            if !line.is_empty() && self.out.send(line).await.is_err() {
                tracing::debug!("output closed, dropping accepted record");
            }
        } else {
            let line = record.reject();
            tracing::info!(processed = n, record = %line.trim_end(), "refused message");
        }
        verdict.stop
    }
}

async fn idle_timer(wait: Option<Duration>) {
    match wait {
        Some(wait) => tokio::time::sleep(wait).await,
        None => std::future::pending().await,
    }
}
