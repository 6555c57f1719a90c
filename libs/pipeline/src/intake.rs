use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use pubsub_api::{Delivered, Delivery};

use crate::display::Display;
use crate::error::ReceiveError;
use crate::record::{FormattedRecord, ReceiveState};

/// One delivery worker: pulls messages from the backend, renders them and
/// hands them to the decision stage.
pub(crate) struct Intake {
    pub(crate) worker: usize,
    pub(crate) delivery: Arc<dyn Delivery>,
    pub(crate) display: Display,
    pub(crate) state: Arc<ReceiveState>,
    pub(crate) no_ack: bool,
    pub(crate) tx: mpsc::Sender<FormattedRecord>,
    pub(crate) cancel: CancellationToken,
}

impl Intake {
    pub(crate) async fn run(self) -> Result<(), ReceiveError> {
        tracing::debug!(worker = self.worker, "intake started");
        let result = self.pull_loop().await;
        if let Err(e) = &result {
            tracing::warn!(worker = self.worker, error = %e, "intake failed, cancelling receive");
            self.cancel.cancel();
        }
        tracing::debug!(worker = self.worker, "intake stopped");
        result
    }

    async fn pull_loop(&self) -> Result<(), ReceiveError> {
        loop {
            let delivered = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(()),
                next = self.delivery.next() => match next {
                    Ok(Some(d)) => d,
                    Ok(None) => return Ok(()),
                    Err(e) if e.is_cancelled() => return Ok(()),
                    Err(e) => return Err(e.into()),
                },
            };
            self.hand_over(delivered).await?;
        }
    }

    async fn hand_over(&self, delivered: Delivered) -> Result<(), ReceiveError> {
        let display = match self.display.render(&delivered.message) {
            Ok(text) => text,
            Err(e) => {
                if !self.no_ack {
                    delivered.reply.nack();
                }
                return Err(e);
            }
        };
        let record = FormattedRecord::from_delivery(delivered, display, self.state.clone(), self.no_ack);

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                record.reject();
            }
            permit = self.tx.reserve() => match permit {
                Ok(permit) => permit.send(record),
                Err(_) => {
                    record.reject();
                }
            },
        }
        Ok(())
    }
}
