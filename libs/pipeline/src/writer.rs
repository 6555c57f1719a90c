use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Single consumer of the output queue. Lines are written in the order the
/// decision stage forwarded them.
pub(crate) struct OutputWriter<W> {
    pub(crate) out: W,
    pub(crate) rx: mpsc::Receiver<String>,
    pub(crate) cancel: CancellationToken,
}

impl<W> OutputWriter<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    /// Runs until the queue closes or cancellation fires with nothing left
    /// to write. Returns the writer and the number of lines written so the
    /// caller can finish the output.
    pub(crate) async fn run(mut self) -> std::io::Result<(W, u64)> {
        let mut written = 0;
        loop {
            tokio::select! {
                biased;
                line = self.rx.recv() => match line {
                    Some(line) => {
                        self.out.write_all(line.as_bytes()).await?;
                        self.out.flush().await?;
                        written += 1;
                    }
                    None => break,
                },
                _ = self.cancel.cancelled() => break,
            }
        }
        // The decision stage may still be forwarding its last record; the
        // queue ends when it drops its sender.
        while let Some(line) = self.rx.recv().await {
            self.out.write_all(line.as_bytes()).await?;
            written += 1;
        }
        self.out.flush().await?;
        Ok((self.out, written))
    }
}
