use pubsub_api::BackendError;

#[derive(Debug, thiserror::Error)]
pub enum ReceiveError {
    #[error("could not receive: {0}")]
    Backend(#[from] BackendError),

    #[error("expected: {expected} messages; received: {processed} (accepted {accepted})")]
    ExpectationMismatch { expected: i64, processed: u64, accepted: u64 },

    #[error("output: {0}")]
    Output(#[from] std::io::Error),

    #[error("render message: {0}")]
    Render(#[from] serde_json::Error),

    #[error("receive worker: {0}")]
    Join(#[from] tokio::task::JoinError),
}
