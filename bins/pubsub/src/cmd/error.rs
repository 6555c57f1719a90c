use pipeline::ReceiveError;
use pubsub_api::BackendError;

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("{0}")]
    Config(String),

    #[error("{0}")]
    Backend(#[from] BackendError),

    #[error("{0}")]
    Receive(#[from] ReceiveError),

    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("avro: {0}")]
    Avro(#[from] apache_avro::Error),

    #[error("{failed} of {total} operations failed")]
    Batch { failed: usize, total: usize },
}

impl CliError {
    /// Fail a batch if any of its items failed.
    pub fn check_batch(failed: usize, total: usize) -> Result<(), CliError> {
        if failed == 0 { Ok(()) } else { Err(CliError::Batch { failed, total }) }
    }
}
