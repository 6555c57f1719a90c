use pubsub_api::BackendError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("topic '{0}' not found")]
    TopicNotFound(String),

    #[error("subscription '{0}' not found")]
    SubscriptionNotFound(String),

    #[error("topic '{0}' already exists")]
    TopicExists(String),

    #[error("subscription '{0}' already exists")]
    SubscriptionExists(String),
}

impl EngineError {
    /// Convert to BackendError preserving the kind.
    pub fn into_backend_error(self) -> BackendError {
        match self {
            EngineError::TopicNotFound(_) | EngineError::SubscriptionNotFound(_) => {
                BackendError::not_found(self.to_string())
            }
            EngineError::TopicExists(_) | EngineError::SubscriptionExists(_) => {
                BackendError::already_exists(self.to_string())
            }
        }
    }
}
