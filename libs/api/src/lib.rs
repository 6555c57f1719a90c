pub mod backend;
pub mod error;
pub mod types;
pub mod util;

pub use backend::{AckReply, Admin, Backend, Delivered, Delivery, Publisher, Subscriber};
pub use error::{BackendError, ErrorKind};
pub use types::{
    Attributes, DEFAULT_WORKER_POOL, InboundMessage, OutgoingMessage, ReceiveSettings,
    SubscriptionInfo,
};
pub use util::{format_bytes, format_timestamp, short_name};

/// Boxed future returned by the backend traits.
pub type BoxFuture<'a, T> = std::pin::Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;
