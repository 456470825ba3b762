use std::time::Duration;
use thiserror::Error;

/// All errors generated in `tickflow`.
///
/// Every variant is recoverable: transport failures flow through the tick
/// stream as values and trigger reconnection rather than terminating the
/// feed task. Retry exhaustion is not an error but an observable lifecycle
/// state ([`DisconnectReason::RetryExhausted`](crate::DisconnectReason)).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeedError {
    #[error("invalid feed url: {0}")]
    Url(String),

    #[error("transport connect failed: {0}")]
    Connect(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("read timeout: no data received for {0:?}")]
    ReadTimeout(Duration),
}
