//! Transport layer: one live WebSocket connection per feed.
//!
//! [`Transport`] is the seam between the lifecycle loop and the wire so the
//! reconnect machinery can be driven by an in-memory transport in tests.
//! [`WsTransport`] is the production implementation.

use crate::{
    error::FeedError,
    feed::{FeedConfig, FeedId},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt, stream::BoxStream};
use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};
use url::Url;

/// Opaque payload delivered by the transport.
///
/// Consumed synchronously by the aggregator's reducer and discarded; nothing
/// outside the reducer inspects it.
#[derive(Debug, Clone, PartialEq)]
pub struct RawTick {
    pub payload: String,
    pub time_received: DateTime<Utc>,
}

impl RawTick {
    pub fn new(payload: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            time_received: Utc::now(),
        }
    }
}

/// Stream of raw ticks for one connection. Ends on orderly close; yields
/// `Err` for transport failures (both trigger reconnection upstream).
pub type TickStream = BoxStream<'static, Result<RawTick, FeedError>>;

/// Transport-level connector for one feed URL.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn connect(&self, url: &Url) -> Result<TickStream, FeedError>;
}

/// Live WebSocket transport backed by tokio-tungstenite.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsTransport;

#[async_trait]
impl Transport for WsTransport {
    async fn connect(&self, url: &Url) -> Result<TickStream, FeedError> {
        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .map_err(|error| FeedError::Connect(error.to_string()))?;

        let stream = ws_stream
            .filter_map(|message| async move {
                match message {
                    Ok(Message::Text(text)) => Some(Ok(RawTick::new(text.to_string()))),
                    Ok(Message::Binary(payload)) => match String::from_utf8(payload.to_vec()) {
                        Ok(text) => Some(Ok(RawTick::new(text))),
                        Err(_) => {
                            debug!("skipping non-utf8 binary frame");
                            None
                        }
                    },
                    // Heartbeats are answered at the protocol layer.
                    Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => None,
                    Ok(Message::Close(frame)) => {
                        debug!(?frame, "server closed connection");
                        None
                    }
                    Err(error) => Some(Err(FeedError::Transport(error.to_string()))),
                }
            })
            .boxed();

        Ok(stream)
    }
}

/// Owner of at most one live transport stream for a single [`FeedId`].
///
/// Dropping the stream releases the underlying socket, so `close` is
/// idempotent and the resource is released on every exit path, including
/// when `open` itself fails.
pub struct Connection {
    feed: FeedId,
    stream: Option<TickStream>,
}

impl Connection {
    /// Establish the transport connection for `feed`, applying the idle
    /// read watchdog when configured.
    pub async fn open<T>(transport: &T, feed: FeedId, config: &FeedConfig) -> Result<Self, FeedError>
    where
        T: Transport + ?Sized,
    {
        let url = feed.url(&config.ws_base)?;
        debug!(feed = %feed, url = %url, "opening connection");

        let stream = transport.connect(&url).await?;
        let stream = match config.read_timeout {
            Some(timeout) => TimeoutStream::new(stream, timeout).boxed(),
            None => stream,
        };

        Ok(Self {
            feed,
            stream: Some(stream),
        })
    }

    pub fn feed(&self) -> &FeedId {
        &self.feed
    }

    /// Next tick, or `None` once the stream has ended or the connection was
    /// closed.
    pub async fn next(&mut self) -> Option<Result<RawTick, FeedError>> {
        match self.stream.as_mut() {
            Some(stream) => stream.next().await,
            None => None,
        }
    }

    /// Release the transport resource. Safe to call multiple times.
    pub fn close(&mut self) {
        if self.stream.take().is_some() {
            debug!(feed = %self.feed, "connection closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.stream.is_none()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

/// Stream wrapper that yields a [`FeedError::ReadTimeout`] when no data is
/// received for the configured period, so silent WebSocket death triggers
/// the reconnect path instead of hanging forever.
#[derive(Debug)]
pub struct TimeoutStream<S> {
    inner: S,
    timeout: Duration,
    deadline: Pin<Box<tokio::time::Sleep>>,
}

impl<S> TimeoutStream<S> {
    pub fn new(inner: S, timeout: Duration) -> Self {
        Self {
            inner,
            timeout,
            deadline: Box::pin(tokio::time::sleep(timeout)),
        }
    }
}

impl<S> Stream for TimeoutStream<S>
where
    S: Stream<Item = Result<RawTick, FeedError>> + Unpin,
{
    type Item = Result<RawTick, FeedError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let timeout = this.timeout;

        match Pin::new(&mut this.inner).poll_next(cx) {
            Poll::Ready(Some(item)) => {
                this.deadline
                    .as_mut()
                    .reset(tokio::time::Instant::now() + timeout);
                Poll::Ready(Some(item))
            }
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => match this.deadline.as_mut().poll(cx) {
                Poll::Ready(()) => {
                    warn!(timeout_secs = timeout.as_secs(), "read timeout, no data received");
                    // Re-arm so a poll after the error does not fire again
                    // immediately.
                    this.deadline
                        .as_mut()
                        .reset(tokio::time::Instant::now() + timeout);
                    Poll::Ready(Some(Err(FeedError::ReadTimeout(timeout))))
                }
                Poll::Pending => Poll::Pending,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn pending_stream() -> TickStream {
        stream::pending().boxed()
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let mut connection = Connection {
            feed: FeedId::new("btcusdt", ["aggTrade"]),
            stream: Some(pending_stream()),
        };

        assert!(!connection.is_closed());
        connection.close();
        assert!(connection.is_closed());
        connection.close();
        assert!(connection.is_closed());
        assert!(connection.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_stream_flags_silent_death() {
        let mut stream = TimeoutStream::new(pending_stream(), Duration::from_secs(120));

        let item = stream.next().await;
        assert_eq!(
            item,
            Some(Err(FeedError::ReadTimeout(Duration::from_secs(120))))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_stream_passes_data_through() {
        let inner = stream::iter(vec![Ok(RawTick::new("tick-1")), Ok(RawTick::new("tick-2"))]).boxed();
        let mut stream = TimeoutStream::new(inner, Duration::from_secs(120));

        assert_eq!(stream.next().await.unwrap().unwrap().payload, "tick-1");
        assert_eq!(stream.next().await.unwrap().unwrap().payload, "tick-2");
        assert!(stream.next().await.is_none());
    }
}
