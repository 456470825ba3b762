//! Feed identity and configuration.

use crate::{backoff::ExponentialBackoff, error::FeedError};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::time::Duration;
use url::Url;

/// Default WebSocket endpoint (Binance USD-M futures combined streams).
pub const DEFAULT_WS_BASE: &str = "wss://fstream.binance.com/stream";

/// Default rolling series capacity.
pub const DEFAULT_SERIES_CAPACITY: usize = 100;

/// Default idle read timeout. If no data arrives within this period the
/// connection is treated as silently dead and reconnection kicks in.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(120);

/// Identity of one logical stream: a symbol plus the set of channels
/// multiplexed onto its connection.
///
/// Equality is structural: the symbol is lowercased and channels are kept
/// sorted and deduplicated, so `{aggTrade, forceOrder}` and
/// `{forceOrder, aggTrade}` name the same feed. Used as the registry key
/// enforcing at most one live connection per feed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct FeedId {
    symbol: SmolStr,
    channels: Vec<SmolStr>,
}

impl FeedId {
    pub fn new<S, C, I>(symbol: S, channels: I) -> Self
    where
        S: AsRef<str>,
        C: AsRef<str>,
        I: IntoIterator<Item = C>,
    {
        let mut channels: Vec<SmolStr> = channels
            .into_iter()
            .map(|channel| SmolStr::new(channel.as_ref()))
            .collect();
        channels.sort();
        channels.dedup();

        Self {
            symbol: SmolStr::new(symbol.as_ref().to_lowercase()),
            channels,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn channels(&self) -> impl Iterator<Item = &str> {
        self.channels.iter().map(|channel| channel.as_str())
    }

    /// Build the combined-stream URL for this feed, e.g.
    /// `wss://fstream.binance.com/stream?streams=btcusdt@aggTrade/btcusdt@forceOrder`.
    pub fn url(&self, ws_base: &str) -> Result<Url, FeedError> {
        if self.channels.is_empty() {
            return Err(FeedError::Url(format!(
                "feed {} has no channels",
                self.symbol
            )));
        }

        let mut url = Url::parse(ws_base).map_err(|error| FeedError::Url(error.to_string()))?;
        let streams = self
            .channels
            .iter()
            .map(|channel| format!("{}@{}", self.symbol, channel))
            .collect::<Vec<_>>()
            .join("/");
        url.set_query(Some(&format!("streams={streams}")));
        Ok(url)
    }
}

impl std::fmt::Display for FeedId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}[", self.symbol)?;
        for (index, channel) in self.channels.iter().enumerate() {
            if index > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", channel)?;
        }
        write!(f, "]")
    }
}

/// Feed lifecycle configuration.
///
/// Plain parameters passed at construction; no environment or file contract.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// WebSocket base URL the feed URL is built from.
    pub ws_base: String,
    /// Reconnect delay policy and retry budget.
    pub backoff: ExponentialBackoff,
    /// Rolling series capacity (FIFO eviction beyond this).
    pub series_capacity: usize,
    /// Idle read timeout; `None` disables the watchdog.
    pub read_timeout: Option<Duration>,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            ws_base: DEFAULT_WS_BASE.to_string(),
            backoff: ExponentialBackoff::default(),
            series_capacity: DEFAULT_SERIES_CAPACITY,
            read_timeout: Some(DEFAULT_READ_TIMEOUT),
        }
    }
}

impl FeedConfig {
    /// Create a new configuration with a custom WebSocket base URL.
    pub fn new(ws_base: impl Into<String>) -> Self {
        Self {
            ws_base: ws_base.into(),
            ..Default::default()
        }
    }

    /// Set the backoff policy.
    pub fn with_backoff(mut self, backoff: ExponentialBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Set the rolling series capacity.
    pub fn with_series_capacity(mut self, capacity: usize) -> Self {
        self.series_capacity = capacity;
        self
    }

    /// Set or disable the idle read timeout.
    pub fn with_read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }
}
