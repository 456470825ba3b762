//! Explicit feed registry.
//!
//! Maps [`FeedId`] to its [`FeedController`], guaranteeing at most one
//! lifecycle task (and hence one live connection) per logical feed. This
//! replaces the ambient per-module connection singletons the pattern is
//! usually implemented with.

use crate::{
    connection::Transport,
    controller::{FeedController, FeedSnapshot},
    feed::{FeedConfig, FeedId},
    reducer::TickReducer,
};
use parking_lot::Mutex;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::watch;
use tracing::debug;

/// Registry of live feeds sharing one transport and configuration.
///
/// Each feed gets a fresh reducer from the factory so accumulator state is
/// never shared across feeds.
pub struct FeedRegistry<T, R>
where
    T: Transport,
    R: TickReducer,
{
    transport: Arc<T>,
    config: FeedConfig,
    make_reducer: Box<dyn Fn() -> R + Send + Sync>,
    feeds: Mutex<HashMap<FeedId, FeedController<R::Point>>>,
}

impl<T, R> FeedRegistry<T, R>
where
    T: Transport,
    R: TickReducer,
{
    pub fn new(
        transport: T,
        config: FeedConfig,
        make_reducer: impl Fn() -> R + Send + Sync + 'static,
    ) -> Self {
        Self {
            transport: Arc::new(transport),
            config,
            make_reducer: Box::new(make_reducer),
            feeds: Mutex::new(HashMap::new()),
        }
    }

    /// Subscribe to `feed`, spawning its lifecycle task on first request.
    /// Subsequent calls for the same feed join the existing controller.
    pub fn subscribe(&self, feed: FeedId) -> watch::Receiver<FeedSnapshot<R::Point>> {
        let mut feeds = self.feeds.lock();
        let controller = feeds.entry(feed.clone()).or_insert_with(|| {
            debug!(feed = %feed, "registering feed");
            FeedController::spawn(
                Arc::clone(&self.transport),
                (self.make_reducer)(),
                feed,
                self.config.clone(),
            )
        });
        controller.snapshots()
    }

    /// Shut down and forget `feed`. Returns false when it was not
    /// registered.
    pub fn remove(&self, feed: &FeedId) -> bool {
        match self.feeds.lock().remove(feed) {
            Some(controller) => {
                debug!(feed = %feed, "removing feed");
                controller.shutdown();
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, feed: &FeedId) -> bool {
        self.feeds.lock().contains_key(feed)
    }

    pub fn len(&self) -> usize {
        self.feeds.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.feeds.lock().is_empty()
    }

    /// Shut down every registered feed.
    pub fn shutdown_all(&self) {
        let mut feeds = self.feeds.lock();
        for (feed, controller) in feeds.drain() {
            debug!(feed = %feed, "shutting down feed");
            controller.shutdown();
        }
    }
}
