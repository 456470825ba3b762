//! Feed lifecycle: connect, stream, reconnect with backoff, teardown.
//!
//! One spawned task owns everything for a feed (connection, aggregator,
//! retry counter), so every state transition happens on that task and is
//! atomic with respect to the others. Consumers observe the feed through a
//! `watch` channel of [`FeedSnapshot`]s and steer it with commands.

use crate::{
    aggregator::TickAggregator,
    connection::{Connection, Transport},
    feed::{FeedConfig, FeedId},
    reducer::TickReducer,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Observable lifecycle state, published with every snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FeedStatus {
    /// No connection requested yet.
    Idle,
    /// Connection attempt in flight.
    Connecting,
    /// Live connection, ticks flowing.
    Open,
    /// Waiting out the backoff delay before attempt `attempt`.
    Reconnecting { attempt: u32 },
    /// No connection and none pending.
    Disconnected(DisconnectReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DisconnectReason {
    /// The retry budget is spent; an explicit `resume` or `switch` is
    /// required to go again.
    RetryExhausted,
    /// Explicit teardown.
    Shutdown,
}

/// Snapshot emitted to subscribers on every state change and ingested tick.
#[derive(Debug, Clone, Serialize)]
pub struct FeedSnapshot<P> {
    pub feed: FeedId,
    /// Oldest-to-newest rolling window.
    pub series: Vec<P>,
    /// Running sum of reducer deltas since the last feed change.
    pub cumulative: f64,
    pub status: FeedStatus,
    pub updated_at: DateTime<Utc>,
}

impl<P> FeedSnapshot<P> {
    fn idle(feed: FeedId) -> Self {
        Self {
            feed,
            series: Vec::new(),
            cumulative: 0.0,
            status: FeedStatus::Idle,
            updated_at: Utc::now(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            FeedStatus::Disconnected(DisconnectReason::RetryExhausted)
        )
    }
}

enum Command {
    Switch(FeedId),
    Resume,
    Shutdown,
}

/// Handle to one feed lifecycle task.
///
/// Dropping the handle (all clones of the command sender) tears the task
/// down, tying the connection's lifetime to the consumer's.
pub struct FeedController<P> {
    command_tx: mpsc::UnboundedSender<Command>,
    snapshot_rx: watch::Receiver<FeedSnapshot<P>>,
    handle: tokio::task::JoinHandle<()>,
}

impl<P: Clone + Send + Sync + 'static> FeedController<P> {
    /// Spawn the lifecycle task and immediately request `feed`.
    pub fn spawn<T, R>(transport: Arc<T>, reducer: R, feed: FeedId, config: FeedConfig) -> Self
    where
        T: Transport,
        R: TickReducer<Point = P>,
    {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(FeedSnapshot::idle(feed.clone()));

        let handle = tokio::spawn(run_feed_loop(
            transport,
            reducer,
            feed,
            config,
            command_rx,
            snapshot_tx,
        ));

        Self {
            command_tx,
            snapshot_rx,
            handle,
        }
    }

    /// Tear down the current connection (cancelling any pending reconnect),
    /// reset all aggregation state, and connect to `feed`.
    pub fn switch(&self, feed: FeedId) {
        let _ = self.command_tx.send(Command::Switch(feed));
    }

    /// Explicitly resume after retry exhaustion (or skip a pending backoff
    /// delay).
    pub fn resume(&self) {
        let _ = self.command_tx.send(Command::Resume);
    }

    /// Tear down the feed for good.
    pub fn shutdown(&self) {
        let _ = self.command_tx.send(Command::Shutdown);
    }

    /// Subscribe to snapshot updates.
    pub fn snapshots(&self) -> watch::Receiver<FeedSnapshot<P>> {
        self.snapshot_rx.clone()
    }

    /// Latest snapshot without waiting.
    pub fn latest(&self) -> FeedSnapshot<P> {
        self.snapshot_rx.borrow().clone()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

async fn run_feed_loop<T, R>(
    transport: Arc<T>,
    reducer: R,
    initial_feed: FeedId,
    config: FeedConfig,
    mut command_rx: mpsc::UnboundedReceiver<Command>,
    snapshot_tx: watch::Sender<FeedSnapshot<R::Point>>,
) where
    T: Transport,
    R: TickReducer,
{
    let mut aggregator = TickAggregator::new(reducer, config.series_capacity);
    let mut feed = initial_feed;
    let mut retries: u32 = 0;

    let publish = |feed: &FeedId, aggregator: &TickAggregator<R>, status: FeedStatus| {
        let series = aggregator.snapshot();
        snapshot_tx.send_replace(FeedSnapshot {
            feed: feed.clone(),
            series: series.points,
            cumulative: series.cumulative,
            status,
            updated_at: Utc::now(),
        });
    };

    info!(feed = %feed, "starting feed lifecycle");

    'lifecycle: loop {
        // Connecting
        publish(&feed, &aggregator, FeedStatus::Connecting);

        let connect = Connection::open(transport.as_ref(), feed.clone(), &config);
        tokio::pin!(connect);
        let connected = loop {
            tokio::select! {
                result = &mut connect => break result,
                command = command_rx.recv() => match command {
                    Some(Command::Switch(next)) => {
                        debug!(from = %feed, to = %next, "feed switch while connecting");
                        aggregator.reset();
                        retries = 0;
                        feed = next;
                        continue 'lifecycle;
                    }
                    Some(Command::Resume) => {}
                    Some(Command::Shutdown) | None => {
                        publish(&feed, &aggregator, FeedStatus::Disconnected(DisconnectReason::Shutdown));
                        return;
                    }
                },
            }
        };

        match connected {
            Ok(mut connection) => {
                info!(feed = %feed, "connected");
                retries = 0;
                publish(&feed, &aggregator, FeedStatus::Open);

                // Connected: pump ticks until an unplanned close or a command.
                loop {
                    tokio::select! {
                        message = connection.next() => match message {
                            Some(Ok(tick)) => {
                                if aggregator.ingest(&tick) {
                                    publish(&feed, &aggregator, FeedStatus::Open);
                                }
                            }
                            Some(Err(err)) => {
                                warn!(feed = %feed, %err, "stream error");
                                connection.close();
                                break;
                            }
                            None => {
                                warn!(feed = %feed, "stream ended");
                                connection.close();
                                break;
                            }
                        },
                        command = command_rx.recv() => match command {
                            Some(Command::Switch(next)) => {
                                debug!(from = %feed, to = %next, "feed switch while connected");
                                connection.close();
                                aggregator.reset();
                                retries = 0;
                                feed = next;
                                continue 'lifecycle;
                            }
                            Some(Command::Resume) => {}
                            Some(Command::Shutdown) | None => {
                                connection.close();
                                info!(feed = %feed, "shutdown");
                                publish(&feed, &aggregator, FeedStatus::Disconnected(DisconnectReason::Shutdown));
                                return;
                            }
                        },
                    }
                }
            }
            Err(err) => {
                warn!(feed = %feed, %err, "connect failed");
            }
        }

        // Unplanned close: consult the backoff policy.
        retries += 1;
        if config.backoff.should_give_up(retries) {
            error!(
                feed = %feed,
                ceiling = config.backoff.ceiling(),
                "retry ceiling reached, giving up"
            );
            publish(
                &feed,
                &aggregator,
                FeedStatus::Disconnected(DisconnectReason::RetryExhausted),
            );

            // Terminal until an explicit request arrives.
            loop {
                match command_rx.recv().await {
                    Some(Command::Resume) => {
                        info!(feed = %feed, "explicit reconnect requested");
                        retries = 0;
                        continue 'lifecycle;
                    }
                    Some(Command::Switch(next)) => {
                        aggregator.reset();
                        retries = 0;
                        feed = next;
                        continue 'lifecycle;
                    }
                    Some(Command::Shutdown) | None => {
                        publish(&feed, &aggregator, FeedStatus::Disconnected(DisconnectReason::Shutdown));
                        return;
                    }
                }
            }
        }

        let delay = config.backoff.next_delay(retries);
        debug!(feed = %feed, attempt = retries, ?delay, "waiting before reconnect");
        publish(&feed, &aggregator, FeedStatus::Reconnecting { attempt: retries });

        // Cancellable backoff sleep: a switch or shutdown arriving here must
        // win against the pending timer.
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => break,
                command = command_rx.recv() => match command {
                    Some(Command::Switch(next)) => {
                        debug!(from = %feed, to = %next, "feed switch cancels pending reconnect");
                        aggregator.reset();
                        retries = 0;
                        feed = next;
                        continue 'lifecycle;
                    }
                    Some(Command::Resume) => break,
                    Some(Command::Shutdown) | None => {
                        publish(&feed, &aggregator, FeedStatus::Disconnected(DisconnectReason::Shutdown));
                        return;
                    }
                },
            }
        }
    }
}
