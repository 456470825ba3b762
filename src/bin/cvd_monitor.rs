//! Live CVD monitor: streams aggregated trades for one symbol and logs the
//! rolling cumulative volume delta.
//!
//! Usage: `cvd-monitor [SYMBOL]` (default BTCUSDT).

use std::sync::Arc;
use tickflow::{CvdReducer, FeedConfig, FeedController, FeedId, FeedStatus, WsTransport};
use tracing::{info, warn};

#[tokio::main]
async fn main() {
    init_logging();

    let symbol = std::env::args().nth(1).unwrap_or_else(|| "BTCUSDT".to_string());
    let feed = FeedId::new(&symbol, ["aggTrade"]);
    info!(feed = %feed, "starting CVD monitor");

    let controller = FeedController::spawn(
        Arc::new(WsTransport),
        CvdReducer,
        feed,
        FeedConfig::default(),
    );

    let mut snapshots = controller.snapshots();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("ctrl-c received, shutting down");
                break;
            }
            changed = snapshots.changed() => {
                if changed.is_err() {
                    warn!("feed task ended");
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                match snapshot.status {
                    FeedStatus::Open => {
                        if let Some(point) = snapshot.series.last() {
                            info!(
                                price = point.price,
                                delta_quote = point.delta_quote,
                                cvd_quote = snapshot.cumulative,
                                points = snapshot.series.len(),
                                "tick"
                            );
                        }
                    }
                    status => info!(?status, "feed status"),
                }
            }
        }
    }

    controller.shutdown();
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}
