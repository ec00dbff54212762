//! Simulates a pool of workers acknowledging offsets out of order while a committer follows the
//! watermark. Run with `RUST_LOG=debug WATERMARK_TRACKER_INITIAL_CAPACITY=8` to see the bitplane
//! grow.

use std::time::Duration;

use rand::Rng;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{Level, error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{Layer, filter::EnvFilter, fmt};
use watermark_tracker::{TrackerConfig, WatermarkTracker};

const WORKERS: i64 = 4;
const OFFSETS_PER_WORKER: i64 = 250;

fn setup_tracing() {
    let filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(fmt::layer().with_filter(filter))
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    setup_tracing();

    let config = TrackerConfig::from_env()?;
    let tracker = WatermarkTracker::with_config(0, config)?;

    let (tx, mut rx) = mpsc::channel(1);
    let cancel = CancellationToken::new();
    let relay = tracker.relay(tx, cancel.clone());

    let committer = tokio::spawn(async move {
        while let Some(watermark) = rx.recv().await {
            info!(watermark, "Committing");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    });

    let last = WORKERS * OFFSETS_PER_WORKER;
    let mut workers = Vec::new();
    for worker in 0..WORKERS {
        let tracker = tracker.clone();
        workers.push(tokio::spawn(async move {
            // worker `w` owns every offset congruent to `w`, finishing each after a random delay
            let mut offset = worker + 1;
            while offset <= last {
                let delay = rand::rng().random_range(0..3);
                tokio::time::sleep(Duration::from_millis(delay)).await;
                tracker.mark(offset)?;
                offset += WORKERS;
            }
            Ok::<_, watermark_tracker::Error>(())
        }));
    }

    for worker in workers {
        worker.await.inspect_err(|e| error!(?e, "Worker task failed"))??;
    }

    info!(status = %tracker.status(), "All offsets acknowledged");

    // let the committer catch up with the final watermark before shutting down
    while tracker.published() < last {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();
    relay
        .await
        .inspect_err(|e| error!(?e, "Watermark relay task failed"))?;
    committer
        .await
        .inspect_err(|e| error!(?e, "Committer task failed"))?;
    Ok(())
}
