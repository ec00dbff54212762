//! Delivery of watermark advances to consumers.
//!
//! The tracker only ever writes the latest watermark into a single slot and moves on, it never waits
//! for a consumer. Consumers either poll the slot as a [WatermarkStream] or get a relay task that
//! pushes every distinct value it observes into an mpsc channel. A consumer slower than the
//! producers only sees the most recent watermark, the intermediate ones are overwritten; since the
//! watermark is cumulative nothing is lost by skipping them.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_stream::Stream;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Single-slot mailbox holding the latest published watermark.
#[derive(Clone, Debug)]
pub(crate) struct Notifier {
    slot: Arc<watch::Sender<i64>>,
}

impl Notifier {
    pub(crate) fn new(watermark: i64) -> Self {
        let (slot, _) = watch::channel(watermark);
        Self {
            slot: Arc::new(slot),
        }
    }

    /// Overwrites the slot if `watermark` is ahead of what it holds. Returns whether subscribers
    /// were woken up. Never blocks on a subscriber.
    pub(crate) fn publish(&self, watermark: i64) -> bool {
        self.slot.send_if_modified(|current| {
            if watermark > *current {
                *current = watermark;
                true
            } else {
                false
            }
        })
    }

    pub(crate) fn latest(&self) -> i64 {
        *self.slot.borrow()
    }

    pub(crate) fn subscribe(&self) -> WatermarkStream {
        WatermarkStream {
            inner: WatchStream::from_changes(self.slot.subscribe()),
        }
    }

    /// Spawns a task forwarding each watermark published after this call to `tx`. The blocking
    /// send happens on the relay task, so a full channel only delays that subscriber. The task
    /// stops when `cancel` fires, when `tx` is closed, or when the tracker is dropped.
    pub(crate) fn relay(&self, tx: mpsc::Sender<i64>, cancel: CancellationToken) -> JoinHandle<()> {
        let mut rx = self.slot.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("Cancellation token received, stopping watermark relay");
                        return;
                    }
                    changed = rx.changed() => {
                        if changed.is_err() {
                            debug!("Watermark tracker dropped, stopping watermark relay");
                            return;
                        }
                    }
                }

                // take whatever is latest, values published while we were blocked are superseded
                let watermark = *rx.borrow_and_update();

                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("Cancellation token received, stopping watermark relay");
                        return;
                    }
                    sent = tx.send(watermark) => {
                        if sent.is_err() {
                            debug!(watermark, "Watermark receiver dropped, stopping watermark relay");
                            return;
                        }
                    }
                }
            }
        })
    }
}

/// Stream of watermark advances. Yields a value only when the watermark moved since the previous
/// poll, so a slow reader skips straight to the latest watermark. Ends when every handle to the
/// tracker has been dropped.
pub struct WatermarkStream {
    inner: WatchStream<i64>,
}

impl Stream for WatermarkStream {
    type Item = i64;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}
