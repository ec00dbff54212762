//! The watermark is the highest offset up to which every offset has been marked complete. Offsets
//! are marked in any order and from any number of threads; the tracker records those ahead of the
//! watermark in a circular bitplane and moves the watermark across a run of completed offsets as
//! soon as the gap in front of it closes.
//!
//! A tracker is created with the last offset already known to be complete, so with
//! `WatermarkTracker::new(w)` the first offset it waits for is `w + 1`.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use crate::bitplane;
use crate::config::{CapacityPolicy, TrackerConfig};
use crate::notifier::{Notifier, WatermarkStream};
use crate::{Error, Result};

/// Point-in-time view of a tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    /// Every offset up to and including this one is complete.
    pub watermark: i64,
    /// Highest offset ever marked.
    pub latest_seen: i64,
    /// First offset the watermark is blocked on. Saturates at `i64::MAX` once the watermark has
    /// reached it.
    pub next_missing: i64,
    /// Offsets marked ahead of the watermark that are still waiting on a gap.
    pub pending: usize,
    /// Offsets that fit ahead of the watermark without growing.
    pub capacity: usize,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "watermark: {}, latest seen: {}, next missing: {}",
            self.watermark, self.latest_seen, self.next_missing
        )
    }
}

/// Everything guarded by the tracker lock.
#[derive(Debug)]
struct TrackerState {
    plane: Vec<u8>,
    watermark: i64,
    /// Physical position of the bit for `watermark + 1`.
    cursor_byte: usize,
    cursor_bit: usize,
    latest_seen: i64,
}

impl TrackerState {
    fn new(watermark: i64, capacity: usize) -> Self {
        Self {
            plane: vec![0; bitplane::byte_len(capacity)],
            watermark,
            cursor_byte: 0,
            cursor_bit: 0,
            latest_seen: watermark,
        }
    }

    fn capacity(&self) -> usize {
        bitplane::window(self.plane.len(), self.cursor_bit)
    }

    /// Records `offset` and advances the watermark if it was the one being waited on.
    fn mark(&mut self, offset: i64, policy: CapacityPolicy) -> Result<()> {
        let dist = offset.saturating_sub(self.watermark);
        if dist <= 0 {
            self.latest_seen = self.latest_seen.max(offset);
            return Ok(());
        }
        let dist = dist as u64 as usize;

        if let CapacityPolicy::Bounded { max_distance } = policy {
            if dist > max_distance {
                let max = ceiling(self.watermark, max_distance);
                warn!(offset, watermark = self.watermark, max, "Rejecting out of range offset");
                return Err(Error::OutOfRange { offset, max });
            }
        }

        self.latest_seen = self.latest_seen.max(offset);

        if dist > self.capacity() {
            self.grow(dist);
        }

        bitplane::set_bit(&mut self.plane, self.cursor_byte, self.cursor_bit, dist - 1);

        // anything but the very next offset leaves the gap in front of the watermark open
        if dist == 1 {
            self.advance();
        }
        Ok(())
    }

    fn grow(&mut self, needed: usize) {
        let old_len = self.plane.len();
        self.plane = bitplane::grow(&self.plane, self.cursor_byte, self.cursor_bit, needed);
        self.cursor_byte = 0;
        debug!(
            watermark = self.watermark,
            needed,
            old_bytes = old_len,
            new_bytes = self.plane.len(),
            "Grew watermark bitplane"
        );
    }

    fn run(&self) -> bitplane::Run {
        match bitplane::scan(&self.plane, self.cursor_byte, self.cursor_bit) {
            Some(run) => run,
            None => {
                error!(
                    watermark = self.watermark,
                    cursor_byte = self.cursor_byte,
                    cursor_bit = self.cursor_bit,
                    "No unset bit within one traversal of the bitplane"
                );
                panic!(
                    "watermark bitplane has no zero sentinel behind byte {}",
                    self.cursor_byte
                );
            }
        }
    }

    /// Moves the cursor across the run of set bits in front of it and zeroes what it passed.
    fn advance(&mut self) {
        let run = self.run();
        if run.distance == 0 {
            return;
        }

        bitplane::clear_run(
            &mut self.plane,
            self.cursor_byte,
            self.cursor_bit,
            run.distance,
        );
        self.watermark += run.distance as i64;
        self.cursor_byte = run.byte;
        self.cursor_bit = run.bit;

        debug_assert_eq!(
            self.plane
                .get(bitplane::sentinel(self.plane.len(), self.cursor_byte))
                .copied(),
            Some(0)
        );
        trace!(watermark = self.watermark, advanced_by = run.distance, "Advanced watermark");
    }

    fn status(&self) -> Status {
        let run = self.run();
        Status {
            watermark: self.watermark,
            latest_seen: self.latest_seen,
            next_missing: self
                .watermark
                .saturating_add(run.distance as i64)
                .saturating_add(1),
            pending: self.plane.iter().map(|b| b.count_ones() as usize).sum(),
            capacity: self.capacity(),
        }
    }
}

/// Highest offset a bounded tracker accepts while sitting at `watermark`.
fn ceiling(watermark: i64, max_distance: usize) -> i64 {
    watermark.saturating_add(i64::try_from(max_distance).unwrap_or(i64::MAX))
}

/// Tracks the watermark of a stream of offsets completed out of order.
///
/// Cloning is cheap and every clone shares the same state, so a tracker can be handed to as many
/// producer tasks as needed. Marking takes a short synchronous lock and never waits on consumers
/// of [WatermarkTracker::subscribe] or [WatermarkTracker::relay].
#[derive(Clone, Debug)]
pub struct WatermarkTracker {
    state: Arc<Mutex<TrackerState>>,
    policy: CapacityPolicy,
    notifier: Notifier,
}

impl WatermarkTracker {
    /// Creates an unbounded tracker with the default initial capacity. Every offset up to and
    /// including `watermark` is considered complete.
    pub fn new(watermark: i64) -> Self {
        Self::build(watermark, &TrackerConfig::default())
    }

    pub fn with_config(watermark: i64, config: TrackerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(watermark, &config))
    }

    fn build(watermark: i64, config: &TrackerConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(TrackerState::new(
                watermark,
                config.effective_capacity(),
            ))),
            policy: config.capacity_policy,
            notifier: Notifier::new(watermark),
        }
    }

    /// Marks `offset` complete and returns the watermark after doing so.
    ///
    /// Marking an offset twice, or one at or behind the watermark, changes nothing. Only a
    /// [CapacityPolicy::Bounded] tracker can fail, with [Error::OutOfRange] when `offset` is too far
    /// ahead of the watermark; the tracker is then left untouched.
    pub fn mark(&self, offset: i64) -> Result<i64> {
        let (before, after) = {
            let mut state = self.state.lock();
            let before = state.watermark;
            state.mark(offset, self.policy)?;
            (before, state.watermark)
        };

        if after > before {
            self.notifier.publish(after);
        }
        Ok(after)
    }

    /// Marks every offset under a single lock acquisition and publishes the resulting watermark
    /// once. Stops at the first rejected offset, offsets marked before it stay marked.
    pub fn mark_all<I>(&self, offsets: I) -> Result<i64>
    where
        I: IntoIterator<Item = i64>,
    {
        let (before, after, result) = {
            let mut state = self.state.lock();
            let before = state.watermark;
            let result = offsets
                .into_iter()
                .try_for_each(|offset| state.mark(offset, self.policy));
            (before, state.watermark, result)
        };

        if after > before {
            self.notifier.publish(after);
        }
        result.map(|_| after)
    }

    pub fn watermark(&self) -> i64 {
        self.state.lock().watermark
    }

    /// Offsets that currently fit ahead of the watermark without growing the bitplane.
    pub fn capacity(&self) -> usize {
        self.state.lock().capacity()
    }

    pub fn status(&self) -> Status {
        self.state.lock().status()
    }

    /// Stream of watermark advances made after this call.
    pub fn subscribe(&self) -> WatermarkStream {
        self.notifier.subscribe()
    }

    /// Spawns a task pushing every watermark advance made after this call into `tx`. Must be called
    /// from within a Tokio runtime.
    pub fn relay(&self, tx: mpsc::Sender<i64>, cancel: CancellationToken) -> JoinHandle<()> {
        self.notifier.relay(tx, cancel)
    }

    /// Last watermark handed to subscribers.
    pub fn published(&self) -> i64 {
        self.notifier.latest()
    }
}
