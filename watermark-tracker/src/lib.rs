//! Watermark tracking for offsets that complete out of order.
//!
//! Parallel consumers, retried sends and reordered acks all finish work out of order, but progress
//! can only be committed up to the first offset that is still outstanding. [WatermarkTracker]
//! accepts completed offsets in any order from any number of threads and maintains that commit
//! point, the watermark. Advances are published to subscribers through a single-slot relay so a
//! slow consumer never holds up producers.
//!
//! ```
//! use watermark_tracker::WatermarkTracker;
//!
//! // offsets up to 0 are already committed
//! let tracker = WatermarkTracker::new(0);
//! assert_eq!(tracker.mark(2).unwrap(), 0);
//! assert_eq!(tracker.mark(3).unwrap(), 0);
//! assert_eq!(tracker.mark(1).unwrap(), 3);
//! ```

mod bitplane;
mod notifier;

pub(crate) mod error;
pub use error::Error;
pub use error::Result;

/// Capacity policy and environment based configuration of a tracker.
pub mod config;
pub use config::{CapacityPolicy, TrackerConfig};

mod tracker;
pub use notifier::WatermarkStream;
pub use tracker::{Status, WatermarkTracker};
