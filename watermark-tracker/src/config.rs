use std::env;

use crate::Error;
use crate::Result;

const ENV_INITIAL_CAPACITY: &str = "WATERMARK_TRACKER_INITIAL_CAPACITY";
const ENV_MAX_DISTANCE: &str = "WATERMARK_TRACKER_MAX_DISTANCE";

/// Number of offsets the bitplane can hold ahead of the watermark before it has to grow.
const DEFAULT_INITIAL_CAPACITY: usize = 1024;

/// Smallest window a tracker is ever created with.
pub(crate) const MIN_CAPACITY: usize = 2;

/// What happens when an offset is marked further ahead of the watermark than the bitplane can
/// currently represent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CapacityPolicy {
    /// Grow the bitplane geometrically; marking never fails.
    #[default]
    Unbounded,
    /// Grow only while the distance from the watermark stays within `max_distance`. Marks beyond
    /// it are rejected with [Error::OutOfRange].
    Bounded { max_distance: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerConfig {
    /// Initial window, in offsets. Rounded up to whole bytes.
    pub initial_capacity: usize,
    pub capacity_policy: CapacityPolicy,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        TrackerConfig {
            initial_capacity: DEFAULT_INITIAL_CAPACITY,
            capacity_policy: CapacityPolicy::Unbounded,
        }
    }
}

impl TrackerConfig {
    pub fn with_initial_capacity(mut self, initial_capacity: usize) -> Self {
        self.initial_capacity = initial_capacity;
        self
    }

    pub fn with_max_distance(mut self, max_distance: usize) -> Self {
        self.capacity_policy = CapacityPolicy::Bounded { max_distance };
        self
    }

    /// Loads the configuration from `WATERMARK_TRACKER_*` environment variables, falling back to
    /// the defaults for unset variables.
    pub fn from_env() -> Result<Self> {
        Self::load(|key| env::var(key).ok())
    }

    /// Builds the configuration from a key lookup. `WATERMARK_TRACKER_MAX_DISTANCE` switches the
    /// tracker to [CapacityPolicy::Bounded].
    pub fn load<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = TrackerConfig::default();

        if let Some(value) = lookup(ENV_INITIAL_CAPACITY) {
            config.initial_capacity = parse_usize(ENV_INITIAL_CAPACITY, &value)?;
        }

        if let Some(value) = lookup(ENV_MAX_DISTANCE) {
            config.capacity_policy = CapacityPolicy::Bounded {
                max_distance: parse_usize(ENV_MAX_DISTANCE, &value)?,
            };
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if let CapacityPolicy::Bounded { max_distance: 0 } = self.capacity_policy {
            return Err(Error::Config(
                "max distance of a bounded tracker must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Window the tracker starts with, clamped to the minimum and to the bounded ceiling.
    pub(crate) fn effective_capacity(&self) -> usize {
        let capacity = self.initial_capacity.max(MIN_CAPACITY);
        match self.capacity_policy {
            CapacityPolicy::Unbounded => capacity,
            CapacityPolicy::Bounded { max_distance } => capacity.min(max_distance.max(MIN_CAPACITY)),
        }
    }
}

fn parse_usize(key: &str, value: &str) -> Result<usize> {
    value
        .trim()
        .parse::<usize>()
        .map_err(|e| Error::Config(format!("invalid value {value:?} for {key}: {e}")))
}
