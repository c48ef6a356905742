use crate::Error;
use std::time::Duration;

/// Configuration for [super::ShardedStorageClient].
#[derive(Clone, Debug)]
pub struct Config {
    /// Number of shards (lanes) the ledger is split across.
    ///
    /// Must equal `2^log2_lanes`.
    pub shards: usize,

    /// Base-2 logarithm of the number of lanes, used to route resources to shards.
    pub log2_lanes: u32,

    /// How long discovery waits for every shard to connect and answer.
    pub connect_timeout: Duration,

    /// Longest the discovery worker sleeps between drain cycles when not woken.
    pub poll_interval: Duration,

    /// Maximum number of finished discovery workers taken from the queue at once.
    pub harvest_limit: usize,

    /// How long to wait for a shard to answer a single call.
    pub call_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            shards: 1,
            log2_lanes: 0,
            connect_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(100),
            harvest_limit: 1024,
            call_timeout: Duration::from_secs(30),
        }
    }
}

impl Config {
    /// A configuration for `2^log2_lanes` shards, with defaults for everything else.
    pub fn with_lanes(log2_lanes: u32) -> Self {
        Self {
            shards: 1usize.checked_shl(log2_lanes).unwrap_or(0),
            log2_lanes,
            ..Self::default()
        }
    }

    /// Ensure the configuration is usable.
    pub fn validate(&self) -> Result<(), Error> {
        if self.log2_lanes >= u32::BITS {
            return Err(Error::InvalidConfig("log2_lanes must be less than 32"));
        }
        if self.shards != 1usize << self.log2_lanes {
            return Err(Error::InvalidConfig("shards must equal 2^log2_lanes"));
        }
        if self.poll_interval.is_zero() {
            return Err(Error::InvalidConfig("poll_interval must be non-zero"));
        }
        if self.harvest_limit == 0 {
            return Err(Error::InvalidConfig("harvest_limit must be non-zero"));
        }
        Ok(())
    }
}
