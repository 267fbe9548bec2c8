//! Engine tuning parameters.

use serde::{Deserialize, Serialize};

/// Errors from [`SwimConfig::validate`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A duration or count that must be positive is zero
    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    /// Indirect probes need longer than the direct probe they follow
    #[error("pingreq_timeout_ms ({pingreq}) must exceed ping_timeout_ms ({ping})")]
    PingReqNotAfterPing {
        /// Direct ack timeout
        ping: u64,
        /// Indirect ack timeout
        pingreq: u64,
    },
}

/// SWIM engine configuration
///
/// None of these values are part of the wire contract; they trade detection
/// latency against false positives and bandwidth and should scale with
/// cluster size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwimConfig {
    /// Interval between probe rounds
    pub probe_interval_ms: u64,
    /// Time to wait for a direct ack
    pub ping_timeout_ms: u64,
    /// Time, measured from the start of the round, to wait for a relayed ack
    pub pingreq_timeout_ms: u64,
    /// Number of members asked to probe indirectly
    pub pingreq_fanout: usize,
    /// Time a member stays Suspect before it is Confirmed
    pub suspicion_timeout_ms: u64,
    /// Interval between gossip rounds
    pub gossip_interval_ms: u64,
    /// Number of members sent rumors per gossip round
    pub gossip_fanout: usize,
    /// Retransmissions per rumor are `retransmit_mult * ceil(log2(n + 1))`
    pub retransmit_mult: u32,
    /// How long a saturated rumor is kept for late joiners
    pub rumor_retention_ms: u64,
    /// Upper bound on rumors attached to one message
    pub piggyback_max_rumors: usize,
    /// Upper bound on encoded datagram size
    pub max_datagram_bytes: usize,
    /// Prune Confirmed members this long after confirmation; never if unset
    pub tombstone_retention_ms: Option<u64>,
    /// Seed for probe ordering and fanout selection; random if unset
    pub rng_seed: Option<u64>,
}

impl SwimConfig {
    /// Create a config with default timings
    #[must_use]
    pub fn new() -> Self {
        Self {
            probe_interval_ms: 1000,
            ping_timeout_ms: 300,
            pingreq_timeout_ms: 600,
            pingreq_fanout: 3,
            suspicion_timeout_ms: 3000,
            gossip_interval_ms: 500,
            gossip_fanout: 3,
            retransmit_mult: 3,
            rumor_retention_ms: 30_000,
            piggyback_max_rumors: 8,
            max_datagram_bytes: 1400,
            tombstone_retention_ms: None,
            rng_seed: None,
        }
    }

    /// Set probe interval
    #[must_use]
    pub fn with_probe_interval(mut self, ms: u64) -> Self {
        self.probe_interval_ms = ms;
        self
    }

    /// Set direct and indirect ack timeouts
    #[must_use]
    pub fn with_ack_timeouts(mut self, ping_ms: u64, pingreq_ms: u64) -> Self {
        self.ping_timeout_ms = ping_ms;
        self.pingreq_timeout_ms = pingreq_ms;
        self
    }

    /// Set indirect probe fanout
    #[must_use]
    pub fn with_pingreq_fanout(mut self, fanout: usize) -> Self {
        self.pingreq_fanout = fanout;
        self
    }

    /// Set suspicion timeout
    #[must_use]
    pub fn with_suspicion_timeout(mut self, ms: u64) -> Self {
        self.suspicion_timeout_ms = ms;
        self
    }

    /// Set gossip interval
    #[must_use]
    pub fn with_gossip_interval(mut self, ms: u64) -> Self {
        self.gossip_interval_ms = ms;
        self
    }

    /// Set gossip fanout
    #[must_use]
    pub fn with_gossip_fanout(mut self, fanout: usize) -> Self {
        self.gossip_fanout = fanout;
        self
    }

    /// Set retransmit multiplier
    #[must_use]
    pub fn with_retransmit_mult(mut self, mult: u32) -> Self {
        self.retransmit_mult = mult;
        self
    }

    /// Set rumor retention
    #[must_use]
    pub fn with_rumor_retention(mut self, ms: u64) -> Self {
        self.rumor_retention_ms = ms;
        self
    }

    /// Set tombstone retention
    #[must_use]
    pub fn with_tombstone_retention(mut self, ms: Option<u64>) -> Self {
        self.tombstone_retention_ms = ms;
        self
    }

    /// Set RNG seed
    #[must_use]
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    /// Check internal consistency
    ///
    /// # Errors
    ///
    /// Returns error if an interval is zero or the timeouts are inverted
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("probe_interval_ms", self.probe_interval_ms),
            ("ping_timeout_ms", self.ping_timeout_ms),
            ("suspicion_timeout_ms", self.suspicion_timeout_ms),
            ("gossip_interval_ms", self.gossip_interval_ms),
            ("retransmit_mult", u64::from(self.retransmit_mult)),
            ("piggyback_max_rumors", self.piggyback_max_rumors as u64),
            ("max_datagram_bytes", self.max_datagram_bytes as u64),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(ConfigError::Zero(name));
            }
        }
        if self.pingreq_timeout_ms <= self.ping_timeout_ms {
            return Err(ConfigError::PingReqNotAfterPing {
                ping: self.ping_timeout_ms,
                pingreq: self.pingreq_timeout_ms,
            });
        }
        Ok(())
    }

    /// Retransmissions before a rumor is considered saturated
    #[must_use]
    pub fn retransmit_limit(&self, cluster_size: usize) -> u32 {
        retransmit_limit(self.retransmit_mult, cluster_size)
    }
}

/// `mult * ceil(log2(cluster_size + 1))`, with a floor of `mult`
#[must_use]
pub fn retransmit_limit(mult: u32, cluster_size: usize) -> u32 {
    let log = match cluster_size as u64 {
        0 => 1,
        n => 64 - n.leading_zeros(),
    };
    mult.saturating_mul(log)
}

impl Default for SwimConfig {
    fn default() -> Self {
        Self::new()
    }
}
