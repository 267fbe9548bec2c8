//! Simulated datagram network between members.

use crate::seed::SimSeed;
use murmur_core::MemberId;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Link behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NetworkCondition {
    /// Instant, lossless delivery
    Normal,
    /// Fixed delivery delay in milliseconds
    Latency(u64),
    /// Each datagram is lost with this probability (0-1)
    PacketLoss {
        /// Loss probability
        probability: f64,
    },
}

impl NetworkCondition {
    /// Whether a datagram survives the link
    #[must_use]
    pub fn is_delivered(&self, rng: &mut ChaCha8Rng) -> bool {
        match self {
            NetworkCondition::Normal | NetworkCondition::Latency(_) => true,
            NetworkCondition::PacketLoss { probability } => rng.r#gen::<f64>() >= *probability,
        }
    }

    /// Delivery delay in milliseconds
    #[must_use]
    pub fn latency(&self) -> u64 {
        match self {
            NetworkCondition::Latency(ms) => *ms,
            NetworkCondition::Normal | NetworkCondition::PacketLoss { .. } => 0,
        }
    }
}

/// Result of sending a datagram
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SendResult {
    /// Delivered after `latency` milliseconds
    Delivered {
        /// Delay
        latency: u64,
    },
    /// Lost to packet loss
    Dropped,
    /// Blocked by a partition or a one-way block
    Partitioned,
}

/// Network simulator
#[derive(Debug)]
pub struct NetworkSim {
    rng: ChaCha8Rng,
    default: NetworkCondition,
    conditions: HashMap<(MemberId, MemberId), NetworkCondition>,
    partitions: Vec<HashSet<MemberId>>,
    blocked: HashSet<(MemberId, MemberId)>,
}

impl NetworkSim {
    /// Create a lossless network
    #[must_use]
    pub fn new(seed: &SimSeed) -> Self {
        Self {
            rng: seed.rng(),
            default: NetworkCondition::Normal,
            conditions: HashMap::new(),
            partitions: Vec::new(),
            blocked: HashSet::new(),
        }
    }

    /// Set the condition of every link without its own
    pub fn set_default(&mut self, condition: NetworkCondition) {
        self.default = condition;
    }

    /// Set the condition of one directed link
    pub fn set_condition(&mut self, from: MemberId, to: MemberId, condition: NetworkCondition) {
        self.conditions.insert((from, to), condition);
    }

    /// Condition of a directed link
    #[must_use]
    pub fn condition(&self, from: &MemberId, to: &MemberId) -> &NetworkCondition {
        self.conditions
            .get(&(from.clone(), to.clone()))
            .unwrap_or(&self.default)
    }

    /// Split members into groups that only talk among themselves
    ///
    /// Members in no group still talk to each other.
    pub fn partition(&mut self, groups: Vec<Vec<MemberId>>) {
        self.partitions = groups.into_iter().map(|g| g.into_iter().collect()).collect();
    }

    /// Cut one member off from everyone
    pub fn isolate(&mut self, id: MemberId) {
        self.partitions.push(HashSet::from([id]));
    }

    /// Drop datagrams from `from` to `to`, leaving the reverse direction open
    pub fn block(&mut self, from: MemberId, to: MemberId) {
        self.blocked.insert((from, to));
    }

    /// Release members from their partition groups
    ///
    /// Groups left empty are dropped, which also undoes `isolate`.
    pub fn unpartition(&mut self, ids: &[MemberId]) {
        for group in &mut self.partitions {
            for id in ids {
                group.remove(id);
            }
        }
        self.partitions.retain(|group| !group.is_empty());
    }

    /// Reopen a link closed by `block`
    pub fn unblock(&mut self, from: &MemberId, to: &MemberId) {
        self.blocked.remove(&(from.clone(), to.clone()));
    }

    /// Remove every partition and block
    pub fn heal(&mut self) {
        self.partitions.clear();
        self.blocked.clear();
    }

    /// Whether `from` can reach `to`
    #[must_use]
    pub fn can_communicate(&self, from: &MemberId, to: &MemberId) -> bool {
        if self.blocked.contains(&(from.clone(), to.clone())) {
            return false;
        }
        for group in &self.partitions {
            let from_in = group.contains(from);
            let to_in = group.contains(to);
            if from_in || to_in {
                return from_in && to_in;
            }
        }
        true
    }

    /// Decide the fate of one datagram
    pub fn send(&mut self, from: &MemberId, to: &MemberId) -> SendResult {
        if !self.can_communicate(from, to) {
            return SendResult::Partitioned;
        }
        let condition = self.condition(from, to).clone();
        if condition.is_delivered(&mut self.rng) {
            SendResult::Delivered {
                latency: condition.latency(),
            }
        } else {
            SendResult::Dropped
        }
    }
}
