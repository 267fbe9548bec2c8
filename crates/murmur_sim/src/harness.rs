//! Simulated cluster driven on a logical clock.
//!
//! Every member is a [`Node`] stepped by the harness. Outbound datagrams are
//! encoded, routed through a [`NetworkSim`] and decoded again on delivery,
//! so a run exercises the same bytes a real deployment would send. Given the
//! same [`SimConfig`] a run is fully reproducible.

use crate::network::{NetworkCondition, NetworkSim, SendResult};
use crate::seed::SimSeed;
use murmur_core::{Health, LogicalTime, Member, MemberId};
use murmur_swim::{Channel, HealthEvent, Node, SwimConfig};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

/// Simulation configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimConfig {
    /// Seed for every random choice in the run
    pub seed: SimSeed,
    /// Engine configuration shared by all members; the rng seed is
    /// overridden per member
    pub swim: SwimConfig,
    /// Logical milliseconds per step
    pub tick_ms: u64,
    /// Default link condition
    pub condition: NetworkCondition,
}

impl SimConfig {
    /// Create a config with timings scaled for fast simulated runs
    #[must_use]
    pub fn new(seed: SimSeed) -> Self {
        Self {
            seed,
            swim: SwimConfig::new()
                .with_probe_interval(100)
                .with_ack_timeouts(20, 60)
                .with_suspicion_timeout(500)
                .with_gossip_interval(50),
            tick_ms: 10,
            condition: NetworkCondition::Normal,
        }
    }

    /// Set engine configuration
    #[must_use]
    pub fn with_swim(mut self, swim: SwimConfig) -> Self {
        self.swim = swim;
        self
    }

    /// Set step length
    #[must_use]
    pub fn with_tick(mut self, tick_ms: u64) -> Self {
        self.tick_ms = tick_ms.max(1);
        self
    }

    /// Set default link condition
    #[must_use]
    pub fn with_condition(mut self, condition: NetworkCondition) -> Self {
        self.condition = condition;
        self
    }
}

impl Default for SimConfig {
    fn default() -> Self {
        Self::new(SimSeed::default())
    }
}

/// Datagram counters for a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimStats {
    /// Datagrams handed to the network
    pub sent: u64,
    /// Datagrams handled by their destination
    pub delivered: u64,
    /// Datagrams lost to packet loss, crashes or unknown addresses
    pub dropped: u64,
    /// Datagrams stopped by a partition or block
    pub partitioned: u64,
    /// Datagrams the destination failed to decode
    pub decode_errors: u64,
}

#[derive(Debug)]
struct SimMember {
    node: Node,
    next_probe: LogicalTime,
    next_gossip: LogicalTime,
    crashed: bool,
    events: Vec<HealthEvent>,
}

#[derive(Debug)]
struct Datagram {
    to: usize,
    channel: Channel,
    bytes: Vec<u8>,
}

/// A cluster of simulated members
#[derive(Debug)]
pub struct SimCluster {
    config: SimConfig,
    now: LogicalTime,
    members: Vec<SimMember>,
    addresses: HashMap<String, usize>,
    network: NetworkSim,
    in_flight: BTreeMap<(LogicalTime, u64), Datagram>,
    seq: u64,
    stats: SimStats,
}

impl SimCluster {
    /// Create an empty cluster
    #[must_use]
    pub fn new(config: SimConfig) -> Self {
        let mut network = NetworkSim::new(&config.seed.derive("network"));
        network.set_default(config.condition.clone());
        Self {
            config,
            now: LogicalTime::zero(),
            members: Vec::new(),
            addresses: HashMap::new(),
            network,
            in_flight: BTreeMap::new(),
            seq: 0,
            stats: SimStats::default(),
        }
    }

    /// Create a cluster of `count` members that all know each other
    #[must_use]
    pub fn meshed(config: SimConfig, count: usize) -> Self {
        let mut cluster = Self::new(config);
        for _ in 0..count {
            cluster.add_member(false);
        }
        cluster.mesh();
        cluster
    }

    /// Add a member named `m<index>`; returns its index
    pub fn add_member(&mut self, persistent: bool) -> usize {
        let index = self.members.len();
        let name = format!("m{index}");
        let member = Member::new(MemberId::from(name.as_str()), name.clone(), 1, 2).with_persistent(persistent);
        let swim = self
            .config
            .swim
            .clone()
            .with_rng_seed(self.config.seed.derive(&name).seed);
        // Stagger first probes so members do not move in lockstep
        let interval = self.config.swim.probe_interval_ms.max(1);
        let offset = (index as u64 * self.config.tick_ms) % interval;
        self.members.push(SimMember {
            node: Node::new(member, swim),
            next_probe: self.now.after(offset),
            next_gossip: self.now,
            crashed: false,
            events: Vec::new(),
        });
        self.addresses.insert(name, index);
        debug!(member = index, "Added simulated member");
        index
    }

    /// Introduce every member to every other
    pub fn mesh(&mut self) {
        for i in 0..self.members.len() {
            for j in 0..self.members.len() {
                if i != j {
                    self.join(i, j);
                }
            }
        }
    }

    /// Tell member `index` about member `via`, as a seed peer
    pub fn join(&mut self, index: usize, via: usize) {
        let seed = self.members[via].node.local().clone();
        let now = self.now;
        self.members[index].node.insert_member(seed, Health::Alive, now);
        self.flush(index);
    }

    /// Current logical time
    #[must_use]
    pub fn now(&self) -> LogicalTime {
        self.now
    }

    /// Number of members
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether the cluster has no members
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Identifier of a member
    #[must_use]
    pub fn id(&self, index: usize) -> MemberId {
        self.members[index].node.local().id.clone()
    }

    /// Engine of a member
    #[must_use]
    pub fn node(&self, index: usize) -> &Node {
        &self.members[index].node
    }

    /// Run `op` against a member's engine and route what it sends
    pub fn with_node<R>(&mut self, index: usize, op: impl FnOnce(&mut Node, LogicalTime) -> R) -> R {
        let now = self.now;
        let result = op(&mut self.members[index].node, now);
        self.flush(index);
        result
    }

    /// Health of `subject` as seen by `observer`
    #[must_use]
    pub fn health_of(&self, observer: usize, subject: usize) -> Option<Health> {
        self.members[observer].node.health_of(&self.id(subject))
    }

    /// Health of `subject` if every other running member agrees on it
    #[must_use]
    pub fn network_health_of(&self, subject: usize) -> Option<Health> {
        let mut agreed = None;
        for observer in self.running().filter(|&i| i != subject) {
            let health = self.health_of(observer, subject)?;
            match agreed {
                None => agreed = Some(health),
                Some(seen) if seen != health => return None,
                Some(_) => {}
            }
        }
        agreed
    }

    /// Health changes a member has published so far
    #[must_use]
    pub fn events(&self, index: usize) -> &[HealthEvent] {
        &self.members[index].events
    }

    /// Datagram counters
    #[must_use]
    pub fn stats(&self) -> SimStats {
        self.stats
    }

    /// Network, for fault injection beyond the helpers here
    pub fn network_mut(&mut self) -> &mut NetworkSim {
        &mut self.network
    }

    /// Stop a member: it neither runs nor receives until revived
    pub fn crash(&mut self, index: usize) {
        info!(member = index, "Crashing member");
        self.members[index].crashed = true;
        let before = self.in_flight.len();
        self.in_flight.retain(|_, datagram| datagram.to != index);
        self.stats.dropped += (before - self.in_flight.len()) as u64;
    }

    /// Resume a crashed member with the state it had
    pub fn revive(&mut self, index: usize) {
        info!(member = index, "Reviving member");
        self.members[index].crashed = false;
    }

    /// Cut a member off from everyone
    pub fn isolate(&mut self, index: usize) {
        let id = self.id(index);
        self.network.isolate(id);
    }

    /// Split the cluster into groups of member indices
    pub fn partition(&mut self, groups: &[&[usize]]) {
        let groups: Vec<Vec<MemberId>> = groups
            .iter()
            .map(|group| group.iter().map(|&i| self.id(i)).collect::<Vec<_>>())
            .collect();
        self.network.partition(groups);
    }

    /// Drop datagrams from one member to another
    pub fn block(&mut self, from: usize, to: usize) {
        let (from, to) = (self.id(from), self.id(to));
        self.network.block(from, to);
    }

    /// Reopen a link closed by `block`
    pub fn unblock(&mut self, from: usize, to: usize) {
        let (from, to) = (self.id(from), self.id(to));
        self.network.unblock(&from, &to);
    }

    /// Release members from their partition groups, or from `isolate`
    pub fn unpartition(&mut self, members: &[usize]) {
        info!(?members, "Releasing members from partitions");
        let ids: Vec<MemberId> = members.iter().map(|&i| self.id(i)).collect();
        self.network.unpartition(&ids);
    }

    /// Remove every partition and block
    pub fn heal(&mut self) {
        info!("Healing network");
        self.network.heal();
    }

    /// Advance one tick
    pub fn step(&mut self) {
        self.now = self.now.after(self.config.tick_ms);
        let now = self.now;
        let probe_interval = self.config.swim.probe_interval_ms;
        let gossip_interval = self.config.swim.gossip_interval_ms;
        for index in 0..self.members.len() {
            let member = &mut self.members[index];
            if member.crashed {
                continue;
            }
            if now >= member.next_probe {
                member.node.probe_round(now);
                member.next_probe = now.after(probe_interval);
            }
            if now >= member.next_gossip {
                member.node.gossip_round(now);
                member.next_gossip = now.after(gossip_interval);
            }
            member.node.tick(now);
            self.flush(index);
        }
        self.deliver_due();
    }

    /// Advance by at least `ms` logical milliseconds
    pub fn run_for(&mut self, ms: u64) {
        let until = self.now.after(ms);
        while self.now < until {
            self.step();
        }
    }

    /// Step until `done` holds or `max_ms` pass; returns whether it held
    pub fn run_until(&mut self, max_ms: u64, mut done: impl FnMut(&SimCluster) -> bool) -> bool {
        let until = self.now.after(max_ms);
        loop {
            if done(self) {
                return true;
            }
            if self.now >= until {
                return false;
            }
            self.step();
        }
    }

    fn running(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.members.len()).filter(|&i| !self.members[i].crashed)
    }

    /// Route what a member queued onto the network
    fn flush(&mut self, index: usize) {
        let member = &mut self.members[index];
        let outbound = member.node.drain_outbound();
        member.events.extend(member.node.drain_events());
        let from = member.node.local().id.clone();
        for message in outbound {
            self.stats.sent += 1;
            let Some(&to) = self.addresses.get(&message.to.address) else {
                self.stats.dropped += 1;
                continue;
            };
            let to_id = self.id(to);
            match self.network.send(&from, &to_id) {
                SendResult::Delivered { latency } => {
                    self.seq += 1;
                    self.in_flight.insert(
                        (self.now.after(latency), self.seq),
                        Datagram {
                            to,
                            channel: message.envelope.channel(),
                            bytes: message.envelope.to_wire(),
                        },
                    );
                }
                SendResult::Dropped => self.stats.dropped += 1,
                SendResult::Partitioned => self.stats.partitioned += 1,
            }
        }
    }

    /// Deliver everything due by now, including replies sent on the way
    fn deliver_due(&mut self) {
        while let Some(entry) = self.in_flight.first_entry() {
            if entry.key().0 > self.now {
                break;
            }
            let datagram = entry.remove();
            let member = &mut self.members[datagram.to];
            if member.crashed {
                self.stats.dropped += 1;
                continue;
            }
            match member.node.handle_datagram(datagram.channel, &datagram.bytes, self.now) {
                Ok(()) => self.stats.delivered += 1,
                Err(e) => {
                    debug!(member = datagram.to, error = %e, "Undecodable datagram");
                    self.stats.decode_errors += 1;
                }
            }
            self.flush(datagram.to);
        }
    }
}
