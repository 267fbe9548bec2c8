//! Tokio driver for a [`Node`].
//!
//! The node sits behind one mutex; every task locks it, applies one
//! operation, drains the resulting datagrams and health events, and sends
//! them after releasing the lock. Tasks:
//! - a probe loop on `probe_interval_ms`
//! - a gossip loop on `gossip_interval_ms`
//! - a timer loop that sleeps until the node's next deadline
//! - one receive loop per channel, spawning a task per datagram

use crate::config::{ConfigError, SwimConfig};
use crate::node::{HealthEvent, Node, Outbound};
use crate::transport::{Channel, Transport, TransportError};
use murmur_core::{
    Clock, CoreResult, Election, Health, LogicalTime, Member, MemberId, Membership, MonotonicClock, Service,
};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, Notify, broadcast};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Capacity of the health event feed
const EVENT_CAPACITY: usize = 1024;

/// Server errors
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Configuration rejected
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// Transport unavailable
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// A background task panicked
    #[error("Server task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Counters kept by a running server
#[derive(Debug, Default)]
pub struct ServerStats {
    probe_rounds: AtomicU64,
    gossip_rounds: AtomicU64,
    datagrams_received: AtomicU64,
    datagrams_sent: AtomicU64,
    decode_errors: AtomicU64,
    send_errors: AtomicU64,
}

/// Point-in-time copy of [`ServerStats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct StatsSnapshot {
    /// Probe rounds run
    pub probe_rounds: u64,
    /// Gossip rounds run
    pub gossip_rounds: u64,
    /// Datagrams received on either channel
    pub datagrams_received: u64,
    /// Datagrams handed to the transport
    pub datagrams_sent: u64,
    /// Datagrams dropped because they did not decode
    pub decode_errors: u64,
    /// Datagrams the transport refused
    pub send_errors: u64,
}

impl ServerStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Read every counter
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            probe_rounds: self.probe_rounds.load(Ordering::Relaxed),
            gossip_rounds: self.gossip_rounds.load(Ordering::Relaxed),
            datagrams_received: self.datagrams_received.load(Ordering::Relaxed),
            datagrams_sent: self.datagrams_sent.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
        }
    }
}

struct Shared {
    node: Mutex<Node>,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    events: broadcast::Sender<HealthEvent>,
    stats: ServerStats,
    deadlines_changed: Notify,
    cancel: CancellationToken,
}

impl Shared {
    /// Run one operation against the node, then send what it produced
    async fn apply<R>(&self, op: impl FnOnce(&mut Node, LogicalTime) -> R) -> R {
        let (result, outbound, events) = {
            let mut node = self.node.lock().await;
            let now = self.clock.now();
            let result = op(&mut node, now);
            (result, node.drain_outbound(), node.drain_events())
        };
        self.deadlines_changed.notify_one();
        for event in events {
            // No subscribers is fine
            let _ = self.events.send(event);
        }
        self.send_all(outbound).await;
        result
    }

    async fn send_all(&self, outbound: Vec<Outbound>) {
        for out in outbound {
            let channel = out.envelope.channel();
            let bytes = out.envelope.to_wire();
            match self.transport.send(channel, &out.to, &bytes).await {
                Ok(()) => ServerStats::bump(&self.stats.datagrams_sent),
                Err(err) => {
                    ServerStats::bump(&self.stats.send_errors);
                    warn!(to = %out.to, %channel, error = %err, "Send failed");
                }
            }
        }
    }
}

/// Builder for a running node
pub struct Server {
    local: Member,
    config: SwimConfig,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
}

impl Server {
    /// Create a server for `local` over `transport`
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid
    pub fn new(local: Member, config: SwimConfig, transport: Arc<dyn Transport>) -> Result<Self, ServerError> {
        config.validate()?;
        Ok(Self {
            local,
            config,
            transport,
            clock: Arc::new(MonotonicClock::new()),
        })
    }

    /// Use a different clock
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Spawn the protocol tasks on the current runtime
    #[must_use]
    pub fn start(self) -> ServerHandle {
        let probe_interval = Duration::from_millis(self.config.probe_interval_ms);
        let gossip_interval = Duration::from_millis(self.config.gossip_interval_ms);
        info!(member = %self.local.id, address = %self.local.address, swim_port = self.local.swim_port, gossip_port = self.local.gossip_port, "Starting member");

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let shared = Arc::new(Shared {
            node: Mutex::new(Node::new(self.local, self.config)),
            transport: self.transport,
            clock: self.clock,
            events,
            stats: ServerStats::default(),
            deadlines_changed: Notify::new(),
            cancel: CancellationToken::new(),
        });

        let tasks = vec![
            tokio::spawn(run_probes(Arc::clone(&shared), probe_interval)),
            tokio::spawn(run_gossip(Arc::clone(&shared), gossip_interval)),
            tokio::spawn(run_timers(Arc::clone(&shared), probe_interval)),
            tokio::spawn(run_receiver(Arc::clone(&shared), Channel::Swim)),
            tokio::spawn(run_receiver(Arc::clone(&shared), Channel::Gossip)),
        ];

        ServerHandle {
            shared,
            tasks: Arc::new(Mutex::new(tasks)),
        }
    }
}

async fn run_probes(shared: Arc<Shared>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            () = shared.cancel.cancelled() => break,
            _ = ticker.tick() => {
                shared.apply(|node, now| node.probe_round(now)).await;
                ServerStats::bump(&shared.stats.probe_rounds);
            }
        }
    }
}

async fn run_gossip(shared: Arc<Shared>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            () = shared.cancel.cancelled() => break,
            _ = ticker.tick() => {
                shared.apply(|node, now| node.gossip_round(now)).await;
                ServerStats::bump(&shared.stats.gossip_rounds);
            }
        }
    }
}

async fn run_timers(shared: Arc<Shared>, idle: Duration) {
    loop {
        let wait = {
            let node = shared.node.lock().await;
            let now = shared.clock.now();
            node.next_deadline()
                .map_or(idle, |at| Duration::from_millis(at.since(now)))
        };
        tokio::select! {
            () = shared.cancel.cancelled() => break,
            () = shared.deadlines_changed.notified() => continue,
            () = tokio::time::sleep(wait) => {
                shared.apply(|node, now| node.tick(now)).await;
            }
        }
    }
}

async fn run_receiver(shared: Arc<Shared>, channel: Channel) {
    loop {
        let received = tokio::select! {
            () = shared.cancel.cancelled() => break,
            received = shared.transport.recv(channel) => received,
        };
        match received {
            Ok((bytes, from)) => {
                ServerStats::bump(&shared.stats.datagrams_received);
                let shared = Arc::clone(&shared);
                tokio::spawn(async move {
                    let handled = shared
                        .apply(|node, now| node.handle_datagram(channel, &bytes, now))
                        .await;
                    if let Err(err) = handled {
                        ServerStats::bump(&shared.stats.decode_errors);
                        warn!(%from, %channel, error = %err, "Dropping undecodable datagram");
                    }
                });
            }
            Err(TransportError::Closed) => {
                debug!(%channel, "Transport closed");
                break;
            }
            Err(err) => warn!(%channel, error = %err, "Receive failed"),
        }
    }
}

/// Handle to a running server
#[derive(Clone)]
pub struct ServerHandle {
    shared: Arc<Shared>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl ServerHandle {
    /// The local member at its current incarnation
    pub async fn local(&self) -> Member {
        self.shared.node.lock().await.local().clone()
    }

    /// Current health of a member
    pub async fn health_of(&self, id: &MemberId) -> Option<Health> {
        self.shared.node.lock().await.health_of(id)
    }

    /// Every known member record
    pub async fn members(&self) -> Vec<Membership> {
        self.shared.node.lock().await.members().cloned().collect()
    }

    /// Current election record for a group
    pub async fn election(&self, service_group: &str) -> Option<Election> {
        self.shared.node.lock().await.election(service_group).cloned()
    }

    /// Elected leader of a group
    pub async fn leader(&self, service_group: &str) -> Option<MemberId> {
        self.shared.node.lock().await.leader(service_group).cloned()
    }

    /// Advertisements in a group
    pub async fn services(&self, service_group: &str) -> Vec<Service> {
        self.shared
            .node
            .lock()
            .await
            .services(service_group)
            .cloned()
            .collect()
    }

    /// Seed a peer, as when joining through known members
    pub async fn insert_member(&self, member: Member, health: Health) {
        self.shared
            .apply(|node, now| node.insert_member(member, health, now))
            .await;
    }

    /// Advertise a local service
    ///
    /// # Errors
    ///
    /// Returns error if the service belongs to another member
    pub async fn advertise_service(&self, service: Service) -> CoreResult<()> {
        self.shared
            .apply(|node, _| node.advertise_service(service))
            .await
    }

    /// Start an election for a group with the local member as candidate
    pub async fn start_election(&self, service_group: &str, suitability: u64) -> Option<Election> {
        self.shared
            .apply(|node, _| node.start_election(service_group, suitability))
            .await
    }

    /// Feed of health changes
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<HealthEvent> {
        self.shared.events.subscribe()
    }

    /// Counters
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Whether shutdown was requested
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }

    /// Stop every task and wait for them to finish
    ///
    /// # Errors
    ///
    /// Returns error if a task panicked
    pub async fn shutdown(&self) -> Result<(), ServerError> {
        self.shared.cancel.cancel();
        let tasks = std::mem::take(&mut *self.tasks.lock().await);
        for result in futures::future::join_all(tasks).await {
            result?;
        }
        info!("Member stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryNetwork;
    use murmur_core::Peer;
    use std::future::Future;

    fn fast_config(seed: u64) -> SwimConfig {
        SwimConfig::new()
            .with_probe_interval(20)
            .with_ack_timeouts(10, 30)
            .with_suspicion_timeout(80)
            .with_gossip_interval(10)
            .with_rng_seed(seed)
    }

    fn member(name: &str) -> Member {
        Member::new(MemberId::from(name), name, 1, 2)
    }

    fn start(network: &MemoryNetwork, name: &str, seed: u64) -> ServerHandle {
        let transport = Arc::new(network.bind(name, 1, 2));
        Server::new(member(name), fast_config(seed), transport)
            .unwrap()
            .start()
    }

    async fn eventually<F, Fut>(mut check: F) -> bool
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        for _ in 0..500 {
            if check().await {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let network = MemoryNetwork::new();
        let transport = Arc::new(network.bind("a", 1, 2));
        let result = Server::new(member("a"), SwimConfig::new().with_probe_interval(0), transport);
        assert!(matches!(result, Err(ServerError::Config(ConfigError::Zero(_)))));
    }

    #[tokio::test]
    async fn test_members_discover_each_other() {
        let network = MemoryNetwork::new();
        let a = start(&network, "a", 1);
        let b = start(&network, "b", 2);
        let c = start(&network, "c", 3);
        a.insert_member(member("b"), Health::Alive).await;
        a.insert_member(member("c"), Health::Alive).await;

        let (b_ref, c_ref) = (&b, &c);
        let converged = eventually(move || async move {
            b_ref.members().await.len() == 3 && c_ref.members().await.len() == 3
        })
        .await;
        assert!(converged);
        assert!(a.stats().probe_rounds > 0);

        for handle in [a, b, c] {
            handle.shutdown().await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_isolated_member_is_confirmed() {
        let network = MemoryNetwork::new();
        let a = start(&network, "a", 1);
        let b = start(&network, "b", 2);
        let c = start(&network, "c", 3);
        let mut events = c.subscribe();
        for peer in ["b", "c"] {
            a.insert_member(member(peer), Health::Alive).await;
        }
        c.insert_member(member("a"), Health::Alive).await;
        c.insert_member(member("b"), Health::Alive).await;

        network.isolate("b");
        let b_id = MemberId::from("b");
        let (a_ref, c_ref, id_ref) = (&a, &c, &b_id);
        let confirmed = eventually(move || async move {
            a_ref.health_of(id_ref).await == Some(Health::Confirmed)
                && c_ref.health_of(id_ref).await == Some(Health::Confirmed)
        })
        .await;
        assert!(confirmed);

        let mut saw_confirmed = false;
        while let Ok(event) = events.try_recv() {
            saw_confirmed |= event.member.id == b_id && event.health == Health::Confirmed;
        }
        assert!(saw_confirmed);

        for handle in [a, b, c] {
            handle.shutdown().await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_decode_errors_are_counted() {
        let network = MemoryNetwork::new();
        let a = start(&network, "a", 1);
        let probe = network.bind("garbage", 1, 2);
        probe
            .send(Channel::Swim, &Peer::new("a", 1), &[0xff, 0xff, 0xff])
            .await
            .unwrap();

        let a_ref = &a;
        assert!(eventually(move || async move { a_ref.stats().decode_errors == 1 }).await);
        assert_eq!(a.members().await.len(), 1);
        a.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_election_over_the_network() {
        let network = MemoryNetwork::new();
        let a = start(&network, "a", 1);
        let b = start(&network, "b", 2);
        a.insert_member(member("b"), Health::Alive).await;
        b.insert_member(member("a"), Health::Alive).await;

        a.advertise_service(Service::new(MemberId::from("a"), "db", "a", 5432))
            .await
            .unwrap();
        b.advertise_service(Service::new(MemberId::from("b"), "db", "b", 5432))
            .await
            .unwrap();
        let (a_ref, b_ref) = (&a, &b);
        assert!(eventually(move || async move { a_ref.services("db").await.len() == 2 }).await);

        a.start_election("db", 7).await.unwrap();
        let leader = Some(MemberId::from("a"));
        let leader_ref = &leader;
        let elected = eventually(move || async move {
            a_ref.leader("db").await == *leader_ref && b_ref.leader("db").await == *leader_ref
        })
        .await;
        assert!(elected);

        a.shutdown().await.unwrap();
        b.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let network = MemoryNetwork::new();
        let a = start(&network, "a", 1);
        a.shutdown().await.unwrap();
        assert!(a.is_shutdown());
        a.shutdown().await.unwrap();
    }
}
