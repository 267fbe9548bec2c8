//! Protocol engine for one member, free of I/O.
//!
//! A `Node` is driven by its owner: inbound messages, probe and gossip
//! rounds, and timer ticks all take the current `LogicalTime`. Messages to
//! send and health changes to publish accumulate in the node and are
//! drained by the driver after each call. The tokio server and the
//! simulator are two such drivers.

use crate::config::SwimConfig;
use crate::detector::Detector;
use crate::election::{self, ElectionBoard, Quorum};
use crate::member_list::{MemberList, Observed, Snapshot};
use crate::rumor_mill::{Budget, RumorMill};
use crate::timer::TimerKind;
use crate::transport::Channel;
use murmur_core::{
    CoreError, CoreResult, Election, ElectionStatus, Health, LogicalTime, Member, MemberId, Membership, Peer, Rumor,
    RumorKey, RumorKind, RumorPayload, Service, Swim, SwimPayload,
};
use murmur_wire::{WireDecode, WireEncode, WireResult};
use tracing::{debug, info, trace};

/// A message addressed to a peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Envelope {
    /// Sent on the swim channel
    Swim(Swim),
    /// Sent on the gossip channel
    Rumor(Rumor),
}

impl Envelope {
    /// Channel the message travels on
    #[must_use]
    pub fn channel(&self) -> Channel {
        match self {
            Self::Swim(_) => Channel::Swim,
            Self::Rumor(_) => Channel::Gossip,
        }
    }

    /// Encode for the wire
    #[must_use]
    pub fn to_wire(&self) -> Vec<u8> {
        match self {
            Self::Swim(swim) => swim.to_wire(),
            Self::Rumor(rumor) => rumor.to_wire(),
        }
    }
}

/// A datagram the driver should send
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    /// Destination endpoint
    pub to: Peer,
    /// Message
    pub envelope: Envelope,
}

/// A member's health as seen by this node changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthEvent {
    /// The member, at the incarnation of the new record
    pub member: Member,
    /// Health before, `None` on first sighting
    pub previous: Option<Health>,
    /// Health now
    pub health: Health,
}

/// SWIM engine for the local member
#[derive(Debug)]
pub struct Node {
    config: SwimConfig,
    members: MemberList,
    mill: RumorMill,
    detector: Detector,
    board: ElectionBoard,
    outbox: Vec<Outbound>,
    events: Vec<HealthEvent>,
}

impl Node {
    /// Create a node that knows only itself
    #[must_use]
    pub fn new(local: Member, config: SwimConfig) -> Self {
        let mut mill = RumorMill::new(config.retransmit_mult, config.rumor_retention_ms);
        mill.ingest(Rumor::member(Membership::alive(local.clone())).with_from(local.id.clone()));
        Self {
            detector: Detector::new(config.rng_seed),
            members: MemberList::new(local),
            board: ElectionBoard::new(),
            outbox: Vec::new(),
            events: Vec::new(),
            mill,
            config,
        }
    }

    /// Engine configuration
    #[must_use]
    pub fn config(&self) -> &SwimConfig {
        &self.config
    }

    /// The local member at its current incarnation
    #[must_use]
    pub fn local(&self) -> &Member {
        self.members.local()
    }

    /// Current health of a member
    #[must_use]
    pub fn health_of(&self, id: &MemberId) -> Option<Health> {
        self.members.health_of(id)
    }

    /// Every known member record
    #[must_use]
    pub fn members(&self) -> Snapshot<'_> {
        self.members.snapshot()
    }

    /// Member registry
    #[must_use]
    pub fn member_list(&self) -> &MemberList {
        &self.members
    }

    /// Rumor store
    #[must_use]
    pub fn rumors(&self) -> &RumorMill {
        &self.mill
    }

    /// Current election record for a group
    #[must_use]
    pub fn election(&self, service_group: &str) -> Option<&Election> {
        self.mill.election(service_group)
    }

    /// Elected leader of a group
    #[must_use]
    pub fn leader(&self, service_group: &str) -> Option<&MemberId> {
        self.election(service_group).and_then(election::leader)
    }

    /// Advertisements in a group
    pub fn services<'a>(&'a self, service_group: &'a str) -> impl Iterator<Item = &'a Service> + 'a {
        self.mill.services(service_group)
    }

    /// Number of probe rounds started
    #[must_use]
    pub fn probe_rounds(&self) -> u64 {
        self.detector.round()
    }

    /// Earliest pending protocol deadline
    #[must_use]
    pub fn next_deadline(&self) -> Option<LogicalTime> {
        self.detector.next_deadline()
    }

    /// Take the messages queued since the last drain
    pub fn drain_outbound(&mut self) -> Vec<Outbound> {
        std::mem::take(&mut self.outbox)
    }

    /// Take the health changes queued since the last drain
    pub fn drain_events(&mut self) -> Vec<HealthEvent> {
        std::mem::take(&mut self.events)
    }

    /// Seed the registry with a member, as when joining through known peers
    pub fn insert_member(&mut self, member: Member, health: Health, now: LogicalTime) {
        self.observe(Membership::new(member, health), None, now);
    }

    /// Advertise a local service and take part in its group's elections
    ///
    /// Re-advertising a group supersedes the previous advertisement.
    ///
    /// # Errors
    ///
    /// Returns error if the service belongs to another member
    pub fn advertise_service(&mut self, mut service: Service) -> CoreResult<()> {
        let local = self.members.local_id().clone();
        if service.member_id != local {
            return Err(CoreError::Validation {
                field: "member_id".to_string(),
                reason: format!("service belongs to {}, not the local member", service.member_id),
            });
        }
        let key = RumorKey::Service {
            member_id: local.clone(),
            service_group: service.service_group.clone(),
        };
        if let Some(RumorPayload::Service(held)) = self.mill.get(&key).map(|r| &r.payload) {
            service.incarnation = service.incarnation.max(held.incarnation + 1);
        }
        let group = service.service_group.clone();
        info!(group = %group, port = service.port, "Advertising service");
        self.mill.ingest(Rumor::service(service).with_from(local));
        self.board.join(&group);
        self.react_to_election(&group);
        Ok(())
    }

    /// Open a new election term for a group with the local member as
    /// candidate
    pub fn start_election(&mut self, service_group: &str, suitability: u64) -> Option<Election> {
        self.board.set_suitability(service_group, suitability);
        let quorum = self.quorum(service_group);
        let election = self.board.start(
            self.members.local_id(),
            service_group,
            self.mill.election(service_group),
            quorum,
        )?;
        info!(group = service_group, term = election.term, "Starting election");
        self.publish_election(election.clone());
        Some(election)
    }

    /// Probe the next member in the traversal; returns the target
    pub fn probe_round(&mut self, now: LogicalTime) -> Option<MemberId> {
        let target = self.detector.next_target(&self.members)?;
        let round = self
            .detector
            .start_probe(target.clone(), now, self.config.ping_timeout_ms);
        debug!(target = %target.id, round, "Probing member");
        let ping = Swim::ping(self.members.local().clone(), None);
        self.send_swim(&target, ping, now);
        Some(target.id)
    }

    /// Send active rumors of every kind to random Alive members; returns
    /// the number of rumors queued
    pub fn gossip_round(&mut self, now: LogicalTime) -> usize {
        let peers = self
            .detector
            .choose_peers(&self.members, self.config.gossip_fanout, None);
        let budget = Budget::new(self.config.piggyback_max_rumors, self.config.max_datagram_bytes);
        let cluster_size = self.members.live_count();
        let mut sent = 0;
        for peer in peers {
            let rumors = self.mill.select_for_piggyback(budget, &peer.id, |_| true);
            for rumor in rumors {
                self.mill.mark_sent(&rumor.key(), &peer.id, cluster_size, now);
                self.outbox.push(Outbound {
                    to: peer.gossip_peer(),
                    envelope: Envelope::Rumor(rumor),
                });
                sent += 1;
            }
        }
        if sent > 0 {
            trace!(rumors = sent, "Gossip round");
        }
        sent
    }

    /// Decode and handle a datagram
    ///
    /// # Errors
    ///
    /// Returns error if the datagram does not decode; the node is unchanged
    pub fn handle_datagram(&mut self, channel: Channel, bytes: &[u8], now: LogicalTime) -> WireResult<()> {
        match channel {
            Channel::Swim => self.handle_swim(Swim::from_wire(bytes)?, now),
            Channel::Gossip => self.handle_rumor(Rumor::from_wire(bytes)?, now),
        }
        Ok(())
    }

    /// Handle a probe-cycle message
    pub fn handle_swim(&mut self, swim: Swim, now: LogicalTime) {
        let sender = swim.sender().clone();
        if sender.id == *self.members.local_id() {
            trace!("Ignoring message from self");
            return;
        }
        debug!(from = %sender.id, kind = swim.kind_name(), "Received swim message");

        let Swim { payload, membership } = swim;
        self.observe(Membership::alive(sender.clone()), Some(sender.id.clone()), now);
        for record in membership.iter().cloned() {
            self.observe(record, Some(sender.id.clone()), now);
        }

        // Read after observing: a refutation may have bumped the incarnation
        let local = self.members.local().clone();
        match payload {
            SwimPayload::Ping(ping) => {
                let ack = Swim::ack(local, ping.forward_to);
                self.send_swim(&ping.from, ack, now);
            }
            SwimPayload::Ack(ack) => {
                let relay_to = ack
                    .forward_to
                    .as_ref()
                    .filter(|requester| requester.id != local.id)
                    .map(|requester| (requester.id.clone(), requester.swim_peer()));
                match relay_to {
                    Some((requester, to)) => {
                        debug!(from = %ack.from.id, to = %requester, "Relaying ack");
                        self.outbox.push(Outbound {
                            to,
                            envelope: Envelope::Swim(Swim {
                                payload: SwimPayload::Ack(ack),
                                membership,
                            }),
                        });
                    }
                    None => {
                        if self.detector.acked(&ack.from.id) {
                            debug!(member = %ack.from.id, "Probe answered");
                        }
                    }
                }
            }
            SwimPayload::PingReq(request) => {
                debug!(target = %request.target.id, requester = %request.from.id, "Probing on behalf of requester");
                let ping = Swim::ping(local, Some(request.from));
                self.send_swim(&request.target, ping, now);
            }
        }
    }

    /// Handle a disseminated rumor
    pub fn handle_rumor(&mut self, rumor: Rumor, now: LogicalTime) {
        trace!(kind = ?rumor.kind(), from = ?rumor.from_id, "Received rumor");
        let group = match &rumor.payload {
            RumorPayload::Service(service) => Some(service.service_group.clone()),
            RumorPayload::Election(election) => Some(election.service_group.clone()),
            _ => None,
        };

        match rumor.kind() {
            RumorKind::Member => {
                let from = rumor.from_id;
                if let RumorPayload::Member(record) = rumor.payload {
                    self.observe(record, from, now);
                }
            }
            RumorKind::Service | RumorKind::Election => {
                let accepted = if rumor.kind() == RumorKind::Election {
                    self.ingest_election(rumor)
                } else {
                    self.mill.ingest(rumor)
                };
                if let (true, Some(group)) = (accepted, group) {
                    self.react_to_election(&group);
                }
            }
            RumorKind::Fake | RumorKind::Fake2 => {
                self.mill.ingest(rumor);
            }
        }
    }

    /// Fire due deadlines and age out old state
    pub fn tick(&mut self, now: LogicalTime) {
        for key in self.detector.expired(now) {
            match key.kind {
                TimerKind::Ack => self.on_ack_timeout(&key.member_id, key.round, now),
                TimerKind::PingReq => self.on_relay_timeout(&key.member_id, key.round, now),
                TimerKind::Suspicion => self.on_suspicion_timeout(&key.member_id, key.round, now),
            }
        }
        let evicted = self.mill.expire(now);
        if evicted > 0 {
            trace!(evicted, "Evicted saturated rumors");
        }
        if let Some(retention) = self.config.tombstone_retention_ms {
            self.members.prune_confirmed(now, retention);
        }
    }

    fn on_ack_timeout(&mut self, id: &MemberId, round: u64, now: LogicalTime) {
        let Some(probe) = self.detector.probe(id).filter(|p| p.round == round).cloned() else {
            return;
        };
        if self.members.health_of(id) == Some(Health::Confirmed) {
            trace!(member = %id, "Departed member still silent");
            self.detector.finish_probe(id, round);
            return;
        }
        let relays = self
            .detector
            .choose_peers(&self.members, self.config.pingreq_fanout, Some(id));
        debug!(target = %id, relays = relays.len(), "No direct ack, requesting indirect probes");
        for relay in &relays {
            let request = Swim::pingreq(self.members.local().clone(), probe.target.clone());
            self.send_swim(relay, request, now);
        }
        let deadline = probe.started_at.after(self.config.pingreq_timeout_ms).max(now);
        self.detector.await_relay(id, round, deadline);
    }

    fn on_relay_timeout(&mut self, id: &MemberId, round: u64, now: LogicalTime) {
        if self.detector.finish_probe(id, round).is_none() {
            return;
        }
        let Some(current) = self.members.current(id) else {
            return;
        };
        if current.health != Health::Alive {
            return;
        }
        debug!(member = %id, round, "No ack, direct or relayed");
        let record = Membership::new(current.member.clone(), Health::Suspect);
        let local = self.members.local_id().clone();
        self.observe(record, Some(local), now);
    }

    fn on_suspicion_timeout(&mut self, id: &MemberId, incarnation: u64, now: LogicalTime) {
        let Some(current) = self.members.current(id) else {
            return;
        };
        if current.health != Health::Suspect || current.member.incarnation != incarnation {
            return;
        }
        let record = Membership::new(current.member.clone(), Health::Confirmed);
        let local = self.members.local_id().clone();
        self.observe(record, Some(local), now);
    }

    /// Offer a membership record to the registry and react to the outcome
    fn observe(&mut self, record: Membership, from: Option<MemberId>, now: LogicalTime) {
        let previous = match self.members.observe(record.clone(), now) {
            Observed::Unchanged => return,
            Observed::Refuted(alive) => {
                let local = alive.member.id.clone();
                self.mill.ingest(Rumor::member(alive).with_from(local));
                return;
            }
            Observed::Changed { previous } => previous,
        };

        let id = &record.member.id;
        let mut rumor = Rumor::member(record.clone());
        if let Some(from) = from {
            rumor = rumor.with_from(from);
        }
        self.mill.ingest(rumor);

        match record.health {
            Health::Alive => self.detector.clear_suspicion(id),
            Health::Suspect => {
                self.detector.clear_suspicion(id);
                self.detector.suspect(
                    id,
                    record.member.incarnation,
                    now.after(self.config.suspicion_timeout_ms),
                );
            }
            Health::Confirmed => self.detector.forget(id),
        }

        let previous_health = previous.as_ref().map(|p| p.health);
        if previous_health != Some(record.health) {
            self.events.push(HealthEvent {
                member: record.member.clone(),
                previous: previous_health,
                health: record.health,
            });
            self.refresh_elections();
        }

        if previous.is_none() && record.health != Health::Confirmed {
            self.welcome(now);
        }
    }

    /// A member was seen for the first time: put everything back in rotation
    fn welcome(&mut self, now: LogicalTime) {
        let local = self.members.local_id().clone();
        let records: Vec<Membership> = self.members.snapshot().cloned().collect();
        for record in records {
            self.mill.ingest(Rumor::member(record).with_from(local.clone()));
        }
        self.mill.rekindle();
        trace!(now = %now, "Rumors rekindled for new member");
    }

    fn quorum(&self, service_group: &str) -> Quorum {
        let local = self
            .board
            .participates(service_group)
            .then(|| self.members.local_id());
        Quorum::of(service_group, local, &self.mill, &self.members)
    }

    fn refresh_elections(&mut self) {
        let groups: Vec<String> = self.board.groups().map(String::from).collect();
        for group in groups {
            self.react_to_election(&group);
        }
    }

    fn react_to_election(&mut self, service_group: &str) {
        let quorum = self.quorum(service_group);
        let Some(held) = self.mill.election(service_group) else {
            return;
        };
        let local = self.members.local_id();
        if let Some(next) = self.board.reelect(local, held, quorum, &self.members) {
            self.publish_election(next);
            return;
        }
        let before = (held.term, held.status);
        self.judge_election(service_group, Some(before));
        let Some(held) = self.mill.election(service_group) else {
            return;
        };
        if let Some(next) = self.board.respond(self.members.local_id(), held, quorum) {
            self.publish_election(next);
        }
    }

    fn publish_election(&mut self, election: Election) {
        let local = self.members.local_id().clone();
        self.ingest_election(Rumor::election(election).with_from(local));
    }

    /// Fold an election rumor into the mill, judging its status locally
    fn ingest_election(&mut self, mut rumor: Rumor) -> bool {
        let RumorPayload::Election(incoming) = &mut rumor.payload else {
            return false;
        };
        incoming.status = ElectionStatus::Running;
        let group = incoming.service_group.clone();
        let before = self.mill.election(&group).map(|e| (e.term, e.status));
        if !self.mill.ingest(rumor) {
            return false;
        }
        self.judge_election(&group, before);
        true
    }

    /// Re-derive a held election's status from the local quorum view
    fn judge_election(&mut self, service_group: &str, before: Option<(u64, ElectionStatus)>) {
        let quorum = self.quorum(service_group);
        let Some(status) = self.mill.election(service_group).map(|held| quorum.judge(held)) else {
            return;
        };
        self.mill.set_election_status(service_group, status);
        let Some(held) = self.mill.election(service_group) else {
            return;
        };
        if Some((held.term, held.status)) == before {
            return;
        }
        match held.status {
            ElectionStatus::Finished => {
                info!(group = service_group, term = held.term, leader = %held.member_id, "Leader elected");
            }
            ElectionStatus::NoQuorum => {
                info!(group = service_group, term = held.term, "Election lost quorum");
            }
            ElectionStatus::Running => {
                debug!(group = service_group, term = held.term, candidate = %held.member_id, "Election running");
            }
        }
    }

    /// Send a swim message to a member with piggybacked membership rumors
    fn send_swim(&mut self, to: &Member, swim: Swim, now: LogicalTime) {
        // A recipient we hold as down always hears it, so it can refute
        let verdict = self
            .members
            .current(&to.id)
            .filter(|record| record.health != Health::Alive)
            .cloned();
        let verdict_len = verdict.as_ref().map_or(0, |record| record.wire_len() + 3);

        // Each piggybacked record costs its length plus a tag and length prefix
        let room = self
            .config
            .max_datagram_bytes
            .saturating_sub(swim.wire_len() + 3 + verdict_len);
        let max_rumors = self
            .config
            .piggyback_max_rumors
            .saturating_sub(usize::from(verdict.is_some()));
        let subject = RumorKey::Member(to.id.clone());
        let rumors = self.mill.select_for_piggyback(Budget::new(max_rumors, room), &to.id, |r| {
            r.kind() == RumorKind::Member && (verdict.is_none() || r.key() != subject)
        });
        let cluster_size = self.members.live_count();
        let mut membership: Vec<Membership> = verdict.into_iter().collect();
        for rumor in rumors {
            self.mill.mark_sent(&rumor.key(), &to.id, cluster_size, now);
            if let RumorPayload::Member(record) = rumor.payload {
                membership.push(record);
            }
        }
        trace!(to = %to.id, kind = swim.kind_name(), piggyback = membership.len(), "Sending swim message");
        self.outbox.push(Outbound {
            to: to.swim_peer(),
            envelope: Envelope::Swim(swim.with_membership(membership)),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(id: &str) -> Member {
        Member::new(MemberId::from(id), id, 1, 2)
    }

    fn id(s: &str) -> MemberId {
        MemberId::from(s)
    }

    fn config() -> SwimConfig {
        SwimConfig::new()
            .with_ack_timeouts(100, 200)
            .with_suspicion_timeout(500)
            .with_rng_seed(42)
    }

    fn node(name: &str) -> Node {
        Node::new(member(name), config())
    }

    fn at(ms: u64) -> LogicalTime {
        LogicalTime::from_millis(ms)
    }

    /// Swim messages in the outbox addressed to `address`
    fn swims_to(outbound: &[Outbound], address: &str) -> Vec<Swim> {
        outbound
            .iter()
            .filter(|o| o.to.address == address)
            .filter_map(|o| match &o.envelope {
                Envelope::Swim(swim) => Some(swim.clone()),
                Envelope::Rumor(_) => None,
            })
            .collect()
    }

    #[test]
    fn test_ping_is_acked() {
        let mut a = node("a");
        let mut b = node("b");
        a.insert_member(member("b"), Health::Alive, at(0));

        assert_eq!(a.probe_round(at(0)), Some(id("b")));
        let pings = swims_to(&a.drain_outbound(), "b");
        assert_eq!(pings.len(), 1);
        assert_eq!(pings[0].kind_name(), "ping");

        b.handle_swim(pings[0].clone(), at(10));
        assert_eq!(b.health_of(&id("a")), Some(Health::Alive));
        let acks = swims_to(&b.drain_outbound(), "a");
        assert_eq!(acks[0].kind_name(), "ack");

        a.handle_swim(acks[0].clone(), at(20));
        a.tick(at(1000));
        assert!(a.drain_outbound().is_empty());
        assert_eq!(a.health_of(&id("b")), Some(Health::Alive));
    }

    #[test]
    fn test_piggyback_carries_membership() {
        let mut a = node("a");
        a.insert_member(member("b"), Health::Alive, at(0));
        a.insert_member(member("c"), Health::Alive, at(0));
        a.probe_round(at(0));
        let outbound = a.drain_outbound();
        let Envelope::Swim(ping) = &outbound[0].envelope else {
            panic!("expected a swim message");
        };
        assert!(!ping.membership.is_empty());
    }

    #[test]
    fn test_silent_member_is_suspected_then_confirmed() {
        let mut a = node("a");
        for peer in ["b", "c", "d", "e"] {
            a.insert_member(member(peer), Health::Alive, at(0));
        }
        a.drain_events();

        let target = a.probe_round(at(0)).unwrap();
        a.drain_outbound();

        a.tick(at(100));
        let requests: Vec<Outbound> = a.drain_outbound();
        assert_eq!(requests.len(), 3);
        for out in &requests {
            let Envelope::Swim(swim) = &out.envelope else {
                panic!("expected a swim message");
            };
            assert!(matches!(&swim.payload, SwimPayload::PingReq(r) if r.target.id == target));
            assert_ne!(out.to.address, target.as_str());
        }

        a.tick(at(199));
        assert_eq!(a.health_of(&target), Some(Health::Alive));
        a.tick(at(200));
        assert_eq!(a.health_of(&target), Some(Health::Suspect));

        a.tick(at(699));
        assert_eq!(a.health_of(&target), Some(Health::Suspect));
        a.tick(at(700));
        assert_eq!(a.health_of(&target), Some(Health::Confirmed));

        let events = a.drain_events();
        let healths: Vec<Health> = events.iter().map(|e| e.health).collect();
        assert_eq!(healths, vec![Health::Suspect, Health::Confirmed]);
        assert!(a.rumors().get(&RumorKey::Member(target)).is_some());
    }

    #[test]
    fn test_relayed_ack_clears_probe() {
        let mut a = node("a");
        let mut b = node("b");
        let mut c = node("c");
        a.insert_member(member("b"), Health::Alive, at(0));
        assert_eq!(a.probe_round(at(0)), Some(id("b")));
        a.drain_outbound();
        a.insert_member(member("c"), Health::Alive, at(0));

        a.tick(at(100));
        let requests = swims_to(&a.drain_outbound(), "c");
        assert_eq!(requests.len(), 1);

        c.handle_swim(requests[0].clone(), at(110));
        let pings = swims_to(&c.drain_outbound(), "b");
        assert!(matches!(&pings[0].payload, SwimPayload::Ping(p) if p.forward_to.as_ref().map(|m| &m.id) == Some(&id("a"))));

        b.handle_swim(pings[0].clone(), at(120));
        let acks = swims_to(&b.drain_outbound(), "c");
        assert_eq!(acks.len(), 1);

        c.handle_swim(acks[0].clone(), at(130));
        let relayed = swims_to(&c.drain_outbound(), "a");
        assert_eq!(relayed.len(), 1);
        assert!(matches!(&relayed[0].payload, SwimPayload::Ack(ack) if ack.from.id == id("b")));

        a.handle_swim(relayed[0].clone(), at(140));
        a.tick(at(1000));
        assert_eq!(a.health_of(&id("b")), Some(Health::Alive));
    }

    #[test]
    fn test_late_ack_before_relay_deadline_clears_member() {
        let mut a = node("a");
        let mut b = node("b");
        a.insert_member(member("b"), Health::Alive, at(0));
        a.probe_round(at(0));
        let ping = swims_to(&a.drain_outbound(), "b").remove(0);
        a.tick(at(100));

        b.handle_swim(ping, at(150));
        let ack = swims_to(&b.drain_outbound(), "a").remove(0);
        a.handle_swim(ack, at(180));
        a.tick(at(5000));
        assert_eq!(a.health_of(&id("b")), Some(Health::Alive));
    }

    #[test]
    fn test_suspicion_learned_from_rumor_confirms() {
        let mut a = node("a");
        a.insert_member(member("b"), Health::Alive, at(0));
        let rumor = Rumor::member(Membership::new(member("b"), Health::Suspect)).with_from(id("c"));
        a.handle_rumor(rumor, at(10));
        assert_eq!(a.health_of(&id("b")), Some(Health::Suspect));
        a.tick(at(510));
        assert_eq!(a.health_of(&id("b")), Some(Health::Confirmed));
    }

    #[test]
    fn test_refutation_before_timeout() {
        let mut a = node("a");
        a.insert_member(member("b"), Health::Suspect, at(0));
        let ack = Swim::ack(member("b").with_incarnation(1), None);
        a.handle_swim(ack, at(100));
        assert_eq!(a.health_of(&id("b")), Some(Health::Alive));
        a.tick(at(1000));
        assert_eq!(a.health_of(&id("b")), Some(Health::Alive));

        let rumor = a.rumors().get(&RumorKey::Member(id("b"))).unwrap();
        assert!(matches!(&rumor.payload, RumorPayload::Member(r) if r.member.incarnation == 1 && r.health == Health::Alive));
    }

    #[test]
    fn test_self_suspicion_is_refuted() {
        let mut a = node("a");
        let claim = Swim::ping(member("b"), None).with_membership(vec![Membership::new(member("a"), Health::Suspect)]);
        a.handle_swim(claim, at(0));
        assert_eq!(a.local().incarnation, 1);
        assert_eq!(a.health_of(&id("a")), Some(Health::Alive));
        let rumor = a.rumors().get(&RumorKey::Member(id("a"))).unwrap();
        assert!(matches!(&rumor.payload, RumorPayload::Member(r) if r.member.incarnation == 1));
    }

    #[test]
    fn test_ping_from_stranger_registers_it() {
        let mut a = node("a");
        a.handle_swim(Swim::ping(member("z"), None), at(0));
        assert_eq!(a.health_of(&id("z")), Some(Health::Alive));
        let events = a.drain_events();
        assert_eq!(events[0].previous, None);
    }

    #[test]
    fn test_gossip_round_uses_gossip_port() {
        let mut a = node("a");
        a.insert_member(member("b"), Health::Alive, at(0));
        let sent = a.gossip_round(at(0));
        assert!(sent > 0);
        let outbound = a.drain_outbound();
        assert!(outbound.iter().all(|o| o.to == Peer::new("b", 2)));
        assert!(outbound.iter().all(|o| o.envelope.channel() == Channel::Gossip));
    }

    #[test]
    fn test_fake_rumors_pass_through() {
        let mut a = node("a");
        a.insert_member(member("b"), Health::Alive, at(0));
        a.handle_rumor(Rumor::new(RumorPayload::Fake).with_from(id("c")), at(0));
        a.gossip_round(at(0));
        let fakes = a
            .drain_outbound()
            .into_iter()
            .filter(|o| matches!(&o.envelope, Envelope::Rumor(r) if r.kind() == RumorKind::Fake))
            .count();
        assert_eq!(fakes, 1);
    }

    #[test]
    fn test_garbage_datagram_is_rejected() {
        let mut a = node("a");
        assert!(a.handle_datagram(Channel::Swim, &[0xff, 0xff, 0xff], at(0)).is_err());
        assert!(a.drain_outbound().is_empty());
    }

    #[test]
    fn test_datagram_round_trip() {
        let mut a = node("a");
        let mut b = node("b");
        a.insert_member(member("b"), Health::Alive, at(0));
        a.probe_round(at(0));
        let out = a.drain_outbound().remove(0);
        b.handle_datagram(out.envelope.channel(), &out.envelope.to_wire(), at(1)).unwrap();
        assert_eq!(b.health_of(&id("a")), Some(Health::Alive));
    }

    #[test]
    fn test_lone_member_leads_its_group() {
        let mut a = node("a");
        a.advertise_service(Service::new(id("a"), "db", "10.0.0.1", 5432))
            .unwrap();
        let election = a.start_election("db", 5).unwrap();
        assert_eq!(election.term, 1);
        assert_eq!(a.leader("db"), Some(&id("a")));
    }

    #[test]
    fn test_foreign_service_is_rejected() {
        let mut a = node("a");
        assert!(a.advertise_service(Service::new(id("b"), "db", "10.0.0.1", 5432)).is_err());
    }

    #[test]
    fn test_readvertising_bumps_incarnation() {
        let mut a = node("a");
        a.advertise_service(Service::new(id("a"), "db", "10.0.0.1", 5432))
            .unwrap();
        a.advertise_service(Service::new(id("a"), "db", "10.0.0.1", 5433))
            .unwrap();
        let services: Vec<&Service> = a.services("db").collect();
        assert_eq!(services.len(), 1);
        assert_eq!(services[0].port, 5433);
        assert_eq!(services[0].incarnation, 1);
    }

    fn five_persistent(a: &mut Node, alive: &[&str]) {
        for peer in ["b", "c", "d", "e"] {
            let health = if alive.contains(&peer) {
                Health::Alive
            } else {
                Health::Confirmed
            };
            a.insert_member(member(peer).with_persistent(true), health, at(0));
            a.handle_rumor(Rumor::service(Service::new(id(peer), "db", peer, 5432)), at(0));
        }
        a.advertise_service(Service::new(id("a"), "db", "a", 5432))
            .unwrap();
    }

    #[test]
    fn test_three_of_five_votes_finish() {
        let mut a = node("a");
        five_persistent(&mut a, &["b", "c"]);
        a.start_election("db", 9).unwrap();
        assert_eq!(a.election("db").map(|e| e.status), Some(ElectionStatus::Running));

        let mut votes = Election::new(id("a"), "db", 1, 9);
        votes.vote(id("b"));
        votes.vote(id("c"));
        a.handle_rumor(Rumor::election(votes).with_from(id("c")), at(10));
        assert_eq!(a.leader("db"), Some(&id("a")));
    }

    #[test]
    fn test_two_of_five_alive_has_no_quorum() {
        let mut a = node("a");
        five_persistent(&mut a, &["b"]);
        a.start_election("db", 9).unwrap();

        let mut votes = Election::new(id("a"), "db", 1, 9);
        votes.vote(id("b"));
        a.handle_rumor(Rumor::election(votes).with_from(id("b")), at(10));
        let election = a.election("db").unwrap();
        assert_eq!(election.status, ElectionStatus::NoQuorum);
        assert_eq!(election.votes.len(), 2);
        assert_eq!(a.leader("db"), None);
    }

    #[test]
    fn test_quorum_recovery_starts_new_term() {
        let mut a = node("a");
        five_persistent(&mut a, &["b"]);
        a.start_election("db", 9).unwrap();
        assert_eq!(a.election("db").map(|e| e.status), Some(ElectionStatus::NoQuorum));

        a.handle_swim(Swim::ping(member("c").with_persistent(true).with_incarnation(1), None), at(10));
        let election = a.election("db").unwrap();
        assert_eq!(election.term, 2);
        assert_eq!(election.status, ElectionStatus::Running);
    }

    #[test]
    fn test_vote_for_better_candidate() {
        let mut a = node("a");
        a.insert_member(member("b"), Health::Alive, at(0));
        a.handle_rumor(Rumor::service(Service::new(id("b"), "db", "b", 5432)), at(0));
        a.handle_rumor(Rumor::service(Service::new(id("c"), "db", "c", 5432)), at(0));
        a.advertise_service(Service::new(id("a"), "db", "a", 5432))
            .unwrap();
        a.handle_rumor(Rumor::election(Election::new(id("b"), "db", 1, 9)), at(1));
        let election = a.election("db").unwrap();
        assert_eq!(election.member_id, id("b"));
        assert!(election.votes.contains(&id("a")));
        // b and a are 2 of the 2 eligible voters (c is unknown)
        assert!(election.is_finished());
    }

    #[test]
    fn test_confirmed_leader_triggers_reelection() {
        let mut a = node("a");
        a.insert_member(member("b"), Health::Alive, at(0));
        a.handle_rumor(Rumor::service(Service::new(id("b"), "db", "b", 5432)), at(0));
        a.advertise_service(Service::new(id("a"), "db", "a", 5432))
            .unwrap();
        let mut finished = Election::new(id("b"), "db", 4, 9);
        finished.vote(id("a"));
        finished.status = ElectionStatus::Finished;
        a.handle_rumor(Rumor::election(finished), at(1));
        assert_eq!(a.leader("db"), Some(&id("b")));

        a.handle_rumor(
            Rumor::member(Membership::new(member("b"), Health::Confirmed)),
            at(2),
        );
        let election = a.election("db").unwrap();
        assert_eq!(election.term, 5);
        assert_eq!(a.leader("db"), Some(&id("a")));
    }

    #[test]
    fn test_incoming_status_is_judged_locally() {
        let mut a = node("a");
        for peer in ["b", "c", "d"] {
            a.insert_member(member(peer), Health::Alive, at(0));
            a.handle_rumor(Rumor::service(Service::new(id(peer), "db", peer, 5432)), at(0));
        }
        let mut lone = Election::new(id("b"), "db", 1, 9);
        lone.status = ElectionStatus::Finished;
        a.handle_rumor(Rumor::election(lone).with_from(id("b")), at(1));
        assert_eq!(a.election("db").map(|e| e.status), Some(ElectionStatus::Running));
        assert_eq!(a.leader("db"), None);

        let mut backed = Election::new(id("b"), "db", 1, 9);
        backed.vote(id("c"));
        backed.vote(id("d"));
        a.handle_rumor(Rumor::election(backed).with_from(id("c")), at(2));
        assert_eq!(a.leader("db"), Some(&id("b")));
    }

    #[test]
    fn test_displaced_own_finish_restarts() {
        let mut a = node("b");
        a.advertise_service(Service::new(id("b"), "db", "b", 5432))
            .unwrap();
        a.start_election("db", 5).unwrap();
        assert_eq!(a.leader("db"), Some(&id("b")));

        a.insert_member(member("a"), Health::Alive, at(0));
        a.insert_member(member("c"), Health::Alive, at(0));
        for peer in ["a", "c"] {
            a.handle_rumor(Rumor::service(Service::new(id(peer), "db", peer, 5432)), at(1));
        }
        assert_eq!(a.election("db").map(|e| e.status), Some(ElectionStatus::Running));

        let mut better = Election::new(id("a"), "db", 1, 5);
        better.status = ElectionStatus::Finished;
        a.handle_rumor(Rumor::election(better).with_from(id("a")), at(2));
        let election = a.election("db").unwrap();
        assert_eq!(election.member_id, id("a"));
        assert!(election.votes.contains(&id("b")));
        // a and b are 2 of 3 eligible voters
        assert_eq!(a.leader("db"), Some(&id("a")));
    }

    #[test]
    fn test_departed_persistent_member_refutes_when_reached() {
        let mut a = node("a");
        let mut b = node("b");
        a.insert_member(member("b").with_persistent(true), Health::Confirmed, at(0));
        assert_eq!(a.probe_round(at(10)), Some(id("b")));

        let pings = swims_to(&a.drain_outbound(), "b");
        assert_eq!(pings.len(), 1);
        assert!(pings[0]
            .membership
            .iter()
            .any(|r| r.member.id == id("b") && r.health == Health::Confirmed));

        b.handle_swim(pings[0].clone(), at(11));
        assert_eq!(b.local().incarnation, 1);
        let acks = swims_to(&b.drain_outbound(), "a");
        assert_eq!(acks.len(), 1);
        a.handle_swim(acks[0].clone(), at(12));
        assert_eq!(a.health_of(&id("b")), Some(Health::Alive));
    }

    #[test]
    fn test_departed_member_gets_no_relays() {
        let mut a = node("a");
        a.insert_member(member("b").with_persistent(true), Health::Confirmed, at(0));
        a.insert_member(member("c"), Health::Alive, at(0));
        let targets: Vec<Option<MemberId>> = (0..2).map(|ms| a.probe_round(at(ms))).collect();
        assert!(targets.contains(&Some(id("b"))));
        a.drain_outbound();
        a.tick(at(150));
        let relayed = swims_to(&a.drain_outbound(), "c")
            .into_iter()
            .any(|s| matches!(&s.payload, SwimPayload::PingReq(r) if r.target.id == id("b")));
        assert!(!relayed);
        assert_eq!(a.health_of(&id("b")), Some(Health::Confirmed));
    }

    #[test]
    fn test_tombstones_pruned_when_configured() {
        let mut a = Node::new(member("a"), config().with_tombstone_retention(Some(1000)));
        a.insert_member(member("b"), Health::Confirmed, at(0));
        a.tick(at(500));
        assert!(a.health_of(&id("b")).is_some());
        a.tick(at(1000));
        assert!(a.health_of(&id("b")).is_none());
    }
}
