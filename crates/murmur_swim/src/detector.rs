//! Failure detector bookkeeping: probe traversal, outstanding probes, and
//! the deadlines that turn silence into suspicion.
//!
//! Targets are visited in a shuffled round-robin: every Alive member is
//! probed once per traversal before any is probed again. Persistent members
//! stay in the traversal after they are Confirmed, so a healed partition
//! finds them again. At most one probe is outstanding per target.

use crate::member_list::MemberList;
use crate::timer::{TimerKey, TimerKind, Timers};
use murmur_core::{Health, LogicalTime, Member, MemberId, Membership};
use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use std::collections::HashMap;
use tracing::trace;

/// A probe awaiting its ack
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Probe {
    /// Round that started it
    pub round: u64,
    /// Member being probed, as known when the round started
    pub target: Member,
    /// When the ping went out
    pub started_at: LogicalTime,
}

/// Probe scheduler and deadline keeper
#[derive(Debug)]
pub struct Detector {
    round: u64,
    traversal: Vec<MemberId>,
    probes: HashMap<MemberId, Probe>,
    timers: Timers,
    rng: ChaCha8Rng,
}

impl Detector {
    /// Create a detector; `seed` makes target order reproducible
    #[must_use]
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        Self {
            round: 0,
            traversal: Vec::new(),
            probes: HashMap::new(),
            timers: Timers::new(),
            rng,
        }
    }

    /// Number of probe rounds started
    #[must_use]
    pub fn round(&self) -> u64 {
        self.round
    }

    /// Next member to probe, refilling the traversal when it runs dry
    ///
    /// Members that stopped being targets or already have a probe
    /// outstanding are skipped.
    pub fn next_target(&mut self, members: &MemberList) -> Option<Member> {
        for refilled in [false, true] {
            if refilled {
                self.traversal = members
                    .snapshot()
                    .filter(|r| r.member.id != *members.local_id() && is_target(r))
                    .map(|r| r.member.id.clone())
                    .collect();
                self.traversal.shuffle(&mut self.rng);
                trace!(size = self.traversal.len(), "New probe traversal");
            }
            while let Some(id) = self.traversal.pop() {
                if self.probes.contains_key(&id) {
                    continue;
                }
                if let Some(record) = members.current(&id).filter(|r| is_target(r)) {
                    return Some(record.member.clone());
                }
            }
        }
        None
    }

    /// Record a probe of `target` and arm its direct-ack deadline
    pub fn start_probe(&mut self, target: Member, now: LogicalTime, ping_timeout_ms: u64) -> u64 {
        self.round += 1;
        let round = self.round;
        self.timers.schedule(
            TimerKey::new(target.id.clone(), round, TimerKind::Ack),
            now.after(ping_timeout_ms),
        );
        self.probes.insert(
            target.id.clone(),
            Probe {
                round,
                target,
                started_at: now,
            },
        );
        round
    }

    /// Outstanding probe of a member
    #[must_use]
    pub fn probe(&self, id: &MemberId) -> Option<&Probe> {
        self.probes.get(id)
    }

    /// Arm the indirect-ack deadline for an outstanding probe
    pub fn await_relay(&mut self, id: &MemberId, round: u64, at: LogicalTime) {
        self.timers
            .schedule(TimerKey::new(id.clone(), round, TimerKind::PingReq), at);
    }

    /// An ack arrived from `id`; returns true if it answered a probe
    pub fn acked(&mut self, id: &MemberId) -> bool {
        match self.probes.remove(id) {
            Some(probe) => {
                self.timers
                    .cancel(&TimerKey::new(id.clone(), probe.round, TimerKind::Ack));
                self.timers
                    .cancel(&TimerKey::new(id.clone(), probe.round, TimerKind::PingReq));
                true
            }
            None => false,
        }
    }

    /// Drop the probe for `id` if it belongs to `round`
    pub fn finish_probe(&mut self, id: &MemberId, round: u64) -> Option<Probe> {
        if self.probes.get(id).is_some_and(|p| p.round == round) {
            self.probes.remove(id)
        } else {
            None
        }
    }

    /// Arm the suspicion deadline for `id` at `incarnation`, unless armed
    pub fn suspect(&mut self, id: &MemberId, incarnation: u64, at: LogicalTime) {
        let key = TimerKey::new(id.clone(), incarnation, TimerKind::Suspicion);
        if !self.timers.is_pending(&key) {
            self.timers.schedule(key, at);
        }
    }

    /// Whether a suspicion deadline is armed for `id` at `incarnation`
    #[must_use]
    pub fn is_suspected(&self, id: &MemberId, incarnation: u64) -> bool {
        self.timers
            .is_pending(&TimerKey::new(id.clone(), incarnation, TimerKind::Suspicion))
    }

    /// Disarm every suspicion deadline for `id`
    pub fn clear_suspicion(&mut self, id: &MemberId) {
        self.timers.cancel_member(id, TimerKind::Suspicion);
    }

    /// Forget everything pending about a departed member
    pub fn forget(&mut self, id: &MemberId) {
        self.probes.remove(id);
        for kind in [TimerKind::Ack, TimerKind::PingReq, TimerKind::Suspicion] {
            self.timers.cancel_member(id, kind);
        }
    }

    /// Up to `count` distinct Alive peers in random order, skipping `exclude`
    pub fn choose_peers(&mut self, members: &MemberList, count: usize, exclude: Option<&MemberId>) -> Vec<Member> {
        let candidates: Vec<&Member> = members
            .peers_with(Health::Alive)
            .filter(|m| Some(&m.id) != exclude)
            .collect();
        candidates
            .choose_multiple(&mut self.rng, count)
            .map(|m| (*m).clone())
            .collect()
    }

    /// Deadlines due at `now`, earliest first
    pub fn expired(&mut self, now: LogicalTime) -> Vec<TimerKey> {
        self.timers.expired(now)
    }

    /// Earliest pending deadline
    #[must_use]
    pub fn next_deadline(&self) -> Option<LogicalTime> {
        self.timers.next_deadline()
    }
}

fn is_target(record: &Membership) -> bool {
    match record.health {
        Health::Alive => true,
        Health::Suspect => false,
        Health::Confirmed => record.member.persistent,
    }
}
