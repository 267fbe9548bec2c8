//! Rumor mill: every rumor this node knows, and how hot each one still is.
//!
//! Each rumor carries a heat counter of transmissions. Selection for an
//! outbound message prefers rumors the peer has not been sent yet, then the
//! coolest. Once a rumor's heat reaches the retransmit limit for the current
//! cluster size it leaves rotation. Retired Member and Fake rumors are
//! evicted after the retention window (the registry keeps member state, and
//! fakes carry none); Service and Election rumors are the only copy of their
//! state and stay retired but queryable.

use crate::config::retransmit_limit;
use indexmap::IndexMap;
use murmur_core::{Election, ElectionStatus, LogicalTime, MemberId, Rumor, RumorKey, RumorKind, RumorPayload, Service};
use murmur_wire::WireEncode;
use std::collections::HashSet;
use tracing::trace;

/// Limits on what one outbound message may carry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Budget {
    /// Maximum number of rumors
    pub max_rumors: usize,
    /// Maximum encoded bytes of rumors
    pub max_bytes: usize,
}

impl Budget {
    /// Create a budget
    #[must_use]
    pub fn new(max_rumors: usize, max_bytes: usize) -> Self {
        Self { max_rumors, max_bytes }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    rumor: Rumor,
    heat: u32,
    sent_to: HashSet<MemberId>,
    retired_at: Option<LogicalTime>,
}

impl Entry {
    fn new(rumor: Rumor) -> Self {
        Self {
            rumor,
            heat: 0,
            sent_to: HashSet::new(),
            retired_at: None,
        }
    }

    fn rekindle(&mut self) {
        self.heat = 0;
        self.sent_to.clear();
        self.retired_at = None;
    }
}

/// Rumor store with heat-based dissemination
#[derive(Debug)]
pub struct RumorMill {
    entries: IndexMap<RumorKey, Entry>,
    retransmit_mult: u32,
    retention_ms: u64,
}

impl RumorMill {
    /// Create an empty mill
    #[must_use]
    pub fn new(retransmit_mult: u32, retention_ms: u64) -> Self {
        Self {
            entries: IndexMap::new(),
            retransmit_mult,
            retention_ms,
        }
    }

    /// Insert or supersede; returns true if the rumor was newly accepted
    ///
    /// Stale and duplicate rumors return false and leave heat untouched.
    pub fn ingest(&mut self, rumor: Rumor) -> bool {
        let key = rumor.key();
        match self.entries.get_mut(&key) {
            Some(entry) => {
                if entry.rumor.absorb(&rumor) {
                    entry.rekindle();
                    true
                } else {
                    false
                }
            }
            None => {
                self.entries.insert(key, Entry::new(rumor));
                true
            }
        }
    }

    /// Rumors to attach to a message for `peer`
    ///
    /// Rumors that originated at `peer` are never sent back to it. Among the
    /// rest, those not yet sent to `peer` come first, then the coolest.
    pub fn select_for_piggyback(
        &self,
        budget: Budget,
        peer: &MemberId,
        filter: impl Fn(&Rumor) -> bool,
    ) -> Vec<Rumor> {
        let mut candidates: Vec<&Entry> = self
            .entries
            .values()
            .filter(|e| e.retired_at.is_none())
            .filter(|e| e.rumor.from_id.as_ref() != Some(peer))
            .filter(|e| filter(&e.rumor))
            .collect();
        candidates.sort_by_key(|e| (e.sent_to.contains(peer), e.heat));

        let mut selected = Vec::new();
        let mut bytes = 0;
        for entry in candidates {
            if selected.len() >= budget.max_rumors {
                break;
            }
            let len = entry.rumor.wire_len();
            if bytes + len > budget.max_bytes {
                continue;
            }
            bytes += len;
            selected.push(entry.rumor.clone());
        }
        selected
    }

    /// Record that a rumor went to `peer`; retires it once saturated
    pub fn mark_sent(&mut self, key: &RumorKey, peer: &MemberId, cluster_size: usize, now: LogicalTime) {
        let limit = retransmit_limit(self.retransmit_mult, cluster_size);
        if let Some(entry) = self.entries.get_mut(key) {
            entry.heat += 1;
            entry.sent_to.insert(peer.clone());
            if entry.heat >= limit && entry.retired_at.is_none() {
                trace!(?key, heat = entry.heat, "Rumor saturated");
                entry.retired_at = Some(now);
            }
        }
    }

    /// Put every held rumor back into rotation, for a newly seen member
    pub fn rekindle(&mut self) {
        for entry in self.entries.values_mut() {
            entry.rekindle();
        }
    }

    /// Evict retired rumors past the retention window, except Service and
    /// Election rumors
    pub fn expire(&mut self, now: LogicalTime) -> usize {
        let before = self.entries.len();
        let retention = self.retention_ms;
        self.entries.retain(|_, e| match e.retired_at {
            Some(at) if is_evictable(e.rumor.kind()) => now.since(at) < retention,
            _ => true,
        });
        before - self.entries.len()
    }

    /// Held rumor for a key
    #[must_use]
    pub fn get(&self, key: &RumorKey) -> Option<&Rumor> {
        self.entries.get(key).map(|e| &e.rumor)
    }

    /// Transmission count of a rumor
    #[must_use]
    pub fn heat(&self, key: &RumorKey) -> Option<u32> {
        self.entries.get(key).map(|e| e.heat)
    }

    /// Whether a rumor has left rotation
    #[must_use]
    pub fn is_retired(&self, key: &RumorKey) -> bool {
        self.entries.get(key).is_some_and(|e| e.retired_at.is_some())
    }

    /// Current election record for a group
    #[must_use]
    pub fn election(&self, service_group: &str) -> Option<&Election> {
        match self.get(&RumorKey::Election(service_group.to_string())).map(|r| &r.payload) {
            Some(RumorPayload::Election(e)) => Some(e),
            _ => None,
        }
    }

    /// Set the local judgement of a group's election; returns the previous
    /// status
    ///
    /// Heat is untouched: status is not something peers take from us.
    pub fn set_election_status(&mut self, service_group: &str, status: ElectionStatus) -> Option<ElectionStatus> {
        let entry = self.entries.get_mut(&RumorKey::Election(service_group.to_string()))?;
        match &mut entry.rumor.payload {
            RumorPayload::Election(e) => Some(std::mem::replace(&mut e.status, status)),
            _ => None,
        }
    }

    /// Every election record held
    pub fn elections(&self) -> impl Iterator<Item = &Election> + '_ {
        self.entries.values().filter_map(|e| match &e.rumor.payload {
            RumorPayload::Election(election) => Some(election),
            _ => None,
        })
    }

    /// Advertisements in a group
    pub fn services<'a>(&'a self, service_group: &'a str) -> impl Iterator<Item = &'a Service> + 'a {
        self.entries.values().filter_map(move |e| match &e.rumor.payload {
            RumorPayload::Service(s) if s.service_group == service_group => Some(s),
            _ => None,
        })
    }

    /// Number of held rumors
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the mill is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of rumors still in rotation
    #[must_use]
    pub fn active_len(&self) -> usize {
        self.entries.values().filter(|e| e.retired_at.is_none()).count()
    }
}

fn is_evictable(kind: RumorKind) -> bool {
    matches!(kind, RumorKind::Member | RumorKind::Fake | RumorKind::Fake2)
}
