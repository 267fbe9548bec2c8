//! Member registry: the local, authoritative view of every known member.
//!
//! One record per member id, chosen by precedence (incarnation, then
//! health). Confirmed members stay as tombstones so stale rumors cannot
//! resurrect them. Claims that the local member is Suspect or Confirmed are
//! never accepted; the local incarnation is bumped and an Alive refutation
//! is returned instead.

use indexmap::IndexMap;
use murmur_core::{Health, LogicalTime, Member, MemberId, Membership, Precedence};
use tracing::{debug, info};

/// Result of offering a record to the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observed {
    /// Stale or duplicate; nothing changed
    Unchanged,
    /// The record was accepted
    Changed {
        /// Record it replaced, `None` on first sighting
        previous: Option<Membership>,
    },
    /// The record demoted the local member; this refutation replaces it
    Refuted(Membership),
}

impl Observed {
    /// Whether the registry's view changed
    #[must_use]
    pub fn changed(&self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

#[derive(Debug, Clone)]
struct Entry {
    record: Membership,
    updated_at: LogicalTime,
}

/// Restartable iterator over every known record, the local member included
#[derive(Debug, Clone)]
pub struct Snapshot<'a> {
    inner: indexmap::map::Values<'a, MemberId, Entry>,
}

impl<'a> Iterator for Snapshot<'a> {
    type Item = &'a Membership;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|entry| &entry.record)
    }
}

/// Member registry
#[derive(Debug)]
pub struct MemberList {
    local: Member,
    members: IndexMap<MemberId, Entry>,
}

impl MemberList {
    /// Create a registry that knows only the local member
    #[must_use]
    pub fn new(local: Member) -> Self {
        let mut members = IndexMap::new();
        members.insert(
            local.id.clone(),
            Entry {
                record: Membership::alive(local.clone()),
                updated_at: LogicalTime::zero(),
            },
        );
        Self { local, members }
    }

    /// The local member at its current incarnation
    #[must_use]
    pub fn local(&self) -> &Member {
        &self.local
    }

    /// The local member's id
    #[must_use]
    pub fn local_id(&self) -> &MemberId {
        &self.local.id
    }

    /// Increment the local incarnation and return the Alive record to announce
    pub fn bump_incarnation(&mut self, now: LogicalTime) -> Membership {
        let next = self.local.incarnation + 1;
        self.set_local_incarnation(next, now)
    }

    fn set_local_incarnation(&mut self, incarnation: u64, now: LogicalTime) -> Membership {
        self.local.incarnation = incarnation;
        let record = Membership::alive(self.local.clone());
        self.members.insert(
            self.local.id.clone(),
            Entry {
                record: record.clone(),
                updated_at: now,
            },
        );
        record
    }

    /// Offer a record; applies precedence and self-protection
    pub fn observe(&mut self, record: Membership, now: LogicalTime) -> Observed {
        if record.member.id == self.local.id {
            return self.observe_self(&record, now);
        }

        match self.members.get_mut(&record.member.id) {
            Some(entry) => {
                if record.precedence_over(&entry.record) != Precedence::Newer {
                    return Observed::Unchanged;
                }
                if record.health != entry.record.health {
                    info!(
                        member = %record.member.id,
                        incarnation = record.member.incarnation,
                        from = %entry.record.health,
                        to = %record.health,
                        "Member health changed"
                    );
                }
                let previous = std::mem::replace(&mut entry.record, record);
                entry.updated_at = now;
                Observed::Changed {
                    previous: Some(previous),
                }
            }
            None => {
                debug!(member = %record.member.id, health = %record.health, "New member");
                self.members.insert(
                    record.member.id.clone(),
                    Entry {
                        record,
                        updated_at: now,
                    },
                );
                Observed::Changed { previous: None }
            }
        }
    }

    fn observe_self(&mut self, record: &Membership, now: LogicalTime) -> Observed {
        let demoted = record.health != Health::Alive && record.member.incarnation >= self.local.incarnation;
        let outdated = record.member.incarnation > self.local.incarnation;
        if !demoted && !outdated {
            return Observed::Unchanged;
        }
        let next = record.member.incarnation.max(self.local.incarnation) + 1;
        info!(
            claimed = %record.health,
            incarnation = next,
            "Refuting claim about local member"
        );
        Observed::Refuted(self.set_local_incarnation(next, now))
    }

    /// Authoritative record for a member
    #[must_use]
    pub fn current(&self, id: &MemberId) -> Option<&Membership> {
        self.members.get(id).map(|entry| &entry.record)
    }

    /// Health of a member, if known
    #[must_use]
    pub fn health_of(&self, id: &MemberId) -> Option<Health> {
        self.current(id).map(|record| record.health)
    }

    /// Whether a member counts toward election quorum
    #[must_use]
    pub fn is_eligible(&self, id: &MemberId) -> bool {
        self.current(id)
            .is_some_and(|r| r.health == Health::Alive || r.member.persistent)
    }

    /// Every known record
    #[must_use]
    pub fn snapshot(&self) -> Snapshot<'_> {
        Snapshot {
            inner: self.members.values(),
        }
    }

    /// Remote members currently in the given health
    pub fn peers_with(&self, health: Health) -> impl Iterator<Item = &Member> + '_ {
        self.snapshot()
            .filter(move |r| r.health == health && r.member.id != self.local.id)
            .map(|r| &r.member)
    }

    /// Number of known members, the local member included
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Always false: the local member is always known
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Members not Confirmed, the local member included
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.snapshot().filter(|r| r.health != Health::Confirmed).count()
    }

    /// Forget Confirmed members whose tombstone is older than `retention_ms`
    pub fn prune_confirmed(&mut self, now: LogicalTime, retention_ms: u64) -> Vec<MemberId> {
        let expired: Vec<MemberId> = self
            .members
            .values()
            .filter(|e| e.record.health == Health::Confirmed && now.since(e.updated_at) >= retention_ms)
            .map(|e| e.record.member.id.clone())
            .collect();
        for id in &expired {
            debug!(member = %id, "Pruning tombstone");
            self.members.shift_remove(id);
        }
        expired
    }
}
