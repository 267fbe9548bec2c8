//! Cancellable protocol deadlines.
//!
//! Each pending deadline is keyed by `(member_id, round, kind)`. An ack
//! cancels the probe's deadlines by key, so an answer that arrives after
//! the indirect fan-out but before the final timeout still clears the
//! member.

use murmur_core::{LogicalTime, MemberId};
use std::collections::{BTreeMap, HashMap};

/// What a deadline guards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimerKind {
    /// Direct ack for a ping
    Ack,
    /// Relayed ack after ping requests went out
    PingReq,
    /// End of a member's suspicion window
    Suspicion,
}

/// Identity of a deadline
///
/// For probe deadlines `round` is the probe round; for suspicion it is the
/// incarnation that was suspected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerKey {
    /// Member the deadline is about
    pub member_id: MemberId,
    /// Probe round or suspected incarnation
    pub round: u64,
    /// What expires
    pub kind: TimerKind,
}

impl TimerKey {
    /// Create a key
    #[must_use]
    pub fn new(member_id: MemberId, round: u64, kind: TimerKind) -> Self {
        Self { member_id, round, kind }
    }
}

/// Deadline set ordered by expiry
#[derive(Debug, Default)]
pub struct Timers {
    by_deadline: BTreeMap<(LogicalTime, u64), TimerKey>,
    by_key: HashMap<TimerKey, (LogicalTime, u64)>,
    seq: u64,
}

impl Timers {
    /// Create an empty set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `key` at `at`, replacing any deadline already held for it
    pub fn schedule(&mut self, key: TimerKey, at: LogicalTime) {
        self.cancel(&key);
        self.seq += 1;
        let slot = (at, self.seq);
        self.by_deadline.insert(slot, key.clone());
        self.by_key.insert(key, slot);
    }

    /// Cancel a deadline; returns true if it was pending
    pub fn cancel(&mut self, key: &TimerKey) -> bool {
        match self.by_key.remove(key) {
            Some(slot) => {
                self.by_deadline.remove(&slot);
                true
            }
            None => false,
        }
    }

    /// Cancel every deadline of one kind for a member
    pub fn cancel_member(&mut self, member_id: &MemberId, kind: TimerKind) -> usize {
        let keys: Vec<TimerKey> = self
            .by_key
            .keys()
            .filter(|k| &k.member_id == member_id && k.kind == kind)
            .cloned()
            .collect();
        keys.iter().filter(|k| self.cancel(k)).count()
    }

    /// Whether a deadline is pending
    #[must_use]
    pub fn is_pending(&self, key: &TimerKey) -> bool {
        self.by_key.contains_key(key)
    }

    /// Earliest pending deadline
    #[must_use]
    pub fn next_deadline(&self) -> Option<LogicalTime> {
        self.by_deadline.keys().next().map(|(at, _)| *at)
    }

    /// Remove and return every deadline at or before `now`, earliest first
    pub fn expired(&mut self, now: LogicalTime) -> Vec<TimerKey> {
        let mut fired = Vec::new();
        while let Some(entry) = self.by_deadline.first_entry() {
            if entry.key().0 > now {
                break;
            }
            let key = entry.remove();
            self.by_key.remove(&key);
            fired.push(key);
        }
        fired
    }

    /// Number of pending deadlines
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    /// Whether nothing is pending
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}
