//! Per service-group leader election records.
//!
//! An `Election` is the single authoritative record a node holds for a
//! group. Records merge as a join-semilattice:
//! - a higher `term` replaces everything below it
//! - within a term the better candidate replaces a worse one
//! - for the same candidate, votes are unioned
//!
//! Status never travels through a merge. A replacing record starts out
//! `Running` and each holder judges it against its own view of the quorum.

use crate::id::MemberId;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;

/// Election progress within a term
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElectionStatus {
    /// Collecting votes
    Running,
    /// Too few eligible voters reachable to ever finish
    NoQuorum,
    /// A majority voted for the candidate
    Finished,
}

/// A contender, ordered so that the better candidate compares greater
///
/// Higher suitability wins; ties go to the lexicographically smallest id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate<'a> {
    /// Self-reported fitness
    pub suitability: u64,
    /// Candidate member
    pub member_id: &'a MemberId,
}

impl Ord for Candidate<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.suitability
            .cmp(&other.suitability)
            .then_with(|| other.member_id.cmp(self.member_id))
    }
}

impl PartialOrd for Candidate<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Election state for one service group
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Election {
    /// Candidate this record is about
    pub member_id: MemberId,
    /// Group being elected for
    pub service_group: String,
    /// Round counter
    pub term: u64,
    /// Candidate's fitness
    pub suitability: u64,
    /// Progress
    pub status: ElectionStatus,
    /// Members supporting the candidate in this term
    pub votes: BTreeSet<MemberId>,
}

impl Election {
    /// Open a candidacy with the candidate's own vote
    #[must_use]
    pub fn new(member_id: MemberId, service_group: impl Into<String>, term: u64, suitability: u64) -> Self {
        let mut votes = BTreeSet::new();
        votes.insert(member_id.clone());
        Self {
            member_id,
            service_group: service_group.into(),
            term,
            suitability,
            status: ElectionStatus::Running,
            votes,
        }
    }

    /// The contender this record backs
    #[must_use]
    pub fn candidate(&self) -> Candidate<'_> {
        Candidate {
            suitability: self.suitability,
            member_id: &self.member_id,
        }
    }

    /// Whether the election concluded
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.status == ElectionStatus::Finished
    }

    /// Add a supporter; returns true if the vote is new
    pub fn vote(&mut self, voter: MemberId) -> bool {
        self.votes.insert(voter)
    }

    /// Fold `incoming` into this record; returns true if anything changed
    ///
    /// The incoming status is ignored. A record that replaces this one
    /// comes in as `Running`.
    pub fn merge(&mut self, incoming: &Election) -> bool {
        let replaces = match incoming.term.cmp(&self.term) {
            Ordering::Greater => true,
            Ordering::Less => false,
            Ordering::Equal => match incoming.candidate().cmp(&self.candidate()) {
                Ordering::Greater => true,
                Ordering::Less => false,
                Ordering::Equal => {
                    let before = self.votes.len();
                    self.votes.extend(incoming.votes.iter().cloned());
                    return self.votes.len() != before;
                }
            },
        };
        if replaces {
            *self = incoming.clone();
            self.status = ElectionStatus::Running;
        }
        replaces
    }
}
