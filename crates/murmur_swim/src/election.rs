//! Election state machine for service groups.
//!
//! The board holds no election state of its own: the rumor mill keeps the
//! one authoritative `Election` per group. Given the held record and a
//! quorum view, the board decides what, if anything, the local member
//! should publish next: a new term, a competing candidacy, or its vote.

use crate::member_list::MemberList;
use crate::rumor_mill::RumorMill;
use murmur_core::{Candidate, Election, ElectionStatus, Health, MemberId};
use std::collections::{BTreeMap, BTreeSet};

/// Reachability of a group's voters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quorum {
    /// Group members that are Alive or persistent
    pub eligible: usize,
    /// Group members currently Alive
    pub alive: usize,
}

impl Quorum {
    /// Create a quorum view
    #[must_use]
    pub fn new(eligible: usize, alive: usize) -> Self {
        Self { eligible, alive }
    }

    /// Count a group's voters
    ///
    /// The group is every member advertising a service in it, plus the
    /// local member when it takes part.
    #[must_use]
    pub fn of(service_group: &str, local: Option<&MemberId>, mill: &RumorMill, members: &MemberList) -> Self {
        let mut voters: BTreeSet<&MemberId> = mill.services(service_group).map(|s| &s.member_id).collect();
        voters.extend(local);
        let eligible = voters.iter().filter(|id| members.is_eligible(id)).count();
        let alive = voters
            .iter()
            .filter(|id| members.health_of(id) == Some(Health::Alive))
            .count();
        Self { eligible, alive }
    }

    /// Whether a majority of eligible voters is reachable
    #[must_use]
    pub fn is_reachable(&self) -> bool {
        self.alive * 2 > self.eligible
    }

    /// Status an election with `votes` supporters should have
    ///
    /// Reachability is checked before votes: with 5 eligible voters of whom
    /// only 2 are Alive the election is `NoQuorum`, while 2 votes among 5
    /// Alive voters is still `Running`.
    #[must_use]
    pub fn status_for(&self, votes: usize) -> ElectionStatus {
        if !self.is_reachable() {
            ElectionStatus::NoQuorum
        } else if votes * 2 > self.eligible {
            ElectionStatus::Finished
        } else {
            ElectionStatus::Running
        }
    }

    /// Status of a held record under this quorum view
    ///
    /// A finished election stays finished while its votes are still a
    /// majority of the eligible voters, even if some of them stop answering.
    /// Losing the leader is handled by starting a new term.
    #[must_use]
    pub fn judge(&self, held: &Election) -> ElectionStatus {
        let votes = held.votes.len();
        if held.is_finished() && votes * 2 > self.eligible {
            ElectionStatus::Finished
        } else {
            self.status_for(votes)
        }
    }
}

/// The local member's participation in elections
#[derive(Debug, Default)]
pub struct ElectionBoard {
    suitability: BTreeMap<String, u64>,
}

impl ElectionBoard {
    /// Create a board that takes part in no group
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Take part in a group, keeping any suitability already set
    pub fn join(&mut self, service_group: &str) {
        self.suitability.entry(service_group.to_string()).or_insert(0);
    }

    /// Take part in a group with the given suitability
    pub fn set_suitability(&mut self, service_group: &str, suitability: u64) {
        self.suitability.insert(service_group.to_string(), suitability);
    }

    /// Whether the local member votes in a group
    #[must_use]
    pub fn participates(&self, service_group: &str) -> bool {
        self.suitability.contains_key(service_group)
    }

    /// Groups the local member takes part in
    pub fn groups(&self) -> impl Iterator<Item = &str> + '_ {
        self.suitability.keys().map(String::as_str)
    }

    /// Open the term after `held`, with the local member as candidate
    #[must_use]
    pub fn start(
        &self,
        local: &MemberId,
        service_group: &str,
        held: Option<&Election>,
        quorum: Quorum,
    ) -> Option<Election> {
        let suitability = *self.suitability.get(service_group)?;
        let term = held.map_or(1, |e| e.term + 1);
        let mut election = Election::new(local.clone(), service_group, term, suitability);
        election.status = quorum.status_for(election.votes.len());
        Some(election)
    }

    /// React to the held record of a Running election
    ///
    /// Publishes a competing candidacy if the local member outranks the
    /// current candidate, otherwise adds the local vote and re-evaluates
    /// quorum. Returns `None` when there is nothing new to say.
    #[must_use]
    pub fn respond(&self, local: &MemberId, held: &Election, quorum: Quorum) -> Option<Election> {
        let suitability = *self.suitability.get(&held.service_group)?;
        if held.status != ElectionStatus::Running {
            return None;
        }

        let mine = Candidate {
            suitability,
            member_id: local,
        };
        if mine > held.candidate() {
            let mut election = Election::new(local.clone(), held.service_group.clone(), held.term, suitability);
            election.status = quorum.status_for(election.votes.len());
            return Some(election);
        }

        let mut next = held.clone();
        next.vote(local.clone());
        next.status = quorum.status_for(next.votes.len());
        (next != *held).then_some(next)
    }

    /// A new term if the held election has lost its leader or regained quorum
    #[must_use]
    pub fn reelect(
        &self,
        local: &MemberId,
        held: &Election,
        quorum: Quorum,
        members: &MemberList,
    ) -> Option<Election> {
        let leader_gone = held.is_finished() && members.health_of(&held.member_id) == Some(Health::Confirmed);
        let recovered = held.status == ElectionStatus::NoQuorum && quorum.is_reachable();
        if leader_gone || recovered {
            self.start(local, &held.service_group, Some(held), quorum)
        } else {
            None
        }
    }
}

/// Winner of a finished election
#[must_use]
pub fn leader(election: &Election) -> Option<&MemberId> {
    election.is_finished().then_some(&election.member_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use murmur_core::{LogicalTime, Member, Membership, Rumor, Service};

    fn id(s: &str) -> MemberId {
        MemberId::from(s)
    }

    fn board(group: &str, suitability: u64) -> ElectionBoard {
        let mut board = ElectionBoard::new();
        board.set_suitability(group, suitability);
        board
    }

    #[test]
    fn test_five_persistent_three_votes_finishes() {
        let quorum = Quorum::new(5, 3);
        assert_eq!(quorum.status_for(3), ElectionStatus::Finished);
    }

    #[test]
    fn test_five_persistent_two_alive_has_no_quorum() {
        let quorum = Quorum::new(5, 2);
        assert_eq!(quorum.status_for(2), ElectionStatus::NoQuorum);
    }

    #[test]
    fn test_minority_of_votes_keeps_running() {
        assert_eq!(Quorum::new(5, 5).status_for(2), ElectionStatus::Running);
    }

    #[test]
    fn test_lone_finish_reopens_when_voters_appear() {
        let mut held = Election::new(id("a"), "db", 1, 5);
        held.status = Quorum::new(1, 1).status_for(1);
        assert!(held.is_finished());
        assert_eq!(Quorum::new(3, 3).judge(&held), ElectionStatus::Running);
        held.vote(id("b"));
        assert_eq!(Quorum::new(3, 3).judge(&held), ElectionStatus::Finished);
    }

    #[test]
    fn test_finished_survives_unreachable_voters() {
        let mut held = Election::new(id("a"), "db", 1, 5);
        held.vote(id("b"));
        held.vote(id("c"));
        held.status = ElectionStatus::Finished;
        assert_eq!(Quorum::new(5, 2).judge(&held), ElectionStatus::Finished);

        held.status = ElectionStatus::Running;
        assert_eq!(Quorum::new(5, 2).judge(&held), ElectionStatus::NoQuorum);
    }

    #[test]
    fn test_quorum_counts_group_members() {
        let mut members = MemberList::new(Member::new(id("me"), "127.0.0.1", 1, 2));
        let mut mill = RumorMill::new(3, 1000);
        for (name, persistent, health) in [
            ("a", true, Health::Confirmed),
            ("b", false, Health::Confirmed),
            ("c", false, Health::Alive),
            ("x", false, Health::Alive),
        ] {
            let member = Member::new(id(name), "127.0.0.1", 1, 2).with_persistent(persistent);
            members.observe(Membership::new(member, health), LogicalTime::zero());
        }
        for name in ["a", "b", "c"] {
            mill.ingest(Rumor::service(Service::new(id(name), "db", "127.0.0.1", 5432)));
        }
        mill.ingest(Rumor::service(Service::new(id("x"), "web", "127.0.0.1", 80)));

        let me = id("me");
        assert_eq!(Quorum::of("db", Some(&me), &mill, &members), Quorum::new(3, 2));
        assert_eq!(Quorum::of("db", None, &mill, &members), Quorum::new(2, 1));
    }

    #[test]
    fn test_start_increments_term() {
        let board = board("db", 5);
        let first = board.start(&id("a"), "db", None, Quorum::new(3, 3)).unwrap();
        assert_eq!(first.term, 1);
        assert_eq!(first.status, ElectionStatus::Running);
        let second = board.start(&id("a"), "db", Some(&first), Quorum::new(3, 3)).unwrap();
        assert_eq!(second.term, 2);
    }

    #[test]
    fn test_start_alone_finishes() {
        let board = board("db", 5);
        let election = board.start(&id("a"), "db", None, Quorum::new(1, 1)).unwrap();
        assert!(election.is_finished());
    }

    #[test]
    fn test_non_participant_stays_silent() {
        let board = ElectionBoard::new();
        let held = Election::new(id("a"), "db", 1, 5);
        assert!(board.start(&id("b"), "db", None, Quorum::new(3, 3)).is_none());
        assert!(board.respond(&id("b"), &held, Quorum::new(3, 3)).is_none());
    }

    #[test]
    fn test_respond_votes_for_better_candidate() {
        let board = board("db", 1);
        let held = Election::new(id("a"), "db", 1, 5);
        let next = board.respond(&id("b"), &held, Quorum::new(5, 5)).unwrap();
        assert_eq!(next.member_id, id("a"));
        assert!(next.votes.contains(&id("b")));
        assert_eq!(next.status, ElectionStatus::Running);
        assert!(board.respond(&id("b"), &next, Quorum::new(5, 5)).is_none());
    }

    #[test]
    fn test_respond_with_competing_candidacy() {
        let board = board("db", 9);
        let held = Election::new(id("a"), "db", 1, 5);
        let next = board.respond(&id("b"), &held, Quorum::new(5, 5)).unwrap();
        assert_eq!(next.member_id, id("b"));
        assert_eq!(next.term, 1);
    }

    #[test]
    fn test_tie_goes_to_smaller_id() {
        let board = board("db", 5);
        let held = Election::new(id("b"), "db", 1, 5);
        let next = board.respond(&id("a"), &held, Quorum::new(5, 5)).unwrap();
        assert_eq!(next.member_id, id("a"));

        let held = Election::new(id("a"), "db", 1, 5);
        let next = board.respond(&id("b"), &held, Quorum::new(5, 5)).unwrap();
        assert_eq!(next.member_id, id("a"));
    }

    #[test]
    fn test_third_vote_finishes() {
        let board = board("db", 1);
        let mut held = Election::new(id("a"), "db", 1, 5);
        held.vote(id("c"));
        let next = board.respond(&id("b"), &held, Quorum::new(5, 5)).unwrap();
        assert!(next.is_finished());
        assert_eq!(leader(&next), Some(&id("a")));
    }

    #[test]
    fn test_reelect_after_leader_confirmed() {
        let mut members = MemberList::new(Member::new(id("b"), "127.0.0.1", 1, 2));
        members.observe(
            Membership::new(Member::new(id("a"), "127.0.0.1", 1, 2), Health::Confirmed),
            LogicalTime::zero(),
        );
        let board = board("db", 1);
        let mut held = Election::new(id("a"), "db", 3, 5);
        held.status = ElectionStatus::Finished;
        let next = board.reelect(&id("b"), &held, Quorum::new(1, 1), &members).unwrap();
        assert_eq!(next.term, 4);
        assert_eq!(next.member_id, id("b"));
    }

    #[test]
    fn test_reelect_after_quorum_recovers() {
        let members = MemberList::new(Member::new(id("b"), "127.0.0.1", 1, 2));
        let board = board("db", 1);
        let mut held = Election::new(id("a"), "db", 2, 5);
        held.status = ElectionStatus::NoQuorum;
        assert!(board.reelect(&id("b"), &held, Quorum::new(5, 2), &members).is_none());
        let next = board.reelect(&id("b"), &held, Quorum::new(5, 3), &members).unwrap();
        assert_eq!(next.term, 3);
    }
}
