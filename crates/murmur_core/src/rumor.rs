//! Rumors: the envelopes the gossip layer disseminates.

use crate::election::Election;
use crate::id::MemberId;
use crate::member::Membership;
use crate::service::Service;
use serde::{Deserialize, Serialize};

/// Outcome of comparing an incoming record with the one already held
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Precedence {
    /// Incoming supersedes the existing record
    Newer,
    /// Neither supersedes the other
    Same,
    /// Incoming is stale
    Older,
}

/// Discriminator of a rumor's payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RumorKind {
    /// Membership health
    Member,
    /// Service advertisement
    Service,
    /// Leader election state
    Election,
    /// Placeholder kind for test injection
    Fake,
    /// Second placeholder kind for test injection
    Fake2,
}

/// What a rumor says
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RumorPayload {
    /// Membership health record
    Member(Membership),
    /// Service advertisement
    Service(Service),
    /// Election state
    Election(Election),
    /// Opaque test rumor
    Fake,
    /// Second opaque test rumor
    Fake2,
}

/// Identity of the subject a rumor is about
///
/// At most one rumor per key is held at a time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RumorKey {
    /// Health of a member
    Member(MemberId),
    /// A member's advertisement in a group
    Service {
        /// Advertising member
        member_id: MemberId,
        /// Group
        service_group: String,
    },
    /// Election for a group
    Election(String),
    /// Test rumors, identified by kind, origin and tags
    Fake {
        /// `Fake` or `Fake2`
        kind: RumorKind,
        /// Originating member, if stated
        from_id: Option<MemberId>,
        /// Topic labels
        tag: Vec<String>,
    },
}

/// A rumor envelope
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rumor {
    /// Topic labels for interest-based filtering
    pub tag: Vec<String>,
    /// Originating member, used to avoid echoing a rumor back
    pub from_id: Option<MemberId>,
    /// Payload
    pub payload: RumorPayload,
}

impl Rumor {
    /// Create a rumor from a payload
    #[must_use]
    pub fn new(payload: RumorPayload) -> Self {
        Self {
            tag: Vec::new(),
            from_id: None,
            payload,
        }
    }

    /// Membership rumor
    #[must_use]
    pub fn member(membership: Membership) -> Self {
        Self::new(RumorPayload::Member(membership))
    }

    /// Service rumor
    #[must_use]
    pub fn service(service: Service) -> Self {
        Self::new(RumorPayload::Service(service))
    }

    /// Election rumor
    #[must_use]
    pub fn election(election: Election) -> Self {
        Self::new(RumorPayload::Election(election))
    }

    /// Set originating member
    #[must_use]
    pub fn with_from(mut self, from_id: MemberId) -> Self {
        self.from_id = Some(from_id);
        self
    }

    /// Set topic labels
    #[must_use]
    pub fn with_tag(mut self, tag: Vec<String>) -> Self {
        self.tag = tag;
        self
    }

    /// Payload discriminator
    #[must_use]
    pub fn kind(&self) -> RumorKind {
        match &self.payload {
            RumorPayload::Member(_) => RumorKind::Member,
            RumorPayload::Service(_) => RumorKind::Service,
            RumorPayload::Election(_) => RumorKind::Election,
            RumorPayload::Fake => RumorKind::Fake,
            RumorPayload::Fake2 => RumorKind::Fake2,
        }
    }

    /// Subject key
    #[must_use]
    pub fn key(&self) -> RumorKey {
        match &self.payload {
            RumorPayload::Member(m) => RumorKey::Member(m.member.id.clone()),
            RumorPayload::Service(s) => RumorKey::Service {
                member_id: s.member_id.clone(),
                service_group: s.service_group.clone(),
            },
            RumorPayload::Election(e) => RumorKey::Election(e.service_group.clone()),
            RumorPayload::Fake | RumorPayload::Fake2 => RumorKey::Fake {
                kind: self.kind(),
                from_id: self.from_id.clone(),
                tag: self.tag.clone(),
            },
        }
    }

    /// Fold an incoming rumor about the same subject into this one
    ///
    /// Returns true if the held record changed. Stale and duplicate rumors
    /// leave `self` untouched.
    pub fn absorb(&mut self, incoming: &Rumor) -> bool {
        let changed = match (&mut self.payload, &incoming.payload) {
            (RumorPayload::Member(held), RumorPayload::Member(new)) => {
                new.precedence_over(held) == Precedence::Newer
            }
            (RumorPayload::Service(held), RumorPayload::Service(new)) => {
                new.precedence_over(held) == Precedence::Newer
            }
            (RumorPayload::Election(held), RumorPayload::Election(new)) => {
                if held.merge(new) {
                    self.from_id = incoming.from_id.clone();
                    self.tag = incoming.tag.clone();
                    return true;
                }
                false
            }
            // Test kinds: first one in wins.
            _ => false,
        };
        if changed {
            *self = incoming.clone();
        }
        changed
    }
}
