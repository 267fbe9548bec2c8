//! Members and their health records.

use crate::id::MemberId;
use crate::rumor::Precedence;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Network endpoint a datagram is sent to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Peer {
    /// Host name or IP address
    pub address: String,
    /// UDP port
    pub port: u16,
}

impl Peer {
    /// Create a new peer endpoint
    #[must_use]
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
        }
    }
}

impl std::fmt::Display for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// A cluster member as it describes itself
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Member {
    /// Stable identity
    pub id: MemberId,
    /// Self-owned monotonic counter
    pub incarnation: u64,
    /// Address the member listens on
    pub address: String,
    /// Port for Swim traffic
    pub swim_port: u16,
    /// Port for Rumor traffic
    pub gossip_port: u16,
    /// Counts toward election quorum even while unreachable
    pub persistent: bool,
}

impl Member {
    /// Create a new member at incarnation zero
    #[must_use]
    pub fn new(id: MemberId, address: impl Into<String>, swim_port: u16, gossip_port: u16) -> Self {
        Self {
            id,
            incarnation: 0,
            address: address.into(),
            swim_port,
            gossip_port,
            persistent: false,
        }
    }

    /// Set incarnation
    #[must_use]
    pub fn with_incarnation(mut self, incarnation: u64) -> Self {
        self.incarnation = incarnation;
        self
    }

    /// Mark as persistent
    #[must_use]
    pub fn with_persistent(mut self, persistent: bool) -> Self {
        self.persistent = persistent;
        self
    }

    /// Endpoint for Swim messages
    #[must_use]
    pub fn swim_peer(&self) -> Peer {
        Peer::new(self.address.clone(), self.swim_port)
    }

    /// Endpoint for Rumor messages
    #[must_use]
    pub fn gossip_peer(&self) -> Peer {
        Peer::new(self.address.clone(), self.gossip_port)
    }
}

/// Health of a member, ordered by precedence
///
/// At equal incarnation `Confirmed` beats `Suspect` beats `Alive`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Health {
    /// Responding to probes
    Alive,
    /// Missed a probe round, suspicion timer running
    Suspect,
    /// Declared departed for this incarnation
    Confirmed,
}

impl std::fmt::Display for Health {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Alive => "alive",
            Self::Suspect => "suspect",
            Self::Confirmed => "confirmed",
        };
        f.write_str(s)
    }
}

/// A health claim about a member
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Membership {
    /// Member snapshot the claim is about
    pub member: Member,
    /// Claimed health
    pub health: Health,
}

impl Membership {
    /// Create a new health record
    #[must_use]
    pub fn new(member: Member, health: Health) -> Self {
        Self { member, health }
    }

    /// Alive record for a member
    #[must_use]
    pub fn alive(member: Member) -> Self {
        Self::new(member, Health::Alive)
    }

    /// Precedence of this record relative to `existing` about the same member
    ///
    /// Higher incarnation wins outright; equal incarnation falls back to
    /// health precedence.
    #[must_use]
    pub fn precedence_over(&self, existing: &Membership) -> Precedence {
        let ordering = self
            .member
            .incarnation
            .cmp(&existing.member.incarnation)
            .then(self.health.cmp(&existing.health));
        match ordering {
            Ordering::Greater => Precedence::Newer,
            Ordering::Equal => Precedence::Same,
            Ordering::Less => Precedence::Older,
        }
    }

    /// Whichever of two records about the same member wins
    #[must_use]
    pub fn merge(self, other: Membership) -> Membership {
        match other.precedence_over(&self) {
            Precedence::Newer => other,
            Precedence::Same | Precedence::Older => self,
        }
    }
}
