//! Failure detector messages.

use crate::member::{Member, Membership};
use serde::{Deserialize, Serialize};

/// Direct probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ping {
    /// Sender
    pub from: Member,
    /// Requester to relay the resulting ack to, when probing on its behalf
    pub forward_to: Option<Member>,
}

/// Probe response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    /// Member that answered the probe
    pub from: Member,
    /// Original requester, copied from the ping
    pub forward_to: Option<Member>,
}

/// Request to probe `target` on the sender's behalf
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingReq {
    /// Requester
    pub from: Member,
    /// Member to probe
    pub target: Member,
}

/// Which Swim message this is
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SwimPayload {
    /// Direct probe
    Ping(Ping),
    /// Probe response
    Ack(Ack),
    /// Indirect probe request
    PingReq(PingReq),
}

/// A Swim datagram with its piggybacked membership rumors
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Swim {
    /// Message body
    pub payload: SwimPayload,
    /// Piggybacked health records
    pub membership: Vec<Membership>,
}

impl Swim {
    /// Build a ping
    #[must_use]
    pub fn ping(from: Member, forward_to: Option<Member>) -> Self {
        Self::bare(SwimPayload::Ping(Ping { from, forward_to }))
    }

    /// Build an ack
    #[must_use]
    pub fn ack(from: Member, forward_to: Option<Member>) -> Self {
        Self::bare(SwimPayload::Ack(Ack { from, forward_to }))
    }

    /// Build a ping request
    #[must_use]
    pub fn pingreq(from: Member, target: Member) -> Self {
        Self::bare(SwimPayload::PingReq(PingReq { from, target }))
    }

    fn bare(payload: SwimPayload) -> Self {
        Self {
            payload,
            membership: Vec::new(),
        }
    }

    /// Attach piggybacked membership
    #[must_use]
    pub fn with_membership(mut self, membership: Vec<Membership>) -> Self {
        self.membership = membership;
        self
    }

    /// The sending member
    #[must_use]
    pub fn sender(&self) -> &Member {
        match &self.payload {
            SwimPayload::Ping(p) => &p.from,
            SwimPayload::Ack(a) => &a.from,
            SwimPayload::PingReq(r) => &r.from,
        }
    }

    /// Short name of the message kind, for logging
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match &self.payload {
            SwimPayload::Ping(_) => "ping",
            SwimPayload::Ack(_) => "ack",
            SwimPayload::PingReq(_) => "pingreq",
        }
    }
}
