//! Conversion between core types and the wire schema.
//!
//! Decoding is strict about what the engine relies on (identities,
//! discriminants, the payload named by `type`) and lenient about the
//! rest: absent counters decode as zero, absent flags as false.

use crate::error::{WireError, WireResult};
use crate::proto;
use murmur_core::{
    Ack, Election, ElectionStatus, Health, Member, MemberId, Membership, Ping, PingReq, Rumor,
    RumorPayload, Service, Swim, SwimPayload,
};
use prost::Message;

/// Types that encode to a wire message
pub trait WireEncode {
    /// Generated message this type maps to
    type Proto: Message;

    /// Convert to the generated message
    fn to_proto(&self) -> Self::Proto;

    /// Encode to bytes
    fn to_wire(&self) -> Vec<u8> {
        self.to_proto().encode_to_vec()
    }

    /// Encoded length in bytes
    fn wire_len(&self) -> usize {
        self.to_proto().encoded_len()
    }
}

/// Types that decode from a wire message
pub trait WireDecode: Sized {
    /// Generated message this type maps from
    type Proto: Message + Default;

    /// Convert from the generated message
    ///
    /// # Errors
    ///
    /// Returns error if a required field is missing or out of range
    fn from_proto(proto: Self::Proto) -> WireResult<Self>;

    /// Decode from bytes
    ///
    /// # Errors
    ///
    /// Returns error if the bytes are malformed or truncated
    fn from_wire(bytes: &[u8]) -> WireResult<Self> {
        let proto = Self::Proto::decode(bytes)?;
        Self::from_proto(proto)
    }
}

fn required<T>(value: Option<T>, message: &'static str, field: &'static str) -> WireResult<T> {
    value.ok_or(WireError::MissingField { message, field })
}

fn port(value: i64, field: &'static str) -> WireResult<u16> {
    u16::try_from(value).map_err(|_| WireError::PortOutOfRange { field, value })
}

fn member_id(value: Option<String>, message: &'static str, field: &'static str) -> WireResult<MemberId> {
    Ok(MemberId::parse(required(value, message, field)?)?)
}

impl WireEncode for Member {
    type Proto = proto::Member;

    fn to_proto(&self) -> proto::Member {
        proto::Member {
            id: Some(self.id.as_str().to_string()),
            incarnation: Some(self.incarnation),
            address: Some(self.address.clone()),
            swim_port: Some(i32::from(self.swim_port)),
            gossip_port: Some(i32::from(self.gossip_port)),
            persistent: Some(self.persistent),
        }
    }
}

impl WireDecode for Member {
    type Proto = proto::Member;

    fn from_proto(proto: proto::Member) -> WireResult<Self> {
        Ok(Member {
            id: member_id(proto.id, "Member", "id")?,
            incarnation: proto.incarnation.unwrap_or(0),
            address: required(proto.address, "Member", "address")?,
            swim_port: port(i64::from(required(proto.swim_port, "Member", "swim_port")?), "swim_port")?,
            gossip_port: port(
                i64::from(required(proto.gossip_port, "Member", "gossip_port")?),
                "gossip_port",
            )?,
            persistent: proto.persistent.unwrap_or(false),
        })
    }
}

impl From<Health> for proto::membership::Health {
    fn from(health: Health) -> Self {
        match health {
            Health::Alive => Self::Alive,
            Health::Suspect => Self::Suspect,
            Health::Confirmed => Self::Confirmed,
        }
    }
}

impl From<proto::membership::Health> for Health {
    fn from(health: proto::membership::Health) -> Self {
        match health {
            proto::membership::Health::Alive => Self::Alive,
            proto::membership::Health::Suspect => Self::Suspect,
            proto::membership::Health::Confirmed => Self::Confirmed,
        }
    }
}

impl WireEncode for Membership {
    type Proto = proto::Membership;

    fn to_proto(&self) -> proto::Membership {
        proto::Membership {
            member: Some(self.member.to_proto()),
            health: Some(proto::membership::Health::from(self.health) as i32),
        }
    }
}

impl WireDecode for Membership {
    type Proto = proto::Membership;

    fn from_proto(proto: proto::Membership) -> WireResult<Self> {
        let member = Member::from_proto(required(proto.member, "Membership", "member")?)?;
        let raw = required(proto.health, "Membership", "health")?;
        let health = proto::membership::Health::try_from(raw)
            .map_err(|_| WireError::UnknownEnum { field: "health", value: raw })?;
        Ok(Membership::new(member, health.into()))
    }
}

impl From<ElectionStatus> for proto::election::Status {
    fn from(status: ElectionStatus) -> Self {
        match status {
            ElectionStatus::Running => Self::Running,
            ElectionStatus::NoQuorum => Self::NoQuorum,
            ElectionStatus::Finished => Self::Finished,
        }
    }
}

impl From<proto::election::Status> for ElectionStatus {
    fn from(status: proto::election::Status) -> Self {
        match status {
            proto::election::Status::Running => Self::Running,
            proto::election::Status::NoQuorum => Self::NoQuorum,
            proto::election::Status::Finished => Self::Finished,
        }
    }
}

impl WireEncode for Election {
    type Proto = proto::Election;

    fn to_proto(&self) -> proto::Election {
        proto::Election {
            member_id: Some(self.member_id.as_str().to_string()),
            service_group: Some(self.service_group.clone()),
            term: Some(self.term),
            suitability: Some(self.suitability),
            status: Some(proto::election::Status::from(self.status) as i32),
            votes: self.votes.iter().map(|v| v.as_str().to_string()).collect(),
        }
    }
}

impl WireDecode for Election {
    type Proto = proto::Election;

    fn from_proto(proto: proto::Election) -> WireResult<Self> {
        let status = match proto.status {
            Some(raw) => proto::election::Status::try_from(raw)
                .map_err(|_| WireError::UnknownEnum { field: "status", value: raw })?
                .into(),
            None => ElectionStatus::Running,
        };
        let votes = proto
            .votes
            .into_iter()
            .map(MemberId::parse)
            .collect::<Result<_, _>>()?;
        Ok(Election {
            member_id: member_id(proto.member_id, "Election", "member_id")?,
            service_group: required(proto.service_group, "Election", "service_group")?,
            term: proto.term.unwrap_or(0),
            suitability: proto.suitability.unwrap_or(0),
            status,
            votes,
        })
    }
}

impl WireEncode for Service {
    type Proto = proto::Service;

    fn to_proto(&self) -> proto::Service {
        proto::Service {
            member_id: Some(self.member_id.as_str().to_string()),
            service_group: Some(self.service_group.clone()),
            incarnation: Some(self.incarnation),
            ip: Some(self.ip.clone()),
            hostname: Some(self.hostname.clone()),
            port: Some(u32::from(self.port)),
            exposes: self.exposes.iter().map(|p| u32::from(*p)).collect(),
        }
    }
}

impl WireDecode for Service {
    type Proto = proto::Service;

    fn from_proto(proto: proto::Service) -> WireResult<Self> {
        let exposes = proto
            .exposes
            .into_iter()
            .map(|p| port(i64::from(p), "exposes"))
            .collect::<WireResult<_>>()?;
        Ok(Service {
            member_id: member_id(proto.member_id, "Service", "member_id")?,
            service_group: required(proto.service_group, "Service", "service_group")?,
            incarnation: proto.incarnation.unwrap_or(0),
            ip: proto.ip.unwrap_or_default(),
            hostname: proto.hostname.unwrap_or_default(),
            port: port(i64::from(proto.port.unwrap_or(0)), "port")?,
            exposes,
        })
    }
}

impl WireEncode for Swim {
    type Proto = proto::Swim;

    fn to_proto(&self) -> proto::Swim {
        let mut out = proto::Swim {
            membership: self.membership.iter().map(WireEncode::to_proto).collect(),
            ..Default::default()
        };
        match &self.payload {
            SwimPayload::Ping(ping) => {
                out.r#type = proto::swim::Type::Ping as i32;
                out.ping = Some(proto::Ping {
                    from: Some(ping.from.to_proto()),
                    forward_to: ping.forward_to.as_ref().map(WireEncode::to_proto),
                });
            }
            SwimPayload::Ack(ack) => {
                out.r#type = proto::swim::Type::Ack as i32;
                out.ack = Some(proto::Ack {
                    from: Some(ack.from.to_proto()),
                    forward_to: ack.forward_to.as_ref().map(WireEncode::to_proto),
                });
            }
            SwimPayload::PingReq(req) => {
                out.r#type = proto::swim::Type::Pingreq as i32;
                out.pingreq = Some(proto::PingReq {
                    from: Some(req.from.to_proto()),
                    target: Some(req.target.to_proto()),
                });
            }
        }
        out
    }
}

impl WireDecode for Swim {
    type Proto = proto::Swim;

    fn from_proto(proto: proto::Swim) -> WireResult<Self> {
        let kind = proto::swim::Type::try_from(proto.r#type)
            .map_err(|_| WireError::UnknownEnum { field: "Swim.type", value: proto.r#type })?;
        let payload = match kind {
            proto::swim::Type::Ping => {
                let ping = required(proto.ping, "Swim", "ping")?;
                SwimPayload::Ping(Ping {
                    from: Member::from_proto(required(ping.from, "Ping", "from")?)?,
                    forward_to: ping.forward_to.map(Member::from_proto).transpose()?,
                })
            }
            proto::swim::Type::Ack => {
                let ack = required(proto.ack, "Swim", "ack")?;
                SwimPayload::Ack(Ack {
                    from: Member::from_proto(required(ack.from, "Ack", "from")?)?,
                    forward_to: ack.forward_to.map(Member::from_proto).transpose()?,
                })
            }
            proto::swim::Type::Pingreq => {
                let req = required(proto.pingreq, "Swim", "pingreq")?;
                SwimPayload::PingReq(PingReq {
                    from: Member::from_proto(required(req.from, "PingReq", "from")?)?,
                    target: Member::from_proto(required(req.target, "PingReq", "target")?)?,
                })
            }
        };
        let membership = proto
            .membership
            .into_iter()
            .map(Membership::from_proto)
            .collect::<WireResult<_>>()?;
        Ok(Swim { payload, membership })
    }
}

impl WireEncode for Rumor {
    type Proto = proto::Rumor;

    fn to_proto(&self) -> proto::Rumor {
        let mut out = proto::Rumor {
            tag: self.tag.clone(),
            from_id: self.from_id.as_ref().map(|id| id.as_str().to_string()),
            ..Default::default()
        };
        match &self.payload {
            RumorPayload::Member(m) => {
                out.r#type = proto::rumor::Type::Member as i32;
                out.member = Some(m.to_proto());
            }
            RumorPayload::Service(s) => {
                out.r#type = proto::rumor::Type::Service as i32;
                out.service = Some(s.to_proto());
            }
            RumorPayload::Election(e) => {
                out.r#type = proto::rumor::Type::Election as i32;
                out.election = Some(e.to_proto());
            }
            RumorPayload::Fake => out.r#type = proto::rumor::Type::Fake as i32,
            RumorPayload::Fake2 => out.r#type = proto::rumor::Type::Fake2 as i32,
        }
        out
    }
}

impl WireDecode for Rumor {
    type Proto = proto::Rumor;

    fn from_proto(proto: proto::Rumor) -> WireResult<Self> {
        let kind = proto::rumor::Type::try_from(proto.r#type)
            .map_err(|_| WireError::UnknownEnum { field: "Rumor.type", value: proto.r#type })?;
        let payload = match kind {
            proto::rumor::Type::Member => {
                RumorPayload::Member(Membership::from_proto(required(proto.member, "Rumor", "member")?)?)
            }
            proto::rumor::Type::Service => {
                RumorPayload::Service(Service::from_proto(required(proto.service, "Rumor", "service")?)?)
            }
            proto::rumor::Type::Election => {
                RumorPayload::Election(Election::from_proto(required(proto.election, "Rumor", "election")?)?)
            }
            proto::rumor::Type::Fake => RumorPayload::Fake,
            proto::rumor::Type::Fake2 => RumorPayload::Fake2,
        };
        Ok(Rumor {
            tag: proto.tag,
            from_id: proto.from_id.map(MemberId::parse).transpose()?,
            payload,
        })
    }
}
