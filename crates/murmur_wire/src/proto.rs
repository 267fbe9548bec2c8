//! Protobuf messages for the `swim` and `gossip` channels.
//!
//! These mirror the proto2 schema field-for-field: tags, labels and
//! packing are part of the wire contract and must not change.
//!
//! ```text
//! message Member     { id=1; incarnation=2; address=3; swim_port=4; gossip_port=5; persistent=6 }
//! message Ping       { from=1; forward_to=2 }
//! message Ack        { from=1; forward_to=2 }
//! message PingReq    { from=1; target=2 }
//! message Membership { member=1; health=2 }
//! message Election   { member_id=1; service_group=2; term=3; suitability=4; status=5; votes=6 }
//! message Service    { member_id=1; service_group=2; incarnation=3; ip=4; hostname=5; port=6; exposes=7 }
//! message Swim       { required type=1; ping=2; ack=3; pingreq=4; membership=5 }
//! message Rumor      { required type=1; tag=2; from_id=3; member=4; service=5; election=6 }
//! ```

#[derive(Clone, PartialEq, prost::Message)]
pub struct Member {
    #[prost(string, optional, tag = "1")]
    pub id: Option<String>,
    #[prost(uint64, optional, tag = "2")]
    pub incarnation: Option<u64>,
    #[prost(string, optional, tag = "3")]
    pub address: Option<String>,
    #[prost(int32, optional, tag = "4")]
    pub swim_port: Option<i32>,
    #[prost(int32, optional, tag = "5")]
    pub gossip_port: Option<i32>,
    #[prost(bool, optional, tag = "6", default = "false")]
    pub persistent: Option<bool>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Ping {
    #[prost(message, optional, tag = "1")]
    pub from: Option<Member>,
    #[prost(message, optional, tag = "2")]
    pub forward_to: Option<Member>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Ack {
    #[prost(message, optional, tag = "1")]
    pub from: Option<Member>,
    #[prost(message, optional, tag = "2")]
    pub forward_to: Option<Member>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct PingReq {
    #[prost(message, optional, tag = "1")]
    pub from: Option<Member>,
    #[prost(message, optional, tag = "2")]
    pub target: Option<Member>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Membership {
    #[prost(message, optional, tag = "1")]
    pub member: Option<Member>,
    #[prost(enumeration = "membership::Health", optional, tag = "2")]
    pub health: Option<i32>,
}

/// Nested types for [`Membership`]
pub mod membership {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
    #[repr(i32)]
    pub enum Health {
        Alive = 1,
        Suspect = 2,
        Confirmed = 3,
    }
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Election {
    #[prost(string, optional, tag = "1")]
    pub member_id: Option<String>,
    #[prost(string, optional, tag = "2")]
    pub service_group: Option<String>,
    #[prost(uint64, optional, tag = "3")]
    pub term: Option<u64>,
    #[prost(uint64, optional, tag = "4")]
    pub suitability: Option<u64>,
    #[prost(enumeration = "election::Status", optional, tag = "5")]
    pub status: Option<i32>,
    #[prost(string, repeated, tag = "6")]
    pub votes: Vec<String>,
}

/// Nested types for [`Election`]
pub mod election {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
    #[repr(i32)]
    pub enum Status {
        Running = 1,
        NoQuorum = 2,
        Finished = 3,
    }
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Service {
    #[prost(string, optional, tag = "1")]
    pub member_id: Option<String>,
    #[prost(string, optional, tag = "2")]
    pub service_group: Option<String>,
    #[prost(uint64, optional, tag = "3")]
    pub incarnation: Option<u64>,
    #[prost(string, optional, tag = "4")]
    pub ip: Option<String>,
    #[prost(string, optional, tag = "5")]
    pub hostname: Option<String>,
    #[prost(uint32, optional, tag = "6")]
    pub port: Option<u32>,
    #[prost(uint32, repeated, packed = "false", tag = "7")]
    pub exposes: Vec<u32>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Swim {
    #[prost(enumeration = "swim::Type", required, tag = "1")]
    pub r#type: i32,
    #[prost(message, optional, tag = "2")]
    pub ping: Option<Ping>,
    #[prost(message, optional, tag = "3")]
    pub ack: Option<Ack>,
    #[prost(message, optional, tag = "4")]
    pub pingreq: Option<PingReq>,
    #[prost(message, repeated, tag = "5")]
    pub membership: Vec<Membership>,
}

/// Nested types for [`Swim`]
pub mod swim {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
    #[repr(i32)]
    pub enum Type {
        Ping = 1,
        Ack = 2,
        Pingreq = 3,
    }
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Rumor {
    #[prost(enumeration = "rumor::Type", required, tag = "1")]
    pub r#type: i32,
    #[prost(string, repeated, tag = "2")]
    pub tag: Vec<String>,
    #[prost(string, optional, tag = "3")]
    pub from_id: Option<String>,
    #[prost(message, optional, tag = "4")]
    pub member: Option<Membership>,
    #[prost(message, optional, tag = "5")]
    pub service: Option<Service>,
    #[prost(message, optional, tag = "6")]
    pub election: Option<Election>,
}

/// Nested types for [`Rumor`]
pub mod rumor {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
    #[repr(i32)]
    pub enum Type {
        Member = 1,
        Service = 2,
        Election = 3,
        Fake = 4,
        Fake2 = 5,
    }
}
