//! Murmur Core Types
//!
//! This crate contains pure types and logic with no I/O: the records
//! disseminated by the gossip layer and the precedence rules that decide
//! which of two records about the same subject wins.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod election;
pub mod error;
pub mod id;
pub mod member;
pub mod rumor;
pub mod service;
pub mod swim;
pub mod time;

// Re-exports
pub use election::{Candidate, Election, ElectionStatus};
pub use error::{CoreError, CoreResult};
pub use id::MemberId;
pub use member::{Health, Member, Membership, Peer};
pub use rumor::{Precedence, Rumor, RumorKey, RumorKind, RumorPayload};
pub use service::Service;
pub use swim::{Ack, Ping, PingReq, Swim, SwimPayload};
pub use time::{Clock, LogicalTime, ManualClock, MonotonicClock};
