//! Service advertisements.

use crate::id::MemberId;
use crate::rumor::Precedence;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// A member's advertisement that it runs a service in a group
///
/// Keyed by `(member_id, service_group)`; a higher incarnation supersedes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Service {
    /// Advertising member
    pub member_id: MemberId,
    /// Group name, e.g. `redis.default`
    pub service_group: String,
    /// Advertisement incarnation, owned by the advertising member
    pub incarnation: u64,
    /// Service IP
    pub ip: String,
    /// Service host name
    pub hostname: String,
    /// Primary port
    pub port: u16,
    /// Additional exposed ports
    pub exposes: Vec<u16>,
}

impl Service {
    /// Create a new advertisement at incarnation zero
    #[must_use]
    pub fn new(member_id: MemberId, service_group: impl Into<String>, ip: impl Into<String>, port: u16) -> Self {
        let ip = ip.into();
        Self {
            member_id,
            service_group: service_group.into(),
            incarnation: 0,
            hostname: ip.clone(),
            ip,
            port,
            exposes: Vec::new(),
        }
    }

    /// Set host name
    #[must_use]
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    /// Set exposed ports
    #[must_use]
    pub fn with_exposes(mut self, exposes: Vec<u16>) -> Self {
        self.exposes = exposes;
        self
    }

    /// Set incarnation
    #[must_use]
    pub fn with_incarnation(mut self, incarnation: u64) -> Self {
        self.incarnation = incarnation;
        self
    }

    /// Precedence of this advertisement relative to `existing`
    #[must_use]
    pub fn precedence_over(&self, existing: &Service) -> Precedence {
        match self.incarnation.cmp(&existing.incarnation) {
            Ordering::Greater => Precedence::Newer,
            Ordering::Equal => Precedence::Same,
            Ordering::Less => Precedence::Older,
        }
    }
}
