//! Murmur SWIM Engine
//!
//! Failure detection, rumor dissemination and per-group leader election.
//! [`Node`] is the protocol engine with no I/O of its own; [`Server`] drives
//! one over a [`Transport`] on tokio.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod detector;
pub mod election;
pub mod member_list;
pub mod node;
pub mod rumor_mill;
pub mod server;
pub mod timer;
pub mod transport;

// Re-exports
pub use config::{ConfigError, SwimConfig};
pub use detector::{Detector, Probe};
pub use election::{ElectionBoard, Quorum};
pub use member_list::{MemberList, Observed, Snapshot};
pub use node::{Envelope, HealthEvent, Node, Outbound};
pub use rumor_mill::{Budget, RumorMill};
pub use server::{Server, ServerError, ServerHandle, ServerStats, StatsSnapshot};
pub use timer::{TimerKey, TimerKind, Timers};
pub use transport::{Channel, MemoryNetwork, MemoryTransport, Transport, TransportError, UdpTransport};
