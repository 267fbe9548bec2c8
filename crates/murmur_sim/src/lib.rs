//! Murmur Deterministic Simulation
//!
//! Runs whole clusters of protocol engines on a logical clock over a
//! simulated network with partitions, loss and latency. Every run is
//! reproducible from its seed.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod harness;
pub mod network;
pub mod seed;

#[cfg(test)]
mod scenarios;

pub use harness::{SimCluster, SimConfig, SimStats};
pub use network::{NetworkCondition, NetworkSim, SendResult};
pub use seed::SimSeed;
