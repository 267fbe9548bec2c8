//! Murmur Wire Codec
//!
//! Encodes and decodes the two datagram families, `Swim` (probe traffic)
//! and `Rumor` (gossip traffic), to the protobuf schema. The generated
//! messages in [`proto`] keep every field optional exactly as the schema
//! declares; [`codec`] converts them into the core sum types immediately
//! after decoding so the engine never inspects field presence.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod error;
#[allow(missing_docs)]
pub mod proto;

pub use codec::{WireDecode, WireEncode};
pub use error::{WireError, WireResult};
