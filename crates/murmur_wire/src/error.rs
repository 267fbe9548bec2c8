//! Codec errors.

use murmur_core::CoreError;

/// Codec result type
pub type WireResult<T> = Result<T, WireError>;

/// Errors turning bytes into core messages
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum WireError {
    /// Bytes are not a valid protobuf message
    #[error("Malformed datagram: {0}")]
    Malformed(#[from] prost::DecodeError),

    /// A field the engine needs is absent
    #[error("Missing field {field} in {message}")]
    MissingField {
        /// Message name
        message: &'static str,
        /// Field name
        field: &'static str,
    },

    /// Enum discriminant not in the schema
    #[error("Unknown {field} value {value}")]
    UnknownEnum {
        /// Field name
        field: &'static str,
        /// Received discriminant
        value: i32,
    },

    /// Port does not fit in 16 bits
    #[error("Port {value} out of range in {field}")]
    PortOutOfRange {
        /// Field name
        field: &'static str,
        /// Received value
        value: i64,
    },

    /// Field value rejected by the core types
    #[error("Invalid record: {0}")]
    Invalid(#[from] CoreError),
}
