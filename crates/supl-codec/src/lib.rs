//! # supl-codec
//!
//! Schema-driven unaligned PER (UPER) codec for the SUPL family of protocols.
//!
//! Grammars are transcribed from the ASN.1 modules into YAML files, loaded
//! once at startup and compiled into an immutable [`Schema`]. The schema then
//! turns wire bytes into a [`StructuredValue`] tree and back.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use supl_codec::{loader, MessageCodec};
//!
//! let supl = loader::require_family("asn1", "supl").unwrap();
//! let pdu = supl.decode("ULP-PDU", &[0x00, 0x10 /* ... */]).unwrap();
//! let bytes = supl.encode("ULP-PDU", &pdu).unwrap();
//! ```

pub mod bits;
mod engine;
mod error;
pub mod loader;
pub mod schema;
mod uper;
mod value;

pub use engine::Schema;
pub use error::{DecodeError, EncodeError, SchemaError};
pub use value::{Leaf, Step, StructuredValue};

/// Decode/encode service for one compiled grammar set.
///
/// Implementations hold no per-call state and are shared between sessions.
pub trait MessageCodec: Send + Sync {
    /// Decode a complete message of type `message_type`.
    fn decode(&self, message_type: &str, bytes: &[u8]) -> Result<StructuredValue, DecodeError>;

    /// Encode `value` as a message of type `message_type`.
    fn encode(&self, message_type: &str, value: &StructuredValue) -> Result<Vec<u8>, EncodeError>;
}
