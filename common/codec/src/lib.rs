//! Value codecs for cache entries
//!
//! A [`Codec`] turns a typed value into the bytes stored in a cache backend and
//! back. Three implementations are provided:
//!
//! - [`JsonCodec`]: structured text, human-inspectable (the default)
//! - [`PickleCodec`]: tagged binary, schema-less but more compact
//! - [`ProtobufCodec`]: schema'd binary for `prost` messages
//!
//! Encoding and decoding must use the same codec; nothing in the stored bytes
//! records which codec produced them.

use thiserror::Error;

mod json;
mod pickle;
mod protobuf;

pub use json::JsonCodec;
pub use pickle::PickleCodec;
pub use protobuf::ProtobufCodec;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Failed to encode value: {0}")]
    Encode(String),
    #[error("Failed to decode value: {0}")]
    Decode(String),
    #[error("Encoded value does not match the expected schema: {0}")]
    TypeMismatch(String),
}

/// Converts values of type `V` to and from their stored byte form.
pub trait Codec<V>: Send + Sync {
    fn encode(&self, value: &V) -> Result<Vec<u8>, CodecError>;
    fn decode(&self, bytes: &[u8]) -> Result<V, CodecError>;

    /// Short name used in logs and metric labels.
    fn name(&self) -> &'static str;
}
