use prost::Message;

use crate::{Codec, CodecError};

/// Schema'd binary codec for `prost` generated messages.
///
/// Only message types can be used with this codec. Bytes that do not parse as
/// the expected message are reported as [`CodecError::TypeMismatch`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ProtobufCodec;

impl From<prost::DecodeError> for CodecError {
    fn from(err: prost::DecodeError) -> Self {
        CodecError::TypeMismatch(err.to_string())
    }
}

impl<V> Codec<V> for ProtobufCodec
where
    V: Message + Default,
{
    fn encode(&self, value: &V) -> Result<Vec<u8>, CodecError> {
        Ok(value.encode_to_vec())
    }

    fn decode(&self, bytes: &[u8]) -> Result<V, CodecError> {
        Ok(V::decode(bytes)?)
    }

    fn name(&self) -> &'static str {
        "protobuf"
    }
}
