use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::{Codec, CodecError};

/// Tagged binary codec using the pickle format.
///
/// Every value carries its own type tags, so no schema is needed, but the
/// reader has to use this codec as well.
#[derive(Debug, Clone, Copy, Default)]
pub struct PickleCodec;

impl From<serde_pickle::Error> for CodecError {
    fn from(err: serde_pickle::Error) -> Self {
        CodecError::Decode(err.to_string())
    }
}

impl<V> Codec<V> for PickleCodec
where
    V: Serialize + DeserializeOwned,
{
    fn encode(&self, value: &V) -> Result<Vec<u8>, CodecError> {
        serde_pickle::to_vec(value, Default::default())
            .map_err(|e| CodecError::Encode(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<V, CodecError> {
        Ok(serde_pickle::from_slice(bytes, Default::default())?)
    }

    fn name(&self) -> &'static str {
        "pickle"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_roundtrip() {
        let value = "x".repeat(600);
        let bytes = Codec::<String>::encode(&PickleCodec, &value).unwrap();
        let decoded: String = Codec::<String>::decode(&PickleCodec, &bytes).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn test_truncated_input_fails() {
        let bytes = Codec::<Vec<i64>>::encode(&PickleCodec, &vec![1, 2, 3, 4]).unwrap();
        let truncated = &bytes[..bytes.len() / 2];
        assert!(Codec::<Vec<i64>>::decode(&PickleCodec, truncated).is_err());
    }
}
