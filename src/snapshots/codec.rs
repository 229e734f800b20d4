//! Snapshot payload encoding.

use super::Compression;
use crate::codec::{gunzip, gzip};
use crate::error::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encode `value` with the given compression.
pub fn encode_payload<T: Serialize>(value: &T, compression: Compression) -> Result<Vec<u8>> {
    match compression {
        Compression::None => Ok(serde_json::to_vec(value)?),
        Compression::JsonGzip => gzip(&serde_json::to_vec(value)?),
        Compression::Msgpack => Ok(rmp_serde::to_vec_named(value)?),
        Compression::MsgpackGzip => gzip(&rmp_serde::to_vec_named(value)?),
    }
}

/// Decode a payload produced by [`encode_payload`].
pub fn decode_payload<T: DeserializeOwned>(payload: &[u8], compression: Compression) -> Result<T> {
    match compression {
        Compression::None => Ok(serde_json::from_slice(payload)?),
        Compression::JsonGzip => Ok(serde_json::from_slice(&gunzip(payload)?)?),
        Compression::Msgpack => Ok(rmp_serde::from_slice(payload)?),
        Compression::MsgpackGzip => Ok(rmp_serde::from_slice(&gunzip(payload)?)?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::State;
    use serde_json::json;

    #[test]
    fn test_every_compression_decodes_its_own_output() {
        let state = State::new()
            .with_slice("doc", json!({"title": "t", "zoom": 1.5, "n": -3}))
            .with_slice("list", json!([1, "two", null, true]));

        for compression in [
            Compression::None,
            Compression::JsonGzip,
            Compression::Msgpack,
            Compression::MsgpackGzip,
        ] {
            let payload = encode_payload(&state, compression).unwrap();
            let decoded: State = decode_payload(&payload, compression).unwrap();
            assert_eq!(decoded, state, "{:?}", compression);
        }
    }

    #[test]
    fn test_wrong_compression_fails() {
        let payload = encode_payload(&State::new(), Compression::Msgpack).unwrap();
        assert!(decode_payload::<State>(&payload, Compression::JsonGzip).is_err());
    }
}
