//! Wire envelope: msgpack body, zlib-compressed.
//!
//! ```
//! use dos::broker::codec::Codec;
//! use dos::broker::message::Request;
//!
//! let codec = Codec::default();
//! let req = Request::Terminate { driver: "mount".into() };
//! let frame = codec.encode(&req).unwrap();
//! let back: Request = codec.decode(&frame).unwrap();
//! assert_eq!(back, req);
//! ```

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::{Read, Write};

use crate::broker::BrokerResult;

/// Encodes and decodes broker frames.
#[derive(Clone, Copy, Debug)]
pub struct Codec {
    level: Compression,
}

impl Codec {
    /// Creates a codec with the given zlib level (0-9).
    pub fn new(level: u32) -> Self {
        Self {
            level: Compression::new(level.min(9)),
        }
    }

    /// Serializes then compresses a value.
    pub fn encode<T: Serialize>(&self, value: &T) -> BrokerResult<Vec<u8>> {
        let packed = rmp_serde::to_vec_named(value)?;
        let mut encoder = ZlibEncoder::new(Vec::with_capacity(packed.len() / 2), self.level);
        encoder.write_all(&packed)?;
        Ok(encoder.finish()?)
    }

    /// Decompresses then deserializes a frame.
    pub fn decode<T: DeserializeOwned>(&self, frame: &[u8]) -> BrokerResult<T> {
        let mut packed = Vec::new();
        ZlibDecoder::new(frame).read_to_end(&mut packed)?;
        Ok(rmp_serde::from_slice(&packed)?)
    }
}

impl Default for Codec {
    fn default() -> Self {
        Self {
            level: Compression::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::message::{Reply, Request};
    use crate::broker::BrokerError;
    use crate::driver::PortValues;
    use crate::signal::Signal;
    use std::collections::BTreeMap;

    #[test]
    fn test_mapping_payload() {
        let codec = Codec::default();
        let mut map = BTreeMap::new();
        map.insert("gain".to_string(), 2.5);
        map.insert("offset".to_string(), -1.0);

        let frame = codec.encode(&map).unwrap();
        let back: BTreeMap<String, f64> = codec.decode(&frame).unwrap();
        assert_eq!(back, map);
    }

    #[test]
    fn test_sequence_payload() {
        let codec = Codec::new(9);
        let seq = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let back: Vec<String> = codec.decode(&codec.encode(&seq).unwrap()).unwrap();
        assert_eq!(back, seq);
    }

    #[test]
    fn test_numeric_array_payload() {
        let codec = Codec::default();
        let mut values = PortValues::new();
        values.insert(
            "wavefront".to_string(),
            Signal::matrix(vec![vec![0.5, 1.5], vec![2.5, 3.5]]).unwrap(),
        );
        let reply = Reply::Outputs { values };
        let back: Reply = codec.decode(&codec.encode(&reply).unwrap()).unwrap();
        assert_eq!(back, reply);
    }

    #[test]
    fn test_free_form_params() {
        let codec = Codec::default();
        let req = Request::PushConfig {
            driver: "mount".into(),
            class_id: "MOUNT".into(),
            params: serde_json::json!({"sampling_time": 1e-3, "modes": [1, 2, 3], "tag": null}),
        };
        let back: Request = codec.decode(&codec.encode(&req).unwrap()).unwrap();
        assert_eq!(back, req);
    }

    #[test]
    fn test_compresses_redundant_payloads() {
        let codec = Codec::default();
        let frame = codec.encode(&vec![0.0f64; 4096]).unwrap();
        assert!(frame.len() < 4096);
    }

    #[test]
    fn test_garbage_frame() {
        let codec = Codec::default();
        let err = codec.decode::<Request>(b"not zlib").unwrap_err();
        assert!(matches!(err, BrokerError::Compression(_)));
    }
}
