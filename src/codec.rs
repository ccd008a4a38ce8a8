// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Wire Codecs
//!
//! This module provides the two interchangeable wire-format strategies the
//! core publishes and consumes with. The structured-text codec carries the
//! interactive, low-volume message types; the typed-binary codec carries the
//! high-volume log traffic and brings a prefetch bound with it so slow
//! consumers get natural backpressure.
//!
//! A codec is selected per call site. The content-type tag it stamps on
//! outgoing messages is checked again on the consuming side, so a subscriber
//! configured for one encoding is never handed traffic encoded with the
//! other.

use crate::errors::MessagingError;
use serde::{de::DeserializeOwned, Serialize};

/// Content type tag for the structured-text codec
pub const JSON_CONTENT_TYPE: &str = "application/json";
/// Content type tag for the typed-binary codec
pub const BINARY_CONTENT_TYPE: &str = "application/bincode";
/// Unacknowledged-delivery window applied on the typed-binary path
pub const DEFAULT_PREFETCH: u16 = 10;

/// A wire-format strategy over a serializable payload type.
///
/// Implementations must be cheap to share across a subscription's delivery
/// task and the publishing side.
pub trait Codec<T>: Send + Sync {
    /// Tag stamped on published messages and checked on delivery.
    fn content_type(&self) -> &'static str;

    /// Unacknowledged-delivery bound a subscription should apply, if any.
    fn prefetch(&self) -> Option<u16> {
        None
    }

    fn encode(&self, value: &T) -> Result<Vec<u8>, MessagingError>;

    fn decode(&self, body: &[u8]) -> Result<T, MessagingError>;
}

/// Human-readable, self-describing codec for interactive traffic.
///
/// Tolerant of additive schema evolution: fields unknown to the reader are
/// ignored, so older consumers keep working when producers grow their
/// payloads.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl<T> Codec<T> for JsonCodec
where
    T: Serialize + DeserializeOwned,
{
    fn content_type(&self) -> &'static str {
        JSON_CONTENT_TYPE
    }

    fn encode(&self, value: &T) -> Result<Vec<u8>, MessagingError> {
        serde_json::to_vec(value).map_err(|err| MessagingError::Encode(err.to_string()))
    }

    fn decode(&self, body: &[u8]) -> Result<T, MessagingError> {
        serde_json::from_slice(body).map_err(|err| MessagingError::Decode(err.to_string()))
    }
}

/// Compact, schema-bound codec for bulk traffic.
///
/// Producer and consumer must agree on the exact shape of `T`; schema drift
/// surfaces as a decode error, never as silently wrong data. Reports a
/// prefetch bound so subscriptions on this path hold at most a fixed window
/// of unacknowledged deliveries.
#[derive(Debug, Clone, Copy)]
pub struct BinaryCodec {
    prefetch: u16,
}

impl BinaryCodec {
    pub fn new() -> BinaryCodec {
        BinaryCodec {
            prefetch: DEFAULT_PREFETCH,
        }
    }

    /// Overrides the default unacknowledged-delivery window.
    pub fn with_prefetch(mut self, prefetch: u16) -> Self {
        self.prefetch = prefetch;
        self
    }
}

impl Default for BinaryCodec {
    fn default() -> Self {
        BinaryCodec::new()
    }
}

impl<T> Codec<T> for BinaryCodec
where
    T: Serialize + DeserializeOwned,
{
    fn content_type(&self) -> &'static str {
        BINARY_CONTENT_TYPE
    }

    fn prefetch(&self) -> Option<u16> {
        Some(self.prefetch)
    }

    fn encode(&self, value: &T) -> Result<Vec<u8>, MessagingError> {
        bincode::serialize(value).map_err(|err| MessagingError::Encode(err.to_string()))
    }

    fn decode(&self, body: &[u8]) -> Result<T, MessagingError> {
        bincode::deserialize(body).map_err(|err| MessagingError::Decode(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
    struct ArmyMove {
        units: Vec<u32>,
        to_location: String,
    }

    fn sample() -> ArmyMove {
        ArmyMove {
            units: vec![1, 2, 3],
            to_location: "Europe".to_owned(),
        }
    }

    #[test]
    fn json_round_trip() {
        let codec = JsonCodec;
        let bytes = codec.encode(&sample()).unwrap();
        let back: ArmyMove = codec.decode(&bytes).unwrap();
        assert_eq!(back, sample());
    }

    #[test]
    fn binary_round_trip() {
        let codec = BinaryCodec::new();
        let bytes = codec.encode(&sample()).unwrap();
        let back: ArmyMove = codec.decode(&bytes).unwrap();
        assert_eq!(back, sample());
    }

    #[test]
    fn json_rejects_binary_bytes() {
        let bytes = Codec::<ArmyMove>::encode(&BinaryCodec::new(), &sample()).unwrap();
        let result: Result<ArmyMove, _> = JsonCodec.decode(&bytes);
        assert!(matches!(result, Err(MessagingError::Decode(_))));
    }

    #[test]
    fn binary_rejects_json_bytes() {
        let bytes = Codec::<ArmyMove>::encode(&JsonCodec, &sample()).unwrap();
        let result: Result<ArmyMove, _> = BinaryCodec::new().decode(&bytes);
        assert!(matches!(result, Err(MessagingError::Decode(_))));
    }

    #[test]
    fn json_ignores_unknown_fields() {
        let body = br#"{"units":[7],"to_location":"Asia","added_later":true}"#;
        let back: ArmyMove = JsonCodec.decode(body).unwrap();
        assert_eq!(back.units, vec![7]);
        assert_eq!(back.to_location, "Asia");
    }

    #[test]
    fn binary_rejects_truncated_input() {
        let codec = BinaryCodec::new();
        let bytes = codec.encode(&sample()).unwrap();
        let result: Result<ArmyMove, _> = codec.decode(&bytes[..bytes.len() - 2]);
        assert!(matches!(result, Err(MessagingError::Decode(_))));
    }

    #[test]
    fn only_binary_codec_reports_prefetch() {
        assert_eq!(Codec::<ArmyMove>::prefetch(&JsonCodec), None);
        assert_eq!(
            Codec::<ArmyMove>::prefetch(&BinaryCodec::new()),
            Some(DEFAULT_PREFETCH)
        );
        assert_eq!(
            Codec::<ArmyMove>::prefetch(&BinaryCodec::new().with_prefetch(3)),
            Some(3)
        );
    }
}
