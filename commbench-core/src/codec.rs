// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Wire envelope: `<id>:<payload>`.
//!
//! The id is everything before the first `:`. The payload is every byte after
//! it and may itself contain `:` or be empty.

use crate::error::CodecError;
use crate::types::MessageId;

pub const ENVELOPE_DELIMITER: u8 = b':';

/// A decoded envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub id: MessageId,
    pub payload: Vec<u8>,
}

/// Encodes and decodes the envelope carried on every backend.
pub trait MessageCodec: Send + Sync {
    fn encode(&self, id: &MessageId, payload: &[u8]) -> Vec<u8>;

    fn decode(&self, envelope: &[u8]) -> Result<Envelope, CodecError>;
}

/// Default codec: the id, one delimiter byte, then the raw payload.
#[derive(Debug, Clone, Copy, Default)]
pub struct DelimitedCodec;

impl MessageCodec for DelimitedCodec {
    fn encode(&self, id: &MessageId, payload: &[u8]) -> Vec<u8> {
        let id = id.as_str().as_bytes();
        let mut envelope = Vec::with_capacity(id.len() + 1 + payload.len());
        envelope.extend_from_slice(id);
        envelope.push(ENVELOPE_DELIMITER);
        envelope.extend_from_slice(payload);
        envelope
    }

    fn decode(&self, envelope: &[u8]) -> Result<Envelope, CodecError> {
        let split = envelope
            .iter()
            .position(|b| *b == ENVELOPE_DELIMITER)
            .ok_or(CodecError::MissingDelimiter {
                len: envelope.len(),
            })?;

        let id = std::str::from_utf8(&envelope[..split]).map_err(|_| CodecError::NonUtf8Id)?;
        let id = MessageId::from_wire(id);

        Ok(Envelope {
            id,
            payload: envelope[split + 1..].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_layout() {
        let id = MessageId::new("abc").unwrap();
        assert_eq!(DelimitedCodec.encode(&id, b"hello"), b"abc:hello".to_vec());
    }

    #[test]
    fn test_payload_keeps_extra_delimiters() {
        let decoded = DelimitedCodec.decode(b"abc:x:y:").unwrap();
        assert_eq!(decoded.id.as_str(), "abc");
        assert_eq!(decoded.payload, b"x:y:".to_vec());
    }

    #[test]
    fn test_empty_payload() {
        let decoded = DelimitedCodec.decode(b"abc:").unwrap();
        assert!(decoded.payload.is_empty());
    }

    #[test]
    fn test_binary_payload_survives() {
        let id = MessageId::generate();
        let payload = [0u8, 255, b':', 10, 13];
        let decoded = DelimitedCodec
            .decode(&DelimitedCodec.encode(&id, &payload))
            .unwrap();
        assert_eq!(decoded.id, id);
        assert_eq!(decoded.payload, payload.to_vec());
    }

    #[test]
    fn test_any_two_part_envelope_is_well_formed() {
        let decoded = DelimitedCodec.decode(b":payload").unwrap();
        assert_eq!(decoded.id.as_str(), "");
        assert_eq!(decoded.payload, b"payload".to_vec());

        let decoded = DelimitedCodec.decode(b"has space:payload").unwrap();
        assert_eq!(decoded.id.as_str(), "has space");
        assert_eq!(decoded.id.enqueue_key(), "enqueue:has space");

        let long = "x".repeat(300);
        let decoded = DelimitedCodec.decode(format!("{}:p", long).as_bytes()).unwrap();
        assert_eq!(decoded.id.as_str(), long);
    }

    #[test]
    fn test_malformed_envelopes() {
        assert_eq!(
            DelimitedCodec.decode(b"no-delimiter"),
            Err(CodecError::MissingDelimiter { len: 12 })
        );
        assert_eq!(
            DelimitedCodec.decode(&[0xff, 0xfe, b':', b'x']),
            Err(CodecError::NonUtf8Id)
        );
        assert!(DelimitedCodec.decode(b"").is_err());
    }
}
