//! # Wire Protocol Messages
//!
//! Every datagram carries exactly one [`Datagram`], serialized with bincode
//! using fixed-int encoding, a size limit, and trailing-byte rejection. A
//! frame therefore decodes completely or not at all.
//!
//! | Datagram | Direction | Purpose |
//! |----------|-----------|---------|
//! | `Gossip` | sender -> receiver | Carries a [`Message`] |
//! | `Ack` | receiver -> sender | Confirms a `Gossip` datagram arrived |
//!
//! ## Message IDs
//!
//! A [`MessageId`] is 32 bytes, computed as
//! `blake3(domain || origin || seqno)` for origin-sequenced messages, or
//! `blake3(domain || payload)` when content addressing is wanted.

use bincode::Options;
use serde::{Deserialize, Serialize};

use crate::error::{GossipError, Result};
use crate::identity::PeerId;

/// Largest datagram the codec accepts (64 KiB, the UDP ceiling).
/// SECURITY: Bounds allocation while decoding untrusted input.
pub const MAX_DATAGRAM_SIZE: usize = 64 * 1024;

/// Domain prefix for sequence-derived message ids.
const SEQUENCED_ID_DOMAIN: &[u8] = b"gossiper-msg-id-v1:";

/// Domain prefix for content-addressed message ids.
const CONTENT_ID_DOMAIN: &[u8] = b"gossiper-content-id-v1:";

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageId([u8; 32]);

impl MessageId {
    /// Id for the `seqno`-th message originated by `origin`.
    pub fn derive(origin: &PeerId, seqno: u64) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(SEQUENCED_ID_DOMAIN);
        hasher.update(origin.as_bytes());
        hasher.update(&seqno.to_le_bytes());
        Self(*hasher.finalize().as_bytes())
    }

    /// Id derived from the payload alone, for origins that cannot be trusted
    /// to keep their sequence numbers unique.
    pub fn for_content(payload: &[u8]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(CONTENT_ID_DOMAIN);
        hasher.update(payload);
        Self(*hasher.finalize().as_bytes())
    }

    #[inline]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// First 8 bytes in hex, for log fields.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..8])
    }
}

impl std::fmt::Debug for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MessageId({})", self.short())
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// A gossip message. Immutable once built; forwarding produces a copy with
/// the hop count bumped.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub origin: PeerId,
    /// Number of relays this message has traversed since origin.
    pub hop_count: u32,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn new(origin: PeerId, seqno: u64, payload: Vec<u8>) -> Self {
        Self {
            id: MessageId::derive(&origin, seqno),
            origin,
            hop_count: 0,
            payload,
        }
    }

    /// A message identified by its payload rather than by origin and seqno.
    pub fn content_addressed(origin: PeerId, payload: Vec<u8>) -> Self {
        Self {
            id: MessageId::for_content(&payload),
            origin,
            hop_count: 0,
            payload,
        }
    }

    /// Whether `id` is the content hash of `payload`.
    pub fn has_content_id(&self) -> bool {
        self.id == MessageId::for_content(&self.payload)
    }

    /// The copy sent to the next hop.
    pub fn forwarded(&self) -> Self {
        Self {
            hop_count: self.hop_count.saturating_add(1),
            ..self.clone()
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Datagram {
    Gossip(Message),
    Ack { msg_id: MessageId },
}

/// Returns bincode options with size limits enforced.
/// SECURITY: Always use this for deserialization to prevent OOM attacks.
fn bincode_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_limit(MAX_DATAGRAM_SIZE as u64)
        .with_fixint_encoding()
        .reject_trailing_bytes()
}

pub fn encode_datagram(datagram: &Datagram) -> Result<Vec<u8>> {
    bincode_options().serialize(datagram).map_err(GossipError::from)
}

pub fn decode_datagram(bytes: &[u8]) -> Result<Datagram> {
    if bytes.len() > MAX_DATAGRAM_SIZE {
        return Err(GossipError::Decode(format!(
            "datagram of {} bytes exceeds {} byte limit",
            bytes.len(),
            MAX_DATAGRAM_SIZE
        )));
    }
    bincode_options().deserialize(bytes).map_err(GossipError::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origin(seed: u8) -> PeerId {
        PeerId::from_bytes([seed; 16])
    }

    #[test]
    fn message_id_is_deterministic() {
        let a = MessageId::derive(&origin(1), 42);
        let b = MessageId::derive(&origin(1), 42);
        assert_eq!(a, b);
    }

    #[test]
    fn message_id_separates_origin_and_seqno() {
        let base = MessageId::derive(&origin(1), 1);
        assert_ne!(base, MessageId::derive(&origin(1), 2));
        assert_ne!(base, MessageId::derive(&origin(2), 1));
        assert_ne!(MessageId::for_content(b"x"), MessageId::for_content(b"y"));
    }

    #[test]
    fn content_addressed_id_tracks_payload() {
        let msg = Message::content_addressed(origin(1), b"body".to_vec());
        assert!(msg.has_content_id());
        assert_eq!(msg.id, Message::content_addressed(origin(2), b"body".to_vec()).id);

        let tampered = Message { payload: b"other".to_vec(), ..msg };
        assert!(!tampered.has_content_id());
        assert!(!Message::new(origin(1), 1, b"body".to_vec()).has_content_id());
    }

    #[test]
    fn forwarded_bumps_hop_count_only() {
        let msg = Message::new(origin(3), 7, b"hello".to_vec());
        let next = msg.forwarded();
        assert_eq!(next.hop_count, 1);
        assert_eq!(next.id, msg.id);
        assert_eq!(next.origin, msg.origin);
        assert_eq!(next.payload, msg.payload);

        let saturated = Message { hop_count: u32::MAX, ..msg };
        assert_eq!(saturated.forwarded().hop_count, u32::MAX);
    }

    #[test]
    fn gossip_datagram_decodes_to_same_fields() {
        let msg = Message::new(origin(4), 1, b"payload".to_vec());
        let bytes = encode_datagram(&Datagram::Gossip(msg.clone())).unwrap();

        match decode_datagram(&bytes).unwrap() {
            Datagram::Gossip(decoded) => assert_eq!(decoded, msg),
            other => panic!("unexpected datagram: {:?}", other),
        }
    }

    #[test]
    fn malformed_data_rejected() {
        assert!(decode_datagram(&[0xFF, 0xFE, 0xFD, 0xFC, 0xFB]).is_err());

        let msg = Message::new(origin(5), 1, vec![0u8; 100]);
        let bytes = encode_datagram(&Datagram::Gossip(msg)).unwrap();
        assert!(decode_datagram(&bytes[..bytes.len() / 2]).is_err());
    }

    #[test]
    fn trailing_bytes_rejected() {
        let ack = Datagram::Ack { msg_id: MessageId::from_bytes([9u8; 32]) };
        let mut bytes = encode_datagram(&ack).unwrap();
        bytes.push(0);
        assert!(decode_datagram(&bytes).is_err());
    }

    #[test]
    fn oversized_payload_cannot_be_encoded() {
        let msg = Message::new(origin(6), 1, vec![0u8; MAX_DATAGRAM_SIZE]);
        assert!(encode_datagram(&Datagram::Gossip(msg)).is_err());
    }
}
