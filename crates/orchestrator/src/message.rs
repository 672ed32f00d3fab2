//! Envelopes moved between parties and the coordinator.

use serde::{Deserialize, Serialize};

use crate::identity::PartyIdentity;

/// A routed protocol message.
///
/// `to == None` is a broadcast to every party except the sender.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message<P> {
    pub from: PartyIdentity,
    pub to: Option<Vec<PartyIdentity>>,
    pub payload: P,
}

impl<P> Message<P> {
    pub fn broadcast(from: PartyIdentity, payload: P) -> Self {
        Self {
            from,
            to: None,
            payload,
        }
    }

    pub fn p2p(from: PartyIdentity, to: PartyIdentity, payload: P) -> Self {
        Self {
            from,
            to: Some(vec![to]),
            payload,
        }
    }

    pub fn is_broadcast(&self) -> bool {
        self.to.is_none()
    }
}

/// Terminal output of one party.
///
/// `original_index` comes from the output itself; identities do not carry
/// the key-generation index.
#[derive(Debug, Clone)]
pub struct Completion<O> {
    pub original_index: u16,
    pub output: O,
}

/// ECDSA signature data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureData {
    /// r component (32 bytes, big-endian)
    pub r: Vec<u8>,
    /// s component (32 bytes, big-endian)
    pub s: Vec<u8>,
}

impl SignatureData {
    /// Convert to compact 64-byte format (r || s)
    pub fn to_compact(&self) -> [u8; 64] {
        let mut compact = [0u8; 64];

        let r = &self.r[self.r.len().saturating_sub(32)..];
        compact[32 - r.len()..32].copy_from_slice(r);

        let s = &self.s[self.s.len().saturating_sub(32)..];
        compact[64 - s.len()..].copy_from_slice(s);

        compact
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compact_pads_short_components() {
        let sig = SignatureData {
            r: vec![1, 2],
            s: vec![0xff; 32],
        };
        let compact = sig.to_compact();
        assert_eq!(&compact[..30], &[0u8; 30]);
        assert_eq!(&compact[30..32], &[1, 2]);
        assert_eq!(&compact[32..], &[0xff; 32]);
    }
}
