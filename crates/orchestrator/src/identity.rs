//! Party identities and their canonical ordering.
//!
//! Every run addresses parties by their position in a list sorted by
//! [`ShareId`]. Positions are rewritten after sorting, so `index` on a
//! [`PartyIdentity`] held by a [`SortedPartyIds`] is always its sorted
//! position.

use std::fmt;

use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{OrchestratorError, Result};
use crate::fixtures::KeyShareRecord;

/// A 256-bit share identifier, big-endian.
///
/// Byte-wise comparison of the big-endian form is numeric comparison, so the
/// derived ordering is the numeric one.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ShareId([u8; 32]);

impl ShareId {
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn random<R: RngCore + ?Sized>(rng: &mut R) -> Self {
        let mut bytes = [0u8; 32];
        rng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        let raw = hex::decode(s.trim_start_matches("0x"))
            .map_err(|e| OrchestratorError::validation(format!("bad share id: {e}")))?;
        let bytes: [u8; 32] = raw.try_into().map_err(|raw: Vec<u8>| {
            OrchestratorError::validation(format!("share id must be 32 bytes, got {}", raw.len()))
        })?;
        Ok(Self(bytes))
    }
}

impl fmt::Debug for ShareId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ShareId({})", self.to_hex())
    }
}

impl fmt::Display for ShareId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form is enough to tell parties apart in logs.
        write!(f, "{}", &self.to_hex()[..12])
    }
}

impl Serialize for ShareId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ShareId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ShareId::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// One participant of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartyIdentity {
    /// Position in the sorted party list.
    pub index: u16,
    /// Human-readable label, `"1"`..`"n"` for a fresh run.
    pub moniker: String,
    pub share_id: ShareId,
}

impl PartyIdentity {
    pub fn new(moniker: impl Into<String>, share_id: ShareId) -> Self {
        Self {
            index: 0,
            moniker: moniker.into(),
            share_id,
        }
    }
}

impl fmt::Display for PartyIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{},{}}}", self.index, self.moniker)
    }
}

/// Identities sorted by share id with `index` equal to sorted position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortedPartyIds(Vec<PartyIdentity>);

impl SortedPartyIds {
    /// Sorts by share id (stable) and reassigns indices.
    pub fn sort(mut ids: Vec<PartyIdentity>) -> Result<Self> {
        if ids.len() > usize::from(u16::MAX) {
            return Err(OrchestratorError::validation(format!(
                "{} parties exceed the addressable population",
                ids.len()
            )));
        }
        ids.sort_by(|a, b| a.share_id.cmp(&b.share_id));
        for (position, id) in ids.iter_mut().enumerate() {
            id.index = position as u16;
        }
        Ok(Self(ids))
    }

    pub fn get(&self, index: u16) -> Option<&PartyIdentity> {
        self.0.get(usize::from(index))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PartyIdentity> {
        self.0.iter()
    }

    /// Sorted position of the party holding `share_id`.
    pub fn position_of(&self, share_id: &ShareId) -> Option<u16> {
        self.0
            .iter()
            .position(|id| &id.share_id == share_id)
            .map(|p| p as u16)
    }
}

/// Builds `party_size` identities with random share ids.
pub fn fresh_identities<R: RngCore + ?Sized>(
    party_size: u16,
    rng: &mut R,
) -> Result<SortedPartyIds> {
    let ids = (0..party_size)
        .map(|i| PartyIdentity::new((u32::from(i) + 1).to_string(), ShareId::random(rng)))
        .collect();
    SortedPartyIds::sort(ids)
}

/// Builds identities from persisted records.
///
/// Each party is labelled `original_index + 1`, the label it had during key
/// generation. For records read in order from `start_index` this is
/// `position + start_index + 1`.
pub fn identities_from_records<'a, I>(records: I) -> Result<SortedPartyIds>
where
    I: IntoIterator<Item = &'a KeyShareRecord>,
{
    let ids = records
        .into_iter()
        .map(|record| {
            PartyIdentity::new(
                (u32::from(record.original_index) + 1).to_string(),
                record.share_id,
            )
        })
        .collect();
    SortedPartyIds::sort(ids)
}
