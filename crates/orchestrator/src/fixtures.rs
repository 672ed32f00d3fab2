//! Key-share fixture persistence.
//!
//! Key generation leaves one record per party on disk:
//!
//! ```text
//! <root>/t<threshold>_n<party_size>/keygen_data_<index>.json
//! ```
//!
//! Records are write-once. Signing reads them back and hands each payload to
//! a [`ShareBinding`], which turns the curve-agnostic bytes into a usable key
//! share. Other files living in the same directory (engine caches) are never
//! touched by [`FixtureStore::clear`].

use std::collections::BTreeSet;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{OrchestratorError, Result};
use crate::identity::{identities_from_records, ShareId, SortedPartyIds};
use crate::quorum::QuorumSelector;

const FIXTURE_PREFIX: &str = "keygen_data_";
const FIXTURE_SUFFIX: &str = ".json";

/// Durable output of one key-generation party.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyShareRecord {
    /// Format version for future compatibility
    pub version: u32,
    /// Index the party had during key generation
    pub original_index: u16,
    pub share_id: ShareId,
    pub threshold: u16,
    pub party_size: u16,
    /// Group public key, SEC1 hex
    pub public_key: String,
    /// Engine-specific key share with the curve stripped
    #[serde(with = "base64_bytes")]
    pub payload: Vec<u8>,
}

impl KeyShareRecord {
    pub const CURRENT_VERSION: u32 = 1;

    pub fn new(
        original_index: u16,
        share_id: ShareId,
        threshold: u16,
        party_size: u16,
        public_key: impl Into<String>,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            original_index,
            share_id,
            threshold,
            party_size,
            public_key: public_key.into(),
            payload,
        }
    }
}

/// Serde helper storing binary fields as base64 strings.
pub mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(bytes: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        STANDARD.encode(bytes).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(&encoded).map_err(serde::de::Error::custom)
    }
}

/// Re-attaches curve parameters to a persisted key share.
pub trait ShareBinding {
    type Share: Send + 'static;

    fn bind(&self, record: &KeyShareRecord) -> std::result::Result<Self::Share, String>;
}

/// A persisted record together with its bound key share.
#[derive(Debug)]
pub struct LoadedShare<S> {
    pub record: KeyShareRecord,
    pub share: S,
}

/// Fixtures loaded for a run.
///
/// `shares[k]` belongs to `identities.get(k)`; the pairing is made by share
/// id, never by load order.
#[derive(Debug)]
pub struct LoadedFixtures<S> {
    pub identities: SortedPartyIds,
    pub shares: Vec<LoadedShare<S>>,
}

impl<S> LoadedFixtures<S> {
    /// Original key-generation indices in sorted-identity order.
    pub fn original_indices(&self) -> Vec<u16> {
        self.shares.iter().map(|s| s.record.original_index).collect()
    }
}

/// Outcome of a write-once fixture write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    AlreadyExists,
}

/// Flat-file store for key-share records.
#[derive(Debug, Clone)]
pub struct FixtureStore {
    root: PathBuf,
}

impl FixtureStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn fixture_dir(&self, threshold: u16, party_size: u16) -> PathBuf {
        self.root.join(format!("t{threshold}_n{party_size}"))
    }

    pub fn fixture_path(&self, threshold: u16, party_size: u16, index: u16) -> PathBuf {
        self.fixture_dir(threshold, party_size)
            .join(format!("{FIXTURE_PREFIX}{index}{FIXTURE_SUFFIX}"))
    }

    pub fn ensure_directory(&self, threshold: u16, party_size: u16) -> Result<PathBuf> {
        let dir = self.fixture_dir(threshold, party_size);
        fs::create_dir_all(&dir).map_err(|e| OrchestratorError::io(&dir, e))?;
        Ok(dir)
    }

    pub fn directory_exists(&self, threshold: u16, party_size: u16) -> bool {
        self.fixture_dir(threshold, party_size).is_dir()
    }

    /// Deletes every key-share record for the pair. Returns how many were removed.
    pub fn clear(&self, threshold: u16, party_size: u16) -> Result<usize> {
        let dir = self.fixture_dir(threshold, party_size);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(OrchestratorError::io(&dir, e)),
        };

        let mut removed = 0;
        for entry in entries {
            let path = entry.map_err(|e| OrchestratorError::io(&dir, e))?.path();
            if !is_fixture_file(&path) {
                continue;
            }
            fs::remove_file(&path).map_err(|e| OrchestratorError::io(&path, e))?;
            removed += 1;
        }

        info!("Cleared {} fixture(s) from {}", removed, dir.display());
        Ok(removed)
    }

    /// Writes a record unless one already exists for the index.
    ///
    /// The record is staged in a hidden file and hard-linked into place, so
    /// a failed write never leaves a truncated fixture behind.
    pub fn write(
        &self,
        threshold: u16,
        party_size: u16,
        index: u16,
        record: &KeyShareRecord,
    ) -> Result<WriteOutcome> {
        let path = self.fixture_path(threshold, party_size, index);
        if path.exists() {
            debug!("Fixture {} already exists, keeping it", path.display());
            return Ok(WriteOutcome::AlreadyExists);
        }
        let data = serde_json::to_vec_pretty(record).map_err(|e| OrchestratorError::CorruptFixture {
            path: path.clone(),
            reason: format!("failed to serialize record: {e}"),
        })?;

        let staging = staging_path(&path);
        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let staged = options.open(&staging).and_then(|mut file| {
            file.write_all(&data)?;
            file.sync_all()
        });
        let linked = staged
            .map_err(|e| OrchestratorError::io(&staging, e))
            .and_then(|()| match fs::hard_link(&staging, &path) {
                Ok(()) => Ok(WriteOutcome::Written),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    Ok(WriteOutcome::AlreadyExists)
                }
                Err(e) => Err(OrchestratorError::io(&path, e)),
            });
        if let Err(e) = fs::remove_file(&staging) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("Failed to remove staging file {}: {}", staging.display(), e);
            }
        }

        let outcome = linked?;
        match outcome {
            WriteOutcome::Written => {
                info!("Saved fixture for party {} to {}", index, path.display())
            }
            WriteOutcome::AlreadyExists => {
                debug!("Fixture {} appeared concurrently, keeping it", path.display())
            }
        }
        Ok(outcome)
    }

    /// [`FixtureStore::write`] on the blocking pool.
    pub async fn persist(
        &self,
        threshold: u16,
        party_size: u16,
        index: u16,
        record: KeyShareRecord,
    ) -> Result<WriteOutcome> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.write(threshold, party_size, index, &record))
            .await
            .map_err(|e| OrchestratorError::Aborted {
                reason: format!("fixture write for party {index} did not complete: {e}"),
            })?
    }

    /// Reads one record and checks it belongs where it was found.
    pub fn read(&self, threshold: u16, party_size: u16, index: u16) -> Result<KeyShareRecord> {
        let path = self.fixture_path(threshold, party_size, index);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(OrchestratorError::FixturesNotFound { path });
            }
            Err(e) => return Err(OrchestratorError::io(&path, e)),
        };

        let record: KeyShareRecord =
            serde_json::from_slice(&data).map_err(|e| OrchestratorError::CorruptFixture {
                path: path.clone(),
                reason: e.to_string(),
            })?;

        let mismatch = if record.original_index != index {
            Some(format!("record is for party {}", record.original_index))
        } else if (record.threshold, record.party_size) != (threshold, party_size) {
            Some(format!(
                "record is for t={} n={}",
                record.threshold, record.party_size
            ))
        } else {
            None
        };
        if let Some(reason) = mismatch {
            return Err(OrchestratorError::CorruptFixture { path, reason });
        }

        Ok(record)
    }

    /// Loads records `[start_index, party_size)`. Fails as a whole if any is missing.
    pub fn load_all<B: ShareBinding>(
        &self,
        threshold: u16,
        party_size: u16,
        start_index: u16,
        binding: &B,
    ) -> Result<LoadedFixtures<B::Share>> {
        self.load_indices(threshold, party_size, start_index..party_size, binding)
    }

    /// Loads a random quorum of records chosen by `selector`.
    pub fn load_subset<B: ShareBinding, R: Rng + ?Sized>(
        &self,
        threshold: u16,
        party_size: u16,
        quorum: u16,
        selector: &QuorumSelector,
        rng: &mut R,
        binding: &B,
    ) -> Result<LoadedFixtures<B::Share>> {
        let chosen: BTreeSet<u16> = selector.select(rng, party_size, quorum)?;
        info!("Loading fixtures for parties {:?}", chosen);
        self.load_indices(threshold, party_size, chosen, binding)
    }

    fn load_indices<B, I>(
        &self,
        threshold: u16,
        party_size: u16,
        indices: I,
        binding: &B,
    ) -> Result<LoadedFixtures<B::Share>>
    where
        B: ShareBinding,
        I: IntoIterator<Item = u16>,
    {
        let mut loaded = Vec::new();
        for index in indices {
            let record = self.read(threshold, party_size, index)?;
            let share = binding.bind(&record).map_err(|reason| OrchestratorError::CorruptFixture {
                path: self.fixture_path(threshold, party_size, index),
                reason,
            })?;
            loaded.push(LoadedShare { record, share });
        }

        let identities = identities_from_records(loaded.iter().map(|s| &s.record))?;

        let mut slots: Vec<Option<LoadedShare<B::Share>>> = loaded.into_iter().map(Some).collect();
        let mut shares = Vec::with_capacity(slots.len());
        for identity in identities.iter() {
            let slot = slots
                .iter_mut()
                .find(|s| matches!(s, Some(s) if s.record.share_id == identity.share_id))
                .and_then(Option::take)
                .ok_or_else(|| OrchestratorError::CorruptFixture {
                    path: self.fixture_dir(threshold, party_size),
                    reason: format!("duplicate share id {}", identity.share_id),
                })?;
            shares.push(slot);
        }

        debug!("Loaded {} fixture(s)", shares.len());
        Ok(LoadedFixtures { identities, shares })
    }
}

/// Hidden sibling a fixture is written to before it is linked into place.
fn staging_path(path: &Path) -> PathBuf {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("fixture");
    path.with_file_name(format!(".{name}.{}.partial", std::process::id()))
}

fn is_fixture_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with(FIXTURE_PREFIX) && name.ends_with(FIXTURE_SUFFIX))
}
