//! Safe primes for auxiliary-info generation, cached on disk.
//!
//! Finding the primes takes tens of seconds per party, so setup keeps them
//! next to the key-share fixtures as `primes_<index>.json` and reuses them
//! for later runs with the same parameters. Clearing fixtures leaves them
//! in place.

use std::fs;
use std::io;
use std::path::PathBuf;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use cggmp24::security_level::SecurityLevel128;
use cggmp24::PregeneratedPrimes;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

pub type Primes = PregeneratedPrimes<SecurityLevel128>;

#[derive(Debug, Error)]
pub enum PrimesError {
    #[error("primes cache {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("primes cache {} is not valid JSON: {source}", path.display())]
    Format {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("unsupported primes cache version {0}")]
    Version(u32),

    #[error("cached primes belong to party {found}, wanted {wanted}")]
    WrongParty { found: u16, wanted: u16 },

    #[error("primes encoding: {0}")]
    Encoding(#[from] bincode::Error),
}

/// On-disk form of one party's primes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedPrimes {
    pub version: u32,
    pub party_index: u16,
    /// bincode-encoded [`Primes`]
    #[serde(with = "orchestrator::fixtures::base64_bytes")]
    pub encoded: Vec<u8>,
    /// Unix seconds
    pub generated_at: u64,
}

impl CachedPrimes {
    pub const CURRENT_VERSION: u32 = 1;

    pub fn encode(party_index: u16, primes: &Primes) -> Result<Self, PrimesError> {
        let generated_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();

        Ok(Self {
            version: Self::CURRENT_VERSION,
            party_index,
            encoded: bincode::serialize(primes)?,
            generated_at,
        })
    }

    /// Decodes the primes, checking they were made for `party_index`.
    pub fn decode(&self, party_index: u16) -> Result<Primes, PrimesError> {
        if self.version != Self::CURRENT_VERSION {
            return Err(PrimesError::Version(self.version));
        }
        if self.party_index != party_index {
            return Err(PrimesError::WrongParty {
                found: self.party_index,
                wanted: party_index,
            });
        }
        Ok(bincode::deserialize(&self.encoded)?)
    }
}

/// Directory holding each party's cached primes.
#[derive(Debug, Clone)]
pub struct PrimesCache {
    dir: PathBuf,
}

impl PrimesCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self, party_index: u16) -> PathBuf {
        self.dir.join(format!("primes_{party_index}.json"))
    }

    /// Reads the cache entry for a party, `None` if there is none.
    pub fn read(&self, party_index: u16) -> Result<Option<CachedPrimes>, PrimesError> {
        let path = self.path(party_index);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(PrimesError::Io { path, source }),
        };
        let cached = serde_json::from_slice(&data)
            .map_err(|source| PrimesError::Format { path, source })?;
        Ok(Some(cached))
    }

    pub fn write(&self, cached: &CachedPrimes) -> Result<(), PrimesError> {
        let path = self.path(cached.party_index);
        fs::create_dir_all(&self.dir).map_err(|source| PrimesError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let data = serde_json::to_vec_pretty(cached).map_err(|source| PrimesError::Format {
            path: path.clone(),
            source,
        })?;
        fs::write(&path, &data).map_err(|source| PrimesError::Io { path: path.clone(), source })?;

        debug!("Cached primes for party {} at {}", cached.party_index, path.display());
        Ok(())
    }

    /// Cached primes for the party, or freshly generated ones.
    ///
    /// Blocks for as long as generation takes; call from a blocking task.
    /// A cache that cannot be read or written only costs a regeneration.
    pub fn load_or_generate(&self, party_index: u16) -> Result<Primes, PrimesError> {
        match self.read(party_index).and_then(|c| c.map(|c| c.decode(party_index)).transpose()) {
            Ok(Some(primes)) => {
                info!("Reusing cached primes for party {}", party_index);
                return Ok(primes);
            }
            Ok(None) => debug!("No cached primes for party {}", party_index),
            Err(e) => warn!("Discarding cached primes for party {}: {}", party_index, e),
        }

        let primes = generate(party_index);
        let cached = CachedPrimes::encode(party_index, &primes);
        if let Err(e) = cached.and_then(|cached| self.write(&cached)) {
            warn!("Failed to cache primes for party {}: {}", party_index, e);
        }
        Ok(primes)
    }
}

/// Finds a fresh set of safe primes.
pub fn generate(party_index: u16) -> Primes {
    info!("Generating primes for party {}, this may take a while", party_index);
    let start = Instant::now();
    let primes = Primes::generate(&mut OsRng);
    info!(
        "Primes for party {} ready in {:.2}s",
        party_index,
        start.elapsed().as_secs_f64()
    );
    primes
}
