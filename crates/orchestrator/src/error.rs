//! Error types for party orchestration.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failure reported by a protocol engine while a party is running.
///
/// Engines only ever hand back a message; the coordinator attaches the
/// party that produced it.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct ProtocolError(String);

impl ProtocolError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// Errors that can abort a key-generation or signing run.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Run parameters rejected before any party was built.
    #[error("invalid parameters: {reason}")]
    Validation { reason: String },

    /// Filesystem failure while touching fixtures.
    #[error("fixture I/O failed at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A key-generation fixture the run depends on is missing.
    #[error("no key-generation fixture at {}; run setup first", path.display())]
    FixturesNotFound { path: PathBuf },

    /// A fixture exists but cannot be used.
    #[error("fixture at {} is unusable: {reason}", path.display())]
    CorruptFixture { path: PathBuf, reason: String },

    /// A party's protocol engine failed.
    #[error("party {party} failed: {source}")]
    Protocol {
        party: String,
        #[source]
        source: ProtocolError,
    },

    /// A party addressed a point-to-point message to itself.
    #[error("party {party} addressed a message to itself")]
    SelfAddressedMessage { party: u16 },

    /// A message named a recipient outside the population.
    #[error("party {from} addressed a message to unknown party {to}")]
    UnknownRecipient { from: u16, to: u16 },

    /// The aggregated signature did not verify.
    #[error("signature verification failed: {reason}")]
    Verification { reason: String },

    /// The run stopped for a reason outside the protocol itself.
    #[error("run aborted: {reason}")]
    Aborted { reason: String },
}

impl OrchestratorError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }
}

/// Result type for orchestration operations.
pub type Result<T> = std::result::Result<T, OrchestratorError>;
