//! In-process orchestration of threshold-signature parties.
//!
//! Spins up one logical party per participant, ferries protocol messages
//! between them, waits for every party's terminal output and then either
//! persists the key shares (key generation) or verifies the signature
//! (signing). The protocol itself is supplied by an engine implementing
//! [`KeygenEngine`] or [`SigningEngine`].

pub mod barrier;
pub mod coordinator;
pub mod error;
pub mod fixtures;
pub mod identity;
pub mod message;
pub mod party;
pub mod quorum;
pub mod router;

pub use barrier::{Arrival, CompletionBarrier};
pub use coordinator::{FixtureOutcome, KeygenReport, RunCoordinator, RunState, SigningReport};
pub use error::{OrchestratorError, ProtocolError, Result};
pub use fixtures::{
    FixtureStore, KeyShareRecord, LoadedFixtures, LoadedShare, ShareBinding, WriteOutcome,
};
pub use identity::{
    fresh_identities, identities_from_records, PartyIdentity, ShareId, SortedPartyIds,
};
pub use message::{Completion, Message, SignatureData};
pub use party::{
    KeygenContext, KeygenEngine, Outbound, Party, RunParams, SignatureVerifier, SigningContext,
    SigningEngine,
};
pub use quorum::{QuorumSelector, SelectionPolicy};
pub use router::MessageRouter;
