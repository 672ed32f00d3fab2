//! Capabilities a protocol engine provides to the coordinator.
//!
//! The coordinator never looks inside protocol payloads. It only needs to
//! start a party, hand it messages and collect what it finally produces.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{OrchestratorError, ProtocolError, Result};
use crate::fixtures::{KeyShareRecord, ShareBinding};
use crate::identity::{PartyIdentity, SortedPartyIds};
use crate::message::{Completion, Message, SignatureData};

/// Channel a party publishes its outbound messages on.
pub type Outbound<M> = mpsc::UnboundedSender<Message<M>>;

/// One participant's protocol state machine.
#[async_trait]
pub trait Party: Send + Sync + 'static {
    type Msg: Clone + Send + Sync + 'static;
    type Output: Send + 'static;

    fn identity(&self) -> &PartyIdentity;

    /// Runs the protocol to its terminal output.
    async fn start(
        &self,
        outbound: Outbound<Self::Msg>,
    ) -> std::result::Result<Completion<Self::Output>, ProtocolError>;

    /// Feeds one inbound message to the party.
    async fn update(&self, message: Message<Self::Msg>) -> std::result::Result<(), ProtocolError>;
}

/// Run parameters shared by key generation and signing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunParams {
    pub threshold: u16,
    pub party_size: u16,
}

impl RunParams {
    /// Validates raw parameters. Requires `0 <= threshold < party_size`.
    pub fn new(threshold: i64, party_size: i64) -> Result<Self> {
        if threshold < 0 {
            return Err(OrchestratorError::validation(format!(
                "threshold must be non-negative, got {threshold}"
            )));
        }
        if threshold >= party_size {
            return Err(OrchestratorError::validation(format!(
                "threshold {threshold} must be less than party size {party_size}"
            )));
        }
        let party_size = u16::try_from(party_size).map_err(|_| {
            OrchestratorError::validation(format!("party size {party_size} is too large"))
        })?;

        Ok(Self {
            threshold: threshold as u16,
            party_size,
        })
    }

    /// Number of parties that sign together.
    pub fn quorum(&self) -> u16 {
        self.threshold + 1
    }
}

/// Context handed to an engine when building a key-generation party.
#[derive(Debug, Clone, Copy)]
pub struct KeygenContext<'a> {
    pub params: RunParams,
    pub parties: &'a SortedPartyIds,
}

/// Context handed to an engine when building a signing party.
#[derive(Debug, Clone, Copy)]
pub struct SigningContext<'a> {
    pub params: RunParams,
    pub parties: &'a SortedPartyIds,
    /// Key-generation indices of the signers, in sorted-identity order.
    pub signers: &'a [u16],
    pub digest: &'a [u8; 32],
}

/// Builds key-generation parties.
pub trait KeygenEngine: Send + Sync {
    type Party: Party<Output = KeyShareRecord>;

    /// Engine-specific parameter checks, run before any party exists.
    fn validate(&self, _params: &RunParams) -> Result<()> {
        Ok(())
    }

    fn keygen_party(
        &self,
        identity: &PartyIdentity,
        ctx: KeygenContext<'_>,
    ) -> std::result::Result<Self::Party, ProtocolError>;
}

/// Builds signing parties from bound key shares.
pub trait SigningEngine: ShareBinding + Send + Sync {
    type Party: Party<Output = SignatureData>;

    fn validate(&self, _params: &RunParams) -> Result<()> {
        Ok(())
    }

    fn signing_party(
        &self,
        identity: &PartyIdentity,
        record: &KeyShareRecord,
        share: Self::Share,
        ctx: SigningContext<'_>,
    ) -> std::result::Result<Self::Party, ProtocolError>;
}

/// Checks an aggregated signature against a group public key.
pub trait SignatureVerifier {
    /// `public_key` is SEC1-encoded.
    fn verify(&self, public_key: &[u8], digest: &[u8; 32], signature: &SignatureData) -> bool;
}
