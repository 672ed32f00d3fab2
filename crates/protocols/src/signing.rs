//! CGGMP24 threshold signing over stored key shares.

use async_trait::async_trait;
use cggmp24::key_share::{DirtyAuxInfo, DirtyIncompleteKeyShare, Validate};
use cggmp24::security_level::SecurityLevel128;
use cggmp24::supported_curves::Secp256k1;
use orchestrator::{
    Completion, KeyShareRecord, Message, Outbound, Party, PartyIdentity, ProtocolError, RunParams,
    ShareBinding, SignatureData, SigningContext, SigningEngine, SortedPartyIds,
};
use rand::rngs::OsRng;
use rand::RngCore;
use round_based::MpcParty;
use serde::Deserialize;
use tracing::{debug, info};

use crate::delivery::{Phase, PhaseInbox, WireMessage};
use crate::keygen::{execution_id_bytes, validate_params};

pub type KeyShare = cggmp24::KeyShare<Secp256k1, SecurityLevel128>;

/// Stored key share as read back from a fixture, not yet bound to the curve.
#[derive(Deserialize)]
struct DirtySharePayload {
    core: DirtyIncompleteKeyShare<Secp256k1>,
    aux_info: DirtyAuxInfo<SecurityLevel128>,
}

/// Signing engine backed by cggmp24.
#[derive(Debug, Clone)]
pub struct Cggmp24Signing {
    session: [u8; 32],
}

impl Cggmp24Signing {
    pub fn new(session: [u8; 32]) -> Self {
        Self { session }
    }

    pub fn with_random_session() -> Self {
        let mut session = [0u8; 32];
        OsRng.fill_bytes(&mut session);
        Self::new(session)
    }
}

impl Default for Cggmp24Signing {
    fn default() -> Self {
        Self::with_random_session()
    }
}

impl ShareBinding for Cggmp24Signing {
    type Share = KeyShare;

    fn bind(&self, record: &KeyShareRecord) -> Result<KeyShare, String> {
        let dirty: DirtySharePayload = serde_json::from_slice(&record.payload)
            .map_err(|e| format!("Failed to deserialize key share: {}", e))?;
        let core = dirty
            .core
            .validate()
            .map_err(|e| format!("Invalid key share: {:?}", e))?;
        let aux_info = dirty
            .aux_info
            .validate()
            .map_err(|e| format!("Invalid aux_info: {:?}", e))?;

        if core.i != record.original_index {
            return Err(format!(
                "key share is for party {}, record says {}",
                core.i, record.original_index
            ));
        }
        let public_key = hex::encode(core.shared_public_key.to_bytes(true));
        if public_key != record.public_key {
            return Err("key share public key does not match record".to_string());
        }

        cggmp24::KeyShare::from_parts((core, aux_info))
            .map_err(|e| format!("Failed to construct key share: {:?}", e))
    }
}

impl SigningEngine for Cggmp24Signing {
    type Party = SigningParty;

    fn validate(&self, params: &RunParams) -> orchestrator::Result<()> {
        validate_params(params)
    }

    fn signing_party(
        &self,
        identity: &PartyIdentity,
        record: &KeyShareRecord,
        share: KeyShare,
        ctx: SigningContext<'_>,
    ) -> Result<SigningParty, ProtocolError> {
        if ctx.signers.get(usize::from(identity.index)) != Some(&record.original_index) {
            return Err(ProtocolError::new(format!(
                "party {} is not at its signer position",
                identity.moniker
            )));
        }

        Ok(SigningParty {
            identity: identity.clone(),
            parties: ctx.parties.clone(),
            original_index: record.original_index,
            signers: ctx.signers.to_vec(),
            key_share: share,
            digest: *ctx.digest,
            eid: execution_id_bytes(&self.session, Phase::Signing),
            inbox: PhaseInbox::new(Phase::Signing),
        })
    }
}

pub struct SigningParty {
    identity: PartyIdentity,
    parties: SortedPartyIds,
    original_index: u16,
    /// Key-generation indices, position `k` is signer `k`
    signers: Vec<u16>,
    key_share: KeyShare,
    digest: [u8; 32],
    eid: [u8; 32],
    inbox: PhaseInbox,
}

#[async_trait]
impl Party for SigningParty {
    type Msg = WireMessage;
    type Output = SignatureData;

    fn identity(&self) -> &PartyIdentity {
        &self.identity
    }

    async fn start(
        &self,
        outbound: Outbound<WireMessage>,
    ) -> Result<Completion<SignatureData>, ProtocolError> {
        // Signer index is the position in `signers`, not the keygen index.
        let signer_index = self.identity.index;
        info!(
            "Party {} signing as signer {} of {:?}",
            self.identity.moniker, signer_index, self.signers
        );

        let delivery = self.inbox.connect(&self.identity, &self.parties, outbound)?;
        let party = MpcParty::connected(delivery);

        let scalar =
            cggmp24::generic_ec::Scalar::<Secp256k1>::from_be_bytes_mod_order(&self.digest);
        let message = cggmp24::PrehashedDataToSign::from_scalar(scalar);

        let signature = cggmp24::signing(
            cggmp24::ExecutionId::new(&self.eid),
            signer_index,
            &self.signers,
            &self.key_share,
        )
        .sign(&mut OsRng, party, &message)
        .await
        .map_err(|e| ProtocolError::new(format!("signing failed: {:?}", e)))?;

        let r = (*signature.r).to_be_bytes().to_vec();
        let s = (*signature.s).to_be_bytes().to_vec();
        debug!(
            "Party {} signature r={} s={}",
            self.identity.moniker,
            hex::encode(&r),
            hex::encode(&s)
        );

        Ok(Completion {
            original_index: self.original_index,
            output: SignatureData { r, s },
        })
    }

    async fn update(&self, message: Message<WireMessage>) -> Result<(), ProtocolError> {
        if message.payload.phase != Phase::Signing {
            return Err(ProtocolError::new(format!(
                "signing party {} got a {} message",
                self.identity.moniker, message.payload.phase
            )));
        }
        self.inbox.push(message);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestrator::ShareId;

    #[test]
    fn test_bind_rejects_garbage_payload() {
        let share_id = ShareId::from_bytes([1; 32]);
        let record = KeyShareRecord::new(0, share_id, 1, 3, "02ab", b"{}".to_vec());
        let Err(err) = Cggmp24Signing::new([0; 32]).bind(&record) else {
            panic!("garbage payload accepted");
        };
        assert!(err.contains("deserialize"));
    }
}
