//! CGGMP24 setup: threshold key generation followed by auxiliary-info
//! generation.
//!
//! Each party runs both sub-protocols back to back and ends with a
//! [`KeyShareRecord`] carrying the curve-agnostic key share. Safe primes
//! for the aux-info phase are found on a blocking task while key
//! generation is still running.

use async_trait::async_trait;
use cggmp24::key_share::AuxInfo;
use cggmp24::security_level::SecurityLevel128;
use cggmp24::supported_curves::Secp256k1;
use orchestrator::{
    Completion, KeyShareRecord, KeygenContext, KeygenEngine, Message, OrchestratorError, Outbound,
    Party, PartyIdentity, ProtocolError, RunParams, SortedPartyIds,
};
use rand::rngs::OsRng;
use rand::RngCore;
use round_based::MpcParty;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::delivery::{Phase, PhaseInbox, WireMessage};
use crate::primes::PrimesCache;

/// What a setup party persists, before the curve is stripped.
#[derive(Serialize)]
struct SharePayload<'a> {
    core: &'a cggmp24::IncompleteKeyShare<Secp256k1>,
    aux_info: &'a AuxInfo<SecurityLevel128>,
}

/// Derives the execution id every party of a session uses for `phase`.
pub(crate) fn execution_id_bytes(session: &[u8; 32], phase: Phase) -> [u8; 32] {
    Sha256::new()
        .chain_update(b"tss-party/")
        .chain_update(phase.to_string())
        .chain_update(session)
        .finalize()
        .into()
}

/// Key-generation engine backed by cggmp24.
#[derive(Debug, Clone)]
pub struct Cggmp24Setup {
    session: [u8; 32],
    primes: PrimesCache,
}

impl Cggmp24Setup {
    pub fn new(session: [u8; 32], primes: PrimesCache) -> Self {
        Self { session, primes }
    }

    /// Engine for a fresh session with a random id.
    pub fn with_random_session(primes: PrimesCache) -> Self {
        let mut session = [0u8; 32];
        OsRng.fill_bytes(&mut session);
        Self::new(session, primes)
    }
}

/// cggmp24 needs at least two signers, so `threshold + 1 >= 2`.
pub(crate) fn validate_params(params: &RunParams) -> orchestrator::Result<()> {
    if params.threshold == 0 {
        return Err(OrchestratorError::validation(
            "threshold must be at least 1: cggmp24 signs with two or more parties",
        ));
    }
    Ok(())
}

impl KeygenEngine for Cggmp24Setup {
    type Party = SetupParty;

    fn validate(&self, params: &RunParams) -> orchestrator::Result<()> {
        validate_params(params)
    }

    fn keygen_party(
        &self,
        identity: &PartyIdentity,
        ctx: KeygenContext<'_>,
    ) -> Result<SetupParty, ProtocolError> {
        Ok(SetupParty {
            identity: identity.clone(),
            parties: ctx.parties.clone(),
            params: ctx.params,
            keygen_eid: execution_id_bytes(&self.session, Phase::Keygen),
            aux_eid: execution_id_bytes(&self.session, Phase::AuxInfo),
            primes: self.primes.clone(),
            keygen_inbox: PhaseInbox::new(Phase::Keygen),
            aux_inbox: PhaseInbox::new(Phase::AuxInfo),
        })
    }
}

pub struct SetupParty {
    identity: PartyIdentity,
    parties: SortedPartyIds,
    params: RunParams,
    keygen_eid: [u8; 32],
    aux_eid: [u8; 32],
    primes: PrimesCache,
    keygen_inbox: PhaseInbox,
    aux_inbox: PhaseInbox,
}

impl SetupParty {
    fn record(
        &self,
        core: &cggmp24::IncompleteKeyShare<Secp256k1>,
        aux_info: &AuxInfo<SecurityLevel128>,
    ) -> Result<KeyShareRecord, ProtocolError> {
        let payload = serde_json::to_vec(&SharePayload { core, aux_info })
            .map_err(|e| ProtocolError::new(format!("failed to serialize key share: {e}")))?;
        let public_key = hex::encode(core.shared_public_key.to_bytes(true));

        Ok(KeyShareRecord::new(
            core.i,
            self.identity.share_id,
            self.params.threshold,
            self.params.party_size,
            public_key,
            payload,
        ))
    }
}

#[async_trait]
impl Party for SetupParty {
    type Msg = WireMessage;
    type Output = KeyShareRecord;

    fn identity(&self) -> &PartyIdentity {
        &self.identity
    }

    async fn start(
        &self,
        outbound: Outbound<WireMessage>,
    ) -> Result<Completion<KeyShareRecord>, ProtocolError> {
        let i = self.identity.index;
        let n = self.params.party_size;
        info!(
            "Party {} starting setup: index {}, {} of {}",
            self.identity.moniker,
            i,
            self.params.quorum(),
            n
        );

        let cache = self.primes.clone();
        let primes_task = tokio::task::spawn_blocking(move || cache.load_or_generate(i));

        let delivery = self.keygen_inbox.connect(&self.identity, &self.parties, outbound.clone())?;
        let party = MpcParty::connected(delivery);
        let core = cggmp24::keygen::<Secp256k1>(cggmp24::ExecutionId::new(&self.keygen_eid), i, n)
            .set_threshold(self.params.quorum())
            .start(&mut OsRng, party)
            .await
            .map_err(|e| ProtocolError::new(format!("keygen failed: {:?}", e)))?;
        debug!("Party {} finished keygen", self.identity.moniker);

        let primes = primes_task
            .await
            .map_err(|e| ProtocolError::new(format!("prime generation task failed: {e}")))?
            .map_err(|e| ProtocolError::new(e.to_string()))?;

        let delivery = self.aux_inbox.connect(&self.identity, &self.parties, outbound)?;
        let party = MpcParty::connected(delivery);
        let aux_info: AuxInfo<SecurityLevel128> =
            cggmp24::aux_info_gen(cggmp24::ExecutionId::new(&self.aux_eid), i, n, primes)
                .start(&mut OsRng, party)
                .await
                .map_err(|e| ProtocolError::new(format!("aux info generation failed: {:?}", e)))?;
        debug!("Party {} finished aux info", self.identity.moniker);

        let record = self.record(&core, &aux_info)?;
        cggmp24::KeyShare::from_parts((core, aux_info))
            .map_err(|e| ProtocolError::new(format!("key share parts do not match: {:?}", e)))?;

        Ok(Completion {
            original_index: record.original_index,
            output: record,
        })
    }

    async fn update(&self, message: Message<WireMessage>) -> Result<(), ProtocolError> {
        match message.payload.phase {
            Phase::Keygen => self.keygen_inbox.push(message),
            Phase::AuxInfo => self.aux_inbox.push(message),
            phase => {
                return Err(ProtocolError::new(format!(
                    "setup party {} got a {} message",
                    self.identity.moniker, phase
                )))
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_ids_differ_per_phase_and_session() {
        let a = execution_id_bytes(&[1; 32], Phase::Keygen);
        assert_eq!(a, execution_id_bytes(&[1; 32], Phase::Keygen));
        assert_ne!(a, execution_id_bytes(&[1; 32], Phase::AuxInfo));
        assert_ne!(a, execution_id_bytes(&[2; 32], Phase::Keygen));
    }

    #[test]
    fn test_threshold_zero_rejected() {
        assert!(validate_params(&RunParams::new(0, 3).unwrap()).is_err());
        assert!(validate_params(&RunParams::new(1, 3).unwrap()).is_ok());
    }
}
