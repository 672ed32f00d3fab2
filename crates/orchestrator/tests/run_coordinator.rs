//! End-to-end runs of the coordinator with a toy protocol engine.
//!
//! The toy key generation has two rounds: every party broadcasts a
//! contribution, then acknowledges every peer point-to-point. The group key
//! is a hash over all contributions. Toy signing has one broadcast round and
//! produces `r = H(key || digest)`, `s = H(r)`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use orchestrator::{
    Completion, FixtureStore, KeyShareRecord, KeygenContext, KeygenEngine, Message,
    OrchestratorError, Outbound, Party, PartyIdentity, ProtocolError, RunCoordinator, RunParams,
    ShareBinding, SignatureData, SignatureVerifier, SigningContext, SigningEngine, SortedPartyIds,
    WriteOutcome,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use sha2::{Digest, Sha256};
use tempfile::TempDir;
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
enum ToyMsg {
    Contribution(u64),
    Ack,
    Nonce(u16),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Misbehaviour {
    Fail(u16),
    TalkToSelf(u16),
    /// Every party reports this key-generation index.
    ClaimIndex(u16),
}

struct Inbox {
    tx: mpsc::UnboundedSender<Message<ToyMsg>>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<Message<ToyMsg>>>>,
}

impl Inbox {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
        }
    }

    fn take(&self) -> Result<mpsc::UnboundedReceiver<Message<ToyMsg>>, ProtocolError> {
        self.rx
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| ProtocolError::new("party started twice"))
    }

    fn push(&self, message: Message<ToyMsg>) {
        // The party may already be done.
        let _ = self.tx.send(message);
    }
}

fn contribution(identity: &PartyIdentity) -> u64 {
    u64::from_be_bytes(identity.share_id.as_bytes()[..8].try_into().unwrap())
}

fn check_misbehaviour(
    identity: &PartyIdentity,
    misbehaviour: Option<Misbehaviour>,
    outbound: &Outbound<ToyMsg>,
) -> Result<(), ProtocolError> {
    match misbehaviour {
        Some(Misbehaviour::Fail(i)) if i == identity.index => {
            Err(ProtocolError::new("injected failure"))
        }
        Some(Misbehaviour::TalkToSelf(i)) if i == identity.index => {
            let _ = outbound.send(Message::p2p(identity.clone(), identity.clone(), ToyMsg::Ack));
            Ok(())
        }
        _ => Ok(()),
    }
}

struct KeygenParty {
    identity: PartyIdentity,
    parties: SortedPartyIds,
    params: RunParams,
    misbehaviour: Option<Misbehaviour>,
    inbox: Inbox,
}

#[async_trait]
impl Party for KeygenParty {
    type Msg = ToyMsg;
    type Output = KeyShareRecord;

    fn identity(&self) -> &PartyIdentity {
        &self.identity
    }

    async fn start(
        &self,
        outbound: Outbound<ToyMsg>,
    ) -> Result<Completion<KeyShareRecord>, ProtocolError> {
        let mut rx = self.inbox.take()?;
        check_misbehaviour(&self.identity, self.misbehaviour, &outbound)?;

        let mine = contribution(&self.identity);
        outbound
            .send(Message::broadcast(self.identity.clone(), ToyMsg::Contribution(mine)))
            .map_err(|_| ProtocolError::new("coordinator gone"))?;

        let peers = self.parties.len() - 1;
        let mut contributions = vec![mine];
        let mut acks = 0;
        while contributions.len() - 1 < peers || acks < peers {
            let message = rx.recv().await.ok_or_else(|| ProtocolError::new("inbox closed"))?;
            match message.payload {
                ToyMsg::Contribution(value) => {
                    contributions.push(value);
                    let reply =
                        Message::p2p(self.identity.clone(), message.from.clone(), ToyMsg::Ack);
                    outbound.send(reply).map_err(|_| ProtocolError::new("coordinator gone"))?;
                }
                ToyMsg::Ack => acks += 1,
                ToyMsg::Nonce(_) => return Err(ProtocolError::new("unexpected signing message")),
            }
        }

        contributions.sort_unstable();
        let mut hasher = Sha256::new();
        for value in &contributions {
            hasher.update(value.to_be_bytes());
        }
        let public_key = hex::encode(hasher.finalize());

        let original_index = match self.misbehaviour {
            Some(Misbehaviour::ClaimIndex(i)) => i,
            _ => self.identity.index,
        };
        let record = KeyShareRecord::new(
            original_index,
            self.identity.share_id,
            self.params.threshold,
            self.params.party_size,
            public_key,
            mine.to_be_bytes().to_vec(),
        );
        Ok(Completion {
            original_index,
            output: record,
        })
    }

    async fn update(&self, message: Message<ToyMsg>) -> Result<(), ProtocolError> {
        self.inbox.push(message);
        Ok(())
    }
}

#[derive(Default)]
struct ToyEngine {
    misbehaviour: Option<Misbehaviour>,
    built: AtomicU64,
}

impl KeygenEngine for ToyEngine {
    type Party = KeygenParty;

    fn keygen_party(
        &self,
        identity: &PartyIdentity,
        ctx: KeygenContext<'_>,
    ) -> Result<KeygenParty, ProtocolError> {
        self.built.fetch_add(1, Ordering::Relaxed);
        Ok(KeygenParty {
            identity: identity.clone(),
            parties: ctx.parties.clone(),
            params: ctx.params,
            misbehaviour: self.misbehaviour,
            inbox: Inbox::new(),
        })
    }
}

struct SigningParty {
    identity: PartyIdentity,
    original_index: u16,
    quorum: usize,
    public_key: Vec<u8>,
    digest: [u8; 32],
    misbehaviour: Option<Misbehaviour>,
    inbox: Inbox,
}

fn toy_signature(public_key: &[u8], digest: &[u8; 32]) -> SignatureData {
    let r = Sha256::new().chain_update(public_key).chain_update(digest).finalize().to_vec();
    let s = Sha256::digest(&r).to_vec();
    SignatureData { r, s }
}

#[async_trait]
impl Party for SigningParty {
    type Msg = ToyMsg;
    type Output = SignatureData;

    fn identity(&self) -> &PartyIdentity {
        &self.identity
    }

    async fn start(
        &self,
        outbound: Outbound<ToyMsg>,
    ) -> Result<Completion<SignatureData>, ProtocolError> {
        let mut rx = self.inbox.take()?;
        check_misbehaviour(&self.identity, self.misbehaviour, &outbound)?;

        outbound
            .send(Message::broadcast(self.identity.clone(), ToyMsg::Nonce(self.original_index)))
            .map_err(|_| ProtocolError::new("coordinator gone"))?;

        let mut seen = 0;
        while seen < self.quorum - 1 {
            match rx.recv().await.map(|m| m.payload) {
                Some(ToyMsg::Nonce(_)) => seen += 1,
                Some(_) => return Err(ProtocolError::new("unexpected keygen message")),
                None => return Err(ProtocolError::new("inbox closed")),
            }
        }

        Ok(Completion {
            original_index: self.original_index,
            output: toy_signature(&self.public_key, &self.digest),
        })
    }

    async fn update(&self, message: Message<ToyMsg>) -> Result<(), ProtocolError> {
        self.inbox.push(message);
        Ok(())
    }
}

impl ShareBinding for ToyEngine {
    type Share = u64;

    fn bind(&self, record: &KeyShareRecord) -> Result<u64, String> {
        let bytes: [u8; 8] = record
            .payload
            .as_slice()
            .try_into()
            .map_err(|_| "payload must be 8 bytes".to_string())?;
        Ok(u64::from_be_bytes(bytes))
    }
}

impl SigningEngine for ToyEngine {
    type Party = SigningParty;

    fn signing_party(
        &self,
        identity: &PartyIdentity,
        record: &KeyShareRecord,
        _share: u64,
        ctx: SigningContext<'_>,
    ) -> Result<SigningParty, ProtocolError> {
        assert_eq!(identity.share_id, record.share_id);
        assert_eq!(ctx.signers[usize::from(identity.index)], record.original_index);
        Ok(SigningParty {
            identity: identity.clone(),
            original_index: record.original_index,
            quorum: ctx.parties.len(),
            public_key: hex::decode(&record.public_key)
                .map_err(|e| ProtocolError::new(e.to_string()))?,
            digest: *ctx.digest,
            misbehaviour: self.misbehaviour,
            inbox: Inbox::new(),
        })
    }
}

struct ToyVerifier {
    accept: bool,
}

impl SignatureVerifier for ToyVerifier {
    fn verify(&self, public_key: &[u8], digest: &[u8; 32], signature: &SignatureData) -> bool {
        self.accept && *signature == toy_signature(public_key, digest)
    }
}

fn digest_of_42() -> [u8; 32] {
    let mut digest = [0u8; 32];
    digest[31] = 42;
    digest
}

fn coordinator() -> (TempDir, RunCoordinator) {
    let dir = TempDir::new().unwrap();
    let coordinator = RunCoordinator::new(FixtureStore::new(dir.path().join("tss_data")));
    (dir, coordinator)
}

#[tokio::test]
async fn test_keygen_then_sign_t1_n3() {
    let (_dir, coordinator) = coordinator();
    let engine = ToyEngine::default();
    let params = RunParams::new(1, 3).unwrap();
    let mut rng = StdRng::seed_from_u64(42);

    let keygen = coordinator
        .distributed_key_generation(&engine, params, &mut rng)
        .await
        .unwrap();

    assert_eq!(keygen.fixtures.len(), 3);
    for (i, fixture) in keygen.fixtures.iter().enumerate() {
        assert_eq!(usize::from(fixture.index), i);
        assert_eq!(fixture.outcome, WriteOutcome::Written);
        assert!(fixture.path.ends_with(format!("t1_n3/keygen_data_{i}.json")));
        assert!(fixture.path.exists());
    }
    // Each party broadcasts to two peers and acks two peers.
    assert_eq!(keygen.messages_routed, 12);

    let signing = coordinator
        .distributed_signing(
            &engine,
            &ToyVerifier { accept: true },
            params,
            digest_of_42(),
            &mut rng,
        )
        .await
        .unwrap();

    assert_eq!(signing.signers.len(), 2);
    assert!(signing.signers.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(signing.public_key, keygen.public_key);
    assert_eq!(signing.digest, digest_of_42());
}

#[tokio::test]
async fn test_keygen_then_sign_across_parameters() {
    for (t, n) in [(0, 1), (0, 2), (1, 2), (2, 5), (3, 6), (4, 5)] {
        let (_dir, coordinator) = coordinator();
        let engine = ToyEngine::default();
        let params = RunParams::new(t, n).unwrap();
        let mut rng = StdRng::seed_from_u64(t as u64 * 100 + n as u64);

        let keygen = coordinator
            .distributed_key_generation(&engine, params, &mut rng)
            .await
            .unwrap();
        assert_eq!(keygen.fixtures.len(), n as usize);

        let signing = coordinator
            .distributed_signing(
                &engine,
                &ToyVerifier { accept: true },
                params,
                digest_of_42(),
                &mut rng,
            )
            .await
            .unwrap();
        assert_eq!(signing.signers.len(), t as usize + 1, "t={t} n={n}");
    }
}

#[tokio::test]
async fn test_rerun_keeps_existing_fixtures() {
    let (_dir, coordinator) = coordinator();
    let engine = ToyEngine::default();
    let params = RunParams::new(1, 3).unwrap();
    let mut rng = StdRng::seed_from_u64(1);

    let first = coordinator
        .distributed_key_generation(&engine, params, &mut rng)
        .await
        .unwrap();
    let original = std::fs::read(&first.fixtures[0].path).unwrap();

    let second = coordinator
        .distributed_key_generation(&engine, params, &mut rng)
        .await
        .unwrap();
    assert!(second
        .fixtures
        .iter()
        .all(|f| f.outcome == WriteOutcome::AlreadyExists));
    assert_eq!(std::fs::read(&first.fixtures[0].path).unwrap(), original);
}

#[tokio::test]
async fn test_signing_without_fixtures() {
    let (_dir, coordinator) = coordinator();
    let engine = ToyEngine::default();
    let params = RunParams::new(1, 3).unwrap();

    let result = coordinator
        .distributed_signing(
            &engine,
            &ToyVerifier { accept: true },
            params,
            digest_of_42(),
            &mut StdRng::seed_from_u64(0),
        )
        .await;

    assert!(matches!(result, Err(OrchestratorError::FixturesNotFound { .. })));
    assert!(!coordinator.store().root().exists());
}

#[tokio::test]
async fn test_party_failure_aborts_run() {
    let (_dir, coordinator) = coordinator();
    let engine = ToyEngine {
        misbehaviour: Some(Misbehaviour::Fail(1)),
        ..Default::default()
    };
    let params = RunParams::new(1, 4).unwrap();

    let result = coordinator
        .distributed_key_generation(&engine, params, &mut StdRng::seed_from_u64(3))
        .await;

    assert!(matches!(result, Err(OrchestratorError::Protocol { .. })));
    assert_eq!(engine.built.load(Ordering::Relaxed), 4);
}

#[tokio::test]
async fn test_self_addressed_message_aborts_run() {
    let (_dir, coordinator) = coordinator();
    let engine = ToyEngine {
        misbehaviour: Some(Misbehaviour::TalkToSelf(0)),
        ..Default::default()
    };
    let params = RunParams::new(1, 3).unwrap();

    let result = coordinator
        .distributed_key_generation(&engine, params, &mut StdRng::seed_from_u64(4))
        .await;

    assert!(matches!(
        result,
        Err(OrchestratorError::SelfAddressedMessage { party: 0 })
    ));
}

#[tokio::test]
async fn test_rejected_signature_is_verification_error() {
    let (_dir, coordinator) = coordinator();
    let engine = ToyEngine::default();
    let params = RunParams::new(2, 4).unwrap();
    let mut rng = StdRng::seed_from_u64(5);

    coordinator
        .distributed_key_generation(&engine, params, &mut rng)
        .await
        .unwrap();
    let result = coordinator
        .distributed_signing(
            &engine,
            &ToyVerifier { accept: false },
            params,
            digest_of_42(),
            &mut rng,
        )
        .await;

    assert!(matches!(result, Err(OrchestratorError::Verification { .. })));
}

#[tokio::test]
async fn test_repeated_original_index_aborts_keygen() {
    let (_dir, coordinator) = coordinator();
    let engine = ToyEngine {
        misbehaviour: Some(Misbehaviour::ClaimIndex(0)),
        ..Default::default()
    };
    let params = RunParams::new(1, 3).unwrap();

    let result = coordinator
        .distributed_key_generation(&engine, params, &mut StdRng::seed_from_u64(6))
        .await;

    assert!(
        matches!(&result, Err(OrchestratorError::Aborted { reason }) if reason.contains("index 0")),
        "unexpected result: {:?}",
        result.map(|r| r.fixtures)
    );
    let written: Vec<_> = std::fs::read_dir(coordinator.store().fixture_dir(1, 3))
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    assert_eq!(written, vec![std::ffi::OsString::from("keygen_data_0.json")]);
}
