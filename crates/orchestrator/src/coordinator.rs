//! Top-level run orchestration.
//!
//! A run moves through `Init -> Running -> {Completed, Failed}`:
//!
//! 1. **Init**: parameters are validated, identities assigned and one party
//!    built per identity.
//! 2. **Running**: every party is started on its own task. The event loop
//!    drains the error, outbound and completion channels until the
//!    completion barrier closes or something fails.
//! 3. **Completed / Failed**: outstanding tasks are cancelled either way.
//!    Fixtures written before a failure stay on disk.

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use rand::Rng;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::barrier::{Arrival, CompletionBarrier};
use crate::error::{OrchestratorError, ProtocolError, Result};
use crate::fixtures::{FixtureStore, KeyShareRecord, LoadedFixtures, LoadedShare, WriteOutcome};
use crate::identity::fresh_identities;
use crate::message::{Completion, Message, SignatureData};
use crate::party::{
    KeygenContext, KeygenEngine, Party, RunParams, SignatureVerifier, SigningContext, SigningEngine,
};
use crate::quorum::QuorumSelector;
use crate::router::MessageRouter;

/// Lifecycle of a single run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Init,
    Running,
    Completed,
    Failed,
}

impl RunState {
    fn advance(&mut self, next: RunState) {
        debug!("Run state {} -> {}", self, next);
        *self = next;
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init => write!(f, "INIT"),
            Self::Running => write!(f, "RUNNING"),
            Self::Completed => write!(f, "COMPLETED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

/// Where one party's key share ended up.
#[derive(Debug, Clone)]
pub struct FixtureOutcome {
    pub index: u16,
    pub path: PathBuf,
    pub outcome: WriteOutcome,
}

#[derive(Debug, Clone)]
pub struct KeygenReport {
    pub params: RunParams,
    /// Group public key, SEC1 hex
    pub public_key: String,
    /// Sorted by party index
    pub fixtures: Vec<FixtureOutcome>,
    pub messages_routed: usize,
}

#[derive(Debug, Clone)]
pub struct SigningReport {
    pub params: RunParams,
    /// Key-generation indices of the parties that signed, ascending
    pub signers: Vec<u16>,
    /// Group public key, SEC1 hex
    pub public_key: String,
    pub digest: [u8; 32],
    pub signature: SignatureData,
    pub messages_routed: usize,
}

struct RunOutcome<O> {
    completions: Vec<Completion<O>>,
    messages_routed: usize,
}

/// Drives key-generation and signing runs over a fixture store.
#[derive(Debug, Clone)]
pub struct RunCoordinator {
    store: FixtureStore,
    selector: QuorumSelector,
}

impl RunCoordinator {
    pub fn new(store: FixtureStore) -> Self {
        Self {
            store,
            selector: QuorumSelector::default(),
        }
    }

    pub fn with_selector(mut self, selector: QuorumSelector) -> Self {
        self.selector = selector;
        self
    }

    pub fn store(&self) -> &FixtureStore {
        &self.store
    }

    /// Runs key generation for fresh identities and persists every share.
    pub async fn distributed_key_generation<E, R>(
        &self,
        engine: &E,
        params: RunParams,
        rng: &mut R,
    ) -> Result<KeygenReport>
    where
        E: KeygenEngine,
        R: Rng + ?Sized,
    {
        let RunParams { threshold, party_size } = params;
        info!(
            "Starting distributed key generation: threshold {}, {} parties",
            threshold, party_size
        );

        let mut state = RunState::Init;
        engine.validate(&params)?;
        self.store.ensure_directory(threshold, party_size)?;

        let identities = fresh_identities(party_size, rng)?;
        let ctx = KeygenContext {
            params,
            parties: &identities,
        };
        let parties = identities
            .iter()
            .map(|identity| {
                engine
                    .keygen_party(identity, ctx)
                    .map(Arc::new)
                    .map_err(|source| OrchestratorError::Protocol {
                        party: identity.moniker.clone(),
                        source,
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut persister = KeygenPersister {
            store: &self.store,
            params,
            group_key: None,
            fixtures: Vec::with_capacity(usize::from(party_size)),
        };
        let result = self.drive(&mut state, parties, &mut persister).await;

        let run = match result {
            Ok(run) => run,
            Err(e) => {
                state.advance(RunState::Failed);
                error!("Key generation failed: {}", e);
                return Err(e);
            }
        };
        state.advance(RunState::Completed);

        let KeygenPersister {
            group_key,
            mut fixtures,
            ..
        } = persister;
        let public_key = group_key.ok_or_else(|| OrchestratorError::Aborted {
            reason: "key generation finished without output".to_string(),
        })?;
        fixtures.sort_by_key(|f| f.index);

        info!("Key generation complete, group public key {}", public_key);
        Ok(KeygenReport {
            params,
            public_key,
            fixtures,
            messages_routed: run.messages_routed,
        })
    }

    /// Signs `digest` with a random quorum of `threshold + 1` stored shares
    /// and verifies the result.
    pub async fn distributed_signing<E, V, R>(
        &self,
        engine: &E,
        verifier: &V,
        params: RunParams,
        digest: [u8; 32],
        rng: &mut R,
    ) -> Result<SigningReport>
    where
        E: SigningEngine,
        V: SignatureVerifier,
        R: Rng + ?Sized,
    {
        let RunParams { threshold, party_size } = params;
        info!(
            "Starting distributed signing: threshold {}, {} parties, digest {}",
            threshold,
            party_size,
            hex::encode(digest)
        );

        let mut state = RunState::Init;
        engine.validate(&params)?;
        if !self.store.directory_exists(threshold, party_size) {
            return Err(OrchestratorError::FixturesNotFound {
                path: self.store.fixture_dir(threshold, party_size),
            });
        }

        let LoadedFixtures { identities, shares } =
            self.store
                .load_subset(threshold, party_size, params.quorum(), &self.selector, rng, engine)?;
        let signers: Vec<u16> = shares.iter().map(|s| s.record.original_index).collect();
        let public_key = group_public_key(&self.store, params, &shares)?;

        let ctx = SigningContext {
            params,
            parties: &identities,
            signers: &signers,
            digest: &digest,
        };
        let parties = identities
            .iter()
            .zip(shares)
            .map(|(identity, LoadedShare { record, share })| {
                engine
                    .signing_party(identity, &record, share, ctx)
                    .map(Arc::new)
                    .map_err(|source| OrchestratorError::Protocol {
                        party: identity.moniker.clone(),
                        source,
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut run = match self.drive(&mut state, parties, &mut AcceptAll).await {
            Ok(run) => run,
            Err(e) => {
                state.advance(RunState::Failed);
                error!("Signing failed: {}", e);
                return Err(e);
            }
        };

        let key_bytes = hex::decode(&public_key).map_err(|e| OrchestratorError::Verification {
            reason: format!("group public key is not hex: {e}"),
        })?;
        for done in &run.completions {
            if !verifier.verify(&key_bytes, &digest, &done.output) {
                state.advance(RunState::Failed);
                return Err(OrchestratorError::Verification {
                    reason: format!("signature from party {} does not verify", done.original_index),
                });
            }
        }
        state.advance(RunState::Completed);

        run.completions.sort_by_key(|c| c.original_index);
        let signature = run
            .completions
            .into_iter()
            .next()
            .map(|c| c.output)
            .ok_or_else(|| OrchestratorError::Aborted {
                reason: "signing finished without output".to_string(),
            })?;

        let mut signers = signers;
        signers.sort_unstable();
        info!("Signature verified for signers {:?}", signers);

        Ok(SigningReport {
            params,
            signers,
            public_key,
            digest,
            signature,
            messages_routed: run.messages_routed,
        })
    }

    /// Starts every party and runs the event loop until all have finished.
    async fn drive<P, H>(
        &self,
        state: &mut RunState,
        parties: Vec<Arc<P>>,
        handler: &mut H,
    ) -> Result<RunOutcome<P::Output>>
    where
        P: Party,
        P::Output: Sync,
        H: CompletionHandler<P::Output>,
    {
        let population = parties.len();
        let capacity = population.max(1);

        let (err_tx, mut err_rx) = mpsc::channel::<OrchestratorError>(capacity);
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message<P::Msg>>();
        let (end_tx, mut end_rx) = mpsc::channel::<Completion<P::Output>>(capacity);
        let cancel = CancellationToken::new();

        let parties: Arc<[Arc<P>]> = parties.into();
        let router = MessageRouter::new(Arc::clone(&parties), err_tx.clone(), cancel.clone());
        let barrier = CompletionBarrier::new(population);

        let mut tasks = JoinSet::new();
        for party in parties.iter() {
            let party = Arc::clone(party);
            let outbound = out_tx.clone();
            let errors = err_tx.clone();
            let completions = end_tx.clone();
            let cancel = cancel.clone();

            tasks.spawn(async move {
                let moniker = party.identity().moniker.clone();
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Party {} cancelled", moniker);
                    }
                    result = party.start(outbound) => match result {
                        Ok(done) => {
                            debug!("Party {} finished", moniker);
                            let _ = completions.send(done).await;
                        }
                        Err(source) => {
                            let _ = errors
                                .send(OrchestratorError::Protocol { party: moniker, source })
                                .await;
                        }
                    }
                }
            });
        }
        drop(out_tx);
        drop(end_tx);
        drop(err_tx);
        state.advance(RunState::Running);

        let mut completions = Vec::with_capacity(population);
        let mut reported = BTreeSet::new();
        let result = loop {
            tokio::select! {
                biased;

                Some(e) = err_rx.recv() => break Err(e),
                Some(message) = out_rx.recv() => {
                    if let Err(e) = router.route(message) {
                        break Err(e);
                    }
                }
                Some(done) = end_rx.recv() => {
                    if !reported.insert(done.original_index) {
                        break Err(OrchestratorError::Aborted {
                            reason: format!("party index {} finished twice", done.original_index),
                        });
                    }
                    if let Err(e) = handler.on_completion(&done).await {
                        break Err(e);
                    }
                    completions.push(done);
                    match barrier.arrive() {
                        Arrival::Closed => break Ok(()),
                        Arrival::Waiting { arrived, expected } => {
                            debug!("{}/{} parties finished", arrived, expected);
                        }
                        Arrival::AlreadyClosed => warn!("Completion after the run closed"),
                    }
                }
                Some(joined) = tasks.join_next() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            break Err(OrchestratorError::Aborted {
                                reason: format!("party task panicked: {e}"),
                            });
                        }
                    }
                }
                else => break Err(OrchestratorError::Aborted {
                    reason: "all parties stopped before completing".to_string(),
                }),
            }
        };

        cancel.cancel();
        tasks.shutdown().await;

        let messages_routed = router.dispatched();
        debug!("Routed {} deliveries", messages_routed);
        result.map(|()| RunOutcome {
            completions,
            messages_routed,
        })
    }
}

/// Reacts to each terminal output as the event loop receives it.
#[async_trait]
trait CompletionHandler<O: Send + Sync + 'static>: Send {
    async fn on_completion(&mut self, done: &Completion<O>) -> Result<()>;
}

/// Signing keeps outputs for verification after the run.
struct AcceptAll;

#[async_trait]
impl<O: Send + Sync + 'static> CompletionHandler<O> for AcceptAll {
    async fn on_completion(&mut self, _done: &Completion<O>) -> Result<()> {
        Ok(())
    }
}

/// Persists key shares as parties finish and checks they agree on the group key.
struct KeygenPersister<'a> {
    store: &'a FixtureStore,
    params: RunParams,
    group_key: Option<String>,
    fixtures: Vec<FixtureOutcome>,
}

#[async_trait]
impl<'a> CompletionHandler<KeyShareRecord> for KeygenPersister<'a> {
    async fn on_completion(&mut self, done: &Completion<KeyShareRecord>) -> Result<()> {
        let RunParams {
            threshold,
            party_size,
        } = self.params;
        let index = done.original_index;
        if index >= party_size {
            return Err(OrchestratorError::Aborted {
                reason: format!("party reported index {index} outside population of {party_size}"),
            });
        }

        let record = &done.output;
        match &self.group_key {
            Some(key) if key != &record.public_key => {
                return Err(OrchestratorError::Protocol {
                    party: (u32::from(index) + 1).to_string(),
                    source: ProtocolError::new("group public key disagrees with other parties"),
                });
            }
            Some(_) => {}
            None => self.group_key = Some(record.public_key.clone()),
        }

        let outcome = self
            .store
            .persist(threshold, party_size, index, record.clone())
            .await?;
        self.fixtures.push(FixtureOutcome {
            index,
            path: self.store.fixture_path(threshold, party_size, index),
            outcome,
        });
        Ok(())
    }
}

fn group_public_key<S>(
    store: &FixtureStore,
    params: RunParams,
    shares: &[LoadedShare<S>],
) -> Result<String> {
    let first = shares.first().ok_or_else(|| OrchestratorError::FixturesNotFound {
        path: store.fixture_dir(params.threshold, params.party_size),
    })?;

    if let Some(other) = shares.iter().find(|s| s.record.public_key != first.record.public_key) {
        return Err(OrchestratorError::CorruptFixture {
            path: store.fixture_path(
                params.threshold,
                params.party_size,
                other.record.original_index,
            ),
            reason: "group public key differs from other fixtures".to_string(),
        });
    }
    Ok(first.record.public_key.clone())
}
