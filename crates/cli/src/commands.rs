//! Command implementations.

use anyhow::{bail, Context, Result};
use orchestrator::{RunCoordinator, RunParams, WriteOutcome};
use protocols::{
    digest_for_integer, digest_for_message, uncompressed_public_key, verify_hex, Cggmp24Setup,
    Cggmp24Signing, EcdsaVerifier, PrimesCache,
};
use rand::rngs::OsRng;
use tracing::info;

use crate::config::Config;

/// Integer signed when `sign` gets no message.
const DEFAULT_SIGNED_VALUE: u64 = 42;

/// Replaces the fixtures for (threshold, party) with a fresh key generation.
pub async fn setup(config: &Config, threshold: i64, party: i64) -> Result<()> {
    let params = RunParams::new(threshold, party)?;
    let coordinator = RunCoordinator::new(config.store());
    let store = coordinator.store();

    let removed = store.clear(params.threshold, params.party_size)?;
    if removed > 0 {
        info!("Removed {} old key share(s)", removed);
    }

    let primes = PrimesCache::new(store.fixture_dir(params.threshold, params.party_size));
    let engine = Cggmp24Setup::with_random_session(primes);
    let report = coordinator
        .distributed_key_generation(&engine, params, &mut OsRng)
        .await
        .context("key generation failed")?;

    println!();
    println!("Key generation complete: {} of {}", params.quorum(), params.party_size);
    println!("  Public key: {}", report.public_key);
    println!("  Messages routed: {}", report.messages_routed);
    for fixture in &report.fixtures {
        let note = match fixture.outcome {
            WriteOutcome::Written => "",
            WriteOutcome::AlreadyExists => " (kept existing)",
        };
        println!("  Party {}: {}{}", fixture.index, fixture.path.display(), note);
    }
    Ok(())
}

/// Signs with a random quorum and prints the verified signature.
pub async fn sign(
    config: &Config,
    threshold: i64,
    party: i64,
    message: Option<&str>,
) -> Result<()> {
    let params = RunParams::new(threshold, party)?;
    let digest = match message {
        Some(text) => digest_for_message(text),
        None => digest_for_integer(DEFAULT_SIGNED_VALUE),
    };

    let coordinator = RunCoordinator::new(config.store());
    let report = coordinator
        .distributed_signing(
            &Cggmp24Signing::with_random_session(),
            &EcdsaVerifier,
            params,
            digest,
            &mut OsRng,
        )
        .await
        .context("signing failed")?;

    let public_key =
        uncompressed_public_key(&report.public_key).context("stored public key is malformed")?;

    println!();
    println!("Signature verified");
    println!("  Signers: {:?}", report.signers);
    println!("  Digest:  {}", hex::encode(report.digest));
    println!("  r:       {}", hex::encode(&report.signature.r));
    println!("  s:       {}", hex::encode(&report.signature.s));
    println!("  Public key: {}", public_key);
    Ok(())
}

/// Checks a hex signature over SHA-256(`msg`).
pub fn verify(public_key: &str, r: &str, s: &str, msg: &str) -> Result<()> {
    let digest = digest_for_message(msg);
    if !verify_hex(public_key, r, s, &digest)? {
        bail!("signature does not verify for the given key and message");
    }
    println!("Signature Valid!");
    Ok(())
}
