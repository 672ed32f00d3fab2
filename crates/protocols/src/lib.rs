//! CGGMP24 threshold-ECDSA engine for the party orchestrator.
//!
//! - [`keygen`]: key generation plus auxiliary info, producing key-share records
//! - [`signing`]: signing with a quorum of stored shares
//! - [`delivery`]: round-based Stream/Sink over the router's channels
//! - [`primes`]: on-disk cache of pregenerated primes
//! - [`verify`]: k256 verification and digest helpers

pub mod delivery;
pub mod keygen;
pub mod primes;
pub mod signing;
pub mod verify;

pub use keygen::{Cggmp24Setup, SetupParty};
pub use primes::PrimesCache;
pub use signing::{Cggmp24Signing, SigningParty};
pub use verify::{
    digest_for_integer, digest_for_message, uncompressed_public_key, verify_hex, EcdsaVerifier,
};
