//! secp256k1 ECDSA verification and the digest/key encodings the CLI uses.

use k256::ecdsa::signature::hazmat::PrehashVerifier;
use k256::ecdsa::{Signature, VerifyingKey};
use orchestrator::{SignatureData, SignatureVerifier};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum KeyFormatError {
    #[error("{field} is not valid hex: {source}")]
    InvalidHex {
        field: &'static str,
        #[source]
        source: hex::FromHexError,
    },

    #[error("{field} is {len} bytes, at most 32 allowed")]
    ComponentTooLong { field: &'static str, len: usize },

    #[error("not a secp256k1 public key")]
    InvalidPublicKey,
}

/// Verifies prehashed ECDSA signatures with k256.
///
/// High-S signatures are normalized first; threshold signing does not
/// guarantee low-S.
#[derive(Debug, Clone, Copy, Default)]
pub struct EcdsaVerifier;

impl SignatureVerifier for EcdsaVerifier {
    fn verify(&self, public_key: &[u8], digest: &[u8; 32], signature: &SignatureData) -> bool {
        let key = match VerifyingKey::from_sec1_bytes(public_key) {
            Ok(key) => key,
            Err(e) => {
                warn!("Rejecting signature, bad public key: {}", e);
                return false;
            }
        };
        let sig = match Signature::from_slice(&signature.to_compact()) {
            Ok(sig) => sig,
            Err(e) => {
                warn!("Rejecting malformed signature: {}", e);
                return false;
            }
        };
        let sig = sig.normalize_s().unwrap_or(sig);
        key.verify_prehash(digest, &sig).is_ok()
    }
}

/// Digest for signing a bare integer: its 32-byte big-endian encoding.
pub fn digest_for_integer(value: u64) -> [u8; 32] {
    let mut digest = [0u8; 32];
    digest[24..].copy_from_slice(&value.to_be_bytes());
    digest
}

/// Digest for signing text: SHA-256 of its UTF-8 bytes.
pub fn digest_for_message(message: &str) -> [u8; 32] {
    Sha256::digest(message.as_bytes()).into()
}

fn decode_hex(field: &'static str, value: &str) -> Result<Vec<u8>, KeyFormatError> {
    let value = value.trim();
    let value = value.strip_prefix("0x").unwrap_or(value);
    // Tolerate odd-length big integers printed without a leading zero.
    let padded;
    let value = if value.len() % 2 == 1 {
        padded = format!("0{value}");
        padded.as_str()
    } else {
        value
    };
    hex::decode(value).map_err(|source| KeyFormatError::InvalidHex { field, source })
}

fn parse_component(field: &'static str, value: &str) -> Result<Vec<u8>, KeyFormatError> {
    let bytes = decode_hex(field, value)?;
    // Leading zero bytes do not change the integer.
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    let bytes = &bytes[start..];
    if bytes.len() > 32 {
        return Err(KeyFormatError::ComponentTooLong {
            field,
            len: bytes.len(),
        });
    }
    let mut out = vec![0u8; 32 - bytes.len()];
    out.extend_from_slice(bytes);
    Ok(out)
}

/// Parses a SEC1 public key given as hex, compressed or uncompressed.
pub fn parse_public_key(value: &str) -> Result<VerifyingKey, KeyFormatError> {
    let bytes = decode_hex("public key", value)?;
    VerifyingKey::from_sec1_bytes(&bytes).map_err(|_| KeyFormatError::InvalidPublicKey)
}

/// Uncompressed (`04 || x || y`) hex form of a SEC1 public key.
pub fn uncompressed_public_key(value: &str) -> Result<String, KeyFormatError> {
    let key = parse_public_key(value)?;
    Ok(hex::encode(key.to_encoded_point(false).as_bytes()))
}

/// Verifies a hex-encoded signature over `digest`.
pub fn verify_hex(
    public_key: &str,
    r: &str,
    s: &str,
    digest: &[u8; 32],
) -> Result<bool, KeyFormatError> {
    let key = parse_public_key(public_key)?;
    let signature = SignatureData {
        r: parse_component("signature r", r)?,
        s: parse_component("signature s", s)?,
    };
    Ok(EcdsaVerifier.verify(&key.to_sec1_bytes(), digest, &signature))
}
