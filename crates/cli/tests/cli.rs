use std::path::Path;
use std::process::{Command, Output};

use k256::ecdsa::signature::hazmat::PrehashSigner;
use k256::ecdsa::{Signature, SigningKey};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use tempfile::TempDir;

fn tss_party(fixture_dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_tss-party"))
        .arg("--fixture-dir")
        .arg(fixture_dir)
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .unwrap()
}

#[test]
fn test_help_exits_zero() {
    let dir = TempDir::new().unwrap();
    for args in [&["help"][..], &["--help"][..]] {
        let output = tss_party(dir.path(), args);
        assert!(output.status.success());
        let stdout = String::from_utf8_lossy(&output.stdout);
        assert!(stdout.contains("setup"));
        assert!(stdout.contains("sign"));
    }
}

#[test]
fn test_unknown_command_exits_one() {
    let dir = TempDir::new().unwrap();
    let output = tss_party(dir.path(), &["launch"]);
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn test_setup_rejects_threshold_above_party_count() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("tss_data");

    let output = tss_party(&root, &["setup", "--threshold=5", "--party=3"]);

    assert_eq!(output.status.code(), Some(1));
    assert!(!root.exists());
}

#[test]
fn test_setup_rejects_negative_threshold() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("tss_data");

    let output = tss_party(&root, &["setup", "--threshold=-1", "--party=3"]);

    assert_eq!(output.status.code(), Some(1));
    assert!(!root.exists());
}

#[test]
fn test_setup_rejects_threshold_zero() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("tss_data");

    let output = tss_party(&root, &["setup", "--threshold=0", "--party=2"]);

    assert_eq!(output.status.code(), Some(1));
    assert!(!root.exists());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("at least 1"), "stderr: {stderr}");
}

#[test]
fn test_setup_help_states_minimum_threshold() {
    let dir = TempDir::new().unwrap();
    let output = tss_party(dir.path(), &["setup", "--help"]);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("at least 1"), "stdout: {stdout}");
}

#[test]
fn test_sign_without_fixtures_exits_one() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("tss_data");

    let output = tss_party(&root, &["sign", "--threshold=1", "--party=3"]);

    assert_eq!(output.status.code(), Some(1));
    assert!(!root.exists());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("t1_n3"), "stderr: {stderr}");
}

#[test]
fn test_verify_valid_and_invalid_signature() {
    let dir = TempDir::new().unwrap();
    let key = SigningKey::random(&mut OsRng);
    let digest: [u8; 32] = Sha256::digest(b"hello").into();
    let signature: Signature = key.sign_prehash(&digest).unwrap();
    let bytes = signature.to_bytes();
    let pk = hex::encode(key.verifying_key().to_encoded_point(false).as_bytes());
    let r = format!("0x{}", hex::encode(&bytes[..32]));
    let s = hex::encode(&bytes[32..]);

    let args = |msg: &'static str| {
        vec![
            "verify".to_string(),
            format!("--pk={pk}"),
            format!("--sign-r={r}"),
            format!("--sign-s={s}"),
            format!("--msg={msg}"),
        ]
    };

    let valid: Vec<String> = args("hello");
    let output = tss_party(dir.path(), &valid.iter().map(String::as_str).collect::<Vec<_>>());
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("Signature Valid!"));

    let invalid: Vec<String> = args("goodbye");
    let output = tss_party(dir.path(), &invalid.iter().map(String::as_str).collect::<Vec<_>>());
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn test_verify_rejects_malformed_key() {
    let dir = TempDir::new().unwrap();
    let output = tss_party(
        dir.path(),
        &["verify", "--pk=zz", "--sign-r=01", "--sign-s=01", "--msg=hello"],
    );
    assert_eq!(output.status.code(), Some(1));
}
