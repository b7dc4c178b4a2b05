// token.rs — Pairing tokens and certificate fingerprints.
//
// A pairing token is 32 random bytes, hex-encoded, shown to the operator
// exactly once. A fingerprint is the SHA-256 of the DER certificate the
// agent presents, also hex-encoded. Both live as TEXT in the store and in
// config files.

use rand::RngCore;
use sha2::{Digest, Sha256};

/// Generate a fresh 32-byte pairing token, hex-encoded.
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex_encode(&bytes)
}

/// SHA-256 fingerprint of a DER-encoded certificate, hex-encoded.
pub fn cert_fingerprint(der: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(der);
    hex_encode(&hasher.finalize())
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        use std::fmt::Write;
        let _ = write!(s, "{:02x}", b);
    }
    s
}
