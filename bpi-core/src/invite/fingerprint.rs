//! SSH-style legacy MD5 fingerprints of RSA public keys.

use crate::error::{Result, StackError};
use md5::{Digest, Md5};
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs8::DecodePublicKey;
use rsa::traits::PublicKeyParts;
use rsa::RsaPublicKey;

/// Parse a PEM public key (SPKI `PUBLIC KEY` or PKCS#1 `RSA PUBLIC KEY`).
pub fn parse_public_key(pem: &str) -> Result<RsaPublicKey> {
    let pem = pem.trim();
    RsaPublicKey::from_public_key_pem(pem)
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
        .map_err(|e| StackError::InvalidPublicKey { reason: e.to_string() })
}

/// MD5 over the key's `ssh-rsa` wire encoding, as colon-separated hex.
pub fn fingerprint(key: &RsaPublicKey) -> String {
    let mut blob = Vec::new();
    put_string(&mut blob, b"ssh-rsa");
    put_mpint(&mut blob, &key.e().to_bytes_be());
    put_mpint(&mut blob, &key.n().to_bytes_be());

    Md5::digest(&blob).iter().map(|b| format!("{:02x}", b)).collect::<Vec<_>>().join(":")
}

/// Fingerprint of a PEM public key.
pub fn fingerprint_pem(pem: &str) -> Result<String> {
    parse_public_key(pem).map(|key| fingerprint(&key))
}

fn put_string(buf: &mut Vec<u8>, data: &[u8]) {
    buf.extend_from_slice(&(data.len() as u32).to_be_bytes());
    buf.extend_from_slice(data);
}

fn put_mpint(buf: &mut Vec<u8>, magnitude: &[u8]) {
    let first = magnitude.iter().position(|b| *b != 0).unwrap_or(magnitude.len());
    let trimmed = &magnitude[first..];
    if trimmed.first().is_some_and(|b| b & 0x80 != 0) {
        // Positive values with the high bit set need a leading zero byte
        buf.extend_from_slice(&((trimmed.len() + 1) as u32).to_be_bytes());
        buf.push(0);
        buf.extend_from_slice(trimmed);
    } else {
        put_string(buf, trimmed);
    }
}
