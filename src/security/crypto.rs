// Cryptographic utilities

use crate::error::{InstallerError, Result};
use base64::Engine;
use ring::rand::{SecureRandom, SystemRandom};
use sha2::{Digest, Sha256};

pub const APP_KEY_PREFIX: &str = "base64:";
const APP_KEY_BYTES: usize = 32;
const PREFIX_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const PREFIX_LEN: usize = 3;

fn fill_random(buf: &mut [u8]) -> Result<()> {
    SystemRandom::new()
        .fill(buf)
        .map_err(|_| InstallerError::Random)
}

/// Fresh application key: 32 random bytes, base64-encoded, tagged with `base64:`.
pub fn generate_app_key() -> Result<String> {
    let mut key = [0u8; APP_KEY_BYTES];
    fill_random(&mut key)?;
    Ok(format!(
        "{}{}",
        APP_KEY_PREFIX,
        base64::engine::general_purpose::STANDARD.encode(key)
    ))
}

/// Random table prefix: three lowercase alphanumerics followed by `_`.
pub fn generate_table_prefix() -> Result<String> {
    // Rejection sampling keeps the alphabet uniformly distributed.
    let limit = (256 / PREFIX_ALPHABET.len() * PREFIX_ALPHABET.len()) as u8;
    let mut out = String::with_capacity(PREFIX_LEN + 1);
    let mut byte = [0u8; 1];
    while out.len() < PREFIX_LEN {
        fill_random(&mut byte)?;
        if byte[0] >= limit {
            continue;
        }
        out.push(PREFIX_ALPHABET[(byte[0] as usize) % PREFIX_ALPHABET.len()] as char);
    }
    out.push('_');
    Ok(out)
}

/// SHA-256 hex digest (lowercase).
pub fn sha256_hex(input: &[u8]) -> String {
    let digest = Sha256::digest(input);
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Short fingerprint of a secret for logs (hash prefix only; never the raw secret).
pub fn secret_fingerprint(input: &str) -> String {
    sha256_hex(input.as_bytes())[..12].to_string()
}
