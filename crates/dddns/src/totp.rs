//! Time-based one-time codes used to authenticate peer traffic.
//!
//! Standard RFC 6238 parameters: HMAC-SHA-1 over a base32 shared secret,
//! 30-second step, 6-digit codes. Verification tolerates a configurable
//! step skew (default one step either side) and rejects anything outside
//! the window.
//!
//! Secrets travel as base32 strings on the wire. The issuing side controls
//! the length; verification accepts whatever length the peer issued.

use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha1::Sha1;

/// Step width in seconds shared by code generation and verification.
pub const STEP_SECONDS: i64 = 30;

/// Number of decimal digits in a code.
pub const CODE_DIGITS: usize = 6;

/// Steps of clock skew tolerated either side of the verification instant.
pub const DEFAULT_SKEW_STEPS: i64 = 1;

/// RFC 4648 base32 alphabet used for generated secrets.
const SECRET_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

/// Generates a random shared secret of `length` base32 symbols drawn from
/// the OS cryptographic RNG.
pub fn random_secret(length: usize) -> String {
    let mut raw = vec![0u8; length];
    OsRng.fill_bytes(&mut raw);
    raw.iter()
        .map(|b| SECRET_ALPHABET[(b % 32) as usize] as char)
        .collect()
}

/// Computes the code for `secret` at the step containing `unix` seconds.
///
/// Returns `None` when the secret is not valid unpadded base32.
pub fn code_at(secret: &str, unix: i64) -> Option<String> {
    let key = decode_secret(secret)?;
    let step = (unix.max(0) / STEP_SECONDS) as u64;
    Some(hotp(&key, step))
}

/// Checks `code` against `secret` at `unix` seconds, accepting up to
/// [`DEFAULT_SKEW_STEPS`] steps of skew either side.
///
/// Undecodable secrets and malformed codes verify as `false`.
pub fn verify_at(secret: &str, code: &str, unix: i64) -> bool {
    if code.len() != CODE_DIGITS || !code.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    let key = match decode_secret(secret) {
        Some(key) => key,
        None => return false,
    };
    let current = (unix.max(0) / STEP_SECONDS) as u64;
    let lo = current.saturating_sub(DEFAULT_SKEW_STEPS as u64);
    let hi = current + DEFAULT_SKEW_STEPS as u64;
    (lo..=hi).any(|step| hotp(&key, step) == code)
}

/// Decodes an unpadded RFC 4648 base32 secret into key bytes.
fn decode_secret(secret: &str) -> Option<Vec<u8>> {
    base32::decode(
        base32::Alphabet::Rfc4648 { padding: false },
        secret.trim(),
    )
}

/// One HOTP evaluation: HMAC-SHA-1 with dynamic truncation (RFC 4226 §5.3).
fn hotp(key: &[u8], counter: u64) -> String {
    let mut mac =
        Hmac::<Sha1>::new_from_slice(key).expect("hmac accepts keys of any length");
    mac.update(&counter.to_be_bytes());
    let digest = mac.finalize().into_bytes();

    let offset = (digest[digest.len() - 1] & 0x0f) as usize;
    let binary = ((u32::from(digest[offset]) & 0x7f) << 24)
        | (u32::from(digest[offset + 1]) << 16)
        | (u32::from(digest[offset + 2]) << 8)
        | u32::from(digest[offset + 3]);
    format!("{:06}", binary % 1_000_000)
}
