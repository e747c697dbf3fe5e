//! Hashcash-style proof of work over object payloads.
//!
//! Every gossiped object carries an 8-byte nonce that, hashed together
//! with the payload, must produce a value under a size-dependent target.
//! The only way to find such a nonce is brute force, which bounds how
//! many objects a participant can produce per hour. The difficulty grows
//! with the payload size.

use num_bigint::BigUint;
use sha2::{Digest, Sha512};
use thiserror::Error;

use crate::wire::message::ObjectHash;

/// Constant added to the payload length before computing the target.
/// Keeps the work for tiny payloads non-trivial.
pub const PAYLOAD_LENGTH_EXTRA_BYTES: u64 = 14_000;

/// Average number of hash trials demanded per payload byte.
pub const NONCE_TRIALS_PER_BYTE: u64 = 320;

/// Length of the encoded nonce at the front of object payloads.
pub const NONCE_LENGTH: usize = 8;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PowError {
    #[error("cannot compute proof of work over an empty payload")]
    EmptyPayload,
    #[error("proof of work trial value is over the target")]
    TrialOverTarget,
}

/// Two rounds of SHA-512.
pub fn double_sha512(data: &[u8]) -> [u8; 64] {
    let first = Sha512::digest(data);
    let second = Sha512::digest(&first[..]);
    let mut out = [0u8; 64];
    out.copy_from_slice(&second);
    out
}

/// The target for an object payload of `payload_length` bytes
/// (nonce included):
///
/// ```text
/// target = 2^64 / ((payload_length + 14000) * 320)
/// ```
///
/// The dividend does not fit a native 64-bit integer, so the division is
/// done on a big integer.
fn target(payload_length: usize) -> BigUint {
    let divisor = (payload_length as u64 + PAYLOAD_LENGTH_EXTRA_BYTES) * NONCE_TRIALS_PER_BYTE;
    (BigUint::from(1u8) << 64usize) / divisor
}

fn initial_hash(body: &[u8]) -> [u8; 64] {
    let digest = Sha512::digest(body);
    let mut out = [0u8; 64];
    out.copy_from_slice(&digest);
    out
}

/// The digest a trial value and the object hash are both drawn from:
/// `SHA512(SHA512(nonce || SHA512(body)))`.
fn pow_digest(nonce: &[u8; NONCE_LENGTH], initial: &[u8; 64]) -> [u8; 64] {
    let mut seed = [0u8; NONCE_LENGTH + 64];
    seed[..NONCE_LENGTH].copy_from_slice(nonce);
    seed[NONCE_LENGTH..].copy_from_slice(initial);
    double_sha512(&seed)
}

fn trial(nonce: u64, initial: &[u8; 64]) -> BigUint {
    let digest = pow_digest(&nonce.to_be_bytes(), initial);
    BigUint::from_bytes_be(&digest[..NONCE_LENGTH])
}

/// Brute-forces a nonce for `body` (the object payload after the nonce
/// field), starting the search at 1.
pub fn compute(body: &[u8]) -> Result<[u8; NONCE_LENGTH], PowError> {
    compute_from(body, 1)
}

/// Brute-forces a nonce starting at `initial_nonce`. The start value is
/// settable so tests can land on known vectors in a few iterations.
///
/// Returns the first nonce whose trial value is at or under the target,
/// encoded as 8 big-endian bytes.
pub fn compute_from(body: &[u8], initial_nonce: u64) -> Result<[u8; NONCE_LENGTH], PowError> {
    if body.is_empty() {
        return Err(PowError::EmptyPayload);
    }
    let target = target(body.len() + NONCE_LENGTH);
    let initial = initial_hash(body);
    let mut nonce = initial_nonce;
    loop {
        if trial(nonce, &initial) <= target {
            return Ok(nonce.to_be_bytes());
        }
        nonce = nonce.wrapping_add(1);
    }
}

/// Checks the proof of work on a received object. `body` is the payload
/// after the 8-byte nonce; the construction mirrors [`compute_from`].
pub fn verify(body: &[u8], nonce: &[u8; NONCE_LENGTH]) -> Result<(), PowError> {
    let target = target(body.len() + NONCE_LENGTH);
    let digest = pow_digest(nonce, &initial_hash(body));
    if BigUint::from_bytes_be(&digest[..NONCE_LENGTH]) <= target {
        Ok(())
    } else {
        Err(PowError::TrialOverTarget)
    }
}

/// The 32-byte hash advertised in `inv` vectors: the first half of the
/// same double SHA-512 the trial value comes from.
pub fn object_hash(nonce: &[u8; NONCE_LENGTH], body: &[u8]) -> ObjectHash {
    let digest = pow_digest(nonce, &initial_hash(body));
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&digest[..32]);
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Body of the canonical pcap `msg` object: everything after the
    /// 8-byte nonce of the 45-byte payload.
    fn pcap_msg_body() -> Vec<u8> {
        let mut body = vec![0x51, 0x7A, 0x4C, 0xC7, 0x01];
        body.extend_from_slice(&[
            0x1F, 0x54, 0x9C, 0x27, 0x5E, 0x23, 0x96, 0x2C, 0x61, 0x09, 0xC0, 0xFB, 0xDB, 0x45,
            0x4B, 0x7D, 0x63, 0xE9, 0x77, 0xA0, 0x3B, 0xAA, 0x8A, 0x67, 0x34, 0x8A, 0xA4, 0x9C,
            0x09, 0xA1, 0xC7, 0xCB,
        ]);
        body
    }

    const PCAP_NONCE: [u8; 8] = [0x00, 0x00, 0x00, 0x00, 0x00, 0x14, 0x6B, 0x2A];

    #[test]
    fn double_sha512_spec_vector() {
        // Hash example from the protocol specification.
        let digest = double_sha512(b"hello");
        assert_eq!(
            hex::encode(digest),
            "0592a10584ffabf96539f3d780d776828c67da1ab5b169e9e8aed838aaecc9ed\
             36d49ff1423c55f019e050c66c6324f53588be88894fef4dcffdb74b98e2b200"
        );
    }

    #[test]
    fn verify_accepts_pcap_vector() {
        verify(&pcap_msg_body(), &PCAP_NONCE).unwrap();
    }

    #[test]
    fn verify_rejects_any_mutated_byte() {
        let body = pcap_msg_body();
        for i in 0..body.len() {
            let mut mutated = body.clone();
            mutated[i] ^= 0x01;
            assert_eq!(
                verify(&mutated, &PCAP_NONCE),
                Err(PowError::TrialOverTarget),
                "byte {i}"
            );
        }
    }

    #[test]
    fn verify_rejects_wrong_nonce() {
        let nonce = [0x00, 0x00, 0x00, 0x00, 0x00, 0x14, 0x6B, 0x29];
        assert_eq!(verify(&pcap_msg_body(), &nonce), Err(PowError::TrialOverTarget));
    }

    #[test]
    fn compute_is_deterministic_from_a_fixed_start() {
        // The target nonce is a handful of increments past this start.
        let nonce = compute_from(&pcap_msg_body(), 0x0014_6B24).unwrap();
        assert_eq!(nonce, PCAP_NONCE);
    }

    #[test]
    fn compute_rejects_empty_payload() {
        assert_eq!(compute(&[]), Err(PowError::EmptyPayload));
    }

    #[test]
    fn object_hash_changes_with_payload() {
        let a = object_hash(&PCAP_NONCE, &pcap_msg_body());
        let mut body = pcap_msg_body();
        body[0] ^= 0x01;
        let b = object_hash(&PCAP_NONCE, &body);
        assert_ne!(a, b);
        assert_eq!(a.len(), 32);
    }
}
