//! Hash commitments to a move.
//!
//! The reveal key is a random nonce followed by the committed choice byte,
//! and the commitment is a blake3 hash of that key. Publishing the commitment
//! hides the choice; publishing the key lets anyone check it against the
//! commitment and read the choice. Opening to a different choice than the one
//! sealed would require a blake3 collision.

use thiserror::Error;

use crate::outcome::Choice;

const CONTEXT: &str = "moq-rpsls 2024 move commitment v1";
const NONCE_LENGTH: usize = 32;

pub const KEY_LENGTH: usize = NONCE_LENGTH + 1;
pub const COMMITMENT_LENGTH: usize = blake3::OUT_LEN;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommitmentError {
    #[error("reveal key has the wrong length ({0} bytes)")]
    KeyLength(usize),
    #[error("commitment has the wrong length ({0} bytes)")]
    CommitmentLength(usize),
    #[error("reveal key does not match the commitment")]
    Mismatch,
    #[error("unknown move byte {0}")]
    UnknownChoice(u8),
}

/// A commitment together with the key that opens it.
#[derive(Clone, Debug)]
pub struct Sealed {
    pub commitment: Vec<u8>,
    pub key: Vec<u8>,
}

/// Commit to `choice` with a fresh random nonce.
pub fn seal(choice: Choice) -> Sealed {
    seal_with_nonce(choice, rand::random())
}

pub fn seal_with_nonce(choice: Choice, nonce: [u8; NONCE_LENGTH]) -> Sealed {
    let mut key = Vec::with_capacity(KEY_LENGTH);
    key.extend_from_slice(&nonce);
    key.push(choice.to_byte());

    Sealed {
        commitment: digest(&key).as_bytes().to_vec(),
        key,
    }
}

/// Check `key` against `commitment` and return the committed choice.
pub fn open(commitment: &[u8], key: &[u8]) -> Result<Choice, CommitmentError> {
    if key.len() != KEY_LENGTH {
        return Err(CommitmentError::KeyLength(key.len()));
    }
    let commitment: [u8; COMMITMENT_LENGTH] = commitment
        .try_into()
        .map_err(|_| CommitmentError::CommitmentLength(commitment.len()))?;

    // blake3::Hash equality is constant time
    if digest(key) != blake3::Hash::from(commitment) {
        return Err(CommitmentError::Mismatch);
    }

    let byte = key[NONCE_LENGTH];
    Choice::from_byte(byte).ok_or(CommitmentError::UnknownChoice(byte))
}

fn digest(key: &[u8]) -> blake3::Hash {
    let mut hasher = blake3::Hasher::new_derive_key(CONTEXT);
    hasher.update(key);
    hasher.finalize()
}
