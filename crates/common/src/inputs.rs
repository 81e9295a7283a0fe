//! Prove inputs and the bounds enforced before anything reaches the worker

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{Error, ProgramId, Result};

/// Largest message the sha2 guest accepts
pub const SHA2_MAX_BYTES: usize = 2048;

/// Inclusive bounds on keccak chain length
pub const KECCAK_MIN_ITERS: u32 = 1;
pub const KECCAK_MAX_ITERS: u32 = 100;

/// Program-specific input to a prove request.
///
/// Small and copied by value into the request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "program", rename_all = "snake_case")]
pub enum ProveInput {
    Sha2 {
        input: Vec<u8>,
    },
    Keccak {
        /// SHA-256 digest of the caller's message, used as the chain seed
        input: [u8; 32],
        num_iters: u32,
    },
}

impl ProveInput {
    /// Build a sha2 input, rejecting messages over [`SHA2_MAX_BYTES`]
    pub fn sha2(message: &[u8]) -> Result<Self> {
        let input = ProveInput::Sha2 {
            input: message.to_vec(),
        };
        input.validate()?;
        Ok(input)
    }

    /// Build a keccak chain input from a text message.
    ///
    /// The iteration count is checked before the message is digested.
    pub fn keccak(message: &str, num_iters: u32) -> Result<Self> {
        check_iters(num_iters)?;
        let digest: [u8; 32] = Sha256::digest(message.as_bytes()).into();
        Ok(ProveInput::Keccak {
            input: digest,
            num_iters,
        })
    }

    pub fn program(&self) -> ProgramId {
        match self {
            ProveInput::Sha2 { .. } => ProgramId::Sha2,
            ProveInput::Keccak { .. } => ProgramId::Keccak,
        }
    }

    /// Check the input against its program's bounds
    pub fn validate(&self) -> Result<()> {
        match self {
            ProveInput::Sha2 { input } => {
                if input.len() > SHA2_MAX_BYTES {
                    return Err(Error::InputTooLarge {
                        len: input.len(),
                        max: SHA2_MAX_BYTES,
                    });
                }
                Ok(())
            }
            ProveInput::Keccak { num_iters, .. } => check_iters(*num_iters),
        }
    }

    /// One-line description for the progress log
    pub fn describe(&self) -> String {
        match self {
            ProveInput::Sha2 { input } => format!("Proving SHA-256 [{} bytes]", input.len()),
            ProveInput::Keccak { input, num_iters } => format!(
                "Proving Keccak chain(seed {}, {} iters)",
                hex::encode(&input[..4]),
                num_iters
            ),
        }
    }
}

fn check_iters(num_iters: u32) -> Result<()> {
    if !(KECCAK_MIN_ITERS..=KECCAK_MAX_ITERS).contains(&num_iters) {
        return Err(Error::IterationsOutOfRange {
            value: num_iters,
            min: KECCAK_MIN_ITERS,
            max: KECCAK_MAX_ITERS,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha2_accepts_exactly_max() {
        let message = vec![b'a'; SHA2_MAX_BYTES];
        let input = ProveInput::sha2(&message).unwrap();
        assert_eq!(input.program(), ProgramId::Sha2);
    }

    #[test]
    fn test_sha2_rejects_max_plus_one() {
        let message = vec![b'a'; SHA2_MAX_BYTES + 1];
        match ProveInput::sha2(&message) {
            Err(Error::InputTooLarge { len, max }) => {
                assert_eq!(len, SHA2_MAX_BYTES + 1);
                assert_eq!(max, SHA2_MAX_BYTES);
            }
            other => panic!("expected InputTooLarge, got {:?}", other),
        }
    }

    #[test]
    fn test_keccak_iteration_bounds() {
        assert!(ProveInput::keccak("hello", 0).is_err());
        assert!(ProveInput::keccak("hello", 1).is_ok());
        assert!(ProveInput::keccak("hello", 100).is_ok());
        assert!(matches!(
            ProveInput::keccak("hello", 101),
            Err(Error::IterationsOutOfRange { value: 101, min: 1, max: 100 })
        ));
    }

    #[test]
    fn test_keccak_seed_is_sha256_of_message() {
        let input = ProveInput::keccak("abc", 3).unwrap();
        let ProveInput::Keccak { input: seed, .. } = input else {
            panic!("expected keccak input");
        };
        assert_eq!(
            hex::encode(seed),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_validate_catches_hand_built_input() {
        let input = ProveInput::Keccak {
            input: [0u8; 32],
            num_iters: 500,
        };
        assert!(input.validate().is_err());
    }
}
