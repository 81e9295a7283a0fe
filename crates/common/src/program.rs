//! Program Registry: the fixed set of guest programs and their artifacts

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Guest programs the prover knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgramId {
    /// SHA-256 over a caller-supplied message
    Sha2,
    /// Keccak-256 applied repeatedly to a 32-byte seed
    Keccak,
}

/// Every registered program, in display order
pub const PROGRAMS: [ProgramId; 2] = [ProgramId::Sha2, ProgramId::Keccak];

impl ProgramId {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgramId::Sha2 => "sha2",
            ProgramId::Keccak => "keccak",
        }
    }

    /// Artifact file names for this program
    pub fn files(&self) -> ProgramFiles {
        match self {
            ProgramId::Sha2 => ProgramFiles {
                prover: "sha2_prover.bin",
                verifier: "sha2_verifier.bin",
                elf: "sha2.elf",
            },
            ProgramId::Keccak => ProgramFiles {
                prover: "keccak_prover.bin",
                verifier: "keccak_verifier.bin",
                elf: "keccak.elf",
            },
        }
    }
}

impl fmt::Display for ProgramId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProgramId {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sha2" => Ok(ProgramId::Sha2),
            "keccak" => Ok(ProgramId::Keccak),
            other => Err(crate::Error::UnknownProgram(other.to_string())),
        }
    }
}

/// The three artifacts a program needs before it can be proved or verified
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    ProverPreprocessing,
    VerifierPreprocessing,
    GuestElf,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 3] = [
        ArtifactKind::ProverPreprocessing,
        ArtifactKind::VerifierPreprocessing,
        ArtifactKind::GuestElf,
    ];
}

/// Fetch locations of a program's artifacts, relative to the artifact root
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramFiles {
    pub prover: &'static str,
    pub verifier: &'static str,
    pub elf: &'static str,
}

impl ProgramFiles {
    pub fn name_of(&self, kind: ArtifactKind) -> &'static str {
        match kind {
            ArtifactKind::ProverPreprocessing => self.prover,
            ArtifactKind::VerifierPreprocessing => self.verifier,
            ArtifactKind::GuestElf => self.elf,
        }
    }
}

/// Fetched artifact bytes for one program.
///
/// Not `Clone`: the buffers are multi-megabyte and are moved into the worker
/// inside a `load-program` request. Once sent, the sender no longer has them.
#[derive(Debug, Serialize, Deserialize)]
pub struct ProgramArtifacts {
    pub prover_preprocessing: Vec<u8>,
    pub verifier_preprocessing: Vec<u8>,
    pub elf_bytes: Vec<u8>,
}

impl ProgramArtifacts {
    pub fn total_len(&self) -> usize {
        self.prover_preprocessing.len() + self.verifier_preprocessing.len() + self.elf_bytes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_program_round_trips_through_str() {
        for program in PROGRAMS {
            assert_eq!(program.as_str().parse::<ProgramId>().unwrap(), program);
        }
        assert!("secp256k1".parse::<ProgramId>().is_err());
    }

    #[test]
    fn test_program_files() {
        let files = ProgramId::Keccak.files();
        assert_eq!(files.name_of(ArtifactKind::ProverPreprocessing), "keccak_prover.bin");
        assert_eq!(files.name_of(ArtifactKind::VerifierPreprocessing), "keccak_verifier.bin");
        assert_eq!(files.name_of(ArtifactKind::GuestElf), "keccak.elf");
    }

    #[test]
    fn test_program_serializes_lowercase() {
        let json = serde_json::to_string(&ProgramId::Sha2).unwrap();
        assert_eq!(json, "\"sha2\"");
    }
}
