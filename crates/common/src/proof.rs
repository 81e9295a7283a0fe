use bytes::Bytes;
use serde::Serialize;
use std::time::Duration;

use crate::ProgramId;

/// Measurements reported alongside a proof
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProofMetrics {
    pub elapsed: Duration,
    pub proof_size: usize,
    pub compressed_proof_size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_cycles: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peak_memory: Option<u64>,
}

impl ProofMetrics {
    /// Human-readable progress lines, in log order
    pub fn log_lines(&self) -> Vec<String> {
        let mut lines = vec![format!(
            "Proof generated in {:.2}s",
            self.elapsed.as_secs_f64()
        )];
        if let Some(cycles) = self.num_cycles {
            lines.push(format!("RISC-V cycles: {}", cycles));
        }
        lines.push(format!("Proof size: {:.2} KB", kib(self.proof_size)));
        lines.push(format!(
            "Proof size (compressed): {:.2} KB",
            kib(self.compressed_proof_size)
        ));
        if let Some(peak) = self.peak_memory {
            lines.push(format!("Peak memory: {:.0} MB", peak as f64 / 1024.0 / 1024.0));
        }
        lines
    }
}

fn kib(len: usize) -> f64 {
    len as f64 / 1024.0
}

/// The most recent proof for a program.
///
/// Immutable once stored; verification reads it through cheap `Bytes` clones.
#[derive(Debug, Clone)]
pub struct ProofArtifact {
    pub program: ProgramId,
    /// Increments with every new proof for the same program
    pub generation: u64,
    pub proof: Bytes,
    pub program_io: Bytes,
    pub metrics: ProofMetrics,
}

/// Outcome of verifying one proof generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VerificationResult {
    pub generation: u64,
    pub valid: bool,
    pub elapsed: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_lines_skip_missing_metrics() {
        let metrics = ProofMetrics {
            elapsed: Duration::from_millis(1500),
            proof_size: 2048,
            compressed_proof_size: 1024,
            num_cycles: None,
            peak_memory: None,
        };
        assert_eq!(
            metrics.log_lines(),
            vec![
                "Proof generated in 1.50s".to_string(),
                "Proof size: 2.00 KB".to_string(),
                "Proof size (compressed): 1.00 KB".to_string(),
            ]
        );
    }

    #[test]
    fn test_log_lines_include_optional_metrics() {
        let metrics = ProofMetrics {
            elapsed: Duration::from_secs(2),
            proof_size: 512,
            compressed_proof_size: 256,
            num_cycles: Some(123_456),
            peak_memory: Some(64 * 1024 * 1024),
        };
        let lines = metrics.log_lines();
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[1], "RISC-V cycles: 123456");
        assert_eq!(lines[4], "Peak memory: 64 MB");
    }
}
