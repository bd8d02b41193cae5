//! Result computation.
//!
//! The content function applied to a task is pluggable. The defaults are
//! placeholders: no real workload runs here, only a digest is produced so
//! the submission path can be exercised end to end.

use crate::chain::ResultHash;
use crate::store::ClaimedTask;
use sha2::{Digest, Sha256};
use sha3::Keccak256;

/// Computes the result value submitted for a task.
pub trait ResultComputer: Send + Sync {
    /// Produce the result for a claimed task.
    fn compute(&self, task: &ClaimedTask) -> ResultHash;

    /// Name used in logs.
    fn name(&self) -> &'static str;
}

/// Hash function behind the digest computers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DigestAlgorithm {
    /// Ethereum keccak-256, as `keccak256(bytes)` in Solidity.
    #[default]
    Keccak256,
    /// SHA-256.
    Sha256,
}

impl DigestAlgorithm {
    /// Hash `data` into a result word.
    pub fn digest(self, data: &[u8]) -> ResultHash {
        match self {
            DigestAlgorithm::Keccak256 => Keccak256::digest(data).into(),
            DigestAlgorithm::Sha256 => Sha256::digest(data).into(),
        }
    }
}

/// Digest of a fixed seed, ignoring the task entirely.
///
/// The default is keccak-256 of `"1"`, the raw-data hash a requester
/// commits when it asks for compute over `"1"`.
#[derive(Debug, Clone)]
pub struct FixedDigestComputer {
    seed: Vec<u8>,
    algorithm: DigestAlgorithm,
}

impl FixedDigestComputer {
    /// Create a computer hashing the given seed with keccak-256.
    pub fn new(seed: impl Into<Vec<u8>>) -> Self {
        Self {
            seed: seed.into(),
            algorithm: DigestAlgorithm::default(),
        }
    }

    /// Use another hash function.
    pub fn with_algorithm(mut self, algorithm: DigestAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }
}

impl Default for FixedDigestComputer {
    fn default() -> Self {
        Self::new(b"1".to_vec())
    }
}

impl ResultComputer for FixedDigestComputer {
    fn compute(&self, _task: &ClaimedTask) -> ResultHash {
        self.algorithm.digest(&self.seed)
    }

    fn name(&self) -> &'static str {
        match self.algorithm {
            DigestAlgorithm::Keccak256 => "fixed-digest",
            DigestAlgorithm::Sha256 => "fixed-sha256",
        }
    }
}

/// keccak-256 over `abi.encode(uint256 taskId, bytes32 inputData)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct InputDigestComputer;

impl ResultComputer for InputDigestComputer {
    fn compute(&self, task: &ClaimedTask) -> ResultHash {
        let mut encoded = [0u8; 64];
        encoded[24..32].copy_from_slice(&task.id.to_be_bytes());
        encoded[32..].copy_from_slice(&task.input_data);
        Keccak256::digest(encoded).into()
    }

    fn name(&self) -> &'static str {
        "input-digest"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claimed(id: u64, input: u8) -> ClaimedTask {
        ClaimedTask {
            id,
            input_data: [input; 32],
            attempt: 1,
        }
    }

    #[test]
    fn test_fixed_digest_ignores_task() {
        let computer = FixedDigestComputer::default();
        assert_eq!(
            computer.compute(&claimed(1, 0xaa)),
            computer.compute(&claimed(2, 0xbb))
        );

        assert_eq!(
            hex::encode(computer.compute(&claimed(1, 0))),
            "c89efdaa54c0f20c7adf612882df0950f5a951637e0307cdcb4c672f298b8bc6"
        );
    }

    #[test]
    fn test_fixed_sha256_digest() {
        let computer = FixedDigestComputer::default().with_algorithm(DigestAlgorithm::Sha256);
        assert_eq!(
            hex::encode(computer.compute(&claimed(1, 0))),
            "6b86b273ff34fce19d6b804eff5a3f5747ada4eaa22f1d49c01e52ddb7875b4b"
        );
        assert_eq!(computer.name(), "fixed-sha256");
    }

    #[test]
    fn test_fixed_digest_seed() {
        let a = FixedDigestComputer::new(b"a".to_vec());
        let b = FixedDigestComputer::new(b"b".to_vec());
        assert_ne!(a.compute(&claimed(1, 0)), b.compute(&claimed(1, 0)));
    }

    #[test]
    fn test_input_digest_depends_on_task() {
        let computer = InputDigestComputer;
        assert_ne!(
            computer.compute(&claimed(1, 0xaa)),
            computer.compute(&claimed(2, 0xaa))
        );
        assert_ne!(
            computer.compute(&claimed(1, 0xaa)),
            computer.compute(&claimed(1, 0xbb))
        );
        assert_eq!(
            computer.compute(&claimed(1, 0xaa)),
            computer.compute(&claimed(1, 0xaa))
        );
    }

    #[test]
    fn test_input_digest_word_layout() {
        let mut encoded = [0u8; 64];
        encoded[31] = 5;
        encoded[32..].copy_from_slice(&[0x0c; 32]);

        let expected = DigestAlgorithm::Keccak256.digest(&encoded);
        assert_eq!(InputDigestComputer.compute(&claimed(5, 0x0c)), expected);
    }
}
