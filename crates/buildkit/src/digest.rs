use anyhow::{Context, Result};
use sha2::{Digest as _, Sha256};

/// Represents a content-addressable digest (e.g., "sha256:abc123...")
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest {
    algorithm: String,
    hash: String,
}

impl Digest {
    /// Parse a digest string in format "algorithm:hash"
    pub fn parse(digest: &str) -> Result<Self> {
        let (algorithm, hash) = digest.split_once(':').with_context(|| {
            format!(
                "Invalid digest format (expected 'algorithm:hash'): {}",
                digest
            )
        })?;

        if algorithm.is_empty() || hash.is_empty() {
            anyhow::bail!("Invalid digest format (empty component): {}", digest);
        }

        Ok(Self {
            algorithm: algorithm.to_string(),
            hash: hash.to_string(),
        })
    }

    /// sha256 digest of an encoded op
    pub fn sha256(bytes: &[u8]) -> Self {
        Self {
            algorithm: "sha256".to_string(),
            hash: hex::encode(Sha256::digest(bytes)),
        }
    }

    /// Get the algorithm part (e.g., "sha256")
    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    /// Get the hash part
    pub fn hash(&self) -> &str {
        &self.hash
    }
}

impl std::fmt::Display for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_digest() {
        let digest = Digest::parse("sha256:abc123").unwrap();
        assert_eq!(digest.algorithm(), "sha256");
        assert_eq!(digest.hash(), "abc123");
        assert_eq!(digest.to_string(), "sha256:abc123");
    }

    #[test]
    fn test_parse_invalid_digest() {
        assert!(Digest::parse("invalid").is_err());
        assert!(Digest::parse("").is_err());
        assert!(Digest::parse("sha256:").is_err());
    }

    #[test]
    fn test_sha256_is_stable() {
        let a = Digest::sha256(b"op");
        let b = Digest::sha256(b"op");
        assert_eq!(a, b);
        assert_eq!(a.algorithm(), "sha256");
        assert_eq!(a.hash().len(), 64);
        assert_eq!(Digest::parse(&a.to_string()).unwrap(), a);
    }
}
