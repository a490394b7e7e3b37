pub mod scheme;

pub use scheme::{Commitment, FairnessSource};

use crate::{CoinflipError, Result, Side};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};

pub const SECRET_LEN: usize = 32;

pub(crate) fn digest(secret: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(secret);
    hasher.finalize().to_vec()
}

/// Fairness source backed by the operating system CSPRNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsFairness;

impl FairnessSource for OsFairness {
    fn commit(&self) -> Result<Commitment> {
        let secret = generate_secret()?;
        Ok(Commitment::from_secret(secret))
    }
}

/// Rnd secret for commitment
pub fn generate_secret() -> Result<Vec<u8>> {
    let mut secret = vec![0u8; SECRET_LEN];
    OsRng
        .try_fill_bytes(&mut secret)
        .map_err(|e| CoinflipError::entropy(e.to_string()))?;
    Ok(secret)
}

/// Outcome from a revealed secret: parity of the first byte, even is heads.
pub fn reveal_side(secret: &[u8]) -> Option<Side> {
    let first = secret.first()?;
    if first % 2 == 0 {
        Some(Side::Heads)
    } else {
        Some(Side::Tails)
    }
}

/// Third-party check of a finished round, from its hex-encoded seed and hash.
/// Returns the outcome when the seed matches the published hash.
pub fn verify_commitment(seed_hex: &str, hash_hex: &str) -> Result<Option<Side>> {
    let secret = hex::decode(seed_hex.trim())
        .map_err(|e| CoinflipError::InvalidSeed(format!("seed is not hex: {}", e)))?;
    let hash = hex::decode(hash_hex.trim())
        .map_err(|e| CoinflipError::InvalidSeed(format!("hash is not hex: {}", e)))?;

    if digest(&secret) != hash {
        return Ok(None);
    }
    Ok(reveal_side(&secret))
}
