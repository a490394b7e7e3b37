use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Source of per-round secrets and their public commitments.
pub trait FairnessSource: Send + Sync {
    /// Draw a fresh secret and commit to it. Must fail rather than return a
    /// predictable secret.
    fn commit(&self) -> Result<Commitment>;
}

/// A round's commitment. The secret stays private until reveal.
#[derive(Clone, Serialize, Deserialize)]
pub struct Commitment {
    pub hash: Vec<u8>,
    pub created_at: DateTime<Utc>,
    #[serde(skip)]
    secret: Vec<u8>,
}

impl Commitment {
    pub fn from_secret(secret: Vec<u8>) -> Self {
        Self {
            hash: super::digest(&secret),
            created_at: Utc::now(),
            secret,
        }
    }

    pub fn hash_hex(&self) -> String {
        hex::encode(&self.hash)
    }

    pub fn verify(&self, secret: &[u8]) -> bool {
        super::digest(secret) == self.hash
    }

    /// Access to the secret, only for the engine once betting has closed.
    pub(crate) fn secret(&self) -> &[u8] {
        &self.secret
    }
}

impl std::fmt::Debug for Commitment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Commitment")
            .field("hash", &self.hash_hex())
            .field("created_at", &self.created_at)
            .finish()
    }
}
