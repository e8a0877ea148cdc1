//! Canonical request hashing for idempotent enqueueing.

use crate::error::Result;
use crate::request::RequestBatch;
use sha2::{Digest, Sha256};
use std::fmt;

/// SHA-256 digest of a normalized request batch.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestHash([u8; 32]);

impl RequestHash {
    /// Hash the normalized form of `batch`.
    ///
    /// Boxes serialize as `{west, south, east, north}` objects and collections
    /// are flattened before hashing. Item and feature order are significant.
    pub fn compute(batch: &RequestBatch) -> Result<Self> {
        let normalized = batch.clone().normalized();
        let payload = serde_json::to_vec(&normalized)?;
        Ok(Self::digest(&payload))
    }

    pub fn digest(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Self(hasher.finalize().into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Encode as lowercase hex string.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Debug for RequestHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RequestHash({})", self.to_hex())
    }
}

impl fmt::Display for RequestHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}
