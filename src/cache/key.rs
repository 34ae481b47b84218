//! Cache key construction for parameterized queries.

use sha2::{Digest, Sha256};

/// How many hex characters of the parameter digest end up in the key.
const DIGEST_LEN: usize = 16;

/// A cacheable query identity.
///
/// The stored key is `<family>:<digest>`, where the digest covers every
/// parameter that affects the result set. Families group related keys so a
/// whole result class can be evicted by prefix; the digest keeps arbitrary
/// filter combinations collision-free without leaking unbounded parameter
/// strings into the store.
pub trait QueryKey {
  /// Key family, e.g. "entries". Also the unit of prefix eviction.
  fn family(&self) -> &'static str;

  /// Canonical encoding of every parameter that shapes the result.
  /// Two queries with different results must encode differently.
  fn params(&self) -> String;

  /// Human-readable description for logs.
  fn description(&self) -> String;

  /// Stable cache key: family-prefixed, fixed-length digest suffix.
  fn cache_key(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.params().as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("{}:{}", self.family(), &digest[..DIGEST_LEN])
  }

  /// Prefix selecting this key's whole family, for bulk eviction.
  fn family_prefix(&self) -> String {
    format!("{}:", self.family())
  }
}
