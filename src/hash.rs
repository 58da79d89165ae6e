//! QueryHash computation
//!
//! QueryHash = blake3("query:" || json(construction arguments))
//!
//! The arguments are serialized with `serde_json` so that any serializable
//! argument set hashes deterministically.

use crate::types::QueryHash;
use blake3::Hasher;
use serde::Serialize;

/// Compute the hash of an arbitrary serializable argument set.
pub fn hash_args<T: Serialize + ?Sized>(args: &T) -> QueryHash {
    // Serializing plain data into a Vec cannot fail.
    let payload = serde_json::to_vec(args).unwrap_or_default();

    let mut hasher = Hasher::new();
    hasher.update(b"query:");
    hasher.update(&payload);
    QueryHash::from_bytes(*hasher.finalize().as_bytes())
}

/// Compute the hash of a query from its text.
pub fn hash_query(text: &str) -> QueryHash {
    hash_args(&[text])
}
