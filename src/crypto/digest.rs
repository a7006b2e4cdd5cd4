use std::collections::BTreeSet;

use sha2::{Digest, Sha256};

/// Number of hex characters used when a digest is shown in events and logs.
pub const PREFIX_LEN: usize = 12;

/// Stable digest over a capability set.
///
/// `capability_hash = hex(SHA256(join("\n", sorted(dedup(names)))))`
///
/// Sorting and de-duplication make the hash independent of report order, so
/// only an actual change in the set changes the hash.
pub fn capability_hash<I, S>(capabilities: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let sorted: BTreeSet<String> = capabilities
        .into_iter()
        .map(|c| c.as_ref().trim().to_string())
        .filter(|c| !c.is_empty())
        .collect();

    let mut hasher = Sha256::new();
    for (i, name) in sorted.iter().enumerate() {
        if i > 0 {
            hasher.update(b"\n");
        }
        hasher.update(name.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Hex SHA-256 of arbitrary content (job outputs, written files).
pub fn content_digest(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Short, log-friendly prefix of a hex digest.
pub fn prefix(hash: &str) -> String {
    hash.chars().take(PREFIX_LEN).collect()
}
