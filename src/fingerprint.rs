use std::fmt::{Display, Formatter};

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Registry key for one (device, channel) pair.
///
/// Hex SHA-256 over the canonical JSON form of the trimmed ids, so the value is
/// stable across runs and safe to use as a directory name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn new(server_id: &str, channel_id: &str) -> Self {
        // json! objects are key-sorted
        let canonical = serde_json::json!({
            "channel_id": channel_id.trim(),
            "server_id": server_id.trim(),
        })
        .to_string();
        Self(hex::encode(Sha256::digest(canonical.as_bytes())))
    }

    /// Accepts an already computed fingerprint, e.g. from a request path.
    pub fn parse(value: &str) -> Option<Self> {
        if value.len() == 64 && value.chars().all(|c| c.is_ascii_hexdigit()) {
            Some(Self(value.to_ascii_lowercase()))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form for log lines.
    pub fn short(&self) -> &str {
        &self.0[..8]
    }
}

impl Display for Fingerprint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
