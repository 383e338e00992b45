//! Storage key generation
//!
//! Keys are 32 bytes from the thread-local CSPRNG, URL-safe base64 without
//! padding, followed by the validated extension. Collisions are not checked.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use std::fmt;

/// Number of random bytes behind every key
pub const KEY_ENTROPY_BYTES: usize = 32;

/// A generated storage key: `<random id><extension>`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorageKey {
    id: String,
    extension: &'static str,
}

impl StorageKey {
    /// Generate a fresh key for an asset with `extension` (e.g. `".png"`)
    ///
    /// An entropy source failure aborts the process rather than surfacing as a
    /// request error.
    pub fn generate(extension: &'static str) -> Self {
        let mut bytes = [0u8; KEY_ENTROPY_BYTES];
        rand::rng().fill_bytes(&mut bytes);

        Self {
            id: URL_SAFE_NO_PAD.encode(bytes),
            extension,
        }
    }

    /// The random part of the key
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn extension(&self) -> &'static str {
        self.extension
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.id, self.extension)
    }
}

/// Check that a key received from a client has the shape of a generated one
///
/// Used before serving assets by key, so no path separators or dot segments
/// ever reach a backend.
pub fn is_well_formed_key(key: &str) -> bool {
    let Some((id, ext)) = key.split_once('.') else {
        return false;
    };

    id.len() == 43
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
        && !ext.is_empty()
        && ext.bytes().all(|b| b.is_ascii_alphanumeric())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_key_shape() {
        let key = StorageKey::generate(".png");
        // 32 bytes -> 43 unpadded base64 chars
        assert_eq!(key.id().len(), 43);
        assert!(key.to_string().ends_with(".png"));
        assert!(!key.id().contains('='));
        assert!(!key.id().contains('+'));
        assert!(!key.id().contains('/'));
        assert!(is_well_formed_key(&key.to_string()));
    }

    #[test]
    fn test_no_collisions() {
        let keys: HashSet<String> = (0..10_000)
            .map(|_| StorageKey::generate(".mp4").to_string())
            .collect();
        assert_eq!(keys.len(), 10_000);
    }

    #[test]
    fn test_malformed_keys_rejected() {
        assert!(!is_well_formed_key("../etc/passwd"));
        assert!(!is_well_formed_key("abc.png"));
        assert!(!is_well_formed_key(""));
        let valid = StorageKey::generate(".jpg").to_string();
        assert!(!is_well_formed_key(&format!("{}/x", valid)));
        assert!(!is_well_formed_key(valid.trim_end_matches(".jpg")));
    }
}
