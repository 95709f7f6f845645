use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::value::Value;

/// Length of a record digest in bytes.
pub const DIGEST_LEN: usize = 20;

/// Content hash of `(set, user key)` identifying a record within a namespace.
///
/// The digest is the first 20 bytes of the BLAKE3 hash of the set name, a
/// one-byte key type tag and the key's canonical bytes. Identical
/// `(set, key)` pairs always produce the same digest, which lets records be
/// located without the original user key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Digest([u8; DIGEST_LEN]);

impl Digest {
    /// Compute the digest for a user key stored in `set_name`.
    ///
    /// Only integer, string and blob keys can address a record.
    pub fn compute(set_name: &str, user_key: &Value) -> Result<Self, TypeError> {
        let (tag, bytes): (u8, Vec<u8>) = match user_key {
            Value::Int(v) => (1, v.to_be_bytes().to_vec()),
            Value::Str(s) => (3, s.as_bytes().to_vec()),
            Value::Blob(b) => (4, b.clone()),
            other => return Err(TypeError::UnsupportedKey(other.type_name().to_string())),
        };
        let mut hasher = blake3::Hasher::new();
        hasher.update(set_name.as_bytes());
        hasher.update(&[tag]);
        hasher.update(&bytes);
        let hash = hasher.finalize();
        let mut out = [0u8; DIGEST_LEN];
        out.copy_from_slice(&hash.as_bytes()[..DIGEST_LEN]);
        Ok(Self(out))
    }

    /// Create a digest from raw bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, TypeError> {
        if bytes.len() != DIGEST_LEN {
            return Err(TypeError::InvalidLength {
                expected: DIGEST_LEN,
                actual: bytes.len(),
            });
        }
        let mut out = [0u8; DIGEST_LEN];
        out.copy_from_slice(bytes);
        Ok(Self(out))
    }

    /// The raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    /// Hex-encoded string representation.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Short hex representation (first 8 characters).
    pub fn short_hex(&self) -> String {
        hex::encode(&self.0[..4])
    }

    /// Parse from a hex string.
    pub fn from_hex(s: &str) -> Result<Self, TypeError> {
        let bytes = hex::decode(s).map_err(|e| TypeError::InvalidHex(e.to_string()))?;
        Self::from_slice(&bytes)
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.short_hex())
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Record locator: `(namespace, set, user key | digest)`.
///
/// Two keys address the same record when their namespace and digest match;
/// the user key is carried along only so it can be sent to the store and
/// restored onto decoded objects.
#[derive(Clone)]
pub struct Key {
    pub namespace: String,
    pub set_name: String,
    pub user_key: Option<Value>,
    pub digest: Digest,
}

impl Key {
    /// Build a key from a user key value, computing its digest.
    pub fn new(
        namespace: impl Into<String>,
        set_name: impl Into<String>,
        user_key: impl Into<Value>,
    ) -> Result<Self, TypeError> {
        let set_name = set_name.into();
        let user_key = user_key.into();
        let digest = Digest::compute(&set_name, &user_key)?;
        Ok(Self {
            namespace: namespace.into(),
            set_name,
            user_key: Some(user_key),
            digest,
        })
    }

    /// Build a key that only knows the record digest.
    pub fn from_digest(
        namespace: impl Into<String>,
        set_name: impl Into<String>,
        digest: Digest,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            set_name: set_name.into(),
            user_key: None,
            digest,
        }
    }

    /// The `(namespace, digest)` pair that identifies the record.
    pub fn identity(&self) -> (&str, &Digest) {
        (&self.namespace, &self.digest)
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.namespace == other.namespace && self.digest == other.digest
    }
}

impl Eq for Key {}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.namespace.hash(state);
        self.digest.hash(state);
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.user_key {
            Some(user_key) => write!(
                f,
                "Key({}:{}:{})",
                self.namespace, self.set_name, user_key
            ),
            None => write!(
                f,
                "Key({}:{}:#{})",
                self.namespace,
                self.set_name,
                self.digest.short_hex()
            ),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
