use serde::{Deserialize, Serialize};

/// Base64-encoded MD5 digest of a published artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct Md5Digest(String);

impl Md5Digest {
    /// Wrap an already base64-encoded digest.
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Return the base64 text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Md5Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Md5Digest {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Base64-encoded SHA256 digest of a published artifact.
///
/// Auto-update clients compare this against the downloaded bytes, so the
/// encoding (standard base64 with padding) is part of the wire format.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct Sha256Digest(String);

impl Sha256Digest {
    /// Wrap an already base64-encoded digest.
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Return the base64 text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Sha256Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Sha256Digest {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Both digests of one artifact plus its byte length, computed in one pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentDigests {
    /// File size in bytes
    pub length: u64,
    /// MD5 digest
    pub md5: Md5Digest,
    /// SHA256 digest
    pub sha256: Sha256Digest,
}
