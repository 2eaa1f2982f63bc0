//! The update manifest consumed by auto-update clients.
//!
//! A [`SignedManifest`] carries the manifest body as the exact JSON text
//! that was signed, next to a base64 Ed25519 signature over those bytes.
//! Keeping the body as text (rather than a nested object) means the
//! signature never depends on how a reader re-serializes the document.

use crate::hash::{Md5Digest, Sha256Digest};
use crate::release::{ReleaseChannel, ReleaseVersion};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// File name the manifest is first written under.
pub const BUILD_MANIFEST_NAME: &str = "autoupdate.manifest";

/// File name the manifest is published under.
pub const PUBLISHED_MANIFEST_NAME: &str = "latest-v2.manifest";

/// One downloadable package in a release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Target id, e.g. `x64-win.msi`
    pub package_type_id: String,
    /// Mirrors the package can be downloaded from
    pub remote_urls: Vec<String>,
    /// Size in bytes
    pub length: u64,
    /// Base64 MD5 of the package
    pub md5: Md5Digest,
    /// Base64 SHA256 of the package
    pub sha256: Sha256Digest,
}

/// The signed body of an update manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestDocument {
    /// Human-readable release name
    pub displayname: String,
    /// Released version
    pub version: ReleaseVersion,
    /// Channel name
    pub release_type: ReleaseChannel,
    /// Release date
    pub release_time: NaiveDate,
    /// Changelog text for this release
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub change_info: String,
    /// Where clients on the legacy updater should look
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_from_v1_url: Option<String>,
    /// Page shown to users when no package matches their platform
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generic_update_page_url: Option<String>,
    /// Packages in the release; empty for the manifest embedded in binaries
    #[serde(default)]
    pub packages: Vec<ManifestEntry>,
}

/// A manifest body and the signature over its exact bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedManifest {
    /// Base64 Ed25519 signature of `body`
    pub signature: String,
    /// Base64 public key of the signer
    pub signed_by: String,
    /// JSON text of a [`ManifestDocument`]
    pub body: String,
}

impl SignedManifest {
    /// Parse the body without checking the signature.
    ///
    /// # Errors
    ///
    /// Returns an error if the body is not a valid [`ManifestDocument`].
    pub fn document_unverified(&self) -> serde_json::Result<ManifestDocument> {
        serde_json::from_str(&self.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_round_trips_through_body() {
        let doc = ManifestDocument {
            displayname: "2.0.0.1_canary_2024-01-01".into(),
            version: ReleaseVersion::new(2, 0, 0, 1),
            release_type: ReleaseChannel::Canary,
            release_time: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            change_info: String::new(),
            update_from_v1_url: None,
            generic_update_page_url: Some("https://example.com/download".into()),
            packages: vec![ManifestEntry {
                package_type_id: "x64-win.zip".into(),
                remote_urls: vec!["https://example.com/a.zip".into()],
                length: 3,
                md5: Md5Digest::new("md5"),
                sha256: Sha256Digest::new("sha"),
            }],
        };
        let signed = SignedManifest {
            signature: String::new(),
            signed_by: String::new(),
            body: serde_json::to_string(&doc).unwrap(),
        };
        assert!(!signed.body.contains("change_info"));
        assert_eq!(signed.document_unverified().unwrap(), doc);
    }
}
