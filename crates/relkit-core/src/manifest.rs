//! Building, signing and verifying update manifests.

use crate::keystore::SigningKey;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use futures::future::try_join_all;
use md5::Md5;
use relkit_schema::{
    ContentDigests, ManifestDocument, ManifestEntry, Md5Digest, PackageTarget, ReleaseDescriptor,
    Sha256Digest, SignedManifest, TemplateValues, UrlTemplate,
};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;

const HASH_BUFFER_SIZE: usize = 64 * 1024;

/// Errors raised while building or checking a manifest.
#[derive(Error, Debug)]
pub enum ManifestError {
    /// A package or manifest file could not be read or written.
    #[error("IO error on {}: {source}", .path.display())]
    Io {
        /// File involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The manifest could not be encoded or decoded.
    #[error("Invalid manifest JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The signature field is not a base64 Ed25519 signature.
    #[error("Manifest signature is malformed")]
    MalformedSignature,

    /// No trusted key produced the signature.
    #[error("Manifest signature does not match any trusted key")]
    InvalidSignature,
}

impl ManifestError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// A package produced by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltPackage {
    /// Target the package was built for
    pub target: PackageTarget,
    /// File name, relative to the packages directory
    pub created_file: PathBuf,
}

/// Release-wide manifest fields taken from configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManifestSettings {
    /// Download URL templates for packages
    pub package_urls: Vec<UrlTemplate>,
    /// Manifest location for legacy clients
    pub update_from_v1_url: Option<String>,
    /// Fallback download page
    pub generic_update_page_url: Option<String>,
}

/// Length, MD5 and SHA256 of a file in one streamed pass.
///
/// # Errors
///
/// Returns [`ManifestError::Io`] if the file cannot be read.
pub async fn hash_file(path: &Path) -> Result<ContentDigests, ManifestError> {
    let owned = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        use std::io::Read;
        let mut file = std::fs::File::open(&owned)?;
        let mut md5 = Md5::new();
        let mut sha256 = Sha256::new();
        let mut length = 0u64;
        let mut buffer = vec![0u8; HASH_BUFFER_SIZE];
        loop {
            let count = file.read(&mut buffer)?;
            if count == 0 {
                break;
            }
            md5.update(&buffer[..count]);
            sha256.update(&buffer[..count]);
            length += count as u64;
        }
        Ok::<ContentDigests, std::io::Error>(ContentDigests {
            length,
            md5: Md5Digest::new(BASE64.encode(md5.finalize())),
            sha256: Sha256Digest::new(BASE64.encode(sha256.finalize())),
        })
    })
    .await
    .map_err(std::io::Error::other)
    .and_then(|r| r)
    .map_err(|e| ManifestError::io(path, e))
}

/// Produces signed manifests for a release.
#[derive(Debug, Clone, Default)]
pub struct ManifestBuilder {
    settings: ManifestSettings,
}

impl ManifestBuilder {
    /// Create a builder.
    pub fn new(settings: ManifestSettings) -> Self {
        Self { settings }
    }

    /// The unsigned document for `release` with the given entries.
    pub fn document(
        &self,
        release: &ReleaseDescriptor,
        change_info: &str,
        packages: Vec<ManifestEntry>,
    ) -> ManifestDocument {
        ManifestDocument {
            displayname: release.release_name(),
            version: release.version,
            release_type: release.channel,
            release_time: release.timestamp,
            change_info: change_info.to_string(),
            update_from_v1_url: self.settings.update_from_v1_url.clone(),
            generic_update_page_url: self.settings.generic_update_page_url.clone(),
            packages,
        }
    }

    /// Hash every package and sign a manifest listing them.
    ///
    /// Packages are hashed concurrently; entries keep the order of `packages`.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::Io`] if a package cannot be read.
    pub async fn build(
        &self,
        key: &SigningKey,
        release: &ReleaseDescriptor,
        change_info: &str,
        packages: &[BuiltPackage],
        packages_dir: &Path,
    ) -> Result<SignedManifest, ManifestError> {
        let entries = try_join_all(
            packages
                .iter()
                .map(|package| self.entry(release, package, packages_dir)),
        )
        .await?;
        let document = self.document(release, change_info, entries);
        sign_document(key, &document)
    }

    async fn entry(
        &self,
        release: &ReleaseDescriptor,
        package: &BuiltPackage,
        packages_dir: &Path,
    ) -> Result<ManifestEntry, ManifestError> {
        let digests = hash_file(&packages_dir.join(&package.created_file)).await?;
        let filename = package
            .created_file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let values = TemplateValues::for_release(release, filename);
        tracing::debug!(package = %package.target, length = digests.length, "hashed package");

        Ok(ManifestEntry {
            package_type_id: package.target.to_string(),
            remote_urls: self
                .settings
                .package_urls
                .iter()
                .map(|t| t.render(&values))
                .collect(),
            length: digests.length,
            md5: digests.md5,
            sha256: digests.sha256,
        })
    }
}

/// Serialize `document` and sign the exact bytes.
///
/// # Errors
///
/// Returns [`ManifestError::Json`] if the document cannot be encoded.
pub fn sign_document(
    key: &SigningKey,
    document: &ManifestDocument,
) -> Result<SignedManifest, ManifestError> {
    let body = serde_json::to_string(document)?;
    let signature = key.sign(body.as_bytes());
    Ok(SignedManifest {
        signature: BASE64.encode(signature.to_bytes()),
        signed_by: key.public_key_b64(),
        body,
    })
}

/// Signature checking for [`SignedManifest`].
pub trait VerifyManifest {
    /// Check the signature against `trusted` and return the document.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::InvalidSignature`] unless one of `trusted`
    /// signed the body exactly as stored.
    fn verify(&self, trusted: &[VerifyingKey]) -> Result<ManifestDocument, ManifestError>;
}

impl VerifyManifest for SignedManifest {
    fn verify(&self, trusted: &[VerifyingKey]) -> Result<ManifestDocument, ManifestError> {
        let raw = BASE64
            .decode(self.signature.as_bytes())
            .map_err(|_| ManifestError::MalformedSignature)?;
        let bytes: [u8; 64] = raw
            .as_slice()
            .try_into()
            .map_err(|_| ManifestError::MalformedSignature)?;
        let signature = Signature::from_bytes(&bytes);

        if !trusted
            .iter()
            .any(|key| key.verify(self.body.as_bytes(), &signature).is_ok())
        {
            return Err(ManifestError::InvalidSignature);
        }
        Ok(serde_json::from_str(&self.body)?)
    }
}

/// Parse a base64 public key.
///
/// # Errors
///
/// Returns [`ManifestError::MalformedSignature`] if `b64` is not a valid key.
pub fn parse_public_key(b64: &str) -> Result<VerifyingKey, ManifestError> {
    let raw = BASE64
        .decode(b64.trim().as_bytes())
        .map_err(|_| ManifestError::MalformedSignature)?;
    let bytes: [u8; 32] = raw
        .as_slice()
        .try_into()
        .map_err(|_| ManifestError::MalformedSignature)?;
    VerifyingKey::from_bytes(&bytes).map_err(|_| ManifestError::MalformedSignature)
}

/// Write a manifest atomically: temp file next to `path`, then rename.
///
/// # Errors
///
/// Returns [`ManifestError`] if encoding, writing or renaming fails.
pub async fn write_manifest(manifest: &SignedManifest, path: &Path) -> Result<(), ManifestError> {
    let content = serde_json::to_string_pretty(manifest)?;
    let temp_path = path.with_extension("manifest.tmp");
    fs::write(&temp_path, &content)
        .await
        .map_err(|e| ManifestError::io(&temp_path, e))?;
    fs::rename(&temp_path, path)
        .await
        .map_err(|e| ManifestError::io(path, e))?;
    tracing::info!(path = %path.display(), "manifest written");
    Ok(())
}

/// Read a manifest file without checking its signature.
///
/// # Errors
///
/// Returns [`ManifestError`] if the file cannot be read or parsed.
pub async fn read_manifest(path: &Path) -> Result<SignedManifest, ManifestError> {
    let content = fs::read_to_string(path)
        .await
        .map_err(|e| ManifestError::io(path, e))?;
    Ok(serde_json::from_str(&content)?)
}
