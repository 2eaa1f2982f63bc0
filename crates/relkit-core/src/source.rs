//! Stamping release identity into the source tree before compilation.

use crate::capability::RuntimeConfig;
use crate::config::{SourceLayout, resolve_path};
use crate::manifest::{ManifestBuilder, ManifestError, ManifestSettings, sign_document, write_manifest};
use regex::bytes::Regex;
use relkit_schema::{PUBLISHED_MANIFEST_NAME, TemplateValues, UrlTemplate};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use thiserror::Error;
use walkdir::WalkDir;

static VERSION_QUERY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\?v=(\d+\.\d+\.(\*|(\d+(\.(\*|\d+))?)))").expect("static regex")
});

const WEB_ASSET_EXTENSIONS: &[&str] = &["html", "js"];

/// Errors raised while modifying the source tree.
#[derive(Error, Debug)]
pub enum SourceError {
    /// A source file could not be read or written.
    #[error("IO error on {}: {source}", .path.display())]
    Io {
        /// File involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Walking the web asset directory failed.
    #[error("Failed to scan web assets: {0}")]
    Walk(#[from] walkdir::Error),

    /// The embedded manifest could not be produced.
    #[error(transparent)]
    Manifest(#[from] ManifestError),
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> SourceError + '_ {
    move |source| SourceError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Source paths touched by stamping, relative to the source root.
///
/// Insertion order is kept and duplicates are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RevertSet {
    paths: Vec<PathBuf>,
}

impl RevertSet {
    /// Record a path.
    pub fn insert(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        if !self.paths.contains(&path) {
            self.paths.push(path);
        }
    }

    /// Whether `path` was recorded.
    pub fn contains(&self, path: &Path) -> bool {
        self.paths.iter().any(|p| p == path)
    }

    /// Recorded paths.
    pub fn iter(&self) -> impl Iterator<Item = &Path> {
        self.paths.iter().map(PathBuf::as_path)
    }

    /// Number of recorded paths.
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    /// Whether nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

/// Writes release identity into a checked-out source tree.
#[derive(Debug)]
pub struct SourceMutator<'a> {
    root: &'a Path,
    layout: &'a SourceLayout,
}

impl<'a> SourceMutator<'a> {
    /// Operate on the tree at `root`.
    pub fn new(root: &'a Path, layout: &'a SourceLayout) -> Self {
        Self { root, layout }
    }

    fn path(&self, rel: &Path) -> PathBuf {
        resolve_path(self.root, rel)
    }

    /// Write version, channel, update URLs and public keys into the tree,
    /// cache-bust web assets and prepend the changelog news.
    ///
    /// Returns the web assets visited; the four identity files are always
    /// restored and are not part of the set.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] on the first file that cannot be updated.
    pub fn stamp(
        &self,
        rtcfg: &RuntimeConfig,
        update_urls: &[UrlTemplate],
    ) -> Result<RevertSet, SourceError> {
        let release = rtcfg.release();
        let values = TemplateValues::for_release(release, PUBLISHED_MANIFEST_NAME);
        let urls = update_urls
            .iter()
            .map(|t| t.render(&values))
            .collect::<Vec<_>>()
            .join(";");
        let keys: String = rtcfg
            .keys()
            .public_keys_b64()
            .into_iter()
            .map(|k| k + "\n")
            .collect();

        for (rel, content) in [
            (&self.layout.version_tag, release.version.to_string()),
            (&self.layout.channel_file, release.channel.to_string()),
            (&self.layout.update_urls_file, urls),
            (&self.layout.sign_keys_file, keys),
        ] {
            let path = self.path(rel);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(io_err(parent))?;
            }
            std::fs::write(&path, content).map_err(io_err(&path))?;
            tracing::debug!(file = %rel.display(), "stamped");
        }

        let revert = self.stamp_web_assets(&release.version.to_string())?;
        self.prepend_changelog(rtcfg.changelog())?;

        tracing::info!(
            release = %release.release_name(),
            web_assets = revert.len(),
            "source tree stamped"
        );
        Ok(revert)
    }

    fn stamp_web_assets(&self, version: &str) -> Result<RevertSet, SourceError> {
        let mut revert = RevertSet::default();
        let webroot = self.path(&self.layout.webroot);
        if !webroot.is_dir() {
            tracing::debug!(webroot = %webroot.display(), "no web assets to stamp");
            return Ok(revert);
        }

        let replacement = format!("?v={version}");
        for entry in WalkDir::new(&webroot).sort_by_file_name() {
            let entry = entry?;
            let is_asset = entry.file_type().is_file()
                && entry
                    .path()
                    .extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| WEB_ASSET_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()));
            if !is_asset {
                continue;
            }

            let path = entry.path();
            let original = std::fs::read(path).map_err(io_err(path))?;
            let updated = VERSION_QUERY_RE.replace_all(&original, replacement.as_bytes());
            if *updated != *original {
                std::fs::write(path, &updated).map_err(io_err(path))?;
            }
            let rel = path.strip_prefix(self.root).unwrap_or(path);
            revert.insert(rel);
        }
        Ok(revert)
    }

    fn prepend_changelog(&self, news: &str) -> Result<(), SourceError> {
        if news.trim().is_empty() {
            return Ok(());
        }
        let path = self.path(&self.layout.changelog);
        let existing = match std::fs::read_to_string(&path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(io_err(&path)(e)),
        };
        std::fs::write(&path, format!("{news}\n{existing}")).map_err(io_err(&path))
    }

    /// Replace the embedded manifest with a signed, package-less one.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if the manifest cannot be written.
    pub async fn build_embedded_manifest(
        &self,
        rtcfg: &RuntimeConfig,
        settings: &ManifestSettings,
    ) -> Result<PathBuf, SourceError> {
        let path = self.path(&self.layout.embedded_manifest);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(io_err(parent))?;
        }
        if path.exists() {
            tokio::fs::remove_file(&path).await.map_err(io_err(&path))?;
        }

        let document = ManifestBuilder::new(settings.clone()).document(rtcfg.release(), "", Vec::new());
        let signed = sign_document(rtcfg.keys().primary(), &document)?;
        write_manifest(&signed, &path).await?;
        Ok(path)
    }
}
