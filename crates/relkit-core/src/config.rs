//! Project configuration (`relkit.toml`).
//!
//! Every field has a default, so a missing file or a partial file is
//! valid. Relative paths are resolved against the source root (the
//! directory holding the solution file).

use crate::catalog::TargetCatalog;
use crate::toolchain::{ToolTemplate, default_compiler, default_packager};
use relkit_schema::{PackageTarget, ReleaseVersion, UrlTemplate};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::fs;

/// Default configuration file name, looked up next to the solution file.
pub const CONFIG_FILE_NAME: &str = "relkit.toml";

/// Errors raised while loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The file exists but cannot be read.
    #[error("Failed to read {}: {source}", .path.display())]
    Io {
        /// Config path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid configuration.
    #[error("Failed to parse {}: {source}", .path.display())]
    Parse {
        /// Config path
        path: PathBuf,
        /// Parser error
        #[source]
        source: toml::de::Error,
    },

    /// A tool template references a placeholder relkit does not provide.
    #[error("Unknown placeholder '{{{placeholder}}}' in [tools.{tool}]")]
    UnknownToolPlaceholder {
        /// `compiler` or `packager`
        tool: &'static str,
        /// Placeholder name
        placeholder: String,
    },
}

/// Everything a release run needs to know about the project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Product name, used in package file names
    pub app_name: String,
    /// `major.minor.build` of counter-derived versions
    pub base_version: ReleaseVersion,
    /// File holding the last released revision number
    pub counter_file: PathBuf,
    /// News for this release, prepended to the changelog
    pub changelog_file: PathBuf,
    /// Restricts the target catalog; empty means the built-in catalog
    pub supported_targets: Vec<PackageTarget>,
    /// Encrypted signing keys, primary first
    pub keyfiles: Vec<PathBuf>,
    /// Where clients look for the manifest (`${FILENAME}` = manifest name)
    pub update_urls: Vec<UrlTemplate>,
    /// Where packages are downloaded from (`${FILENAME}` = package name)
    pub package_urls: Vec<UrlTemplate>,
    /// Fallback download page shown by clients
    pub generic_update_page_url: Option<String>,
    /// Manifest location for clients on the legacy updater
    pub update_from_v1_url: Option<String>,
    /// Docker repository images are tagged into
    pub docker_repo: String,
    /// Projects to compile
    pub projects: ProjectLayout,
    /// Files stamped with release identity
    pub source: SourceLayout,
    /// Signing identities
    pub signing: SigningConfig,
    /// Compiler and packager commands
    pub tools: ToolsConfig,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            app_name: "app".to_string(),
            base_version: crate::release::DEFAULT_BASE_VERSION,
            counter_file: PathBuf::from("ReleaseBuilder/build_version.txt"),
            changelog_file: PathBuf::from("changelog-news.txt"),
            supported_targets: Vec::new(),
            keyfiles: Vec::new(),
            update_urls: Vec::new(),
            package_urls: Vec::new(),
            generic_update_page_url: None,
            update_from_v1_url: None,
            docker_repo: "app/app".to_string(),
            projects: ProjectLayout::default(),
            source: SourceLayout::default(),
            signing: SigningConfig::default(),
            tools: ToolsConfig::default(),
        }
    }
}

impl BuildConfig {
    /// Load configuration; a missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed, or a
    /// tool template uses an unknown placeholder.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = match fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        Self::parse(&content, path)
    }

    /// Parse configuration text; `origin` is only used in error messages.
    ///
    /// # Errors
    ///
    /// See [`BuildConfig::load`].
    pub fn parse(content: &str, origin: &Path) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// The targets this project supports: `supported_targets`, or the
    /// full default catalog when that list is empty.
    pub fn catalog(&self) -> TargetCatalog {
        if self.supported_targets.is_empty() {
            TargetCatalog::default()
        } else {
            TargetCatalog::from_targets(self.supported_targets.iter().copied())
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (tool, template) in [
            ("compiler", &self.tools.compiler),
            ("packager", &self.tools.packager),
        ] {
            if let Some(placeholder) = template.unknown_placeholder() {
                return Err(ConfigError::UnknownToolPlaceholder { tool, placeholder });
            }
        }
        Ok(())
    }
}

/// Resolve a configured path against `root` unless it is absolute.
pub fn resolve_path(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

/// The projects compiled for every runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectLayout {
    /// Primary GUI project, compiled last
    pub gui: PathBuf,
    /// Command-line projects; the first is the primary CLI
    pub cli: Vec<PathBuf>,
    /// Projects only compiled for Windows runtimes
    pub windows_only: Vec<PathBuf>,
    /// Ship command-line tools only: skip the GUI project
    pub headless: bool,
}

impl ProjectLayout {
    /// Whether packages contain the GUI.
    pub fn has_gui(&self) -> bool {
        !self.headless
    }
}

impl Default for ProjectLayout {
    fn default() -> Self {
        Self {
            gui: PathBuf::from("Executables/GUI/App.GUI.TrayIcon.csproj"),
            cli: vec![PathBuf::from("Executables/CommandLine/App.CommandLine.csproj")],
            windows_only: Vec::new(),
            headless: false,
        }
    }
}

/// Locations inside the source tree that receive release identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceLayout {
    /// Holds the version string
    pub version_tag: PathBuf,
    /// Holds the channel name
    pub channel_file: PathBuf,
    /// Holds `;`-separated manifest URLs
    pub update_urls_file: PathBuf,
    /// Holds one base64 public key per line
    pub sign_keys_file: PathBuf,
    /// Zero-package manifest bundled with the binaries
    pub embedded_manifest: PathBuf,
    /// Web assets with `?v=` cache-busting parameters
    pub webroot: PathBuf,
    /// Cumulative changelog, committed after a release
    pub changelog: PathBuf,
}

impl Default for SourceLayout {
    fn default() -> Self {
        Self {
            version_tag: PathBuf::from("License/VersionTag.txt"),
            channel_file: PathBuf::from("AutoUpdater/AutoUpdateBuildChannel.txt"),
            update_urls_file: PathBuf::from("AutoUpdater/AutoUpdateURL.txt"),
            sign_keys_file: PathBuf::from("AutoUpdater/AutoUpdateSignKeys.txt"),
            embedded_manifest: PathBuf::from("AutoUpdater/autoupdate.manifest"),
            webroot: PathBuf::from("webroot"),
            changelog: PathBuf::from("changelog.txt"),
        }
    }
}

impl SourceLayout {
    /// The four identity files, always restored after a build.
    pub fn fixed_files(&self) -> [&Path; 4] {
        [
            &self.version_tag,
            &self.channel_file,
            &self.update_urls_file,
            &self.sign_keys_file,
        ]
    }
}

/// Identities used by the signing stages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SigningConfig {
    /// PKCS#12 certificate for Authenticode
    pub authenticode_pfx: Option<PathBuf>,
    /// Timestamp server for Authenticode signatures
    pub timestamp_url: String,
    /// `Developer ID Application` identity for `codesign`
    pub codesign_identity: Option<String>,
    /// `Developer ID Installer` identity for `productsign`
    pub installer_identity: Option<String>,
    /// Keychain profile passed to `notarytool`
    pub notarize_profile: Option<String>,
    /// Seconds between notarization status polls
    pub notarize_poll_secs: u64,
    /// Seconds before a pending notarization counts as failed
    pub notarize_timeout_secs: u64,
    /// Key used for detached GPG signatures
    pub gpg_key_id: Option<String>,
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            authenticode_pfx: None,
            timestamp_url: "http://timestamp.digicert.com".to_string(),
            codesign_identity: None,
            installer_identity: None,
            notarize_profile: None,
            notarize_poll_secs: 30,
            notarize_timeout_secs: 3600,
            gpg_key_id: None,
        }
    }
}

impl SigningConfig {
    /// Poll interval as a duration.
    pub fn notarize_poll(&self) -> Duration {
        Duration::from_secs(self.notarize_poll_secs)
    }

    /// Timeout as a duration.
    pub fn notarize_timeout(&self) -> Duration {
        Duration::from_secs(self.notarize_timeout_secs)
    }
}

/// `[tools]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Compiles one project for one runtime
    pub compiler: ToolTemplate,
    /// Produces one package for one target
    pub packager: ToolTemplate,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            compiler: default_compiler(),
            packager: default_packager(),
        }
    }
}
