//! What this host can do for this run.
//!
//! [`HostEnvironment`] records facts (host OS, tools on `PATH`, configured
//! identities). [`CapabilityResolver`] combines them with the operator's
//! disable flags into an immutable [`RuntimeConfig`] and prunes targets the
//! host cannot produce.

use crate::catalog::{CatalogError, TargetCatalog};
use crate::command::{CommandRunner, CommandSpec};
use crate::config::SigningConfig;
use crate::keystore::KeyRing;
use relkit_schema::{OperatingSystem, PackageFormat, PackageTarget, ReleaseDescriptor};
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;

/// Tools whose presence changes what a run can do.
pub const PROBED_TOOLS: &[&str] = &[
    "signtool",
    "osslsigncode",
    "codesign",
    "productsign",
    "xcrun",
    "gpg",
    "docker",
    "wix",
];

/// Errors raised while matching targets to host capabilities.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CapabilityError {
    /// MSI targets were requested but WiX is not installed.
    #[error(
        "MSI packages requested ({}) but the WiX toolset ('wix') was not found",
        join(.targets)
    )]
    MsiUnavailable {
        /// The MSI targets that were requested
        targets: Vec<PackageTarget>,
    },

    /// Linux packages or images were requested without a usable docker.
    #[error(
        "Docker is required to build {} but is not available or disabled",
        join(.targets)
    )]
    DockerRequired {
        /// Targets needing docker
        targets: Vec<PackageTarget>,
    },

    /// Every target was pruned.
    #[error("No buildable targets remain for this host")]
    NothingToBuild,
}

fn join(targets: &[PackageTarget]) -> String {
    targets
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Facts about the machine running the build.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostEnvironment {
    /// Host operating system, `None` on unsupported hosts
    pub os: Option<OperatingSystem>,
    tools: BTreeSet<String>,
    /// Whether `docker info` succeeded
    pub docker_daemon: bool,
    /// Identities present in configuration
    pub credentials: Credentials,
}

/// Which signing identities are configured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Credentials {
    /// Authenticode certificate
    pub authenticode: bool,
    /// Apple application and installer identities
    pub codesign: bool,
    /// Notarization keychain profile
    pub notarize: bool,
    /// GPG key id
    pub gpg: bool,
}

impl Credentials {
    /// Credentials present in `signing`.
    pub fn from_config(signing: &SigningConfig) -> Self {
        Self {
            authenticode: signing.authenticode_pfx.is_some(),
            codesign: signing.codesign_identity.is_some() && signing.installer_identity.is_some(),
            notarize: signing.notarize_profile.is_some(),
            gpg: signing.gpg_key_id.is_some(),
        }
    }
}

impl HostEnvironment {
    /// An environment with no tools.
    pub fn new(os: Option<OperatingSystem>) -> Self {
        Self {
            os,
            ..Self::default()
        }
    }

    /// Mark a tool as available.
    pub fn with_tool(mut self, name: &str) -> Self {
        self.tools.insert(name.to_string());
        self
    }

    /// Set whether the docker daemon answers.
    pub fn with_docker_daemon(mut self, running: bool) -> Self {
        self.docker_daemon = running;
        self
    }

    /// Set configured identities.
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    /// Whether `name` is on `PATH`.
    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.contains(name)
    }

    /// Inspect the running host.
    pub async fn probe(signing: &SigningConfig, runner: &dyn CommandRunner) -> Self {
        let mut env = Self::new(OperatingSystem::host())
            .with_credentials(Credentials::from_config(signing));
        for tool in PROBED_TOOLS {
            if which::which(tool).is_ok() {
                env.tools.insert((*tool).to_string());
            }
        }
        if env.has_tool("docker") {
            env.docker_daemon = matches!(
                runner.run(&CommandSpec::new("docker").arg("info")).await,
                Ok(out) if out.passed()
            );
        }
        tracing::debug!(
            os = ?env.os,
            tools = ?env.tools,
            docker_daemon = env.docker_daemon,
            "probed host"
        );
        env
    }

    /// The Authenticode signer for this host.
    pub fn authenticode_tool(&self) -> &'static str {
        if self.os == Some(OperatingSystem::Windows) {
            "signtool"
        } else {
            "osslsigncode"
        }
    }

    fn is_macos(&self) -> bool {
        self.os == Some(OperatingSystem::MacOS)
    }
}

/// Capabilities the operator switched off.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DisableFlags {
    /// Skip Authenticode
    pub authenticode: bool,
    /// Skip Apple code signing
    pub codesign: bool,
    /// Skip notarization
    pub notarize: bool,
    /// Skip GPG signatures
    pub gpg: bool,
    /// Skip docker builds (and the packages needing them)
    pub docker_build: bool,
    /// Build images but do not push them
    pub docker_push: bool,
}

/// Resolved on/off switches for each optional stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// Sign MSI packages with Authenticode
    pub authenticode: bool,
    /// Sign dmg/pkg packages with Apple identities
    pub codesign: bool,
    /// Notarize and staple dmg/pkg packages
    pub notarize: bool,
    /// Write detached GPG signatures
    pub gpg: bool,
    /// Build deb/rpm/docker packages
    pub docker_build: bool,
    /// Push docker images
    pub docker_push: bool,
}

/// Settings for one run, fixed once validation is done.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    capabilities: Capabilities,
    release: Arc<ReleaseDescriptor>,
    keys: Arc<KeyRing>,
    changelog: String,
}

impl RuntimeConfig {
    /// Enabled stages.
    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// Release identity.
    pub fn release(&self) -> &ReleaseDescriptor {
        &self.release
    }

    /// Signing keys, primary first.
    pub fn keys(&self) -> &KeyRing {
        &self.keys
    }

    /// Changelog news for this release.
    pub fn changelog(&self) -> &str {
        &self.changelog
    }
}

/// Requested targets and whether the operator named them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetSelection {
    /// Validated targets, request order
    pub targets: Vec<PackageTarget>,
    /// `false` when the whole catalog was selected implicitly
    pub explicit: bool,
}

impl TargetSelection {
    /// Validate `requested` against `catalog`.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError`] for unsupported targets.
    pub fn from_request(
        catalog: &TargetCatalog,
        requested: &[PackageTarget],
    ) -> Result<Self, CatalogError> {
        Ok(Self {
            targets: catalog.validate(requested)?,
            explicit: !requested.is_empty(),
        })
    }
}

/// Combines host facts and operator choices.
#[derive(Debug, Clone, Copy, Default)]
pub struct CapabilityResolver;

impl CapabilityResolver {
    /// Decide which optional stages run.
    pub fn capabilities(env: &HostEnvironment, flags: &DisableFlags) -> Capabilities {
        let authenticode = !flags.authenticode
            && env.credentials.authenticode
            && env.has_tool(env.authenticode_tool());
        let codesign = !flags.codesign
            && env.is_macos()
            && env.credentials.codesign
            && env.has_tool("codesign")
            && env.has_tool("productsign");
        let notarize =
            !flags.notarize && env.is_macos() && env.credentials.notarize && env.has_tool("xcrun");
        let gpg = !flags.gpg && env.credentials.gpg && env.has_tool("gpg");
        let docker_build = !flags.docker_build && env.has_tool("docker") && env.docker_daemon;
        let docker_push = docker_build && !flags.docker_push;

        Capabilities {
            authenticode,
            codesign,
            notarize,
            gpg,
            docker_build,
            docker_push,
        }
    }

    /// Build the run's configuration.
    pub fn resolve(
        env: &HostEnvironment,
        flags: &DisableFlags,
        release: ReleaseDescriptor,
        keys: KeyRing,
        changelog: String,
    ) -> RuntimeConfig {
        let capabilities = Self::capabilities(env, flags);
        tracing::info!(?capabilities, "resolved capabilities");
        RuntimeConfig {
            capabilities,
            release: Arc::new(release),
            keys: Arc::new(keys),
            changelog,
        }
    }

    /// Drop targets this host cannot produce.
    ///
    /// # Errors
    ///
    /// macOS-only packages are dropped off macOS, and msi targets are
    /// dropped without WiX unless they were named explicitly, which is
    /// [`CapabilityError::MsiUnavailable`]. Any deb, rpm or docker target
    /// left without docker is [`CapabilityError::DockerRequired`]. An empty
    /// result is [`CapabilityError::NothingToBuild`].
    pub fn prune_targets(
        selection: &TargetSelection,
        capabilities: &Capabilities,
        env: &HostEnvironment,
    ) -> Result<Vec<PackageTarget>, CapabilityError> {
        let mut targets = selection.targets.clone();

        if !env.is_macos() {
            targets.retain(|t| {
                let keep = !t.format.is_macos_only();
                if !keep {
                    tracing::warn!(package = %t, "macOS packages can only be built on macOS, skipping");
                }
                keep
            });
        }

        if !env.has_tool("wix") {
            let msi: Vec<PackageTarget> = targets
                .iter()
                .copied()
                .filter(|t| t.format == PackageFormat::Msi)
                .collect();
            if !msi.is_empty() {
                if selection.explicit {
                    return Err(CapabilityError::MsiUnavailable { targets: msi });
                }
                tracing::warn!(count = msi.len(), "WiX toolset not found, skipping msi targets");
                targets.retain(|t| t.format != PackageFormat::Msi);
            }
        }

        if !capabilities.docker_build {
            let docker: Vec<PackageTarget> = targets
                .iter()
                .copied()
                .filter(|t| t.format.requires_docker())
                .collect();
            if !docker.is_empty() {
                return Err(CapabilityError::DockerRequired { targets: docker });
            }
        }

        if targets.is_empty() {
            return Err(CapabilityError::NothingToBuild);
        }
        Ok(targets)
    }
}
