//! relkit - release builder
#![allow(missing_docs)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]
//!
//! Builds every package of a release, signs them and publishes a signed
//! update manifest.
//!
//! # Layout
//!
//! ```text
//! <source root>/
//! ├── App.sln                 # --solution-file; its directory is the root
//! ├── relkit.toml             # optional configuration
//! ├── changelog-news.txt      # news for this release (required)
//! └── build/
//!     ├── compiled/<os>-<arch>/
//!     └── packages/latest-v2.manifest
//! ```

pub mod cmd;
pub mod ui;

use clap::{Args, Parser, Subcommand};
use relkit_schema::{PackageTarget, ReleaseChannel};
use std::path::PathBuf;

/// Environment variable holding the keyfile password.
pub const PASSWORD_ENV: &str = "RELKIT_KEYFILE_PASSWORD";

#[derive(Debug, Parser)]
#[command(name = "relkit")]
#[command(author, version = env!("RELKIT_VERSION"), about = "relkit - build, sign and publish releases")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Build, sign and publish a release
    Build(Box<BuildArgs>),
    /// Create a new password-protected signing keyfile
    Keygen {
        /// Where to write the keyfile
        #[arg(short, long)]
        output: PathBuf,
        /// Keyfile password (prompted if omitted)
        #[arg(long, env = PASSWORD_ENV, hide_env_values = true)]
        password: Option<String>,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Check the signature of an update manifest
    #[command(name = "verify-manifest")]
    VerifyManifest {
        /// Manifest file
        manifest: PathBuf,
        /// Trust the public key of this keyfile
        #[arg(long, required_unless_present = "public_key")]
        keyfile: Vec<PathBuf>,
        /// Trust this base64 public key
        #[arg(long)]
        public_key: Vec<String>,
        /// Keyfile password (prompted if omitted)
        #[arg(long, env = PASSWORD_ENV, hide_env_values = true)]
        password: Option<String>,
    },
    /// List the targets this project can build
    Targets {
        /// Configuration file
        #[arg(long, default_value = relkit_core::CONFIG_FILE_NAME)]
        config: PathBuf,
    },
}

#[derive(Debug, Args)]
pub struct BuildArgs {
    /// Release channel
    #[arg(default_value_t = ReleaseChannel::Canary)]
    pub channel: ReleaseChannel,

    /// Explicit version instead of bumping the counter
    #[arg(long)]
    pub version: Option<String>,

    /// Targets to build, e.g. x64-win.msi (default: all supported)
    #[arg(long, num_args = 1.., value_delimiter = ',')]
    pub targets: Vec<PackageTarget>,

    /// Build output directory
    #[arg(long, default_value = "build")]
    pub build_path: PathBuf,

    /// Solution file; its directory is the source root
    #[arg(long, default_value = "App.sln")]
    pub solution_file: PathBuf,

    /// Configuration file (default: relkit.toml next to the solution)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Changelog news for this release
    #[arg(long)]
    pub changelog_file: Option<PathBuf>,

    /// Reuse compiled output from a previous run
    #[arg(long)]
    pub keep_builds: bool,

    /// Stash before building; commit, tag and push afterwards
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub git_stash_push: bool,

    /// Skip Authenticode signing of msi packages
    #[arg(long)]
    pub disable_authenticode: bool,

    /// Skip Apple code signing
    #[arg(long)]
    pub disable_signcode: bool,

    /// Skip Apple notarization
    #[arg(long)]
    pub disable_notarize_signing: bool,

    /// Skip detached GPG signatures
    #[arg(long)]
    pub disable_gpg_signing: bool,

    /// Skip targets that need docker
    #[arg(long)]
    pub disable_docker_build: bool,

    /// Build docker images without pushing them
    #[arg(long)]
    pub disable_docker_push: bool,

    /// Docker repository for image targets
    #[arg(long)]
    pub docker_repo: Option<String>,

    /// Keyfile password (prompted if omitted)
    #[arg(long, env = PASSWORD_ENV, hide_env_values = true)]
    pub password: Option<String>,
}
