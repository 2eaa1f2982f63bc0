//! Release orchestration engine for relkit.
//!
//! Validates targets, unlocks signing keys, stamps the source tree, drives
//! the compiler, packager and signing tools, and writes the signed update
//! manifest. See [`pipeline::PackagePipeline`] for the entry point.

pub mod capability;
pub mod catalog;
pub mod command;
pub mod config;
pub mod keystore;
pub mod manifest;
pub mod pipeline;
pub mod release;
pub mod reporter;
pub mod sign;
pub mod source;
pub mod toolchain;
pub mod vcs;

// Re-exports
pub use capability::{
    Capabilities, CapabilityError, CapabilityResolver, Credentials, DisableFlags,
    HostEnvironment, RuntimeConfig, TargetSelection,
};
pub use catalog::{CatalogError, TargetCatalog};
pub use command::{CommandError, CommandOutput, CommandRunner, CommandSpec, ProcessRunner};
pub use config::{BuildConfig, CONFIG_FILE_NAME, ConfigError};
pub use keystore::{KeyError, KeyRing, KeyStore, PasswordPrompt, RetryPolicy, SigningKey};
pub use manifest::{BuiltPackage, ManifestBuilder, ManifestError, ManifestSettings, VerifyManifest};
pub use pipeline::{
    BuildOutcome, BuildReport, BuildRequest, ErrorKind, PackagePipeline, PipelineError, Stage,
};
pub use release::ReleaseError;
pub use reporter::{NullReporter, Reporter};
pub use source::{RevertSet, SourceMutator};
