//! Shared types and wire format for relkit.
//!
//! Everything a release producer and an update consumer have to agree on
//! lives here: target ids, release identity, URL templates and the signed
//! manifest document.

pub mod hash;
pub mod manifest;
pub mod release;
pub mod target;
pub mod template;

// Re-exports
pub use hash::*;
pub use manifest::{
    BUILD_MANIFEST_NAME, ManifestDocument, ManifestEntry, PUBLISHED_MANIFEST_NAME, SignedManifest,
};
pub use release::{ReleaseChannel, ReleaseDescriptor, ReleaseParseError, ReleaseVersion};
pub use target::{Architecture, OperatingSystem, PackageFormat, PackageTarget, TargetError};
pub use template::{Placeholder, TemplateError, TemplateValues, UrlTemplate};
