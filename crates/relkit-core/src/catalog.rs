//! The catalog of buildable targets.
//!
//! Validation is pure: it never consults the host. Host and capability
//! checks happen later in [`crate::capability`].

use relkit_schema::{Architecture, OperatingSystem, PackageFormat, PackageTarget};
use std::collections::BTreeSet;
use thiserror::Error;

/// Debian dependencies of GUI builds.
const DEBIAN_GUI_DEPENDS: &[&str] = &[
    "libice6",
    "libsm6",
    "libfontconfig1",
    "libicu70 | libicu71 | libicu72",
    "libssl3",
];

/// Debian dependencies of CLI-only builds.
const DEBIAN_CLI_DEPENDS: &[&str] = &["libicu70 | libicu71 | libicu72", "libssl3"];

/// Fedora dependencies of GUI builds.
const FEDORA_GUI_DEPENDS: &[&str] = &["libICE", "libSM", "fontconfig", "libicu"];

/// Fedora dependencies of CLI-only builds.
const FEDORA_CLI_DEPENDS: &[&str] = &["libicu"];

/// Errors raised while validating requested targets.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    /// One or more requested targets are not in the catalog.
    #[error("Following targets are not supported: {}", join_targets(.offending))]
    UnsupportedTargets {
        /// Every unsupported target, in request order
        offending: Vec<PackageTarget>,
    },
}

fn join_targets(targets: &[PackageTarget]) -> String {
    targets
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// The set of targets this project knows how to build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetCatalog {
    supported: BTreeSet<PackageTarget>,
}

impl Default for TargetCatalog {
    fn default() -> Self {
        use Architecture::{Arm7, Arm64, X64, X86};
        use OperatingSystem::{Linux, MacOS, Windows};
        use PackageFormat::{Deb, Docker, Dmg, MacPkg, Msi, Rpm, Zip};

        let mut supported = BTreeSet::new();
        for arch in [X64, X86, Arm64] {
            for format in [Zip, Msi] {
                supported.insert(PackageTarget::new(Windows, arch, format));
            }
        }
        for arch in [X64, Arm64, Arm7] {
            for format in [Zip, Deb, Docker] {
                supported.insert(PackageTarget::new(Linux, arch, format));
            }
        }
        for arch in [X64, Arm64] {
            supported.insert(PackageTarget::new(Linux, arch, Rpm));
            for format in [Zip, Dmg, MacPkg] {
                supported.insert(PackageTarget::new(MacOS, arch, format));
            }
        }

        Self { supported }
    }
}

impl TargetCatalog {
    /// A catalog restricted to an explicit set of targets.
    pub fn from_targets(targets: impl IntoIterator<Item = PackageTarget>) -> Self {
        Self {
            supported: targets.into_iter().collect(),
        }
    }

    /// Every supported target, in a stable order.
    pub fn supported(&self) -> impl Iterator<Item = &PackageTarget> {
        self.supported.iter()
    }

    /// Whether `target` can be built at all.
    pub fn contains(&self, target: &PackageTarget) -> bool {
        self.supported.contains(target)
    }

    /// Check a request against the catalog.
    ///
    /// An empty request means "everything supported". Duplicates are
    /// dropped, first occurrence wins.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::UnsupportedTargets`] naming every requested
    /// target outside the catalog.
    pub fn validate(&self, requested: &[PackageTarget]) -> Result<Vec<PackageTarget>, CatalogError> {
        if requested.is_empty() {
            return Ok(self.supported.iter().copied().collect());
        }

        let mut seen = BTreeSet::new();
        let unique: Vec<PackageTarget> = requested
            .iter()
            .copied()
            .filter(|t| seen.insert(*t))
            .collect();

        let offending: Vec<PackageTarget> = unique
            .iter()
            .copied()
            .filter(|t| !self.supported.contains(t))
            .collect();

        if offending.is_empty() {
            Ok(unique)
        } else {
            Err(CatalogError::UnsupportedTargets { offending })
        }
    }

    /// OS package dependencies declared by the given target.
    pub fn dependencies_for(target: &PackageTarget, has_gui: bool) -> &'static [&'static str] {
        match (target.format, has_gui) {
            (PackageFormat::Deb, true) => DEBIAN_GUI_DEPENDS,
            (PackageFormat::Deb, false) => DEBIAN_CLI_DEPENDS,
            (PackageFormat::Rpm, true) => FEDORA_GUI_DEPENDS,
            (PackageFormat::Rpm, false) => FEDORA_CLI_DEPENDS,
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(raw: &str) -> PackageTarget {
        raw.parse().unwrap()
    }

    #[test]
    fn every_supported_target_round_trips() {
        let catalog = TargetCatalog::default();
        for target in catalog.supported() {
            let parsed: PackageTarget = target.to_string().parse().unwrap();
            assert_eq!(&parsed, target);
        }
    }

    #[test]
    fn empty_request_means_all_supported() {
        let catalog = TargetCatalog::default();
        let all: Vec<_> = catalog.supported().copied().collect();
        assert_eq!(catalog.validate(&[]).unwrap(), all);
    }

    #[test]
    fn validate_lists_every_offender() {
        let catalog = TargetCatalog::default();
        let err = catalog
            .validate(&[t("x64-win.msi"), t("arm7-win.msi"), t("x86-macos.dmg")])
            .unwrap_err();
        assert_eq!(
            err,
            CatalogError::UnsupportedTargets {
                offending: vec![t("arm7-win.msi"), t("x86-macos.dmg")]
            }
        );
        assert_eq!(
            err.to_string(),
            "Following targets are not supported: arm7-win.msi, x86-macos.dmg"
        );
    }

    #[test]
    fn validate_dedupes_in_request_order() {
        let catalog = TargetCatalog::default();
        let out = catalog
            .validate(&[t("x64-win.zip"), t("x64-linux.deb"), t("x64-win.zip")])
            .unwrap();
        assert_eq!(out, vec![t("x64-win.zip"), t("x64-linux.deb")]);
    }

    #[test]
    fn restricted_catalog_rejects_others() {
        let catalog = TargetCatalog::from_targets([t("x64-linux.zip")]);
        assert!(catalog.validate(&[t("x64-linux.zip")]).is_ok());
        assert!(catalog.validate(&[t("x64-win.zip")]).is_err());
    }

    #[test]
    fn dependency_lists_differ_for_gui() {
        let deb = t("x64-linux.deb");
        let rpm = t("x64-linux.rpm");
        assert!(TargetCatalog::dependencies_for(&deb, true).contains(&"libsm6"));
        assert!(!TargetCatalog::dependencies_for(&deb, false).contains(&"libsm6"));
        assert_eq!(TargetCatalog::dependencies_for(&rpm, false), &["libicu"]);
        assert!(TargetCatalog::dependencies_for(&t("x64-win.msi"), true).is_empty());
    }
}
