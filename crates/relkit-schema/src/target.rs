//! Package targets: the `(os, arch, format)` triples a release can produce.
//!
//! A target is identified by its string id `"{arch}-{os}.{format}"`, for
//! example `x64-linux.deb` or `arm64-macos.dmg`. The id is the only wire
//! representation; serde goes through [`Display`](std::fmt::Display) and
//! [`FromStr`](std::str::FromStr).
//!
//! ```
//! use relkit_schema::PackageTarget;
//!
//! let target: PackageTarget = "x64-win.msi".parse().unwrap();
//! assert_eq!(target.to_string(), "x64-win.msi");
//! ```

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors produced while parsing a target id or one of its tokens.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TargetError {
    /// The id does not have the `arch-os.format` shape.
    #[error("Invalid target '{0}': expected the form arch-os.format (e.g. x64-win.msi)")]
    InvalidFormat(String),

    /// The operating system token is not recognised.
    #[error("Unknown operating system '{0}'")]
    UnknownOs(String),

    /// The architecture token is not recognised.
    #[error("Unknown architecture '{0}'")]
    UnknownArch(String),

    /// The package format token is not recognised.
    #[error("Unknown package format '{0}'")]
    UnknownFormat(String),
}

/// Operating systems a package can be built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OperatingSystem {
    /// Microsoft Windows (`win`)
    Windows,
    /// Linux distributions (`linux`)
    Linux,
    /// Apple macOS (`macos`)
    MacOS,
}

impl OperatingSystem {
    /// All operating systems, in catalog order.
    pub const ALL: [Self; 3] = [Self::Windows, Self::Linux, Self::MacOS];

    /// Token used in target ids.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Windows => "win",
            Self::Linux => "linux",
            Self::MacOS => "macos",
        }
    }

    /// The operating system this binary is running on, if it is one we build for.
    pub fn host() -> Option<Self> {
        if cfg!(target_os = "windows") {
            Some(Self::Windows)
        } else if cfg!(target_os = "macos") {
            Some(Self::MacOS)
        } else if cfg!(target_os = "linux") {
            Some(Self::Linux)
        } else {
            None
        }
    }
}

impl fmt::Display for OperatingSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperatingSystem {
    type Err = TargetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "win" | "windows" => Ok(Self::Windows),
            "linux" => Ok(Self::Linux),
            "macos" | "osx" => Ok(Self::MacOS),
            _ => Err(TargetError::UnknownOs(s.to_string())),
        }
    }
}

/// CPU architectures a package can be built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Architecture {
    /// 64-bit Intel/AMD
    X64,
    /// 32-bit Intel
    X86,
    /// 64-bit ARM
    Arm64,
    /// 32-bit ARMv7
    Arm7,
}

impl Architecture {
    /// Token used in target ids.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::X64 => "x64",
            Self::X86 => "x86",
            Self::Arm64 => "arm64",
            Self::Arm7 => "arm7",
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Architecture {
    type Err = TargetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "x64" => Ok(Self::X64),
            "x86" => Ok(Self::X86),
            "arm64" => Ok(Self::Arm64),
            "arm7" => Ok(Self::Arm7),
            _ => Err(TargetError::UnknownArch(s.to_string())),
        }
    }
}

/// Output package formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PackageFormat {
    /// Plain zip archive of the compiled output
    Zip,
    /// Windows installer
    Msi,
    /// Debian package
    Deb,
    /// Red Hat / Fedora package
    Rpm,
    /// Docker image
    Docker,
    /// macOS disk image
    Dmg,
    /// macOS installer package
    MacPkg,
}

impl PackageFormat {
    /// Token used in target ids.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Zip => "zip",
            Self::Msi => "msi",
            Self::Deb => "deb",
            Self::Rpm => "rpm",
            Self::Docker => "docker",
            Self::Dmg => "dmg",
            Self::MacPkg => "pkg",
        }
    }

    /// File extension of the produced package file.
    ///
    /// Docker builds produce an image reference file rather than a package.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Docker => "image",
            other => other.as_str(),
        }
    }

    /// Formats that can only be produced on a macOS host.
    pub fn is_macos_only(&self) -> bool {
        matches!(self, Self::Dmg | Self::MacPkg)
    }

    /// Formats that are built inside docker containers.
    pub fn requires_docker(&self) -> bool {
        matches!(self, Self::Deb | Self::Rpm | Self::Docker)
    }
}

impl fmt::Display for PackageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PackageFormat {
    type Err = TargetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "zip" => Ok(Self::Zip),
            "msi" => Ok(Self::Msi),
            "deb" => Ok(Self::Deb),
            "rpm" => Ok(Self::Rpm),
            "docker" => Ok(Self::Docker),
            "dmg" => Ok(Self::Dmg),
            "pkg" => Ok(Self::MacPkg),
            _ => Err(TargetError::UnknownFormat(s.to_string())),
        }
    }
}

/// One buildable artifact: an operating system, an architecture and a
/// package format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PackageTarget {
    /// Target operating system
    pub os: OperatingSystem,
    /// Target architecture
    pub arch: Architecture,
    /// Output package format
    pub format: PackageFormat,
}

impl PackageTarget {
    /// Create a target from its parts.
    pub const fn new(os: OperatingSystem, arch: Architecture, format: PackageFormat) -> Self {
        Self { os, arch, format }
    }

    /// The `{os}-{arch}` runtime the compiled binaries are shared by.
    pub fn runtime_id(&self) -> String {
        format!("{}-{}", self.os, self.arch)
    }

    /// The target id without the format: `{arch}-{os}`.
    pub fn platform_id(&self) -> String {
        format!("{}-{}", self.arch, self.os)
    }
}

impl fmt::Display for PackageTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}.{}", self.arch, self.os, self.format)
    }
}

impl FromStr for PackageTarget {
    type Err = TargetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim();
        let (platform, format) = raw
            .rsplit_once('.')
            .ok_or_else(|| TargetError::InvalidFormat(raw.to_string()))?;
        let (arch, os) = platform
            .split_once('-')
            .ok_or_else(|| TargetError::InvalidFormat(raw.to_string()))?;

        if arch.is_empty() || os.is_empty() || format.is_empty() {
            return Err(TargetError::InvalidFormat(raw.to_string()));
        }

        Ok(Self {
            os: os.parse()?,
            arch: arch.parse()?,
            format: format.parse()?,
        })
    }
}

impl Serialize for PackageTarget {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PackageTarget {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
