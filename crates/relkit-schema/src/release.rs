//! Release identity: channel, four-part version and release date.

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Date format used for release names, URLs and git stash labels.
pub const RELEASE_DATE_FORMAT: &str = "%Y-%m-%d";

/// Errors produced while parsing release identity values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReleaseParseError {
    /// The version string is not 2 to 4 dot-separated unsigned integers.
    #[error("Invalid version '{0}': expected 2 to 4 dot-separated numbers")]
    InvalidVersion(String),

    /// The channel name is not one of the known channels.
    #[error("Unknown release channel '{0}'")]
    UnknownChannel(String),
}

/// Release maturity track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReleaseChannel {
    /// General availability
    Stable,
    /// Feature complete, pre-release
    Beta,
    /// Early features, may be unstable
    Experimental,
    /// Latest build from the main line
    #[default]
    Canary,
}

impl ReleaseChannel {
    /// Lowercase name, as embedded in URLs and version metadata.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stable => "stable",
            Self::Beta => "beta",
            Self::Experimental => "experimental",
            Self::Canary => "canary",
        }
    }
}

impl fmt::Display for ReleaseChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReleaseChannel {
    type Err = ReleaseParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "stable" => Ok(Self::Stable),
            "beta" => Ok(Self::Beta),
            "experimental" => Ok(Self::Experimental),
            "canary" => Ok(Self::Canary),
            _ => Err(ReleaseParseError::UnknownChannel(s.to_string())),
        }
    }
}

/// Ordered four-part version `major.minor.build.revision`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ReleaseVersion {
    /// Major component
    pub major: u32,
    /// Minor component
    pub minor: u32,
    /// Build component
    pub build: u32,
    /// Revision component
    pub revision: u32,
}

impl ReleaseVersion {
    /// Create a version from its four components.
    pub const fn new(major: u32, minor: u32, build: u32, revision: u32) -> Self {
        Self {
            major,
            minor,
            build,
            revision,
        }
    }

    /// Same major/minor/build with a different revision.
    pub const fn with_revision(self, revision: u32) -> Self {
        Self { revision, ..self }
    }
}

impl fmt::Display for ReleaseVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.major, self.minor, self.build, self.revision
        )
    }
}

impl FromStr for ReleaseVersion {
    type Err = ReleaseParseError;

    /// Parse `a.b`, `a.b.c` or `a.b.c.d`; missing components are zero.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ReleaseParseError::InvalidVersion(s.to_string());

        let parts: Vec<&str> = s.trim().split('.').collect();
        if !(2..=4).contains(&parts.len()) {
            return Err(invalid());
        }

        let mut nums = [0u32; 4];
        for (slot, part) in nums.iter_mut().zip(&parts) {
            if part.is_empty() || !part.chars().all(|c| c.is_ascii_digit()) {
                return Err(invalid());
            }
            *slot = part.parse().map_err(|_| invalid())?;
        }

        Ok(Self::new(nums[0], nums[1], nums[2], nums[3]))
    }
}

impl Serialize for ReleaseVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ReleaseVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Immutable identity of one release run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseDescriptor {
    /// Version being released
    pub version: ReleaseVersion,
    /// Channel the release is published on
    pub channel: ReleaseChannel,
    /// Release date
    pub timestamp: NaiveDate,
}

impl ReleaseDescriptor {
    /// Create a descriptor.
    pub fn new(version: ReleaseVersion, channel: ReleaseChannel, timestamp: NaiveDate) -> Self {
        Self {
            version,
            channel,
            timestamp,
        }
    }

    /// Human identifier: `{version}_{channel}_{yyyy-MM-dd}`.
    pub fn release_name(&self) -> String {
        format!("{}_{}_{}", self.version, self.channel, self.date_string())
    }

    /// Release date as `yyyy-MM-dd`.
    pub fn date_string(&self) -> String {
        self.timestamp.format(RELEASE_DATE_FORMAT).to_string()
    }
}
