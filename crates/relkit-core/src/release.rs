//! Choosing the version of a release run.

use chrono::NaiveDate;
use relkit_schema::{ReleaseChannel, ReleaseDescriptor, ReleaseParseError, ReleaseVersion};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// `major.minor.build` prefix used for counter-derived versions.
pub const DEFAULT_BASE_VERSION: ReleaseVersion = ReleaseVersion::new(2, 0, 0, 0);

/// Errors raised while determining the release version.
#[derive(Error, Debug)]
pub enum ReleaseError {
    /// No override was given and there is no counter file.
    #[error("Version counter file not found: {}", .0.display())]
    CounterMissing(PathBuf),

    /// The counter file does not hold a non-negative integer.
    #[error("Version counter file {} does not contain a number: '{content}'", .path.display())]
    InvalidCounter {
        /// Counter file path
        path: PathBuf,
        /// Trimmed file content
        content: String,
    },

    /// The override string is not a valid version.
    #[error(transparent)]
    InvalidVersion(#[from] ReleaseParseError),

    /// The counter file could not be read or written.
    #[error("IO error on version counter {}: {source}", .path.display())]
    Io {
        /// Counter file path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
}

/// Read the integer stored in the counter file.
///
/// # Errors
///
/// Returns [`ReleaseError::CounterMissing`] or [`ReleaseError::InvalidCounter`].
pub fn read_counter(counter_file: &Path) -> Result<u32, ReleaseError> {
    let raw = match std::fs::read_to_string(counter_file) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ReleaseError::CounterMissing(counter_file.to_path_buf()));
        }
        Err(source) => {
            return Err(ReleaseError::Io {
                path: counter_file.to_path_buf(),
                source,
            });
        }
    };
    let trimmed = raw.trim();
    trimmed.parse().map_err(|_| ReleaseError::InvalidCounter {
        path: counter_file.to_path_buf(),
        content: trimmed.to_string(),
    })
}

/// Persist a new counter value.
///
/// # Errors
///
/// Returns [`ReleaseError::Io`] if the file cannot be written.
pub fn write_counter(counter_file: &Path, value: u32) -> Result<(), ReleaseError> {
    std::fs::write(counter_file, value.to_string()).map_err(|source| ReleaseError::Io {
        path: counter_file.to_path_buf(),
        source,
    })
}

/// Record `revision` as used, never moving the counter backwards.
///
/// A missing counter file counts as zero. Returns the stored value.
///
/// # Errors
///
/// Returns [`ReleaseError::InvalidCounter`] or [`ReleaseError::Io`].
pub fn advance_counter(counter_file: &Path, revision: u32) -> Result<u32, ReleaseError> {
    let current = match read_counter(counter_file) {
        Ok(n) => n,
        Err(ReleaseError::CounterMissing(_)) => 0,
        Err(e) => return Err(e),
    };
    let value = current.max(revision);
    write_counter(counter_file, value)?;
    Ok(value)
}

/// Next release from the counter file: `base.major.base.minor.base.build.(n+1)`.
///
/// The counter file is left untouched.
///
/// # Errors
///
/// Returns [`ReleaseError::CounterMissing`] or [`ReleaseError::InvalidCounter`]
/// (an integer that would overflow counts as invalid).
pub fn from_increment(
    channel: ReleaseChannel,
    counter_file: &Path,
    base: ReleaseVersion,
    today: NaiveDate,
) -> Result<ReleaseDescriptor, ReleaseError> {
    let current = read_counter(counter_file)?;
    let next = current
        .checked_add(1)
        .ok_or_else(|| ReleaseError::InvalidCounter {
            path: counter_file.to_path_buf(),
            content: current.to_string(),
        })?;
    Ok(ReleaseDescriptor::new(base.with_revision(next), channel, today))
}

/// Release with an explicit version string.
///
/// # Errors
///
/// Returns [`ReleaseError::InvalidVersion`] unless `version` is 2 to 4
/// dot-separated unsigned integers.
pub fn from_override(
    channel: ReleaseChannel,
    version: &str,
    today: NaiveDate,
) -> Result<ReleaseDescriptor, ReleaseError> {
    Ok(ReleaseDescriptor::new(version.parse()?, channel, today))
}

/// Use the override when one is given (non-blank), otherwise the counter.
///
/// # Errors
///
/// See [`from_override`] and [`from_increment`].
pub fn resolve(
    channel: ReleaseChannel,
    version_override: Option<&str>,
    counter_file: &Path,
    base: ReleaseVersion,
    today: NaiveDate,
) -> Result<ReleaseDescriptor, ReleaseError> {
    match version_override.map(str::trim).filter(|v| !v.is_empty()) {
        Some(version) => from_override(channel, version, today),
        None => from_increment(channel, counter_file, base, today),
    }
}
