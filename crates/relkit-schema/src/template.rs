//! URL templates with a closed set of `${NAME}` placeholders.
//!
//! Templates are parsed once (at configuration load) into literal and
//! placeholder segments, so an unknown or unterminated placeholder is
//! rejected up front instead of silently surviving into a published URL.

use crate::release::ReleaseDescriptor;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors produced while parsing a URL template.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    /// `${...}` names something outside the placeholder set.
    #[error("Unknown placeholder '${{{name}}}' in template '{template}'")]
    UnknownPlaceholder {
        /// Placeholder name as written
        name: String,
        /// Full template text
        template: String,
    },

    /// `${` without a closing brace.
    #[error("Unterminated placeholder in template '{0}'")]
    Unterminated(String),
}

/// The placeholders a template may reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Placeholder {
    /// `${RELEASE_TYPE}`: lowercase channel name
    ReleaseType,
    /// `${RELEASE_VERSION}`: four-part version
    ReleaseVersion,
    /// `${RELEASE_TIMESTAMP}`: `yyyy-MM-dd`
    ReleaseTimestamp,
    /// `${FILENAME}`: file name of the published artifact
    Filename,
}

impl Placeholder {
    /// Name as written between `${` and `}`.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ReleaseType => "RELEASE_TYPE",
            Self::ReleaseVersion => "RELEASE_VERSION",
            Self::ReleaseTimestamp => "RELEASE_TIMESTAMP",
            Self::Filename => "FILENAME",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        match name {
            "RELEASE_TYPE" => Some(Self::ReleaseType),
            "RELEASE_VERSION" => Some(Self::ReleaseVersion),
            "RELEASE_TIMESTAMP" => Some(Self::ReleaseTimestamp),
            "FILENAME" => Some(Self::Filename),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder(Placeholder),
}

/// Values substituted into a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateValues {
    /// Channel name
    pub release_type: String,
    /// Version string
    pub release_version: String,
    /// Date string
    pub release_timestamp: String,
    /// Artifact file name
    pub filename: String,
}

impl TemplateValues {
    /// Values for one artifact of a release.
    pub fn for_release(release: &ReleaseDescriptor, filename: impl Into<String>) -> Self {
        Self {
            release_type: release.channel.to_string(),
            release_version: release.version.to_string(),
            release_timestamp: release.date_string(),
            filename: filename.into(),
        }
    }

    fn get(&self, placeholder: Placeholder) -> &str {
        match placeholder {
            Placeholder::ReleaseType => &self.release_type,
            Placeholder::ReleaseVersion => &self.release_version,
            Placeholder::ReleaseTimestamp => &self.release_timestamp,
            Placeholder::Filename => &self.filename,
        }
    }
}

/// A parsed URL template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl UrlTemplate {
    /// Parse a template string.
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError`] for unknown or unterminated placeholders.
    pub fn parse(template: &str) -> Result<Self, TemplateError> {
        let mut segments = Vec::new();
        let mut rest = template;

        while let Some(start) = rest.find("${") {
            if start > 0 {
                segments.push(Segment::Literal(rest[..start].to_string()));
            }
            let after = &rest[start + 2..];
            let end = after
                .find('}')
                .ok_or_else(|| TemplateError::Unterminated(template.to_string()))?;
            let name = &after[..end];
            let placeholder =
                Placeholder::from_name(name).ok_or_else(|| TemplateError::UnknownPlaceholder {
                    name: name.to_string(),
                    template: template.to_string(),
                })?;
            segments.push(Segment::Placeholder(placeholder));
            rest = &after[end + 1..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_string()));
        }

        Ok(Self {
            source: template.to_string(),
            segments,
        })
    }

    /// Substitute every placeholder.
    pub fn render(&self, values: &TemplateValues) -> String {
        let mut out = String::with_capacity(self.source.len() + 32);
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder(p) => out.push_str(values.get(*p)),
            }
        }
        out
    }

    /// Placeholders referenced by this template, in order.
    pub fn placeholders(&self) -> impl Iterator<Item = Placeholder> + '_ {
        self.segments.iter().filter_map(|s| match s {
            Segment::Placeholder(p) => Some(*p),
            Segment::Literal(_) => None,
        })
    }

    /// The template text as configured.
    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl fmt::Display for UrlTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl FromStr for UrlTemplate {
    type Err = TemplateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for UrlTemplate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.source)
    }
}

impl<'de> Deserialize<'de> for UrlTemplate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values() -> TemplateValues {
        TemplateValues {
            release_type: "beta".into(),
            release_version: "2.0.0.7".into(),
            release_timestamp: "2024-01-02".into(),
            filename: "app.zip".into(),
        }
    }

    #[test]
    fn renders_all_placeholders() {
        let t = UrlTemplate::parse(
            "https://cdn.example.com/${RELEASE_TYPE}/${RELEASE_VERSION}_${RELEASE_TIMESTAMP}/${FILENAME}",
        )
        .unwrap();
        assert_eq!(
            t.render(&values()),
            "https://cdn.example.com/beta/2.0.0.7_2024-01-02/app.zip"
        );
        assert_eq!(t.placeholders().count(), 4);
    }

    #[test]
    fn literal_only_template() {
        let t = UrlTemplate::parse("https://example.com/static").unwrap();
        assert_eq!(t.render(&values()), "https://example.com/static");
    }

    #[test]
    fn substituted_values_are_not_rescanned() {
        let mut v = values();
        v.filename = "${RELEASE_TYPE}.zip".into();
        let t = UrlTemplate::parse("${FILENAME}").unwrap();
        assert_eq!(t.render(&v), "${RELEASE_TYPE}.zip");
    }

    #[test]
    fn unknown_placeholder_is_rejected() {
        let err = UrlTemplate::parse("https://x/${RELEASE_KIND}/a").unwrap_err();
        assert_eq!(
            err,
            TemplateError::UnknownPlaceholder {
                name: "RELEASE_KIND".into(),
                template: "https://x/${RELEASE_KIND}/a".into(),
            }
        );
    }

    #[test]
    fn unterminated_placeholder_is_rejected() {
        assert!(matches!(
            UrlTemplate::parse("https://x/${FILENAME"),
            Err(TemplateError::Unterminated(_))
        ));
    }

    #[test]
    fn dollar_without_brace_is_literal() {
        let t = UrlTemplate::parse("https://x/$FILENAME").unwrap();
        assert_eq!(t.render(&values()), "https://x/$FILENAME");
    }
}
