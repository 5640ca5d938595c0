//! Release tag classification.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Classification of a build inside a stream.
///
/// The catalog uses a small controlled vocabulary but free-form tags occur;
/// anything unrecognised is kept verbatim in [`ReleaseTag::Other`]. Suffixed
/// tags such as `beta-2` keep their full text but classify by the part before
/// the first `-`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ReleaseTag {
    /// A final release.
    Release,
    /// An alpha milestone.
    Alpha(String),
    /// A beta milestone.
    Beta(String),
    /// A release candidate.
    Rc(String),
    /// A daily build.
    Daily,
    /// Any other tag, kept verbatim.
    Other(String),
}

impl ReleaseTag {
    /// Classify a raw tag string.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        let base = raw.split('-').next().unwrap_or(raw);
        match base {
            "release" if base.len() == raw.len() => Self::Release,
            "daily" if base.len() == raw.len() => Self::Daily,
            "alpha" => Self::Alpha(raw.to_string()),
            "beta" => Self::Beta(raw.to_string()),
            "rc" => Self::Rc(raw.to_string()),
            _ => Self::Other(raw.to_string()),
        }
    }

    /// The tag exactly as it appears in the catalog.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Release => "release",
            Self::Daily => "daily",
            Self::Alpha(s) | Self::Beta(s) | Self::Rc(s) | Self::Other(s) => s,
        }
    }

    /// Milestones (release, alpha, beta, rc) fall under the `max_milestones`
    /// retention rule; everything else under `max_dailies`.
    pub fn is_milestone(&self) -> bool {
        let base = self.as_str().split('-').next().unwrap_or_default();
        matches!(base, "release" | "alpha" | "beta" | "rc")
    }

    /// Alpha, beta and rc builds.
    pub fn is_pre_release(&self) -> bool {
        matches!(self, Self::Alpha(_) | Self::Beta(_) | Self::Rc(_))
    }
}

impl fmt::Display for ReleaseTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReleaseTag {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl From<&str> for ReleaseTag {
    fn from(s: &str) -> Self {
        Self::parse(s)
    }
}

impl Serialize for ReleaseTag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ReleaseTag {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse(&raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn milestone_by_prefix() {
        assert!(ReleaseTag::parse("release").is_milestone());
        assert!(ReleaseTag::parse("beta-2").is_milestone());
        assert!(ReleaseTag::parse("rc").is_milestone());
        assert!(!ReleaseTag::parse("daily").is_milestone());
        assert!(!ReleaseTag::parse("nightly").is_milestone());
        assert!(ReleaseTag::parse("release-2").is_milestone());
    }

    #[test]
    fn pre_release() {
        assert!(ReleaseTag::parse("alpha-1").is_pre_release());
        assert!(!ReleaseTag::parse("release").is_pre_release());
        assert!(!ReleaseTag::parse("daily").is_pre_release());
    }

    #[test]
    fn keeps_original_text() {
        assert_eq!(ReleaseTag::parse("beta-2").as_str(), "beta-2");
        assert_eq!(ReleaseTag::parse("Custom").to_string(), "Custom");
        assert_eq!(ReleaseTag::parse("release"), ReleaseTag::Release);
    }

    #[test]
    fn json_is_plain_string() {
        let tag: ReleaseTag = serde_json::from_str("\"rc-1\"").unwrap();
        assert!(matches!(tag, ReleaseTag::Rc(_)));
        assert_eq!(serde_json::to_string(&tag).unwrap(), "\"rc-1\"");
    }
}
