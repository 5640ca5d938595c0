//! Retention rules: which build serials to keep registered.

use std::fmt;
use std::num::NonZeroUsize;
use std::str::FromStr;

use serde::{Deserialize, Deserializer};
use syncimg_schema::ReleaseTag;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid keep rule '{0}': expected all, latest, current, n-<count> or <count>")]
pub struct InvalidKeepRule(pub String);

/// How many serials of one release tag to keep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepRule {
    All,
    Latest,
    /// The `k` greatest serials (`n-<k>`).
    Newest(NonZeroUsize),
}

impl FromStr for KeepRule {
    type Err = InvalidKeepRule;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rule = s.trim().to_ascii_lowercase();
        match rule.as_str() {
            "all" => Ok(Self::All),
            "latest" | "current" => Ok(Self::Latest),
            other => other
                .strip_prefix("n-")
                .unwrap_or(other)
                .parse::<NonZeroUsize>()
                .map(Self::Newest)
                .map_err(|_| InvalidKeepRule(s.to_string())),
        }
    }
}

impl fmt::Display for KeepRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("all"),
            Self::Latest => f.write_str("latest"),
            Self::Newest(k) => write!(f, "n-{k}"),
        }
    }
}

impl<'de> Deserialize<'de> for KeepRule {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Count(u64),
            Text(String),
        }

        let text = match Raw::deserialize(deserializer)? {
            Raw::Count(n) => n.to_string(),
            Raw::Text(s) => s,
        };
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// Serials to keep under `rule`: sorted ascending, duplicates removed.
///
/// Empty input gives empty output.
pub fn truncate<T: Ord + Clone>(serials: &[T], rule: KeepRule) -> Vec<T> {
    let mut sorted = serials.to_vec();
    sorted.sort();
    sorted.dedup();

    let keep = match rule {
        KeepRule::All => sorted.len(),
        KeepRule::Latest => 1,
        KeepRule::Newest(k) => k.get(),
    };
    let skip = sorted.len().saturating_sub(keep);
    sorted.split_off(skip)
}

/// Keep rules for dailies and milestones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub max_dailies: KeepRule,
    pub max_milestones: KeepRule,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_dailies: KeepRule::Latest,
            max_milestones: KeepRule::Latest,
        }
    }
}

impl RetentionPolicy {
    /// Milestone tags (release, alpha, beta, rc, with any `-suffix`) use
    /// `max_milestones`; everything else uses `max_dailies`.
    pub fn rule_for(&self, tag: &ReleaseTag) -> KeepRule {
        if tag.is_milestone() {
            self.max_milestones
        } else {
            self.max_dailies
        }
    }

    pub fn keep(&self, tag: &ReleaseTag, serials: &[String]) -> Vec<String> {
        truncate(serials, self.rule_for(tag))
    }

    /// Serials outside the keep set, ascending.
    pub fn retire(&self, tag: &ReleaseTag, serials: &[String]) -> Vec<String> {
        let keep = self.keep(tag, serials);
        let mut retired: Vec<String> = serials
            .iter()
            .filter(|s| !keep.contains(s))
            .cloned()
            .collect();
        retired.sort();
        retired.dedup();
        retired
    }
}
