//! Parsing the output of `list_cmd`.
//!
//! Each line names one registered image as `<tag> <build_serial> <arch>`.
//! If any line does not have exactly three fields the listing cannot be
//! trusted, and every image is then reported as listed so nothing gets
//! published twice.

use std::collections::BTreeSet;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteListing {
    entries: BTreeSet<(String, String, String)>,
    malformed: Vec<String>,
}

impl RemoteListing {
    pub fn parse(output: &str) -> Self {
        let mut listing = Self::default();
        for line in output.lines() {
            let fields: Vec<&str> = line.split_whitespace().collect();
            match fields.as_slice() {
                [] => {}
                [tag, serial, arch] => {
                    listing
                        .entries
                        .insert(((*tag).to_string(), (*serial).to_string(), (*arch).to_string()));
                }
                _ => listing.malformed.push(line.to_string()),
            }
        }
        listing
    }

    /// A listing that could not be obtained; everything counts as listed.
    pub fn unavailable(reason: &str) -> Self {
        Self {
            entries: BTreeSet::new(),
            malformed: vec![reason.to_string()],
        }
    }

    /// Whether the remote side reports `(tag, build_serial, arch)`.
    /// Always true for a malformed listing.
    pub fn is_listed(&self, tag: &str, build_serial: &str, arch: &str) -> bool {
        self.is_malformed()
            || self
                .entries
                .contains(&(tag.to_string(), build_serial.to_string(), arch.to_string()))
    }

    pub fn is_malformed(&self) -> bool {
        !self.malformed.is_empty()
    }

    pub fn malformed_lines(&self) -> &[String] {
        &self.malformed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_three_field_lines() {
        let listing = RemoteListing::parse("release 20120222 amd64\n\ndaily  20120301\ti386\n");
        assert_eq!(listing.len(), 2);
        assert!(listing.is_listed("release", "20120222", "amd64"));
        assert!(listing.is_listed("daily", "20120301", "i386"));
        assert!(!listing.is_listed("daily", "20120301", "amd64"));
        assert!(!listing.is_malformed());
    }

    #[test]
    fn malformed_line_lists_everything() {
        let listing = RemoteListing::parse("release 20120222 amd64\nERROR: cloud unreachable\n");
        assert!(listing.is_malformed());
        assert_eq!(listing.malformed_lines(), ["ERROR: cloud unreachable"]);
        assert!(listing.is_listed("daily", "1", "armhf"));
    }

    #[test]
    fn unavailable_lists_everything() {
        let listing = RemoteListing::unavailable("spawn failed");
        assert!(listing.is_listed("release", "20120222", "amd64"));
    }

    #[test]
    fn empty_output_lists_nothing() {
        let listing = RemoteListing::parse("");
        assert!(listing.is_empty());
        assert!(!listing.is_listed("release", "20120222", "amd64"));
    }
}
