//! Release version triples.
//!
//! Versions are parsed from dotted `MAJOR.MINOR.PATCH` strings as they appear in
//! the release manifest. The patch segment may carry a suffix (`5-beta`,
//! `3rc1`); only its leading digits are significant.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Errors produced while parsing a version string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VersionParseError {
    #[error("Version must have three dot-separated parts: '{0}'")]
    WrongPartCount(String),

    #[error("Invalid {part} component in version '{input}'")]
    InvalidComponent { part: &'static str, input: String },
}

/// A comparable `(major, minor, patch)` triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl Version {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Parses `"M.N.P[suffix]"`.
    pub fn parse(input: &str) -> Result<Self, VersionParseError> {
        let trimmed = input.trim();
        let parts: Vec<&str> = trimmed.splitn(3, '.').collect();
        let [major, minor, patch] = parts.as_slice() else {
            return Err(VersionParseError::WrongPartCount(input.to_string()));
        };

        let component = |part: &'static str, value: &str| {
            value
                .parse::<u32>()
                .map_err(|_| VersionParseError::InvalidComponent {
                    part,
                    input: input.to_string(),
                })
        };

        // Keep only the leading digits of the patch ("5-beta" -> "5").
        let patch_digits = patch
            .find(|c: char| !c.is_ascii_digit())
            .map_or(*patch, |end| &patch[..end]);

        Ok(Self {
            major: component("major", major)?,
            minor: component("minor", minor)?,
            patch: component("patch", patch_digits)?,
        })
    }

    /// Returns true if `other` is strictly newer than `self`.
    pub fn is_older_than(&self, other: &Version) -> bool {
        self < other
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch).cmp(&(other.major, other.minor, other.patch))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl FromStr for Version {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[test]
    fn test_parse_plain() {
        assert_eq!(v("1.2.3"), Version::new(1, 2, 3));
        assert_eq!(v(" 10.0.42 "), Version::new(10, 0, 42));
    }

    #[test]
    fn test_parse_patch_suffix() {
        assert_eq!(v("1.0.5-beta"), Version::new(1, 0, 5));
        assert_eq!(v("2.3.7rc1"), Version::new(2, 3, 7));
        assert_eq!(v("2.3.7.1"), Version::new(2, 3, 7));
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            Version::parse("1.2"),
            Err(VersionParseError::WrongPartCount(_))
        ));
        assert!(matches!(
            Version::parse("a.2.3"),
            Err(VersionParseError::InvalidComponent { part: "major", .. })
        ));
        assert!(matches!(
            Version::parse("1.x.3"),
            Err(VersionParseError::InvalidComponent { part: "minor", .. })
        ));
        assert!(matches!(
            Version::parse("1.2.beta"),
            Err(VersionParseError::InvalidComponent { part: "patch", .. })
        ));
        assert!(Version::parse("").is_err());
    }

    #[test]
    fn test_ordering_is_lexicographic() {
        assert!(v("1.2.3") < v("1.3.0"));
        assert!(v("1.3.0") < v("2.0.0"));
        assert!(v("1.10.0") > v("1.9.9"));
        assert_eq!(v("1.0.5-beta").cmp(&v("1.0.5")), Ordering::Equal);
    }

    #[test]
    fn test_ordering_matches_tuple_comparison() {
        let samples = ["0.0.1", "0.1.0", "1.0.0", "1.0.10", "1.2.0", "2.0.4", "2.1.0"];
        for a in samples {
            for b in samples {
                let (va, vb) = (v(a), v(b));
                assert_eq!(
                    va.cmp(&vb),
                    (va.major, va.minor, va.patch).cmp(&(vb.major, vb.minor, vb.patch)),
                    "{a} vs {b}"
                );
            }
        }
    }

    #[test]
    fn test_newer_release_detected() {
        let running = v("2.0.4");
        let released = v("2.1.0");
        assert!(running.is_older_than(&released));
        assert!(!released.is_older_than(&running));
        assert!(!running.is_older_than(&running));
    }

    #[test]
    fn test_display() {
        assert_eq!(v("1.0.5-beta").to_string(), "1.0.5");
    }
}
