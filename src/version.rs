//! Server version as reported by `SELECT version()`.

use std::fmt;

use crate::error::{ChError, ChResult};

/// A four-component server version.
///
/// Ordering is lexicographic over `(major, minor, patch, build)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ServerVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub build: u32,
}

impl ServerVersion {
    pub const fn new(major: u32, minor: u32, patch: u32, build: u32) -> Self {
        Self {
            major,
            minor,
            patch,
            build,
        }
    }

    /// Parse a version string such as `"21.8.4.51"`.
    ///
    /// Empty pieces are skipped and pieces that are not numbers count as 0.
    /// Components past the fourth are ignored.
    pub fn parse(text: &str) -> ChResult<Self> {
        let parts: Vec<u32> = text
            .trim()
            .split('.')
            .filter(|s| !s.is_empty())
            .map(|s| s.trim().parse().unwrap_or(0))
            .collect();

        match parts.first() {
            None | Some(0) => Err(ChError::InvalidVersion(text.to_string())),
            Some(_) => {
                let at = |i: usize| parts.get(i).copied().unwrap_or(0);
                Ok(Self::new(at(0), at(1), at(2), at(3)))
            }
        }
    }
}

impl fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}.{}", self.major, self.minor, self.patch, self.build)
    }
}

impl std::str::FromStr for ServerVersion {
    type Err = ChError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full() {
        let v = ServerVersion::parse("19.11.3.11\n").unwrap();
        assert_eq!(v, ServerVersion::new(19, 11, 3, 11));
        assert_eq!(v.to_string(), "19.11.3.11");
    }

    #[test]
    fn test_parse_missing_components() {
        assert_eq!(ServerVersion::parse("21.3").unwrap(), ServerVersion::new(21, 3, 0, 0));
        assert_eq!(ServerVersion::parse("22..1").unwrap(), ServerVersion::new(22, 1, 0, 0));
    }

    #[test]
    fn test_parse_non_numeric_piece() {
        let v = ServerVersion::parse("23.8.beta.1.9").unwrap();
        assert_eq!(v, ServerVersion::new(23, 8, 0, 1));
    }

    #[test]
    fn test_parse_invalid() {
        for bad in ["", "   ", "abc", "0.1.2", "..."] {
            assert!(
                matches!(ServerVersion::parse(bad), Err(ChError::InvalidVersion(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_ordering_is_lexicographic() {
        assert!(ServerVersion::new(19, 11, 3, 12) > ServerVersion::new(19, 11, 3, 11));
        assert!(ServerVersion::new(20, 0, 0, 0) > ServerVersion::new(19, 99, 99, 99));
        assert!(ServerVersion::new(21, 1, 2, 1) > ServerVersion::new(21, 1, 2, 0));
    }
}
