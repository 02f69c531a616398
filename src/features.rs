//! Server capabilities derived from the server version.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use crate::version::ServerVersion;

/// Bitset of capabilities a server version supports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct FeatureFlags(u32);

impl FeatureFlags {
    /// Query parameters can be sent as `param_<name>` URL arguments.
    pub const HTTP_PARAMETERS: Self = Self(1);
    pub const DATETIME64: Self = Self(1 << 1);
    /// SQL can be passed in the `query` URL argument alongside a body.
    pub const INLINE_QUERY: Self = Self(1 << 2);
    pub const DECIMAL: Self = Self(1 << 3);
    pub const IPV6: Self = Self(1 << 4);
    pub const UUID_PARAMETERS: Self = Self(1 << 5);
    pub const MAP: Self = Self(1 << 6);
    pub const BOOL: Self = Self(1 << 7);

    const NAMES: [(Self, &'static str); 8] = [
        (Self::HTTP_PARAMETERS, "http_parameters"),
        (Self::DATETIME64, "datetime64"),
        (Self::INLINE_QUERY, "inline_query"),
        (Self::DECIMAL, "decimal"),
        (Self::IPV6, "ipv6"),
        (Self::UUID_PARAMETERS, "uuid_parameters"),
        (Self::MAP, "map"),
        (Self::BOOL, "bool"),
    ];

    /// Version thresholds; a flag is set when the server is strictly newer.
    const THRESHOLDS: [(ServerVersion, Self); 8] = [
        (ServerVersion::new(19, 11, 3, 11), Self::HTTP_PARAMETERS),
        (ServerVersion::new(20, 1, 2, 4), Self::DATETIME64),
        (ServerVersion::new(20, 5, 0, 0), Self::INLINE_QUERY),
        (ServerVersion::new(20, 0, 0, 0), Self::DECIMAL),
        (ServerVersion::new(20, 0, 0, 0), Self::IPV6),
        (ServerVersion::new(21, 0, 0, 0), Self::UUID_PARAMETERS),
        (ServerVersion::new(21, 1, 2, 0), Self::MAP),
        (ServerVersion::new(21, 12, 0, 0), Self::BOOL),
    ];

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub fn for_version(version: ServerVersion) -> Self {
        Self::THRESHOLDS
            .iter()
            .filter(|(threshold, _)| version > *threshold)
            .fold(Self::empty(), |acc, (_, flag)| acc | *flag)
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Names of the set flags, in declaration order.
    pub fn iter_names(self) -> impl Iterator<Item = &'static str> {
        Self::NAMES
            .into_iter()
            .filter(move |(flag, _)| self.contains(*flag))
            .map(|(_, name)| name)
    }
}

impl BitOr for FeatureFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for FeatureFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for FeatureFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter_names().collect();
        if names.is_empty() {
            write!(f, "(none)")
        } else {
            write!(f, "{}", names.join(" | "))
        }
    }
}
