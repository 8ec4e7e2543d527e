//! Broker API version parsing (`X-Broker-API-Version: 2.17`).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A `major.minor` broker API version.
///
/// Stored as a [`semver::Version`] with a zero patch component so ordering
/// follows semver rules.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ApiVersion(semver::Version);

impl ApiVersion {
    /// First version that supports binding rotation.
    pub const ROTATION: ApiVersion = ApiVersion::new(2, 17);

    pub const fn new(major: u64, minor: u64) -> Self {
        Self(semver::Version::new(major, minor, 0))
    }

    pub fn major(&self) -> u64 {
        self.0.major
    }

    pub fn minor(&self) -> u64 {
        self.0.minor
    }

    pub fn supports_rotation(&self) -> bool {
        *self >= Self::ROTATION
    }
}

impl Default for ApiVersion {
    fn default() -> Self {
        Self::new(2, 13)
    }
}

impl FromStr for ApiVersion {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        let trimmed = s.trim();
        if trimmed.split('.').count() != 2 {
            anyhow::bail!("invalid broker API version {trimmed:?}, expected major.minor");
        }
        let version = semver::Version::parse(&format!("{trimmed}.0"))
            .map_err(|e| anyhow::anyhow!("invalid broker API version {trimmed:?}: {e}"))?;
        Ok(Self(version))
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.0.major, self.0.minor)
    }
}

impl Serialize for ApiVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ApiVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_major_minor() {
        let v: ApiVersion = "2.17".parse().unwrap();
        assert_eq!(v.major(), 2);
        assert_eq!(v.minor(), 17);
        assert_eq!(v.to_string(), "2.17");
    }

    #[test]
    fn orders_numerically() {
        let old: ApiVersion = "2.9".parse().unwrap();
        let new: ApiVersion = "2.13".parse().unwrap();
        assert!(old < new);
        assert!(!new.supports_rotation());
        assert!("2.17".parse::<ApiVersion>().unwrap().supports_rotation());
    }

    #[test]
    fn rejects_garbage() {
        assert!("2".parse::<ApiVersion>().is_err());
        assert!("2.x".parse::<ApiVersion>().is_err());
        assert!("2.17.1".parse::<ApiVersion>().is_err());
    }
}
