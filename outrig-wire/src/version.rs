use std::fmt;
use std::str::FromStr;

/// The "core" `major.minor.patch` triple of a semantic version, used by the
/// handshake to decide whether a client and server speak a compatible
/// protocol. Pre-release and build-metadata suffixes are parsed but ignored
/// for comparison, matching how most semver implementations treat
/// compatibility checks between a client and a server released from the
/// same major line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct SdkVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl SdkVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self { major, minor, patch }
    }

    /// Two versions are compatible if they share a major version. Major
    /// version 0 is treated as unstable, so 0.x releases must match minor
    /// as well, mirroring the common semver convention for pre-1.0 crates.
    pub fn is_compatible_with(&self, other: &SdkVersion) -> bool {
        if self.major != other.major {
            return false;
        }
        if self.major == 0 {
            return self.minor == other.minor;
        }
        true
    }
}

impl fmt::Display for SdkVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for SdkVersion {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let core = s.split(['-', '+']).next().unwrap_or(s);
        let mut parts = core.split('.');
        let mut next = |part: Option<&str>| -> Result<u32, crate::Error> {
            part.and_then(|p| p.parse().ok())
                .ok_or_else(|| crate::Error::InvalidVersion(s.to_string()))
        };
        let major = next(parts.next())?;
        let minor = next(parts.next())?;
        let patch = next(parts.next())?;
        Ok(Self { major, minor, patch })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_core_triple() {
        assert_eq!(
            "1.2.3".parse::<SdkVersion>().unwrap(),
            SdkVersion::new(1, 2, 3)
        );
    }

    #[test]
    fn ignores_prerelease_suffix() {
        assert_eq!(
            "1.2.3-rc.1+build.7".parse::<SdkVersion>().unwrap(),
            SdkVersion::new(1, 2, 3)
        );
    }

    #[test]
    fn rejects_malformed_input() {
        assert!("1.2".parse::<SdkVersion>().is_err());
        assert!("x.y.z".parse::<SdkVersion>().is_err());
    }

    #[test]
    fn major_mismatch_is_incompatible() {
        assert!(!SdkVersion::new(1, 0, 0).is_compatible_with(&SdkVersion::new(2, 0, 0)));
    }

    #[test]
    fn pre_1_0_requires_matching_minor() {
        assert!(!SdkVersion::new(0, 1, 0).is_compatible_with(&SdkVersion::new(0, 2, 0)));
        assert!(SdkVersion::new(0, 1, 0).is_compatible_with(&SdkVersion::new(0, 1, 5)));
    }

    #[test]
    fn post_1_0_minor_patch_drift_is_compatible() {
        assert!(SdkVersion::new(1, 0, 0).is_compatible_with(&SdkVersion::new(1, 9, 2)));
    }
}
