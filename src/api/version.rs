//! Packed semantic API versions

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// API version packed as `major << 16 | minor << 8 | patch`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApiVersion(pub u32);

const MAJOR_MINOR_MASK: u32 = 0xffff00;

impl ApiVersion {
    pub const fn new(major: u8, minor: u8, patch: u8) -> Self {
        Self(((major as u32) << 16) | ((minor as u32) << 8) | patch as u32)
    }

    pub fn major(self) -> u32 {
        (self.0 >> 16) & 0xff
    }

    pub fn minor(self) -> u32 {
        (self.0 >> 8) & 0xff
    }

    pub fn patch(self) -> u32 {
        self.0 & 0xff
    }

    /// True when both versions share major and minor; patch is ignored
    pub fn eq_major_minor(self, other: ApiVersion) -> bool {
        self.0 & MAJOR_MINOR_MASK == other.0 & MAJOR_MINOR_MASK
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major(), self.minor(), self.patch())
    }
}

/// Version of the manager API
pub const MANAGER_API_VERSION: ApiVersion = ApiVersion::new(1, 0, 0);

/// Version of the provider API a manager expects to talk to
pub const PROVIDER_API_VERSION: ApiVersion = ApiVersion::new(1, 0, 0);

/// Version payload returned by `GET /v0/version`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionInfo {
    pub version: String,
    pub api_version: ApiVersion,
}

impl VersionInfo {
    pub fn new(api_version: ApiVersion) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            api_version,
        }
    }
}

/// Session payload returned by `GET /v0/session`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session: Uuid,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packing() {
        let v = ApiVersion::new(1, 2, 3);
        assert_eq!(v.0, 0x010203);
        assert_eq!(v.to_string(), "1.2.3");
    }

    #[test]
    fn test_eq_major_minor_ignores_patch() {
        assert!(ApiVersion::new(1, 0, 0).eq_major_minor(ApiVersion::new(1, 0, 7)));
        assert!(!ApiVersion::new(1, 0, 0).eq_major_minor(ApiVersion::new(1, 1, 0)));
        assert!(!ApiVersion::new(1, 0, 0).eq_major_minor(ApiVersion::new(2, 0, 0)));
    }
}
