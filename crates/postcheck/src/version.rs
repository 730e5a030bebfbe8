//! Installed version information and data-version encoding.

use crate::CheckError;

/// Source of the versions the cluster is expected to converge on.
///
/// Both values describe the build being upgraded *to*, not whatever the
/// cluster currently reports.
pub trait VersionProvider {
    /// Software version expected in `min_observer_version`.
    fn cluster_version(&self) -> &str;

    /// Data version expected in `compatible` and the tenant markers.
    fn data_version(&self) -> &str;
}

/// Versions fixed at construction time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticVersions {
    cluster: String,
    data: String,
}

impl StaticVersions {
    /// Use the same string for the cluster and data version.
    pub fn new(version: impl Into<String>) -> Self {
        let version = version.into();
        Self {
            data: version.clone(),
            cluster: version,
        }
    }

    /// Use distinct cluster and data versions.
    pub fn with_data_version(cluster: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            cluster: cluster.into(),
            data: data.into(),
        }
    }
}

impl VersionProvider for StaticVersions {
    fn cluster_version(&self) -> &str {
        &self.cluster
    }

    fn data_version(&self) -> &str {
        &self.data
    }
}

/// Encode `major.minor.major_patch.minor_patch` into the integer form
/// stored in the tenant data-version markers.
///
/// Layout: `major << 32 | minor << 16 | major_patch << 8 | minor_patch`.
///
/// ```
/// use postcheck::encode_data_version;
///
/// assert_eq!(encode_data_version("4.2.1.0").unwrap(), (4 << 32) | (2 << 16) | (1 << 8));
/// assert!(encode_data_version("4.2.1").is_err());
/// ```
pub fn encode_data_version(version: &str) -> Result<u64, CheckError> {
    let invalid = |reason: String| CheckError::InvalidVersion {
        version: version.to_string(),
        reason,
    };

    let parts: Vec<&str> = version.trim().split('.').collect();
    if parts.len() != 4 {
        return Err(invalid(format!("expected 4 components, got {}", parts.len())));
    }

    const LIMITS: [(u64, &str); 4] = [
        (0xFFFF_FFFF, "major"),
        (0xFFFF, "minor"),
        (0xFF, "major_patch"),
        (0xFF, "minor_patch"),
    ];

    let mut fields = [0u64; 4];
    for (i, (part, (limit, name))) in parts.iter().zip(LIMITS).enumerate() {
        let value: u64 = part
            .parse()
            .map_err(|_| invalid(format!("{name} `{part}` is not a number")))?;
        if value > limit {
            return Err(invalid(format!("{name} {value} exceeds {limit:#x}")));
        }
        fields[i] = value;
    }

    Ok((fields[0] << 32) | (fields[1] << 16) | (fields[2] << 8) | fields[3])
}
