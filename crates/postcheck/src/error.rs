//! Error types for the check sequence.

use std::time::Duration;

use thiserror::Error;

/// Broad classification of a [`CheckError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A polling loop exhausted its budget without observing convergence.
    Timeout,
    /// The catalog state is contradictory or incomplete.
    Consistency,
    /// The catalog could not be reached or rejected a statement.
    Connection,
    /// A version string, polling policy or other input could not be interpreted.
    InvalidInput,
}

/// Failure of a post-upgrade check or capability enablement.
#[derive(Debug, Error)]
pub enum CheckError {
    /// A polled condition did not hold before the deadline.
    #[error("timed out after {}s waiting for {what} (last observed: {last_observed})", waited.as_secs())]
    Timeout {
        what: String,
        waited: Duration,
        last_observed: String,
    },

    /// No non-standby tenant exists in the cluster.
    #[error("no active (non-standby) tenants found")]
    NoActiveTenants,

    /// The aggregate count of data-version markers does not match the tenant set.
    #[error(
        "target_data_version/current_data_version not match with {data_version}, \
         tenant_cnt: {tenant_count}, expected_cnt: {expected}, result_cnt: {observed}"
    )]
    MarkerCountMismatch {
        data_version: String,
        tenant_count: usize,
        expected: i64,
        observed: i64,
    },

    /// A query returned a result of the wrong shape.
    #[error("unexpected result for `{query}`: {detail}")]
    UnexpectedResult { query: String, detail: String },

    /// A version string is not `major.minor.major_patch.minor_patch`.
    #[error("invalid version `{version}`: {reason}")]
    InvalidVersion { version: String, reason: String },

    /// A polling policy that would never back off.
    #[error("invalid polling policy for {what}: {reason}")]
    InvalidPolicy { what: String, reason: String },

    /// The catalog executor failed. Never retried.
    #[error("catalog executor failed: {0}")]
    Connection(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl CheckError {
    /// Wrap a backend error as a connection failure.
    pub fn connection<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Connection(Box::new(err))
    }

    /// Classify the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::NoActiveTenants
            | Self::MarkerCountMismatch { .. }
            | Self::UnexpectedResult { .. } => ErrorKind::Consistency,
            Self::InvalidVersion { .. } | Self::InvalidPolicy { .. } => ErrorKind::InvalidInput,
            Self::Connection(_) => ErrorKind::Connection,
        }
    }
}
