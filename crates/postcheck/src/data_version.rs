//! Data-version convergence across the cluster and its active tenants.

use std::time::Duration;

use tracing::{info, warn};

use crate::catalog::{quote, single_count};
use crate::{
    encode_data_version, CatalogExecutor, CheckError, Clock, ParameterSyncWaiter, SyncPolicy,
    VersionProvider,
};

/// Cluster parameter carrying the data version every node is compatible with.
pub(crate) const COMPATIBLE_PARAMETER: &str = "compatible";

/// Core table holding each tenant's data-version markers.
pub(crate) const CORE_TABLE: &str = "__all_virtual_core_table";

/// The two marker columns every active tenant must carry.
pub(crate) const MARKER_COLUMNS: [&str; 2] = ["target_data_version", "current_data_version"];

pub(crate) const ACTIVE_TENANTS_SQL: &str = "SELECT tenant_id FROM __all_tenant \
     EXCEPT SELECT tenant_id FROM __all_virtual_tenant_info WHERE tenant_role = 'STANDBY' \
     ORDER BY tenant_id";

/// Confirms `compatible` has converged and that every non-standby tenant's
/// `target_data_version` and `current_data_version` equal the installed
/// data version.
///
/// The marker phase is one aggregate count rather than a per-tenant scan;
/// on mismatch the error carries the tenant count and observed count.
pub struct DataVersionCheck<'a, E: ?Sized, C: ?Sized, V: ?Sized> {
    executor: &'a E,
    clock: &'a C,
    versions: &'a V,
    policy: &'a SyncPolicy,
}

impl<'a, E, C, V> DataVersionCheck<'a, E, C, V>
where
    E: CatalogExecutor + ?Sized,
    C: Clock + ?Sized,
    V: VersionProvider + ?Sized,
{
    /// Create a check reading the expected data version from `versions`.
    pub fn new(executor: &'a E, clock: &'a C, versions: &'a V, policy: &'a SyncPolicy) -> Self {
        Self {
            executor,
            clock,
            versions,
            policy,
        }
    }

    /// Run both phases.
    ///
    /// `_timeout_secs` is accepted for a uniform check signature; the
    /// `compatible` wait is capped by `SyncPolicy::compatible_timeout_secs`
    /// whatever the caller allows.
    pub fn check(&self, _timeout_secs: i64) -> Result<(), CheckError> {
        let data_version = self.versions.data_version();

        ParameterSyncWaiter::new(self.executor, self.clock, self.policy).wait_sync_for(
            COMPATIBLE_PARAMETER,
            data_version,
            Duration::from_secs(self.policy.compatible_timeout_secs),
        )?;

        self.check_markers(data_version)
    }

    /// Marker phase alone: exactly `2 × tenant_count` marker rows must hold
    /// the encoded data version.
    pub fn check_markers(&self, data_version: &str) -> Result<(), CheckError> {
        let tenants = active_tenants(self.executor)?;
        if tenants.is_empty() {
            warn!("no active tenants found");
            return Err(CheckError::NoActiveTenants);
        }

        let encoded = encode_data_version(data_version)?;
        let sql = format!(
            "SELECT count(*) FROM {CORE_TABLE} WHERE column_name IN ({}, {}) \
             AND column_value = {} AND tenant_id IN ({})",
            quote(MARKER_COLUMNS[0]),
            quote(MARKER_COLUMNS[1]),
            quote(&encoded.to_string()),
            join_ids(&tenants),
        );
        let rows = self.executor.query(&sql).map_err(CheckError::connection)?;
        let observed = single_count(&sql, &rows)?;

        let expected = 2 * tenants.len() as i64;
        if observed != expected {
            warn!(
                data_version,
                tenant_count = tenants.len(),
                expected,
                observed,
                "data version markers do not match"
            );
            return Err(CheckError::MarkerCountMismatch {
                data_version: data_version.to_string(),
                tenant_count: tenants.len(),
                expected,
                observed,
            });
        }

        info!(
            data_version,
            tenant_count = tenants.len(),
            "all tenants' target_data_version/current_data_version match"
        );
        Ok(())
    }
}

/// Ids of every tenant that is not a standby, ascending.
pub(crate) fn active_tenants<E>(executor: &E) -> Result<Vec<i64>, CheckError>
where
    E: CatalogExecutor + ?Sized,
{
    let rows = executor
        .query(ACTIVE_TENANTS_SQL)
        .map_err(CheckError::connection)?;
    rows.iter()
        .map(|row| {
            row.get(0)
                .and_then(|v| v.as_i64())
                .ok_or_else(|| CheckError::UnexpectedResult {
                    query: ACTIVE_TENANTS_SQL.to_string(),
                    detail: format!("tenant_id is not an integer in {:?}", row.0),
                })
        })
        .collect()
}

pub(crate) fn join_ids(ids: &[i64]) -> String {
    ids.iter()
        .map(i64::to_string)
        .collect::<Vec<_>>()
        .join(",")
}
