//! Point-in-time snapshot of the state the checks wait on.
//!
//! Nothing here polls or writes; it is meant for diagnosing a run that
//! timed out or found inconsistent markers.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::catalog::quote;
use crate::cluster_version::MIN_OBSERVER_VERSION;
use crate::data_version::{active_tenants, join_ids, COMPATIBLE_PARAMETER, CORE_TABLE, MARKER_COLUMNS};
use crate::inspection::INSPECTION_TABLE;
use crate::sync::parameter_values;
use crate::{encode_data_version, Capability, CatalogExecutor, CheckError, Value, VersionProvider};

/// One node's value of a cluster parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeValue {
    /// `ip:port` of the node.
    pub node: String,
    /// Reported value.
    pub value: String,
}

/// Data-version markers of one active tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TenantMarkers {
    pub tenant_id: i64,
    pub target_data_version: Option<String>,
    pub current_data_version: Option<String>,
    /// Whether both markers equal the expected encoded data version.
    pub converged: bool,
}

/// Snapshot of cluster convergence.
#[derive(Debug, Clone, Serialize)]
pub struct ClusterStatus {
    pub expected_cluster_version: String,
    pub expected_data_version: String,
    /// Encoded form of `expected_data_version`.
    pub expected_data_version_code: u64,
    pub min_observer_version: Vec<NodeValue>,
    pub compatible: Vec<NodeValue>,
    pub tenants: Vec<TenantMarkers>,
    /// `name -> info` of every inspection row that has not succeeded.
    pub failing_inspections: BTreeMap<String, String>,
    /// Per-node values of each capability parameter.
    pub capabilities: BTreeMap<Capability, Vec<NodeValue>>,
}

impl ClusterStatus {
    /// Read the current state without waiting.
    pub fn collect<E, V>(executor: &E, versions: &V) -> Result<Self, CheckError>
    where
        E: CatalogExecutor + ?Sized,
        V: VersionProvider + ?Sized,
    {
        let expected_data_version_code = encode_data_version(versions.data_version())?;

        let tenants = active_tenants(executor)?;
        let tenants = tenant_markers(executor, &tenants, expected_data_version_code)?;

        let mut capabilities = BTreeMap::new();
        for capability in Capability::ORDER {
            capabilities.insert(capability, parameter_values(executor, capability.parameter())?);
        }

        Ok(Self {
            expected_cluster_version: versions.cluster_version().to_string(),
            expected_data_version: versions.data_version().to_string(),
            expected_data_version_code,
            min_observer_version: parameter_values(executor, MIN_OBSERVER_VERSION)?,
            compatible: parameter_values(executor, COMPATIBLE_PARAMETER)?,
            tenants,
            failing_inspections: failing_inspections(executor)?,
            capabilities,
        })
    }

    /// Whether every node reports the expected software version.
    pub fn cluster_version_synced(&self) -> bool {
        all_equal(&self.min_observer_version, &self.expected_cluster_version)
    }

    /// Whether every node reports the expected data version as `compatible`.
    pub fn compatible_synced(&self) -> bool {
        all_equal(&self.compatible, &self.expected_data_version)
    }

    /// Whether at least one tenant is active and all carry converged markers.
    pub fn markers_converged(&self) -> bool {
        !self.tenants.is_empty() && self.tenants.iter().all(|t| t.converged)
    }

    /// Whether `capability` reads `True` on every node.
    pub fn capability_enabled(&self, capability: Capability) -> bool {
        self.capabilities
            .get(&capability)
            .map(|values| all_equal(values, crate::gate::ENABLED))
            .unwrap_or(false)
    }
}

fn all_equal(values: &[NodeValue], expected: &str) -> bool {
    !values.is_empty() && values.iter().all(|v| v.value == expected)
}

fn tenant_markers<E>(executor: &E, tenants: &[i64], expected: u64) -> Result<Vec<TenantMarkers>, CheckError>
where
    E: CatalogExecutor + ?Sized,
{
    let mut markers: BTreeMap<i64, TenantMarkers> = tenants
        .iter()
        .map(|&tenant_id| {
            (
                tenant_id,
                TenantMarkers {
                    tenant_id,
                    target_data_version: None,
                    current_data_version: None,
                    converged: false,
                },
            )
        })
        .collect();
    if markers.is_empty() {
        return Ok(Vec::new());
    }

    let sql = format!(
        "SELECT tenant_id, column_name, column_value FROM {CORE_TABLE} \
         WHERE column_name IN ({}, {}) AND tenant_id IN ({})",
        quote(MARKER_COLUMNS[0]),
        quote(MARKER_COLUMNS[1]),
        join_ids(tenants),
    );
    for row in executor.query(&sql).map_err(CheckError::connection)? {
        let tenant_id = row.get(0).and_then(|v| v.as_i64());
        let column = row.get(1).map(|v| v.to_string());
        let value = row.get(2).map(|v| v.to_string());
        let (Some(tenant_id), Some(column), Some(value)) = (tenant_id, column, value) else {
            return Err(CheckError::UnexpectedResult {
                query: sql.clone(),
                detail: format!("expected (tenant_id, column_name, column_value), got {:?}", row.0),
            });
        };
        if let Some(entry) = markers.get_mut(&tenant_id) {
            match column.as_str() {
                "target_data_version" => entry.target_data_version = Some(value),
                "current_data_version" => entry.current_data_version = Some(value),
                _ => {}
            }
        }
    }

    let expected = expected.to_string();
    Ok(markers
        .into_values()
        .map(|mut t| {
            t.converged = t.target_data_version.as_deref() == Some(expected.as_str())
                && t.current_data_version.as_deref() == Some(expected.as_str());
            t
        })
        .collect())
}

fn failing_inspections<E>(executor: &E) -> Result<BTreeMap<String, String>, CheckError>
where
    E: CatalogExecutor + ?Sized,
{
    let sql = format!("SELECT name, info FROM {INSPECTION_TABLE} WHERE info != 'succeed' ORDER BY name");
    let rows = executor.query(&sql).map_err(CheckError::connection)?;

    let mut failing = BTreeMap::new();
    for row in &rows {
        match (row.get(0), row.get(1)) {
            (Some(name), Some(info)) if *name != Value::Null && *info != Value::Null => {
                failing.insert(name.to_string(), info.to_string());
            }
            _ => {
                return Err(CheckError::UnexpectedResult {
                    query: sql.clone(),
                    detail: format!("expected non-null (name, info), got {:?}", row.0),
                })
            }
        }
    }
    Ok(failing)
}
