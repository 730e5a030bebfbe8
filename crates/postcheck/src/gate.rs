//! Re-enablement of capabilities suspended during the upgrade.

use std::fmt;

use serde::Serialize;
use tracing::info;

use crate::{CatalogExecutor, CheckError, Clock, ParameterSyncWaiter, SyncPolicy};

/// Value written to a capability parameter to enable it.
pub(crate) const ENABLED: &str = "True";

/// A cluster capability switched off for the duration of an upgrade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Schema changes.
    Ddl,
    /// Load rebalancing between nodes.
    Rebalance,
    /// Replica repair.
    Rereplication,
    /// Major compaction.
    MajorFreeze,
}

impl Capability {
    /// Enablement order.
    ///
    /// DDL comes back before data movement is re-armed, and major
    /// compaction only once the other three are stable.
    pub const ORDER: [Capability; 4] = [
        Capability::Ddl,
        Capability::Rebalance,
        Capability::Rereplication,
        Capability::MajorFreeze,
    ];

    /// Boolean cluster parameter that controls this capability.
    pub const fn parameter(&self) -> &'static str {
        match self {
            Self::Ddl => "enable_ddl",
            Self::Rebalance => "enable_rebalance",
            Self::Rereplication => "enable_rereplication",
            Self::MajorFreeze => "enable_major_freeze",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ddl => write!(f, "ddl"),
            Self::Rebalance => write!(f, "rebalance"),
            Self::Rereplication => write!(f, "rereplication"),
            Self::MajorFreeze => write!(f, "major_freeze"),
        }
    }
}

/// Writes capability parameters and waits for them to propagate.
pub struct CapabilityGate<'a, E: ?Sized, C: ?Sized> {
    executor: &'a E,
    clock: &'a C,
    policy: &'a SyncPolicy,
}

impl<'a, E, C> CapabilityGate<'a, E, C>
where
    E: CatalogExecutor + ?Sized,
    C: Clock + ?Sized,
{
    /// Create a gate that waits for propagation using `policy`.
    pub fn new(executor: &'a E, clock: &'a C, policy: &'a SyncPolicy) -> Self {
        Self {
            executor,
            clock,
            policy,
        }
    }

    /// Enable one capability, waiting up to `timeout_secs` for every node
    /// to report it.
    pub fn enable(&self, capability: Capability, timeout_secs: i64) -> Result<(), CheckError> {
        let parameter = capability.parameter();
        self.executor
            .set_parameter(parameter, ENABLED)
            .map_err(CheckError::connection)?;
        ParameterSyncWaiter::new(self.executor, self.clock, self.policy).wait_sync(
            parameter,
            ENABLED,
            timeout_secs,
        )?;
        info!(%capability, parameter, "capability enabled");
        Ok(())
    }

    /// Enable all capabilities in [`Capability::ORDER`], stopping at the
    /// first failure. Capabilities already enabled stay enabled.
    pub fn enable_all(&self, timeout_secs: i64) -> Result<(), CheckError> {
        for capability in Capability::ORDER {
            self.enable(capability, timeout_secs)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::PARAMETER_TABLE;
    use crate::{ErrorKind, ManualClock, Row, ScriptedCatalog, Value};

    fn enabled_everywhere(catalog: &ScriptedCatalog) {
        catalog.respond(
            PARAMETER_TABLE,
            vec![
                Row::new([Value::from("10.0.0.1"), Value::Int(2882), Value::from(ENABLED)]),
                Row::new([Value::from("10.0.0.2"), Value::Int(2882), Value::from(ENABLED)]),
            ],
        );
    }

    fn written(catalog: &ScriptedCatalog) -> Vec<String> {
        catalog.writes().into_iter().map(|w| w.name).collect()
    }

    #[test]
    fn enables_in_fixed_order() {
        let catalog = ScriptedCatalog::new();
        enabled_everywhere(&catalog);
        let clock = ManualClock::new();
        let policy = SyncPolicy::default();

        CapabilityGate::new(&catalog, &clock, &policy)
            .enable_all(60)
            .unwrap();

        assert_eq!(
            written(&catalog),
            vec![
                "enable_ddl",
                "enable_rebalance",
                "enable_rereplication",
                "enable_major_freeze"
            ]
        );
        assert!(catalog.writes().iter().all(|w| w.value == "True"));
    }

    #[test]
    fn each_write_is_followed_by_its_own_sync_wait() {
        let catalog = ScriptedCatalog::new();
        enabled_everywhere(&catalog);
        let clock = ManualClock::new();
        let policy = SyncPolicy::default();

        CapabilityGate::new(&catalog, &clock, &policy)
            .enable_all(60)
            .unwrap();

        let waited: Vec<String> = catalog.queries();
        assert_eq!(waited.len(), 4);
        for (query, capability) in waited.iter().zip(Capability::ORDER) {
            assert!(query.contains(&format!("name = '{}'", capability.parameter())));
        }
    }

    #[test]
    fn stops_at_first_failed_write() {
        let catalog = ScriptedCatalog::new();
        enabled_everywhere(&catalog);
        catalog.fail_write("enable_rereplication", "permission denied");
        let clock = ManualClock::new();
        let policy = SyncPolicy::default();

        let err = CapabilityGate::new(&catalog, &clock, &policy)
            .enable_all(60)
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Connection);
        assert_eq!(
            written(&catalog),
            vec!["enable_ddl", "enable_rebalance", "enable_rereplication"]
        );
    }

    #[test]
    fn unpropagated_write_times_out() {
        let catalog = ScriptedCatalog::new();
        catalog.respond(
            PARAMETER_TABLE,
            vec![Row::new([Value::from("10.0.0.1"), Value::Int(2882), Value::from("False")])],
        );
        let clock = ManualClock::new();
        let policy = SyncPolicy::default();

        let err = CapabilityGate::new(&catalog, &clock, &policy)
            .enable(Capability::Ddl, 15)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_eq!(written(&catalog), vec!["enable_ddl"]);
    }

    #[test]
    fn display_and_parameter_names() {
        let names: Vec<String> = Capability::ORDER.iter().map(|c| c.to_string()).collect();
        assert_eq!(names, vec!["ddl", "rebalance", "rereplication", "major_freeze"]);
        assert_eq!(Capability::MajorFreeze.parameter(), "enable_major_freeze");
    }
}
