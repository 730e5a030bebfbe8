//! Software version convergence across all nodes.

use crate::{CatalogExecutor, CheckError, Clock, ParameterSyncWaiter, SyncPolicy, VersionProvider};

/// Parameter holding the lowest software version observed across nodes.
pub(crate) const MIN_OBSERVER_VERSION: &str = "min_observer_version";

/// Waits for `min_observer_version` to reach the installed software version.
pub struct ClusterVersionCheck<'a, E: ?Sized, C: ?Sized, V: ?Sized> {
    executor: &'a E,
    clock: &'a C,
    versions: &'a V,
    policy: &'a SyncPolicy,
}

impl<'a, E, C, V> ClusterVersionCheck<'a, E, C, V>
where
    E: CatalogExecutor + ?Sized,
    C: Clock + ?Sized,
    V: VersionProvider + ?Sized,
{
    /// Create a check reading the expected version from `versions`.
    pub fn new(executor: &'a E, clock: &'a C, versions: &'a V, policy: &'a SyncPolicy) -> Self {
        Self {
            executor,
            clock,
            versions,
            policy,
        }
    }

    /// Wait up to `timeout_secs` for every node to report the installed
    /// cluster version. A non-positive value uses the policy default.
    pub fn check(&self, timeout_secs: i64) -> Result<(), CheckError> {
        ParameterSyncWaiter::new(self.executor, self.clock, self.policy).wait_sync(
            MIN_OBSERVER_VERSION,
            self.versions.cluster_version(),
            timeout_secs,
        )
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::sync::PARAMETER_TABLE;
    use crate::{ErrorKind, ManualClock, Row, ScriptedCatalog, StaticVersions, Value};

    fn node(ip: &str, version: &str) -> Row {
        Row::new([Value::from(ip), Value::Int(2882), Value::from(version)])
    }

    #[test]
    fn waits_for_installed_version() {
        let catalog = ScriptedCatalog::new();
        catalog.respond(PARAMETER_TABLE, vec![node("a", "4.1.0.2"), node("b", "4.2.1.1")]);
        catalog.respond(PARAMETER_TABLE, vec![node("a", "4.2.1.1"), node("b", "4.2.1.1")]);
        let clock = ManualClock::new();
        let versions = StaticVersions::with_data_version("4.2.1.1", "4.2.1.0");
        let policy = SyncPolicy::default();

        ClusterVersionCheck::new(&catalog, &clock, &versions, &policy)
            .check(60)
            .unwrap();

        assert!(catalog
            .queries()
            .iter()
            .all(|q| q.contains("name = 'min_observer_version'")));
        assert_eq!(clock.sleep_count(), 1);
    }

    #[test]
    fn lagging_node_times_out_with_caller_budget() {
        let catalog = ScriptedCatalog::new();
        catalog.respond(PARAMETER_TABLE, vec![node("a", "4.1.0.2"), node("b", "4.2.1.0")]);
        let clock = ManualClock::new();
        let versions = StaticVersions::new("4.2.1.0");
        let policy = SyncPolicy::default();

        let err = ClusterVersionCheck::new(&catalog, &clock, &versions, &policy)
            .check(30)
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_eq!(clock.elapsed(), Duration::from_secs(30));
        assert!(err.to_string().contains("a:2882=4.1.0.2"));
    }
}
