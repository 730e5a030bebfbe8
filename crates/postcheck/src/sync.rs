//! Polling primitive and cluster parameter synchronization.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::catalog::quote;
use crate::status::NodeValue;
use crate::{CatalogExecutor, CheckError, Clock, SyncPolicy};

/// Per-node parameter values as reported by the observers.
pub(crate) const PARAMETER_TABLE: &str = "__all_virtual_sys_parameter_stat";

/// Most disagreeing nodes listed in a timeout message.
const MAX_LISTED_NODES: usize = 5;

/// Outcome of a single poll attempt.
pub(crate) enum Probe {
    /// The condition holds.
    Ready,
    /// Not yet; carries a description of what was observed.
    Pending(String),
}

/// Poll `probe` until it reports [`Probe::Ready`] or `timeout` of wall-clock
/// time has elapsed on `clock`.
///
/// Sleeps `interval` between attempts, never past the deadline, and makes
/// one final attempt at the deadline. Errors from `probe` abort the loop
/// immediately. A zero `interval` is rejected before the first attempt.
/// Returns the time spent waiting.
pub(crate) fn poll_until<C, F>(
    clock: &C,
    what: &str,
    timeout: Duration,
    interval: Duration,
    mut probe: F,
) -> Result<Duration, CheckError>
where
    C: Clock + ?Sized,
    F: FnMut() -> Result<Probe, CheckError>,
{
    if interval.is_zero() {
        return Err(CheckError::InvalidPolicy {
            what: what.to_string(),
            reason: "interval must be greater than zero".to_string(),
        });
    }

    let start = clock.now();
    let deadline = start + timeout;
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        let observed = match probe()? {
            Probe::Ready => return Ok(clock.now().saturating_duration_since(start)),
            Probe::Pending(observed) => observed,
        };

        let now = clock.now();
        if now >= deadline {
            let waited = now.saturating_duration_since(start);
            warn!(what, attempt, waited_secs = waited.as_secs(), %observed, "gave up waiting");
            return Err(CheckError::Timeout {
                what: what.to_string(),
                waited,
                last_observed: observed,
            });
        }

        debug!(what, attempt, %observed, "not converged yet");
        clock.sleep(interval.min(deadline - now));
    }
}

/// Waits until every node reports the expected value of a cluster parameter.
pub struct ParameterSyncWaiter<'a, E: ?Sized, C: ?Sized> {
    executor: &'a E,
    clock: &'a C,
    policy: &'a SyncPolicy,
}

impl<'a, E, C> ParameterSyncWaiter<'a, E, C>
where
    E: CatalogExecutor + ?Sized,
    C: Clock + ?Sized,
{
    /// Create a waiter polling at the policy's interval.
    pub fn new(executor: &'a E, clock: &'a C, policy: &'a SyncPolicy) -> Self {
        Self {
            executor,
            clock,
            policy,
        }
    }

    /// Wait for `name` to equal `expected` on all nodes.
    ///
    /// A non-positive `timeout_secs` uses the policy's default budget.
    pub fn wait_sync(&self, name: &str, expected: &str, timeout_secs: i64) -> Result<(), CheckError> {
        self.wait_sync_for(name, expected, self.policy.resolve_timeout(timeout_secs))
    }

    /// Same as [`wait_sync`](Self::wait_sync) with an already resolved budget.
    pub fn wait_sync_for(
        &self,
        name: &str,
        expected: &str,
        timeout: Duration,
    ) -> Result<(), CheckError> {
        let what = format!("{name} = {expected} on all nodes");
        let waited = poll_until(self.clock, &what, timeout, self.policy.interval(), || {
            let values = parameter_values(self.executor, name)?;
            Ok(convergence(name, expected, &values))
        })?;
        info!(parameter = name, value = expected, waited_secs = waited.as_secs(), "parameter synced");
        Ok(())
    }
}

/// Read every node's current value of `name`.
pub(crate) fn parameter_values<E>(executor: &E, name: &str) -> Result<Vec<NodeValue>, CheckError>
where
    E: CatalogExecutor + ?Sized,
{
    let sql = format!(
        "SELECT svr_ip, svr_port, value FROM {PARAMETER_TABLE} WHERE name = {} ORDER BY svr_ip, svr_port",
        quote(name)
    );
    let rows = executor.query(&sql).map_err(CheckError::connection)?;

    rows.iter()
        .map(|row| match (row.get(0), row.get(1), row.get(2)) {
            (Some(ip), Some(port), Some(value)) => Ok(NodeValue {
                node: format!("{ip}:{port}"),
                value: value.to_string(),
            }),
            _ => Err(CheckError::UnexpectedResult {
                query: sql.clone(),
                detail: format!("expected 3 columns, got {}", row.len()),
            }),
        })
        .collect()
}

fn convergence(name: &str, expected: &str, values: &[NodeValue]) -> Probe {
    if values.is_empty() {
        return Probe::Pending(format!("no node reports {name}"));
    }

    let differing: Vec<&NodeValue> = values.iter().filter(|v| v.value != expected).collect();
    if differing.is_empty() {
        return Probe::Ready;
    }

    let mut listed: Vec<String> = differing
        .iter()
        .take(MAX_LISTED_NODES)
        .map(|v| format!("{}={}", v.node, v.value))
        .collect();
    if differing.len() > MAX_LISTED_NODES {
        listed.push("...".to_string());
    }
    Probe::Pending(format!(
        "{} of {} nodes differ: {}",
        differing.len(),
        values.len(),
        listed.join(", ")
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ErrorKind, ManualClock, Row, ScriptedCatalog};

    fn node(ip: &str, value: &str) -> Row {
        Row::new([ip.into(), crate::Value::Int(2882), value.into()])
    }

    #[test]
    fn succeeds_immediately_when_synced() {
        let catalog = ScriptedCatalog::new();
        catalog.respond(
            PARAMETER_TABLE,
            vec![node("10.0.0.1", "4.2.1.0"), node("10.0.0.2", "4.2.1.0")],
        );
        let clock = ManualClock::new();
        let policy = SyncPolicy::default();

        ParameterSyncWaiter::new(&catalog, &clock, &policy)
            .wait_sync("min_observer_version", "4.2.1.0", 60)
            .unwrap();

        assert_eq!(clock.sleep_count(), 0);
        assert_eq!(catalog.queries().len(), 1);
        assert!(catalog.queries()[0].contains("name = 'min_observer_version'"));
    }

    #[test]
    fn converges_after_retries() {
        let catalog = ScriptedCatalog::new();
        catalog.respond(PARAMETER_TABLE, vec![node("a", "4.1.0.2"), node("b", "4.2.1.0")]);
        catalog.respond(PARAMETER_TABLE, vec![node("a", "4.1.0.2"), node("b", "4.2.1.0")]);
        catalog.respond(PARAMETER_TABLE, vec![node("a", "4.2.1.0"), node("b", "4.2.1.0")]);
        let clock = ManualClock::new();
        let policy = SyncPolicy::default();

        ParameterSyncWaiter::new(&catalog, &clock, &policy)
            .wait_sync("compatible", "4.2.1.0", 60)
            .unwrap();

        assert_eq!(clock.sleep_count(), 2);
        assert_eq!(clock.elapsed(), Duration::from_secs(10));
    }

    #[test]
    fn partial_convergence_times_out() {
        let catalog = ScriptedCatalog::new();
        catalog.respond(
            PARAMETER_TABLE,
            vec![node("a", "4.2.1.0"), node("b", "4.2.1.0"), node("c", "4.1.0.2")],
        );
        let clock = ManualClock::new();
        let policy = SyncPolicy::default();

        let err = ParameterSyncWaiter::new(&catalog, &clock, &policy)
            .wait_sync("min_observer_version", "4.2.1.0", 20)
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_eq!(clock.elapsed(), Duration::from_secs(20));
        // attempts at t = 0, 5, 10, 15, 20
        assert_eq!(catalog.queries().len(), 5);
        match err {
            CheckError::Timeout { last_observed, .. } => {
                assert_eq!(last_observed, "1 of 3 nodes differ: c:2882=4.1.0.2");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn empty_node_set_is_not_synced() {
        let catalog = ScriptedCatalog::new();
        catalog.respond(PARAMETER_TABLE, vec![]);
        let clock = ManualClock::new();
        let policy = SyncPolicy::default();

        let err = ParameterSyncWaiter::new(&catalog, &clock, &policy)
            .wait_sync("compatible", "4.2.1.0", 5)
            .unwrap_err();
        assert!(err.to_string().contains("no node reports compatible"));
    }

    #[test]
    fn non_positive_timeout_uses_default_budget() {
        let catalog = ScriptedCatalog::new();
        catalog.respond(PARAMETER_TABLE, vec![node("a", "old")]);
        let clock = ManualClock::new();
        let policy = SyncPolicy::default();

        let err = ParameterSyncWaiter::new(&catalog, &clock, &policy)
            .wait_sync("compatible", "new", 0)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_eq!(clock.elapsed(), Duration::from_secs(60));
    }

    #[test]
    fn executor_failure_is_not_retried() {
        let catalog = ScriptedCatalog::new();
        catalog.fail_on(PARAMETER_TABLE, "connection reset");
        let clock = ManualClock::new();
        let policy = SyncPolicy::default();

        let err = ParameterSyncWaiter::new(&catalog, &clock, &policy)
            .wait_sync("compatible", "4.2.1.0", 60)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connection);
        assert_eq!(catalog.queries().len(), 1);
        assert_eq!(clock.sleep_count(), 0);
    }

    #[test]
    fn poll_never_sleeps_past_deadline() {
        let clock = ManualClock::new();
        let err = poll_until(&clock, "nothing", Duration::from_secs(7), Duration::from_secs(5), || {
            Ok(Probe::Pending("still pending".into()))
        })
        .unwrap_err();

        assert_eq!(clock.elapsed(), Duration::from_secs(7));
        assert_eq!(clock.sleep_count(), 2);
        assert!(matches!(err, CheckError::Timeout { waited, .. } if waited == Duration::from_secs(7)));
    }

    #[test]
    fn zero_interval_is_rejected_without_polling() {
        let catalog = ScriptedCatalog::new();
        catalog.respond(PARAMETER_TABLE, vec![node("a", "4.1.0.2")]);
        let clock = ManualClock::new();
        let policy = SyncPolicy {
            interval_secs: 0,
            ..SyncPolicy::default()
        };

        let err = ParameterSyncWaiter::new(&catalog, &clock, &policy)
            .wait_sync("min_observer_version", "4.2.1.0", 30)
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert!(matches!(err, CheckError::InvalidPolicy { .. }));
        assert!(catalog.queries().is_empty());
        assert_eq!(clock.sleep_count(), 0);
    }

    #[test]
    fn listing_is_truncated() {
        let values: Vec<NodeValue> = (0..8)
            .map(|i| NodeValue {
                node: format!("n{i}"),
                value: "old".into(),
            })
            .collect();
        match convergence("p", "new", &values) {
            Probe::Pending(msg) => {
                assert!(msg.starts_with("8 of 8 nodes differ"));
                assert!(msg.ends_with(", ..."));
                assert!(!msg.contains("n5"));
            }
            Probe::Ready => panic!("should not be ready"),
        }
    }
}
