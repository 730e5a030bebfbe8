//! Upgrade self-inspection polling.

use tracing::info;

use crate::catalog::single_count;
use crate::sync::{poll_until, Probe};
use crate::{CatalogExecutor, CheckError, Clock, InspectionPolicy};

/// One row per internal self-check; `info` is `succeed` once it passes.
pub(crate) const INSPECTION_TABLE: &str = "__all_virtual_upgrade_inspection";

pub(crate) const FAILING_INSPECTIONS_SQL: &str =
    "SELECT count(*) FROM __all_virtual_upgrade_inspection WHERE info != 'succeed'";

/// Waits until no upgrade inspection row reports anything but `succeed`.
///
/// The budget is a wall-clock deadline of `timeout_secs`; a non-positive
/// value uses [`InspectionPolicy::default_timeout_secs`].
pub struct RootInspectionCheck<'a, E: ?Sized, C: ?Sized> {
    executor: &'a E,
    clock: &'a C,
    policy: &'a InspectionPolicy,
}

impl<'a, E, C> RootInspectionCheck<'a, E, C>
where
    E: CatalogExecutor + ?Sized,
    C: Clock + ?Sized,
{
    /// Create a check polling at the policy's interval.
    pub fn new(executor: &'a E, clock: &'a C, policy: &'a InspectionPolicy) -> Self {
        Self {
            executor,
            clock,
            policy,
        }
    }

    /// Poll until no inspection row is failing or the deadline passes.
    pub fn check(&self, timeout_secs: i64) -> Result<(), CheckError> {
        let timeout = self.policy.resolve_timeout(timeout_secs);
        poll_until(
            self.clock,
            "upgrade inspection to succeed",
            timeout,
            self.policy.interval(),
            || {
                let failing = self.failing_count()?;
                Ok(if failing == 0 {
                    Probe::Ready
                } else {
                    Probe::Pending(format!("{failing} inspection rows not succeeded"))
                })
            },
        )?;
        info!("check root inspection success");
        Ok(())
    }

    /// Number of inspection rows whose status is not `succeed`.
    pub fn failing_count(&self) -> Result<i64, CheckError> {
        let rows = self
            .executor
            .query(FAILING_INSPECTIONS_SQL)
            .map_err(CheckError::connection)?;
        single_count(FAILING_INSPECTIONS_SQL, &rows)
    }
}
