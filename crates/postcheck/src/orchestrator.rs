//! The post-upgrade check sequence.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use tracing::{error, info};

use crate::{
    Capability, CapabilityGate, CatalogExecutor, CheckConfig, CheckError, Clock,
    ClusterVersionCheck, DataVersionCheck, RootInspectionCheck, VersionProvider,
};

/// One step of the sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    /// Every node reports the installed cluster version.
    ClusterVersion,
    /// `compatible` synced and all active tenants carry the data-version markers.
    DataVersion,
    /// No upgrade inspection row is failing.
    RootInspection,
    /// Write one capability parameter and wait for it to propagate.
    Enable(Capability),
}

impl Step {
    /// The verification steps, in order.
    pub const CHECKS: [Step; 3] = [Step::ClusterVersion, Step::DataVersion, Step::RootInspection];
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClusterVersion => write!(f, "check cluster version"),
            Self::DataVersion => write!(f, "check data version"),
            Self::RootInspection => write!(f, "check root inspection"),
            Self::Enable(capability) => write!(f, "enable {capability}"),
        }
    }
}

/// A step that completed successfully.
#[derive(Debug, Clone, Serialize)]
pub struct StepOutcome {
    /// The step that passed.
    pub step: Step,
    /// Clock time from start to success.
    pub elapsed: Duration,
}

/// Completed steps of a successful run, in execution order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub steps: Vec<StepOutcome>,
}

impl RunReport {
    /// Total time across all steps.
    pub fn total_elapsed(&self) -> Duration {
        self.steps.iter().map(|s| s.elapsed).sum()
    }
}

/// Runs the checks and, if they all pass, re-enables the suspended
/// capabilities.
///
/// Steps run strictly one after another. The first failure aborts the
/// sequence and is returned unchanged. Capabilities enabled before the
/// failure are left enabled.
pub struct PostUpgradeChecker<'a, E: ?Sized, C: ?Sized, V: ?Sized> {
    executor: &'a E,
    clock: &'a C,
    versions: &'a V,
    config: &'a CheckConfig,
}

impl<'a, E, C, V> PostUpgradeChecker<'a, E, C, V>
where
    E: CatalogExecutor + ?Sized,
    C: Clock + ?Sized,
    V: VersionProvider + ?Sized,
{
    /// Create a checker over `executor` with the given polling configuration.
    pub fn new(executor: &'a E, clock: &'a C, versions: &'a V, config: &'a CheckConfig) -> Self {
        Self {
            executor,
            clock,
            versions,
            config,
        }
    }

    /// Full sequence: three checks, then the four capability enablements.
    pub fn run(&self, timeout_secs: i64) -> Result<RunReport, CheckError> {
        let steps = Step::CHECKS
            .into_iter()
            .chain(Capability::ORDER.into_iter().map(Step::Enable));
        self.execute(steps, timeout_secs)
    }

    /// Checks only. Never writes a capability parameter.
    pub fn verify(&self, timeout_secs: i64) -> Result<RunReport, CheckError> {
        self.execute(Step::CHECKS, timeout_secs)
    }

    fn execute<I>(&self, steps: I, timeout_secs: i64) -> Result<RunReport, CheckError>
    where
        I: IntoIterator<Item = Step>,
    {
        info!(
            cluster_version = self.versions.cluster_version(),
            data_version = self.versions.data_version(),
            timeout_secs,
            "starting post-upgrade checks"
        );

        let mut report = RunReport::default();
        for step in steps {
            let started = self.clock.now();
            info!(%step, "step started");

            if let Err(err) = self.step(step, timeout_secs) {
                error!(%step, kind = ?err.kind(), error = %err, "post-upgrade check aborted");
                return Err(err);
            }

            let elapsed = self.clock.now().saturating_duration_since(started);
            info!(%step, elapsed_secs = elapsed.as_secs(), "step passed");
            report.steps.push(StepOutcome { step, elapsed });
        }

        info!(steps = report.steps.len(), "post-upgrade checks finished");
        Ok(report)
    }

    fn step(&self, step: Step, timeout_secs: i64) -> Result<(), CheckError> {
        let sync = &self.config.sync;
        match step {
            Step::ClusterVersion => {
                ClusterVersionCheck::new(self.executor, self.clock, self.versions, sync)
                    .check(timeout_secs)
            }
            Step::DataVersion => {
                DataVersionCheck::new(self.executor, self.clock, self.versions, sync)
                    .check(timeout_secs)
            }
            Step::RootInspection => {
                RootInspectionCheck::new(self.executor, self.clock, &self.config.inspection)
                    .check(timeout_secs)
            }
            Step::Enable(capability) => {
                CapabilityGate::new(self.executor, self.clock, sync).enable(capability, timeout_secs)
            }
        }
    }
}
