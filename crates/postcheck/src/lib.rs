//! # postcheck
//!
//! Post-upgrade verification for multi-tenant database clusters.
//!
//! After a rolling upgrade has been applied node by node, `postcheck`
//! confirms that the cluster has converged on the new software and data
//! version, and only then re-enables the capabilities that were suspended
//! for the duration of the upgrade.
//!
//! ## Quick Start
//!
//! ```
//! use postcheck::{CheckConfig, ManualClock, PostUpgradeChecker, SqliteCatalog, StaticVersions};
//!
//! let catalog = SqliteCatalog::open_in_memory().unwrap();
//! catalog.seed_converged(&["10.0.0.1:2882"], &[1, 1001], "4.2.1.0").unwrap();
//!
//! let versions = StaticVersions::new("4.2.1.0");
//! let clock = ManualClock::new();
//! let config = CheckConfig::default();
//!
//! let checker = PostUpgradeChecker::new(&catalog, &clock, &versions, &config);
//! let report = checker.run(60).unwrap();
//! assert_eq!(report.steps.len(), 7);
//! ```
//!
//! ## Sequence
//!
//! | Step | What it waits for |
//! |------|-------------------|
//! | [`ClusterVersionCheck`] | `min_observer_version` equal on every node |
//! | [`DataVersionCheck`] | `compatible` synced, every active tenant's data-version markers set |
//! | [`RootInspectionCheck`] | no failing upgrade inspection rows |
//! | [`CapabilityGate`] | `ddl`, `rebalance`, `rereplication`, `major_freeze` re-enabled, in that order |
//!
//! ## Backends
//!
//! | Backend | Feature flag | Use case |
//! |---------|-------------|----------|
//! | [`ScriptedCatalog`] | *(always available)* | Testing, call-order recording |
//! | `SqliteCatalog` | `sqlite` | Rehearsal against a catalog snapshot |

mod catalog;
mod clock;
mod cluster_version;
mod config;
mod data_version;
mod error;
mod gate;
mod inspection;
mod orchestrator;
mod scripted;
#[cfg(feature = "sqlite")]
mod sqlite;
mod status;
mod sync;
mod version;

pub use catalog::{CatalogExecutor, Row, Value};
pub use clock::{Clock, ManualClock, SystemClock};
pub use cluster_version::ClusterVersionCheck;
pub use config::{CheckConfig, ConfigError, InspectionPolicy, SyncPolicy, VersionsConfig};
pub use data_version::DataVersionCheck;
pub use error::{CheckError, ErrorKind};
pub use gate::{Capability, CapabilityGate};
pub use inspection::RootInspectionCheck;
pub use orchestrator::{PostUpgradeChecker, RunReport, Step, StepOutcome};
pub use scripted::{ParameterWrite, ScriptedCatalog, ScriptedError};
#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteCatalog, SqliteCatalogError};
pub use status::{ClusterStatus, NodeValue, TenantMarkers};
pub use sync::ParameterSyncWaiter;
pub use version::{encode_data_version, StaticVersions, VersionProvider};
