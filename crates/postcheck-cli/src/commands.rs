use std::path::Path;

use tracing::debug;

use postcheck::{
    Capability, CheckConfig, ClusterStatus, NodeValue, PostUpgradeChecker, RunReport,
    SqliteCatalog, StaticVersions, SystemClock,
};

type Result = std::result::Result<(), Box<dyn std::error::Error>>;

/// Catalog location and expected versions shared by every subcommand.
pub struct Target {
    pub catalog: String,
    pub cluster_version: Option<String>,
    pub data_version: Option<String>,
    pub config: Option<String>,
}

pub fn init_tracing(verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(filter)
        .init();
}

/// Resolve the catalog, config and versions for a command.
fn open(
    target: &Target,
) -> std::result::Result<(SqliteCatalog, StaticVersions, CheckConfig), Box<dyn std::error::Error>> {
    let config = match &target.config {
        Some(path) => CheckConfig::load(path)?,
        None => CheckConfig::default(),
    };

    let cluster = target
        .cluster_version
        .clone()
        .or_else(|| config.versions.cluster.clone())
        .ok_or("no cluster version: pass --cluster-version or set [versions].cluster in the config")?;
    let data = target
        .data_version
        .clone()
        .or_else(|| config.versions.data.clone())
        .unwrap_or_else(|| cluster.clone());

    if !Path::new(&target.catalog).exists() {
        return Err(format!("catalog {} not found (create it with `postcheck init`)", target.catalog).into());
    }
    let catalog = SqliteCatalog::open(&target.catalog)?;
    debug!(catalog = %target.catalog, %cluster, %data, "opened catalog");

    Ok((catalog, StaticVersions::with_data_version(cluster, data), config))
}

/// `postcheck run|verify <catalog>`: Run the check sequence.
pub fn run(target: &Target, timeout: i64, enable: bool) -> Result {
    let (catalog, versions, config) = open(target)?;
    let checker = PostUpgradeChecker::new(&catalog, &SystemClock, &versions, &config);

    let report = if enable {
        checker.run(timeout)?
    } else {
        checker.verify(timeout)?
    };

    print_report(&report);
    if enable {
        let names: Vec<String> = Capability::ORDER.iter().map(|c| c.to_string()).collect();
        println!("All checks passed; enabled {}", names.join(", "));
    } else {
        println!("All checks passed; capabilities left unchanged");
    }
    Ok(())
}

fn print_report(report: &RunReport) {
    println!("  {:<32} {:>10}", "Step", "Elapsed");
    println!("  {}", "-".repeat(43));
    for outcome in &report.steps {
        println!(
            "  {:<32} {:>9}s",
            outcome.step.to_string(),
            outcome.elapsed.as_secs()
        );
    }
    println!("  {}", "-".repeat(43));
    println!("  {:<32} {:>9}s", "Total", report.total_elapsed().as_secs());
    println!();
}

/// `postcheck status <catalog>`: Show a convergence snapshot.
pub fn status(target: &Target, json: bool) -> Result {
    let (catalog, versions, _) = open(target)?;
    let status = ClusterStatus::collect(&catalog, &versions)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("Catalog: {}", target.catalog);
    println!(
        "Expected: cluster {}, data {} ({})",
        status.expected_cluster_version, status.expected_data_version, status.expected_data_version_code
    );
    println!();

    print_parameter("min_observer_version", &status.min_observer_version, status.cluster_version_synced());
    print_parameter("compatible", &status.compatible, status.compatible_synced());

    println!(
        "Tenants ({} active, {}):",
        status.tenants.len(),
        mark(status.markers_converged())
    );
    if status.tenants.is_empty() {
        println!("  (no active tenants)");
    } else {
        println!("  {:>10}  {:>20}  {:>20}", "Tenant", "Target", "Current");
        println!("  {}", "-".repeat(56));
        for t in &status.tenants {
            println!(
                "  {:>10}  {:>20}  {:>20}{}",
                t.tenant_id,
                t.target_data_version.as_deref().unwrap_or("-"),
                t.current_data_version.as_deref().unwrap_or("-"),
                if t.converged { "" } else { "  *" }
            );
        }
    }
    println!();

    if status.failing_inspections.is_empty() {
        println!("Inspection: all succeeded");
    } else {
        println!("Inspection ({} not succeeded):", status.failing_inspections.len());
        for (name, info) in &status.failing_inspections {
            println!("  {name:<40} {info}");
        }
    }
    println!();

    println!("Capabilities:");
    for capability in Capability::ORDER {
        println!(
            "  {:<16} {}",
            capability.to_string(),
            if status.capability_enabled(capability) { "enabled" } else { "disabled" }
        );
    }
    println!();

    Ok(())
}

fn print_parameter(name: &str, values: &[NodeValue], synced: bool) {
    println!("{name} ({}):", mark(synced));
    if values.is_empty() {
        println!("  (no node reports this parameter)");
    }
    for v in values {
        println!("  {:<24} {}", v.node, v.value);
    }
    println!();
}

fn mark(ok: bool) -> &'static str {
    if ok {
        "converged"
    } else {
        "NOT converged"
    }
}

/// `postcheck init <catalog>`: Create an empty catalog.
pub fn init(catalog_path: &str) -> Result {
    SqliteCatalog::open(catalog_path)?;
    println!("Catalog tables ready in {catalog_path}");
    Ok(())
}
