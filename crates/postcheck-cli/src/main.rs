use std::process;

use clap::{Args, Parser, Subcommand};

mod commands;

/// postcheck: Post-upgrade verification for multi-tenant database clusters.
///
/// Confirms the cluster converged on the installed version, then re-enables
/// DDL, rebalancing, rereplication and major freeze.
#[derive(Parser)]
#[command(name = "postcheck", version, about, long_about = None)]
struct Cli {
    /// Log at debug level (overridden by RUST_LOG).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run all checks, then re-enable the suspended capabilities.
    Run(CheckArgs),

    /// Run the checks only; no capability is touched.
    Verify(CheckArgs),

    /// Show the current convergence state without waiting.
    Status {
        #[command(flatten)]
        target: TargetArgs,

        /// Print the snapshot as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Create the catalog tables in a SQLite file.
    Init {
        /// Path to the SQLite catalog file.
        catalog: String,
    },
}

#[derive(Args)]
struct TargetArgs {
    /// Path to the SQLite catalog file.
    catalog: String,

    /// Installed software version, e.g. 4.2.1.0.
    #[arg(long)]
    cluster_version: Option<String>,

    /// Installed data version. Defaults to the cluster version.
    #[arg(long)]
    data_version: Option<String>,

    /// Configuration file with polling intervals and default budgets.
    #[arg(short, long)]
    config: Option<String>,
}

#[derive(Args)]
struct CheckArgs {
    #[command(flatten)]
    target: TargetArgs,

    /// Per-check timeout in seconds. 0 or negative uses the configured defaults.
    #[arg(short, long, default_value = "0", allow_negative_numbers = true)]
    timeout: i64,
}

fn main() {
    let cli = Cli::parse();
    commands::init_tracing(cli.verbose);

    let result: Result<(), Box<dyn std::error::Error>> = match cli.command {
        Commands::Run(args) => commands::run(&args.target.into(), args.timeout, true),
        Commands::Verify(args) => commands::run(&args.target.into(), args.timeout, false),
        Commands::Status { target, json } => commands::status(&target.into(), json),
        Commands::Init { catalog } => commands::init(&catalog),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        process::exit(1);
    }
}

impl From<TargetArgs> for commands::Target {
    fn from(args: TargetArgs) -> Self {
        Self {
            catalog: args.catalog,
            cluster_version: args.cluster_version,
            data_version: args.data_version,
            config: args.config,
        }
    }
}
