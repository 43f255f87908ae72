mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::{
    action::ActionSubcommand, alert::AlertSubcommand, anomaly::AnomalySubcommand,
    config::ConfigSubcommand, cycle::CycleSubcommand, strategy::StrategySubcommand,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "ooda",
    about = "Inspect and drive agent OODA cycles, actions, strategies and approvals",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project root (default: auto-detect from .ooda/ or .git/)
    #[arg(long, global = true, env = "OODA_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create .ooda/ with a default config and an empty store
    Init,

    /// Start, inspect and advance cycles
    Cycle {
        #[command(subcommand)]
        subcommand: CycleSubcommand,
    },

    /// List and update proposed actions
    Action {
        #[command(subcommand)]
        subcommand: ActionSubcommand,
    },

    /// Send alerts and resolve approvals
    Alert {
        #[command(subcommand)]
        subcommand: AlertSubcommand,
    },

    /// Check a metric series for anomalies
    Anomaly {
        #[command(subcommand)]
        subcommand: AnomalySubcommand,
    },

    /// Inspect cached strategies
    Strategy {
        #[command(subcommand)]
        subcommand: StrategySubcommand,
    },

    /// Show or validate the project configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let root = root::resolve_root(cli.root.as_deref());

    let result = match cli.command {
        Commands::Init => cmd::init::run(&root),
        Commands::Cycle { subcommand } => cmd::cycle::run(&root, subcommand, cli.json),
        Commands::Action { subcommand } => cmd::action::run(&root, subcommand, cli.json),
        Commands::Alert { subcommand } => cmd::alert::run(&root, subcommand, cli.json),
        Commands::Anomaly { subcommand } => cmd::anomaly::run(&root, subcommand, cli.json),
        Commands::Strategy { subcommand } => cmd::strategy::run(&root, subcommand, cli.json),
        Commands::Config { subcommand } => cmd::config::run(&root, subcommand, cli.json),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
