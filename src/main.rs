use clap::Parser;
use ess_planner::{run, InputArgs};
use std::path::PathBuf;
use std::process;

/// Siting and sizing of energy storage by Benders decomposition.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Study directory with config.json, network.json, scenarios.json
    /// and storage.json
    #[arg(required = true)]
    path: PathBuf,

    /// Output directory [default: <PATH>/results]
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Number of scenario workers, overrides config.json
    #[arg(short, long)]
    workers: Option<usize>,
}

fn main() {
    env_logger::Builder::from_default_env()
        .format_level(false)
        .format_target(false)
        .format_timestamp(None)
        .init();

    let cli = Cli::parse();
    let input_args = InputArgs {
        path: cli.path,
        output: cli.output,
        num_workers: cli.workers,
    };

    if let Err(e) = run(&input_args) {
        eprintln!("Application error: {e}");
        process::exit(1);
    }
}
