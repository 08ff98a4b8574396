pub mod benders;
mod conic;
pub mod cut;
pub mod dispatch;
pub mod error;
pub mod input;
pub mod master;
pub mod output;
pub mod plan;
mod report;
mod solver;
pub mod subproblem;
pub mod system;
pub mod utils;

use benders::{BendersCoordinator, RunStatus};
use chrono::Utc;
use error::PlanningError;
use input::Input;
use std::path::PathBuf;
use std::time::Instant;
use subproblem::SocOpf;

/// Arguments of a planning run, as given on the command line.
#[derive(Debug, Clone)]
pub struct InputArgs {
    pub path: PathBuf,
    pub output: Option<PathBuf>,
    pub num_workers: Option<usize>,
}

impl InputArgs {
    /// Outputs are written next to the inputs unless told otherwise.
    pub fn output_path(&self) -> PathBuf {
        self.output
            .clone()
            .unwrap_or_else(|| self.path.join("results"))
    }
}

pub fn run(input_args: &InputArgs) -> Result<RunStatus, PlanningError> {
    report::show_greeting();

    let begin = Instant::now();
    let started_at = Utc::now();
    report::input_reading_line(&input_args.path);
    let input = Input::build(&input_args.path)?;
    let model = input.build_planning_model()?;

    let mut config = input.config.clone();
    if let Some(num_workers) = input_args.num_workers {
        config.num_workers = num_workers;
    }

    report::planning_greeting(
        model.network.bus_count(),
        model.network.step_count(),
        model.scenario_count(),
        model.storage.candidates.len(),
        config.num_workers,
    );

    let mut coordinator = BendersCoordinator::new(&model, config, SocOpf::new())?;
    let result = coordinator.run();

    // the history is persisted even when the loop aborted
    let output_path = input_args.output_path();
    report::output_generation_line(&output_path);
    output::generate_outputs(
        coordinator.records(),
        coordinator.cut_pool(),
        &result,
        started_at,
        &output_path,
    )?;

    let status = result?;
    report::run_status(status, coordinator.records().len());
    report::show_farewell(begin.elapsed());

    Ok(status)
}
