use crate::error::SolveError;
use crate::plan::OperatingBounds;
use crate::subproblem::{ScenarioOutcome, SubproblemSolver};
use crate::system::PlanningModel;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuildError, ThreadPoolBuilder};

/// A scenario whose subproblem could not be solved.
#[derive(Debug)]
pub struct ScenarioFailure {
    pub scenario: usize,
    pub source: SolveError,
}

/// Solves every scenario of an iteration on a dedicated worker pool.
pub struct ScenarioDispatcher {
    pool: ThreadPool,
}

impl ScenarioDispatcher {
    pub fn new(num_workers: usize) -> Result<Self, ThreadPoolBuildError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(num_workers.max(1))
            .thread_name(|i| format!("scenario-worker-{}", i))
            .build()?;
        Ok(Self { pool })
    }

    pub fn num_workers(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Returns one outcome per scenario, in scenario order. The first
    /// failure observed stops the round and no partial result is kept.
    pub fn dispatch<S: SubproblemSolver>(
        &self,
        solver: &S,
        model: &PlanningModel,
        bounds: &OperatingBounds,
    ) -> Result<Vec<ScenarioOutcome>, ScenarioFailure> {
        self.pool.install(|| {
            model
                .scenarios
                .par_iter()
                .map(|scenario| {
                    log::debug!("scenario {}: solving", scenario.id);
                    solver
                        .solve(model, scenario, bounds)
                        .map(|s| s.into_relaxation_prices(scenario.id))
                        .map_err(|source| ScenarioFailure {
                            scenario: scenario.id,
                            source,
                        })
                })
                .collect::<Result<Vec<_>, _>>()
        })
    }
}
