use crate::cut::BendersCutPool;
use crate::dispatch::ScenarioDispatcher;
use crate::error::PlanningError;
use crate::input::Config;
use crate::master::InvestmentPlanner;
use crate::plan::StoragePlan;
use crate::report;
use crate::subproblem::{ScenarioOutcome, SubproblemSolver};
use crate::system::{BusTimeMatrix, PlanningModel};
use crate::utils;
use serde::Serialize;
use std::time::Instant;

/// How the decomposition loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunStatus {
    Converged,
    IterationLimit,
}

/// Everything that was decided and observed in one completed iteration.
#[derive(Debug, Clone, Serialize)]
pub struct IterationRecord {
    pub iteration: usize,
    pub plan: StoragePlan,
    pub investment_cost: f64,
    /// Weighted operating cost estimate of the master problem
    pub alpha: f64,
    /// Operating cost of each scenario under `plan`
    pub scenario_costs: Vec<f64>,
    /// Marginal cost of active demand, per scenario
    pub active_prices: Vec<BusTimeMatrix>,
    /// Marginal cost of reactive demand, per scenario
    pub reactive_prices: Vec<BusTimeMatrix>,
    pub rating_sensitivities: Vec<Vec<f64>>,
    pub capacity_sensitivities: Vec<Vec<f64>>,
    pub expected_operating_cost: f64,
    pub fairness_price: f64,
    pub upper_bound: f64,
    pub lower_bound: f64,
    pub gap: f64,
    pub elapsed_seconds: f64,
}

/// `|UB - LB| / |UB|`, or the absolute difference when the upper bound is
/// zero.
pub fn relative_gap(upper_bound: f64, lower_bound: f64) -> f64 {
    let difference = (upper_bound - lower_bound).abs();
    if upper_bound == 0.0 {
        difference
    } else {
        difference / upper_bound.abs()
    }
}

impl IterationRecord {
    pub fn is_converged(&self, tolerance: f64) -> bool {
        (self.upper_bound - self.lower_bound).abs()
            <= self.upper_bound.abs() * tolerance
    }
}

/// Drives the investment problem and the scenario subproblems until the
/// bounds meet or the iteration limit is reached.
pub struct BendersCoordinator<'a, S: SubproblemSolver> {
    model: &'a PlanningModel,
    config: Config,
    solver: S,
    planner: InvestmentPlanner,
    dispatcher: ScenarioDispatcher,
    weights: Vec<f64>,
    cut_pool: BendersCutPool,
    records: Vec<IterationRecord>,
}

impl<'a, S: SubproblemSolver> BendersCoordinator<'a, S> {
    pub fn new(
        model: &'a PlanningModel,
        config: Config,
        solver: S,
    ) -> Result<Self, PlanningError> {
        let planner = InvestmentPlanner::new(model, &config);
        let dispatcher = ScenarioDispatcher::new(config.num_workers)?;
        let weights = model.scenario_weights(config.base_weight);
        Ok(Self {
            model,
            config,
            solver,
            planner,
            dispatcher,
            weights,
            cut_pool: BendersCutPool::new(),
            records: vec![],
        })
    }

    /// Completed iterations, in order. Kept intact when `run` fails.
    pub fn records(&self) -> &[IterationRecord] {
        &self.records
    }

    pub fn cut_pool(&self) -> &BendersCutPool {
        &self.cut_pool
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn run(&mut self) -> Result<RunStatus, PlanningError> {
        report::iteration_table_header();
        report::iteration_table_divider();
        while self.records.len() < self.config.max_iterations {
            let iteration = self.records.len();
            let record = self.iterate(iteration)?;
            report::iteration_table_row(
                record.iteration,
                record.lower_bound,
                record.upper_bound,
                record.gap,
                record.elapsed_seconds,
            );
            let converged = record.is_converged(self.config.tolerance);
            self.records.push(record);
            if converged {
                log::info!("converged after {} iterations", iteration + 1);
                return Ok(RunStatus::Converged);
            }
        }
        log::warn!(
            "iteration limit of {} reached without convergence",
            self.config.max_iterations
        );
        Ok(RunStatus::IterationLimit)
    }

    fn iterate(
        &mut self,
        iteration: usize,
    ) -> Result<IterationRecord, PlanningError> {
        let begin = Instant::now();

        let master = self.planner.solve(iteration, &self.cut_pool).map_err(
            |source| {
                log::error!("iteration {}: master failed: {}", iteration, source);
                PlanningError::Master { iteration, source }
            },
        )?;

        let bounds = master.plan.operating_bounds(&self.model.network);
        let outcomes = self
            .dispatcher
            .dispatch(&self.solver, self.model, &bounds)
            .map_err(|failure| {
                log::error!(
                    "iteration {}: scenario {} failed: {}",
                    iteration,
                    failure.scenario,
                    failure.source
                );
                PlanningError::Subproblem {
                    iteration,
                    scenario: failure.scenario,
                    source: failure.source,
                }
            })?;

        self.cut_pool.add_cuts(iteration, &outcomes, &master.plan);
        log::debug!(
            "iteration {}: {} cuts in the pool",
            iteration,
            self.cut_pool.len()
        );

        Ok(self.build_record(
            iteration,
            master.plan,
            master.investment_cost,
            master.alpha,
            master.objective,
            outcomes,
            begin.elapsed().as_secs_f64(),
        ))
    }

    #[allow(clippy::too_many_arguments)]
    fn build_record(
        &self,
        iteration: usize,
        plan: StoragePlan,
        investment_cost: f64,
        alpha: f64,
        lower_bound: f64,
        outcomes: Vec<ScenarioOutcome>,
        elapsed_seconds: f64,
    ) -> IterationRecord {
        let scenario_costs: Vec<f64> =
            outcomes.iter().map(|o| o.cost).collect();
        let expected_operating_cost =
            utils::dot_product(&self.weights, &scenario_costs);
        let upper_bound = expected_operating_cost
            + investment_cost
            + self.config.fairness_price;

        let mut active_prices = Vec::with_capacity(outcomes.len());
        let mut reactive_prices = Vec::with_capacity(outcomes.len());
        let mut rating_sensitivities = Vec::with_capacity(outcomes.len());
        let mut capacity_sensitivities = Vec::with_capacity(outcomes.len());
        for outcome in outcomes.into_iter() {
            active_prices.push(outcome.active_prices);
            reactive_prices.push(outcome.reactive_prices);
            rating_sensitivities.push(outcome.rating_sensitivity);
            capacity_sensitivities.push(outcome.capacity_sensitivity);
        }

        IterationRecord {
            iteration,
            plan,
            investment_cost,
            alpha,
            scenario_costs,
            active_prices,
            reactive_prices,
            rating_sensitivities,
            capacity_sensitivities,
            expected_operating_cost,
            fairness_price: self.config.fairness_price,
            upper_bound,
            lower_bound,
            gap: relative_gap(upper_bound, lower_bound),
            elapsed_seconds,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SolveError;
    use crate::plan::OperatingBounds;
    use crate::subproblem::{SocOpf, SubproblemSolution};
    use crate::system::Scenario;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Operating cost that decreases linearly with the installed rating
    /// down to a saturation point. Fails on every call after `fail_after`.
    struct LinearSolver {
        fail_after: Option<usize>,
        calls: AtomicUsize,
    }

    impl LinearSolver {
        fn new(fail_after: Option<usize>) -> Self {
            Self {
                fail_after,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl SubproblemSolver for LinearSolver {
        fn solve(
            &self,
            model: &PlanningModel,
            scenario: &Scenario,
            bounds: &OperatingBounds,
        ) -> Result<SubproblemSolution, SolveError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(limit) = self.fail_after {
                if call >= limit && scenario.id == 1 {
                    return Err(SolveError::NotOptimal {
                        status: "NumericalError".to_string(),
                    });
                }
            }
            let (buses, steps) = (model.network.bus_count(), model.network.step_count());
            let rating = bounds.charge_max[2];
            let saturated = rating >= 0.5;
            let cost = if saturated { 500.0 } else { 1000.0 - 1000.0 * rating };
            let mut rating_duals = vec![0.0; buses];
            rating_duals[2] = if saturated { 0.0 } else { 1000.0 };
            Ok(SubproblemSolution {
                cost,
                active_balance_duals: BusTimeMatrix::zeros(buses, steps),
                reactive_balance_duals: BusTimeMatrix::zeros(buses, steps),
                rating_duals,
                capacity_duals: vec![0.0; buses],
            })
        }
    }

    fn config(max_iterations: usize) -> Config {
        Config {
            max_iterations,
            num_workers: 2,
            ..Config::default()
        }
    }

    #[test]
    fn test_relative_gap() {
        assert_eq!(relative_gap(100.0, 99.0), 0.01);
        assert_eq!(relative_gap(0.0, 0.0), 0.0);
        assert_eq!(relative_gap(0.0, -2.0), 2.0);
    }

    #[test]
    fn test_linear_problem_converges_to_saturation() {
        let model = PlanningModel::default();
        let mut coordinator =
            BendersCoordinator::new(&model, config(20), LinearSolver::new(None))
                .unwrap();
        let status = coordinator.run().unwrap();
        assert_eq!(status, RunStatus::Converged);
        let records = coordinator.records();
        let last = records.last().unwrap();
        assert!(last.gap <= 0.01);
        assert!(last.plan.installed[2]);
        assert!((last.plan.ratings[2] - 0.5).abs() < 1e-6);
        assert_eq!(coordinator.cut_pool().len(), 2 * records.len());
    }

    #[test]
    fn test_iteration_limit_is_not_an_error() {
        let model = PlanningModel::default();
        let mut coordinator =
            BendersCoordinator::new(&model, config(1), LinearSolver::new(None))
                .unwrap();
        assert_eq!(coordinator.run().unwrap(), RunStatus::IterationLimit);
        assert_eq!(coordinator.records().len(), 1);
        assert_eq!(coordinator.records()[0].plan, StoragePlan::empty(3));
    }

    #[test]
    fn test_failed_round_keeps_previous_records() {
        let model = PlanningModel::default();
        // two scenarios per round, the second round fails
        let mut coordinator = BendersCoordinator::new(
            &model,
            config(20),
            LinearSolver::new(Some(2)),
        )
        .unwrap();
        let err = coordinator.run().unwrap_err();
        assert_eq!(err.iteration(), Some(1));
        assert_eq!(err.scenario(), Some(1));
        assert_eq!(coordinator.records().len(), 1);
        assert_eq!(coordinator.cut_pool().len(), 2);
    }

    #[test]
    fn test_fairness_price_raises_upper_bound() {
        let model = PlanningModel::default();
        let config = Config {
            fairness_price: 7.0,
            ..config(1)
        };
        let mut coordinator =
            BendersCoordinator::new(&model, config, LinearSolver::new(None))
                .unwrap();
        coordinator.run().unwrap();
        let record = &coordinator.records()[0];
        assert_eq!(record.upper_bound, 1000.0 + 7.0);
        assert_eq!(record.fairness_price, 7.0);
    }

    #[test]
    fn test_zero_candidates_converge_in_two_iterations() {
        let mut model = PlanningModel::default();
        model.storage.candidates.clear();
        let mut coordinator =
            BendersCoordinator::new(&model, config(10), SocOpf::new()).unwrap();
        let status = coordinator.run().unwrap();
        assert_eq!(status, RunStatus::Converged);
        let records = coordinator.records();
        assert!(records.len() <= 2);
        for record in records.iter() {
            assert_eq!(record.plan.installation_count(), 0);
            assert_eq!(record.investment_cost, 0.0);
        }
    }

    #[test]
    fn test_three_bus_feeder() {
        let model = PlanningModel::default();
        let mut coordinator =
            BendersCoordinator::new(&model, config(60), SocOpf::new()).unwrap();
        let status = coordinator.run().unwrap();
        assert_eq!(status, RunStatus::Converged);

        let records = coordinator.records();
        for (index, record) in records.iter().enumerate() {
            assert_eq!(record.iteration, index);
            assert_eq!(record.scenario_costs.len(), 2);
            assert_eq!(record.active_prices[0].shape(), (3, 24));
            assert!(record.plan.installation_count() <= 1);
            let tolerance = 1e-4 * record.upper_bound.abs().max(1.0);
            assert!(record.lower_bound <= record.upper_bound + tolerance);
            if index > 0 {
                assert!(
                    record.lower_bound
                        >= records[index - 1].lower_bound - tolerance
                );
            }
        }
        let last = records.last().unwrap();
        assert!(last.gap <= 0.01);
    }
}
