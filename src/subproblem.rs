use crate::conic::{ConicProblem, ConicSolution};
use crate::error::SolveError;
use crate::plan::OperatingBounds;
use crate::system::{BusTimeMatrix, PlanningModel, Scenario};
use serde::Serialize;

/// The operating problem of one scenario under a fixed storage plan.
///
/// Implementations must return duals in the solver's native sign, i.e. the
/// marginal cost of tightening each constraint. Callers turn them into
/// relaxation prices with [`SubproblemSolution::into_relaxation_prices`].
pub trait SubproblemSolver: Send + Sync {
    fn solve(
        &self,
        model: &PlanningModel,
        scenario: &Scenario,
        bounds: &OperatingBounds,
    ) -> Result<SubproblemSolution, SolveError>;
}

/// Optimal cost and native-sign duals of one scenario solve.
#[derive(Debug, Clone)]
pub struct SubproblemSolution {
    pub cost: f64,
    /// Active power balance, (bus, time step)
    pub active_balance_duals: BusTimeMatrix,
    /// Reactive power balance, (bus, time step)
    pub reactive_balance_duals: BusTimeMatrix,
    /// Sum over the horizon of the charge and discharge ceiling duals
    pub rating_duals: Vec<f64>,
    /// Sum over the horizon of the state-of-charge ceiling duals
    pub capacity_duals: Vec<f64>,
}

impl SubproblemSolution {
    /// Flips every dual from the marginal cost of tightening to the
    /// marginal cost of relaxing, which is the derivative of the optimal
    /// cost with respect to the constraint right-hand side. This is the
    /// only place where the sign is changed.
    pub fn into_relaxation_prices(self, scenario: usize) -> ScenarioOutcome {
        ScenarioOutcome {
            scenario,
            cost: self.cost,
            active_prices: self.active_balance_duals.negated(),
            reactive_prices: self.reactive_balance_duals.negated(),
            rating_sensitivity: self.rating_duals.iter().map(|d| -d).collect(),
            capacity_sensitivity: self
                .capacity_duals
                .iter()
                .map(|d| -d)
                .collect(),
        }
    }
}

/// What the coordinator keeps from a scenario solve.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioOutcome {
    pub scenario: usize,
    pub cost: f64,
    pub active_prices: BusTimeMatrix,
    pub reactive_prices: BusTimeMatrix,
    /// ∂cost/∂rating per bus
    pub rating_sensitivity: Vec<f64>,
    /// ∂cost/∂capacity per bus
    pub capacity_sensitivity: Vec<f64>,
}

/// Helper accessor for indexing the variables and constraints of one time
/// step of the SOC-OPF.
#[derive(Debug, Default)]
struct StepAccessors {
    active_generation: Vec<usize>,
    reactive_generation: Vec<usize>,
    squared_voltage: Vec<usize>,
    voltage_cos: Vec<usize>,
    voltage_sin: Vec<usize>,
    direct_active_flow: Vec<usize>,
    direct_reactive_flow: Vec<usize>,
    reverse_active_flow: Vec<usize>,
    reverse_reactive_flow: Vec<usize>,
    charge: Vec<usize>, // indexed like `storage_bus_ids`
    discharge: Vec<usize>,
    soc: Vec<usize>,
    active_balance: Vec<usize>,
    reactive_balance: Vec<usize>,
    charge_limit: Vec<usize>,
    discharge_limit: Vec<usize>,
    soc_limit: Vec<usize>,
}

/// Second-order-cone relaxation of the multi-period AC optimal power flow
/// with storage, solved by Clarabel.
///
/// Each line carries the lifted voltage products `c = VᵢVⱼcos θᵢⱼ` and
/// `s = VᵢVⱼsin θᵢⱼ`, tied to the squared voltages by `c² + s² ≤ vᵢvⱼ`.
/// The relaxation is assumed to be tight.
#[derive(Debug, Default, Clone, Copy)]
pub struct SocOpf;

impl SocOpf {
    pub fn new() -> Self {
        Self
    }

    fn storage_bus_ids(
        model: &PlanningModel,
        bounds: &OperatingBounds,
    ) -> Vec<usize> {
        let mut ids: Vec<usize> =
            model.storage.candidates.iter().map(|c| c.bus_id).collect();
        for bus_id in 0..model.network.bus_count() {
            if bounds.charge_max[bus_id] > 0.0
                || bounds.discharge_max[bus_id] > 0.0
                || bounds.soc_max[bus_id] > 0.0
            {
                ids.push(bus_id);
            }
        }
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    fn add_step_columns(
        pb: &mut ConicProblem,
        model: &PlanningModel,
        step: usize,
        storage_bus_ids: &[usize],
    ) -> StepAccessors {
        let network = &model.network;
        let mut acc = StepAccessors::default();

        for bus in network.buses.iter() {
            let cost = model.generation_cost.at(bus.id, step);
            let p = pb.add_column(cost.linear);
            pb.add_quadratic_cost(p, cost.quadratic);
            pb.offset += cost.constant;
            acc.active_generation.push(p);
            acc.reactive_generation.push(pb.add_column(0.0));
            acc.squared_voltage.push(pb.add_column(0.0));
        }
        for _ in network.lines.iter() {
            acc.voltage_cos.push(pb.add_column(0.0));
            acc.voltage_sin.push(pb.add_column(0.0));
            acc.direct_active_flow.push(pb.add_column(0.0));
            acc.direct_reactive_flow.push(pb.add_column(0.0));
            acc.reverse_active_flow.push(pb.add_column(0.0));
            acc.reverse_reactive_flow.push(pb.add_column(0.0));
        }
        for _ in storage_bus_ids.iter() {
            acc.charge.push(pb.add_column(0.0));
            acc.discharge.push(pb.add_column(0.0));
            acc.soc.push(pb.add_column(0.0));
        }
        acc
    }

    fn add_balance_rows(
        pb: &mut ConicProblem,
        model: &PlanningModel,
        scenario: &Scenario,
        step: usize,
        storage_bus_ids: &[usize],
        acc: &mut StepAccessors,
    ) {
        let network = &model.network;
        for bus in network.buses.iter() {
            let v = acc.squared_voltage[bus.id];

            let mut active = vec![
                (acc.active_generation[bus.id], 1.0),
                (v, -bus.shunt_conductance),
            ];
            let mut reactive = vec![
                (acc.reactive_generation[bus.id], 1.0),
                (v, bus.shunt_susceptance),
            ];
            for line_id in bus.source_line_ids.iter() {
                active.push((acc.direct_active_flow[*line_id], -1.0));
                reactive.push((acc.direct_reactive_flow[*line_id], -1.0));
            }
            for line_id in bus.target_line_ids.iter() {
                active.push((acc.reverse_active_flow[*line_id], -1.0));
                reactive.push((acc.reverse_reactive_flow[*line_id], -1.0));
            }
            if let Some(k) = storage_bus_ids.iter().position(|id| *id == bus.id)
            {
                active.push((acc.discharge[k], 1.0));
                active.push((acc.charge[k], -1.0));
            }

            acc.active_balance.push(pb.add_eq_row(
                &active,
                scenario.active_demand.get(bus.id, step),
            ));
            acc.reactive_balance
                .push(pb.add_eq_row(&reactive, bus.reactive_demand[step]));
        }
    }

    fn add_line_rows(
        pb: &mut ConicProblem,
        model: &PlanningModel,
        acc: &StepAccessors,
    ) {
        for line in model.network.lines.iter() {
            let g = line.series_conductance();
            let b = line.series_susceptance();
            let b_half = b + line.shunt_susceptance / 2.0;
            let vi = acc.squared_voltage[line.source_bus_id];
            let vj = acc.squared_voltage[line.target_bus_id];
            let c = acc.voltage_cos[line.id];
            let s = acc.voltage_sin[line.id];
            let p_ij = acc.direct_active_flow[line.id];
            let q_ij = acc.direct_reactive_flow[line.id];
            let p_ji = acc.reverse_active_flow[line.id];
            let q_ji = acc.reverse_reactive_flow[line.id];

            // p_ij = g vi - g c - b s
            pb.add_eq_row(&[(p_ij, 1.0), (vi, -g), (c, g), (s, b)], 0.0);
            // q_ij = -(b + bsh/2) vi + b c - g s
            pb.add_eq_row(
                &[(q_ij, 1.0), (vi, b_half), (c, -b), (s, g)],
                0.0,
            );
            // p_ji = g vj - g c + b s
            pb.add_eq_row(&[(p_ji, 1.0), (vj, -g), (c, g), (s, -b)], 0.0);
            // q_ji = -(b + bsh/2) vj + b c + g s
            pb.add_eq_row(
                &[(q_ji, 1.0), (vj, b_half), (c, -b), (s, -g)],
                0.0,
            );

            // c² + s² ≤ vi vj  ⇔  ‖(2c, 2s, vi - vj)‖ ≤ vi + vj
            pb.add_second_order_cone(&[
                (vec![(vi, 1.0), (vj, 1.0)], 0.0),
                (vec![(c, 2.0)], 0.0),
                (vec![(s, 2.0)], 0.0),
                (vec![(vi, 1.0), (vj, -1.0)], 0.0),
            ]);

            // apparent power limit at both ends
            for (p, q) in [(p_ij, q_ij), (p_ji, q_ji)] {
                pb.add_second_order_cone(&[
                    (vec![], line.flow_limit),
                    (vec![(p, 1.0)], 0.0),
                    (vec![(q, 1.0)], 0.0),
                ]);
            }
        }
    }

    fn add_bound_rows(
        pb: &mut ConicProblem,
        model: &PlanningModel,
        scenario: &Scenario,
        step: usize,
        acc: &StepAccessors,
    ) {
        for bus in model.network.buses.iter() {
            pb.add_column_bounds(
                acc.active_generation[bus.id],
                scenario.active_generation(bus, step),
            );
            pb.add_column_bounds(
                acc.reactive_generation[bus.id],
                bus.reactive_generation,
            );
            pb.add_column_bounds(
                acc.squared_voltage[bus.id],
                bus.squared_voltage(),
            );
        }
    }

    /// Storage limits are always written as a pair of inequalities, even
    /// when the plan collapses them to zero, so that the ceiling rows keep
    /// a dual to price additional rating and capacity.
    fn add_storage_rows(
        pb: &mut ConicProblem,
        storage_bus_ids: &[usize],
        bounds: &OperatingBounds,
        acc: &mut StepAccessors,
    ) {
        for (k, bus_id) in storage_bus_ids.iter().enumerate() {
            pb.add_geq_row(&[(acc.charge[k], 1.0)], 0.0);
            acc.charge_limit
                .push(pb.add_leq_row(&[(acc.charge[k], 1.0)], bounds.charge_max[*bus_id]));
            pb.add_geq_row(&[(acc.discharge[k], 1.0)], 0.0);
            acc.discharge_limit.push(pb.add_leq_row(
                &[(acc.discharge[k], 1.0)],
                bounds.discharge_max[*bus_id],
            ));
            pb.add_geq_row(&[(acc.soc[k], 1.0)], 0.0);
            acc.soc_limit
                .push(pb.add_leq_row(&[(acc.soc[k], 1.0)], bounds.soc_max[*bus_id]));
        }
    }

    /// soc_t = soc_{t-1} + η·ch_t - dis_t/η
    fn add_soc_recursion_rows(
        pb: &mut ConicProblem,
        storage_bus_ids: &[usize],
        bounds: &OperatingBounds,
        efficiency: f64,
        current: &StepAccessors,
        previous: Option<&StepAccessors>,
    ) {
        for (k, bus_id) in storage_bus_ids.iter().enumerate() {
            let mut factors = vec![
                (current.soc[k], 1.0),
                (current.charge[k], -efficiency),
                (current.discharge[k], 1.0 / efficiency),
            ];
            let rhs = match previous {
                Some(previous) => {
                    factors.push((previous.soc[k], -1.0));
                    0.0
                }
                None => bounds.initial_soc[*bus_id],
            };
            pb.add_eq_row(&factors, rhs);
        }
    }

    fn extract_duals(
        model: &PlanningModel,
        storage_bus_ids: &[usize],
        steps: &[StepAccessors],
        solution: &ConicSolution,
    ) -> SubproblemSolution {
        let buses_count = model.network.bus_count();
        let steps_count = model.network.step_count();
        let mut active = BusTimeMatrix::zeros(buses_count, steps_count);
        let mut reactive = BusTimeMatrix::zeros(buses_count, steps_count);
        let mut rating_duals = vec![0.0; buses_count];
        let mut capacity_duals = vec![0.0; buses_count];

        for (t, acc) in steps.iter().enumerate() {
            for bus_id in 0..buses_count {
                active.set(bus_id, t, solution.z[acc.active_balance[bus_id]]);
                reactive.set(
                    bus_id,
                    t,
                    solution.z[acc.reactive_balance[bus_id]],
                );
            }
            for (k, bus_id) in storage_bus_ids.iter().enumerate() {
                rating_duals[*bus_id] += solution.z[acc.charge_limit[k]]
                    + solution.z[acc.discharge_limit[k]];
                capacity_duals[*bus_id] += solution.z[acc.soc_limit[k]];
            }
        }

        SubproblemSolution {
            cost: solution.objective,
            active_balance_duals: active,
            reactive_balance_duals: reactive,
            rating_duals,
            capacity_duals,
        }
    }
}

impl SubproblemSolver for SocOpf {
    fn solve(
        &self,
        model: &PlanningModel,
        scenario: &Scenario,
        bounds: &OperatingBounds,
    ) -> Result<SubproblemSolution, SolveError> {
        let storage_bus_ids = Self::storage_bus_ids(model, bounds);
        let mut pb = ConicProblem::new();
        let mut steps = Vec::<StepAccessors>::with_capacity(
            model.network.step_count(),
        );

        for t in 0..model.network.step_count() {
            let mut acc =
                Self::add_step_columns(&mut pb, model, t, &storage_bus_ids);
            Self::add_balance_rows(
                &mut pb,
                model,
                scenario,
                t,
                &storage_bus_ids,
                &mut acc,
            );
            Self::add_line_rows(&mut pb, model, &acc);
            Self::add_soc_recursion_rows(
                &mut pb,
                &storage_bus_ids,
                bounds,
                model.storage.efficiency,
                &acc,
                steps.last(),
            );
            Self::add_bound_rows(&mut pb, model, scenario, t, &acc);
            Self::add_storage_rows(&mut pb, &storage_bus_ids, bounds, &mut acc);
            steps.push(acc);
        }

        log::debug!(
            "scenario {}: SOC-OPF with {} columns and {} rows",
            scenario.id,
            pb.num_cols(),
            pb.num_rows()
        );
        let solution = pb.solve()?;
        log::debug!(
            "scenario {}: solved in {} iterations, cost {:.4}",
            scenario.id,
            solution.iterations,
            solution.objective
        );

        Ok(Self::extract_duals(model, &storage_bus_ids, &steps, &solution))
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use crate::plan::StoragePlan;
    use crate::system::{
        Bounds, Bus, GenerationCost, InvestmentCosts, Network,
        QuadraticCost, StorageOptions,
    };

    fn single_bus_model(demand: f64) -> PlanningModel {
        let bus = Bus::new(
            0,
            vec![0.0],
            0.0,
            0.0,
            Bounds::new(0.95, 1.05),
            Bounds::new(0.0, 2.0),
            Bounds::new(-1.0, 1.0),
        );
        let network = Network::new(vec![bus], vec![], 0, 1);
        let scenario = Scenario::new(
            0,
            1.0,
            BusTimeMatrix::filled(1, 1, demand),
            BusTimeMatrix::zeros(1, 1),
        );
        let cost = GenerationCost::from_slack_and_renewable(
            1,
            1,
            0,
            &QuadraticCost::new(0.5, 10.0, 0.0),
            &QuadraticCost::new(0.0, 0.0, 0.0),
        );
        let storage = StorageOptions {
            candidates: vec![],
            costs: InvestmentCosts {
                fixed_cost: 0.0,
                power_rating_cost: 0.0,
                energy_capacity_cost: 0.0,
            },
            efficiency: 1.0,
            max_installations: None,
            investment_budget: None,
        };
        PlanningModel::new(network, vec![scenario], cost, storage).unwrap()
    }

    fn solve_single_bus(demand: f64) -> ScenarioOutcome {
        let model = single_bus_model(demand);
        let bounds = OperatingBounds::zeros(1);
        SocOpf::new()
            .solve(&model, &model.scenarios[0], &bounds)
            .unwrap()
            .into_relaxation_prices(0)
    }

    #[test]
    fn test_single_bus_cost_and_price() {
        // cost = 0.5 d² + 10 d, marginal cost = d + 10
        let outcome = solve_single_bus(0.4);
        assert!((outcome.cost - 4.08).abs() < 1e-4);
        assert!((outcome.active_prices.get(0, 0) - 10.4).abs() < 1e-4);
    }

    #[test]
    fn test_active_price_matches_finite_difference() {
        let epsilon = 1e-3;
        let base = solve_single_bus(0.4);
        let relaxed = solve_single_bus(0.4 + epsilon);
        let finite_difference = (relaxed.cost - base.cost) / epsilon;
        assert!(
            (finite_difference - base.active_prices.get(0, 0)).abs() < 1e-2
        );
    }

    #[test]
    fn test_sign_step_negates_every_dual() {
        let solution = SubproblemSolution {
            cost: 3.0,
            active_balance_duals: BusTimeMatrix::filled(2, 2, -1.5),
            reactive_balance_duals: BusTimeMatrix::filled(2, 2, 0.5),
            rating_duals: vec![0.0, 2.0],
            capacity_duals: vec![1.0, 0.0],
        };
        let outcome = solution.into_relaxation_prices(4);
        assert_eq!(outcome.scenario, 4);
        assert_eq!(outcome.cost, 3.0);
        assert_eq!(outcome.active_prices.get(1, 1), 1.5);
        assert_eq!(outcome.reactive_prices.get(0, 0), -0.5);
        assert_eq!(outcome.rating_sensitivity, vec![-0.0, -2.0]);
        assert_eq!(outcome.capacity_sensitivity, vec![-1.0, -0.0]);
    }

    #[test]
    fn test_default_model_duals_have_bus_time_shape() {
        let model = PlanningModel::default();
        let bounds = StoragePlan::empty(3).operating_bounds(&model.network);
        let outcome = SocOpf::new()
            .solve(&model, &model.scenarios[0], &bounds)
            .unwrap()
            .into_relaxation_prices(0);
        assert_eq!(outcome.active_prices.shape(), (3, 24));
        assert_eq!(outcome.reactive_prices.shape(), (3, 24));
        assert_eq!(outcome.rating_sensitivity.len(), 3);
        assert!(outcome.cost > 0.0);
        // more rating or capacity can never make operation more expensive
        for g in outcome
            .rating_sensitivity
            .iter()
            .chain(outcome.capacity_sensitivity.iter())
        {
            assert!(*g <= 1e-6);
        }
    }

    #[test]
    fn test_storage_does_not_increase_operating_cost() {
        let model = PlanningModel::default();
        let solver = SocOpf::new();
        let empty = StoragePlan::empty(3).operating_bounds(&model.network);
        let mut plan = StoragePlan::empty(3);
        plan.install(2, 0.5, 2.0);
        let installed = plan.operating_bounds(&model.network);

        let without = solver
            .solve(&model, &model.scenarios[0], &empty)
            .unwrap();
        let with = solver
            .solve(&model, &model.scenarios[0], &installed)
            .unwrap();
        assert!(with.cost <= without.cost + 1e-4);
    }

    #[test]
    fn test_sensitivities_give_a_valid_lower_approximation() {
        let model = PlanningModel::default();
        let solver = SocOpf::new();
        let mut small = StoragePlan::empty(3);
        small.install(2, 0.2, 0.5);
        let mut large = StoragePlan::empty(3);
        large.install(2, 0.6, 2.5);

        let at_small = solver
            .solve(&model, &model.scenarios[0], &small.operating_bounds(&model.network))
            .unwrap()
            .into_relaxation_prices(0);
        let at_large = solver
            .solve(&model, &model.scenarios[0], &large.operating_bounds(&model.network))
            .unwrap();

        let predicted = at_small.cost
            + at_small.rating_sensitivity[2] * (0.6 - 0.2)
            + at_small.capacity_sensitivity[2] * (2.5 - 0.5);
        let tolerance = 1e-4 * at_large.cost.abs().max(1.0);
        assert!(predicted <= at_large.cost + tolerance);
    }

    #[test]
    fn test_unserved_demand_is_a_solve_error() {
        let model = single_bus_model(5.0);
        let bounds = OperatingBounds::zeros(1);
        let result = SocOpf::new().solve(&model, &model.scenarios[0], &bounds);
        assert!(matches!(result, Err(SolveError::NotOptimal { .. })));
    }
}
