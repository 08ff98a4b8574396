use crate::cut::BendersCutPool;
use crate::error::MasterError;
use crate::input::Config;
use crate::plan::StoragePlan;
use crate::solver::{HighsModelStatus, Model, Problem};
use crate::system::{InvestmentCosts, PlanningModel, StorageCandidate};

/// Helper accessor for the columns of the master problem.
#[derive(Debug)]
struct Accessors {
    installed: Vec<usize>, // indexed like the candidates
    rating: Vec<usize>,
    capacity: Vec<usize>,
    operating_cost: Vec<usize>, // indexed by scenario
}

#[derive(Debug, Clone)]
pub struct MasterSolution {
    /// Investment plus weighted operating cost estimate, a lower bound on
    /// the total expected cost
    pub objective: f64,
    pub investment_cost: f64,
    pub plan: StoragePlan,
    /// Weighted sum of the operating cost estimates
    pub alpha: f64,
    /// Per-scenario operating cost estimates
    pub operating_costs: Vec<f64>,
}

/// The investment side of the decomposition: a mixed-integer program that
/// is rebuilt from the whole cut history at every iteration.
#[derive(Debug, Clone)]
pub struct InvestmentPlanner {
    buses_count: usize,
    candidates: Vec<StorageCandidate>,
    costs: InvestmentCosts,
    max_installations: Option<usize>,
    investment_budget: Option<f64>,
    weights: Vec<f64>,
    operating_cost_floor: f64,
    mip_relative_gap: f64,
}

impl InvestmentPlanner {
    pub fn new(model: &PlanningModel, config: &Config) -> Self {
        Self {
            buses_count: model.network.bus_count(),
            candidates: model.storage.candidates.clone(),
            costs: model.storage.costs,
            max_installations: model.storage.max_installations,
            investment_budget: model.storage.investment_budget,
            weights: model.scenario_weights(config.base_weight),
            operating_cost_floor: config.operating_cost_floor,
            mip_relative_gap: config.mip_relative_gap,
        }
    }

    fn add_investment_columns(&self, pb: &mut Problem) -> Accessors {
        let mut accessors = Accessors {
            installed: vec![],
            rating: vec![],
            capacity: vec![],
            operating_cost: vec![],
        };
        for candidate in self.candidates.iter() {
            accessors
                .installed
                .push(pb.add_integer_column(self.costs.fixed_cost, 0.0..=1.0));
            accessors.rating.push(pb.add_column(
                self.costs.power_rating_cost,
                0.0..=candidate.rating.max,
            ));
            accessors.capacity.push(pb.add_column(
                self.costs.energy_capacity_cost,
                0.0..=candidate.capacity.max,
            ));
        }
        for weight in self.weights.iter() {
            accessors
                .operating_cost
                .push(pb.add_column(*weight, self.operating_cost_floor..));
        }
        accessors
    }

    /// Sizing is zero unless the site is selected, and then lies within
    /// the candidate bounds.
    fn add_sizing_rows(&self, pb: &mut Problem, accessors: &Accessors) {
        for (k, candidate) in self.candidates.iter().enumerate() {
            let x = accessors.installed[k];
            let r = accessors.rating[k];
            let c = accessors.capacity[k];
            pb.add_row(0.0.., &[(r, 1.0), (x, -candidate.rating.min)]);
            pb.add_row(..=0.0, &[(r, 1.0), (x, -candidate.rating.max)]);
            pb.add_row(0.0.., &[(c, 1.0), (x, -candidate.capacity.min)]);
            pb.add_row(..=0.0, &[(c, 1.0), (x, -candidate.capacity.max)]);
        }
    }

    fn add_limit_rows(&self, pb: &mut Problem, accessors: &Accessors) {
        if self.candidates.is_empty() {
            return;
        }
        if let Some(limit) = self.max_installations {
            let factors: Vec<(usize, f64)> =
                accessors.installed.iter().map(|x| (*x, 1.0)).collect();
            pb.add_row(..=(limit as f64), &factors);
        }
        if let Some(budget) = self.investment_budget {
            let mut factors = Vec::<(usize, f64)>::new();
            for k in 0..self.candidates.len() {
                factors.push((accessors.installed[k], self.costs.fixed_cost));
                factors
                    .push((accessors.rating[k], self.costs.power_rating_cost));
                factors.push((
                    accessors.capacity[k],
                    self.costs.energy_capacity_cost,
                ));
            }
            pb.add_row(..=budget, &factors);
        }
    }

    /// θ_s - Σ gR·R - Σ gC·C ≥ rhs
    fn add_cut_rows(
        &self,
        pb: &mut Problem,
        accessors: &Accessors,
        cut_pool: &BendersCutPool,
    ) {
        for cut in cut_pool.pool.iter() {
            let mut factors = vec![(accessors.operating_cost[cut.scenario], 1.0)];
            for (k, candidate) in self.candidates.iter().enumerate() {
                let bus_id = candidate.bus_id;
                factors.push((
                    accessors.rating[k],
                    -cut.rating_coefficients[bus_id],
                ));
                factors.push((
                    accessors.capacity[k],
                    -cut.capacity_coefficients[bus_id],
                ));
            }
            pb.add_row(cut.rhs.., &factors);
        }
    }

    fn extract_plan(&self, colvalue: &[f64], accessors: &Accessors) -> StoragePlan {
        let mut plan = StoragePlan::empty(self.buses_count);
        for (k, candidate) in self.candidates.iter().enumerate() {
            if colvalue[accessors.installed[k]] > 0.5 {
                plan.install(
                    candidate.bus_id,
                    colvalue[accessors.rating[k]],
                    colvalue[accessors.capacity[k]],
                );
            }
        }
        plan
    }

    pub fn solve(
        &self,
        iteration: usize,
        cut_pool: &BendersCutPool,
    ) -> Result<MasterSolution, MasterError> {
        let mut pb = Problem::new();
        let accessors = self.add_investment_columns(&mut pb);
        self.add_sizing_rows(&mut pb, &accessors);
        self.add_limit_rows(&mut pb, &accessors);
        self.add_cut_rows(&mut pb, &accessors, cut_pool);

        let mut model = Model::try_new(&pb)?;
        model.set_option("mip_rel_gap", self.mip_relative_gap)?;
        model.solve()?;

        match model.status() {
            HighsModelStatus::Optimal => {
                let solution = model.get_solution();
                let plan = self.extract_plan(&solution.colvalue, &accessors);
                let operating_costs: Vec<f64> = accessors
                    .operating_cost
                    .iter()
                    .map(|col| solution.colvalue[*col])
                    .collect();
                let alpha: f64 = self
                    .weights
                    .iter()
                    .zip(operating_costs.iter())
                    .map(|(w, theta)| w * theta)
                    .sum();
                let investment_cost = plan.investment_cost(&self.costs);
                log::debug!(
                    "iteration {}: master solved with {} cuts, investment {:.4}",
                    iteration,
                    cut_pool.len(),
                    investment_cost
                );
                Ok(MasterSolution {
                    objective: model.get_objective_value(),
                    investment_cost,
                    plan,
                    alpha,
                    operating_costs,
                })
            }
            status => Err(MasterError::NotOptimal {
                status: format!("{:?}", status),
            }),
        }
    }
}
