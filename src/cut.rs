use crate::plan::StoragePlan;
use crate::subproblem::ScenarioOutcome;
use crate::utils;

/// An optimality cut on the operating cost of one scenario, linear in the
/// storage sizing:
///
/// `θ_s ≥ rhs + Σ_b gR_b·R_b + Σ_b gC_b·C_b`
#[derive(Debug, Clone, PartialEq)]
pub struct BendersCut {
    pub id: usize,
    pub iteration: usize,
    pub scenario: usize,
    pub rating_coefficients: Vec<f64>,
    pub capacity_coefficients: Vec<f64>,
    pub rhs: f64,
}

impl BendersCut {
    pub fn new(
        id: usize,
        iteration: usize,
        scenario: usize,
        rating_coefficients: Vec<f64>,
        capacity_coefficients: Vec<f64>,
        rhs: f64,
    ) -> Self {
        Self {
            id,
            iteration,
            scenario,
            rating_coefficients,
            capacity_coefficients,
            rhs,
        }
    }

    /// Builds the cut tangent to the scenario cost at the plan that
    /// produced `outcome`.
    pub fn from_outcome(
        id: usize,
        iteration: usize,
        outcome: &ScenarioOutcome,
        plan: &StoragePlan,
    ) -> Self {
        let rhs = outcome.cost
            - utils::dot_product(&outcome.rating_sensitivity, &plan.ratings)
            - utils::dot_product(
                &outcome.capacity_sensitivity,
                &plan.capacities,
            );
        Self::new(
            id,
            iteration,
            outcome.scenario,
            outcome.rating_sensitivity.clone(),
            outcome.capacity_sensitivity.clone(),
            rhs,
        )
    }

    pub fn eval_height_at_plan(&self, plan: &StoragePlan) -> f64 {
        self.rhs
            + utils::dot_product(&self.rating_coefficients, &plan.ratings)
            + utils::dot_product(&self.capacity_coefficients, &plan.capacities)
    }
}

/// Append-only collection of every cut generated by the run.
#[derive(Debug, Default)]
pub struct BendersCutPool {
    pub pool: Vec<BendersCut>,
    pub total_cut_count: usize,
}

impl BendersCutPool {
    pub fn new() -> Self {
        Self {
            pool: vec![],
            total_cut_count: 0,
        }
    }

    /// Adds one cut per scenario outcome, all anchored at `plan`.
    pub fn add_cuts(
        &mut self,
        iteration: usize,
        outcomes: &[ScenarioOutcome],
        plan: &StoragePlan,
    ) {
        for outcome in outcomes.iter() {
            let cut = BendersCut::from_outcome(
                self.total_cut_count,
                iteration,
                outcome,
                plan,
            );
            self.pool.push(cut);
            self.total_cut_count += 1;
        }
    }

    pub fn cuts_for_scenario(
        &self,
        scenario: usize,
    ) -> impl Iterator<Item = &BendersCut> {
        self.pool.iter().filter(move |c| c.scenario == scenario)
    }

    pub fn len(&self) -> usize {
        self.pool.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::BusTimeMatrix;

    fn outcome(scenario: usize, cost: f64) -> ScenarioOutcome {
        ScenarioOutcome {
            scenario,
            cost,
            active_prices: BusTimeMatrix::zeros(2, 1),
            reactive_prices: BusTimeMatrix::zeros(2, 1),
            rating_sensitivity: vec![0.0, -4.0],
            capacity_sensitivity: vec![0.0, -1.0],
        }
    }

    #[test]
    fn test_eval_height_at_plan() {
        let cut = BendersCut::new(0, 0, 0, vec![1.0, 2.0], vec![0.5, 0.0], 10.0);
        let mut plan = StoragePlan::empty(2);
        plan.install(0, 3.0, 4.0);
        // 10.0 + 1.0 * 3.0 + 0.5 * 4.0
        assert_eq!(cut.eval_height_at_plan(&plan), 15.0);
    }

    #[test]
    fn test_cut_is_tight_at_its_anchor_plan() {
        let mut plan = StoragePlan::empty(2);
        plan.install(1, 0.5, 2.0);
        let cut = BendersCut::from_outcome(0, 1, &outcome(0, 100.0), &plan);
        // 100 + 4 * 0.5 + 1 * 2.0
        assert_eq!(cut.rhs, 104.0);
        assert_eq!(cut.eval_height_at_plan(&plan), 100.0);
        assert_eq!(cut.eval_height_at_plan(&StoragePlan::empty(2)), 104.0);
    }

    #[test]
    fn test_pool_is_append_only() {
        let mut pool = BendersCutPool::new();
        let plan = StoragePlan::empty(2);
        pool.add_cuts(0, &[outcome(0, 10.0), outcome(1, 20.0)], &plan);
        pool.add_cuts(1, &[outcome(0, 9.0), outcome(1, 19.0)], &plan);
        assert_eq!(pool.len(), 4);
        assert_eq!(pool.total_cut_count, 4);
        let ids: Vec<usize> = pool.pool.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![0, 1, 2, 3]);
        let rhs: Vec<f64> =
            pool.cuts_for_scenario(1).map(|c| c.rhs).collect();
        assert_eq!(rhs, vec![20.0, 19.0]);
    }
}
