//! Row-wise builder for conic programs solved by Clarabel, in the form
//!
//! ```text
//! minimize    ½ x'Px + q'x + offset
//! subject to  Ax + s = b,  s ∈ K
//! ```
//!
//! Rows are added one at a time and consecutive rows of the same cone kind
//! are merged into a single cone block.

use crate::error::SolveError;
use crate::system::Bounds;
use clarabel::algebra::CscMatrix;
use clarabel::solver::{
    DefaultSettingsBuilder, DefaultSolver, IPSolver, SolverStatus,
    SupportedConeT,
};

#[derive(Debug, Default)]
pub struct ConicProblem {
    linear_cost: Vec<f64>,
    quadratic_cost: Vec<f64>, // diagonal of P
    columns: Vec<Vec<(usize, f64)>>,
    rhs: Vec<f64>,
    cones: Vec<SupportedConeT<f64>>,
    pub offset: f64,
}

impl ConicProblem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn num_cols(&self) -> usize {
        self.linear_cost.len()
    }

    pub fn num_rows(&self) -> usize {
        self.rhs.len()
    }

    pub fn add_column(&mut self, linear_cost: f64) -> usize {
        self.linear_cost.push(linear_cost);
        self.quadratic_cost.push(0.0);
        self.columns.push(vec![]);
        self.linear_cost.len() - 1
    }

    /// Adds `coefficient·x²` to the objective.
    pub fn add_quadratic_cost(&mut self, col: usize, coefficient: f64) {
        self.quadratic_cost[col] += 2.0 * coefficient;
    }

    fn push_row(&mut self, factors: &[(usize, f64)], rhs: f64) -> usize {
        let row = self.rhs.len();
        for &(col, value) in factors {
            let entries = &mut self.columns[col];
            match entries.last_mut() {
                Some((last_row, last_value)) if *last_row == row => {
                    *last_value += value
                }
                _ => entries.push((row, value)),
            }
        }
        self.rhs.push(rhs);
        row
    }

    /// `Σ aᵢxᵢ = b`. The dual is the marginal cost of tightening, so the
    /// derivative of the optimal cost with respect to `b` is `-z`.
    pub fn add_eq_row(&mut self, factors: &[(usize, f64)], rhs: f64) -> usize {
        let row = self.push_row(factors, rhs);
        match self.cones.last_mut() {
            Some(SupportedConeT::ZeroConeT(n)) => *n += 1,
            _ => self.cones.push(SupportedConeT::ZeroConeT(1)),
        }
        row
    }

    /// `Σ aᵢxᵢ ≤ b`, with a non-negative dual.
    pub fn add_leq_row(&mut self, factors: &[(usize, f64)], rhs: f64) -> usize {
        let row = self.push_row(factors, rhs);
        match self.cones.last_mut() {
            Some(SupportedConeT::NonnegativeConeT(n)) => *n += 1,
            _ => self.cones.push(SupportedConeT::NonnegativeConeT(1)),
        }
        row
    }

    /// `Σ aᵢxᵢ ≥ b`, stored as `-Σ aᵢxᵢ ≤ -b`.
    pub fn add_geq_row(&mut self, factors: &[(usize, f64)], rhs: f64) -> usize {
        let negated: Vec<(usize, f64)> =
            factors.iter().map(|&(col, value)| (col, -value)).collect();
        self.add_leq_row(&negated, -rhs)
    }

    /// Restricts a single column to an interval. Degenerate intervals
    /// become an equality row.
    pub fn add_column_bounds(&mut self, col: usize, bounds: Bounds) {
        if bounds.min == bounds.max {
            self.add_eq_row(&[(col, 1.0)], bounds.min);
        } else {
            self.add_geq_row(&[(col, 1.0)], bounds.min);
            self.add_leq_row(&[(col, 1.0)], bounds.max);
        }
    }

    /// Second-order cone `e₀ ≥ ‖(e₁, …, eₙ)‖` over affine expressions
    /// `eₖ = Σ aᵢxᵢ + cₖ`, given as `(factors, constant)` pairs.
    pub fn add_second_order_cone(
        &mut self,
        expressions: &[(Vec<(usize, f64)>, f64)],
    ) -> usize {
        let first = self.rhs.len();
        for (factors, constant) in expressions.iter() {
            // s = b - Ax must equal the expression
            let negated: Vec<(usize, f64)> =
                factors.iter().map(|&(col, value)| (col, -value)).collect();
            self.push_row(&negated, *constant);
        }
        self.cones
            .push(SupportedConeT::SecondOrderConeT(expressions.len()));
        first
    }

    fn to_compressed_matrix_form(&mut self) -> CscMatrix<f64> {
        let num_col = self.num_cols();
        let mut colptr = Vec::with_capacity(num_col + 1);
        let mut rowval = Vec::new();
        let mut nzval = Vec::new();
        colptr.push(0);
        for entries in self.columns.iter_mut() {
            entries.sort_by_key(|(row, _)| *row);
            for &(row, value) in entries.iter() {
                rowval.push(row);
                nzval.push(value);
            }
            colptr.push(rowval.len());
        }
        CscMatrix::new(self.num_rows(), num_col, colptr, rowval, nzval)
    }

    fn quadratic_matrix(&self) -> CscMatrix<f64> {
        let num_col = self.num_cols();
        let mut colptr = Vec::with_capacity(num_col + 1);
        let mut rowval = Vec::new();
        let mut nzval = Vec::new();
        colptr.push(0);
        for (col, value) in self.quadratic_cost.iter().enumerate() {
            if *value != 0.0 {
                rowval.push(col);
                nzval.push(*value);
            }
            colptr.push(rowval.len());
        }
        CscMatrix::new(num_col, num_col, colptr, rowval, nzval)
    }

    /// Solves the program. Only a `Solved` or `AlmostSolved` certificate is
    /// accepted; anything else is reported as an error.
    pub fn solve(mut self) -> Result<ConicSolution, SolveError> {
        let a = self.to_compressed_matrix_form();
        let p = self.quadratic_matrix();

        let settings = DefaultSettingsBuilder::default()
            .verbose(false)
            .max_iter(200)
            .build()
            .map_err(|e| SolveError::Setup(format!("{:?}", e)))?;

        let mut solver = DefaultSolver::new(
            &p,
            &self.linear_cost,
            &a,
            &self.rhs,
            &self.cones,
            settings,
        )
        .map_err(|e| SolveError::Setup(format!("{:?}", e)))?;

        solver.solve();

        let solution = &solver.solution;
        match solution.status {
            SolverStatus::Solved | SolverStatus::AlmostSolved => {
                Ok(ConicSolution {
                    objective: solution.obj_val + self.offset,
                    x: solution.x.clone(),
                    z: solution.z.clone(),
                    iterations: solution.iterations as usize,
                })
            }
            status => Err(SolveError::NotOptimal {
                status: format!("{:?}", status),
            }),
        }
    }
}

/// Primal values `x` and cone duals `z`, indexed like the columns and
/// rows of the problem.
#[derive(Clone, Debug)]
pub struct ConicSolution {
    pub objective: f64,
    pub x: Vec<f64>,
    pub z: Vec<f64>,
    pub iterations: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consecutive_rows_share_a_cone() {
        let mut pb = ConicProblem::new();
        let x = pb.add_column(1.0);
        let y = pb.add_column(1.0);
        pb.add_eq_row(&[(x, 1.0), (y, 1.0)], 1.0);
        pb.add_eq_row(&[(x, 1.0)], 0.5);
        pb.add_leq_row(&[(y, 1.0)], 2.0);
        assert_eq!(pb.num_rows(), 3);
        assert_eq!(pb.cones.len(), 2);
        assert!(matches!(pb.cones[0], SupportedConeT::ZeroConeT(2)));
        assert!(matches!(pb.cones[1], SupportedConeT::NonnegativeConeT(1)));
    }

    #[test]
    fn test_repeated_column_in_row_is_merged() {
        let mut pb = ConicProblem::new();
        let x = pb.add_column(0.0);
        pb.add_eq_row(&[(x, 1.0), (x, 2.0)], 3.0);
        assert_eq!(pb.columns[x], vec![(0, 3.0)]);
    }

    #[test]
    fn test_solve_linear_program() {
        // min x + 2y  s.t.  x + y = 1,  0 ≤ x ≤ 0.4,  y ≥ 0
        let mut pb = ConicProblem::new();
        let x = pb.add_column(1.0);
        let y = pb.add_column(2.0);
        pb.add_eq_row(&[(x, 1.0), (y, 1.0)], 1.0);
        pb.add_column_bounds(x, Bounds::new(0.0, 0.4));
        pb.add_geq_row(&[(y, 1.0)], 0.0);
        let solution = pb.solve().unwrap();
        assert!((solution.objective - 1.6).abs() < 1e-6);
        assert!((solution.x[x] - 0.4).abs() < 1e-6);
        // marginal cost of one more unit of demand is served by y
        assert!((-solution.z[0] - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_solve_quadratic_program_with_offset() {
        // min x² - 2x + 3  →  x = 1, cost 2
        let mut pb = ConicProblem::new();
        let x = pb.add_column(-2.0);
        pb.add_quadratic_cost(x, 1.0);
        pb.add_column_bounds(x, Bounds::new(-10.0, 10.0));
        pb.offset = 3.0;
        let solution = pb.solve().unwrap();
        assert!((solution.x[x] - 1.0).abs() < 1e-6);
        assert!((solution.objective - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_second_order_cone() {
        // min t  s.t.  t ≥ ‖(3, 4)‖
        let mut pb = ConicProblem::new();
        let t = pb.add_column(1.0);
        pb.add_second_order_cone(&[
            (vec![(t, 1.0)], 0.0),
            (vec![], 3.0),
            (vec![], 4.0),
        ]);
        let solution = pb.solve().unwrap();
        assert!((solution.x[t] - 5.0).abs() < 1e-5);
    }

    #[test]
    fn test_infeasible_program_is_an_error() {
        let mut pb = ConicProblem::new();
        let x = pb.add_column(1.0);
        pb.add_leq_row(&[(x, 1.0)], 0.0);
        pb.add_geq_row(&[(x, 1.0)], 1.0);
        assert!(matches!(pb.solve(), Err(SolveError::NotOptimal { .. })));
    }
}
