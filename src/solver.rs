//! Thin wrapper over the HiGHS C API for the mixed-integer investment
//! problem. Problems are assembled column-wise in memory and handed to
//! HiGHS in a single `Highs_passMip` call, so every solve starts from a
//! fresh model.

use std::convert::TryFrom;
use std::ffi::{c_void, CString};
use std::fmt::{Debug, Formatter};
use std::ops::{Bound, RangeBounds};
use std::os::raw::{c_char, c_int};

use highs_sys::*;

use crate::error::MasterError;

const VAR_TYPE_CONTINUOUS: HighsInt = 0;
const VAR_TYPE_INTEGER: HighsInt = 1;

/// The kinds of results of an optimization
#[derive(Clone, Copy, Debug, PartialOrd, PartialEq, Ord, Eq)]
pub enum HighsModelStatus {
    /// not initialized
    NotSet = MODEL_STATUS_NOTSET as isize,
    /// Unable to load model
    LoadError = MODEL_STATUS_LOAD_ERROR as isize,
    /// invalid model
    ModelError = MODEL_STATUS_MODEL_ERROR as isize,
    /// Unable to run the pre-solve phase
    PresolveError = MODEL_STATUS_PRESOLVE_ERROR as isize,
    /// Unable to solve
    SolveError = MODEL_STATUS_SOLVE_ERROR as isize,
    /// Unable to clean after solve
    PostsolveError = MODEL_STATUS_POSTSOLVE_ERROR as isize,
    /// No variables in the model: nothing to optimize
    ModelEmpty = MODEL_STATUS_MODEL_EMPTY as isize,
    /// There is no solution to the problem
    Infeasible = MODEL_STATUS_INFEASIBLE as isize,
    /// The problem in unbounded or infeasible
    UnboundedOrInfeasible = MODEL_STATUS_UNBOUNDED_OR_INFEASIBLE as isize,
    /// The problem is unbounded: there is no single optimal value
    Unbounded = MODEL_STATUS_UNBOUNDED as isize,
    /// An optimal solution was found
    Optimal = MODEL_STATUS_OPTIMAL as isize,
    /// objective bound
    ObjectiveBound = MODEL_STATUS_OBJECTIVE_BOUND as isize,
    /// objective target
    ObjectiveTarget = MODEL_STATUS_OBJECTIVE_TARGET as isize,
    /// reached limit
    ReachedTimeLimit = MODEL_STATUS_REACHED_TIME_LIMIT as isize,
    /// reached limit
    ReachedIterationLimit = MODEL_STATUS_REACHED_ITERATION_LIMIT as isize,
    /// Unknown model status
    Unknown = MODEL_STATUS_UNKNOWN as isize,
}

/// An unexpected status code was returned by HiGHS
#[derive(PartialEq, Clone, Copy)]
pub struct InvalidStatus(pub c_int);

impl Debug for InvalidStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} is not a valid HiGHS status", self.0)
    }
}

impl TryFrom<c_int> for HighsModelStatus {
    type Error = InvalidStatus;

    fn try_from(value: c_int) -> Result<Self, Self::Error> {
        match value {
            MODEL_STATUS_NOTSET => Ok(Self::NotSet),
            MODEL_STATUS_LOAD_ERROR => Ok(Self::LoadError),
            MODEL_STATUS_MODEL_ERROR => Ok(Self::ModelError),
            MODEL_STATUS_PRESOLVE_ERROR => Ok(Self::PresolveError),
            MODEL_STATUS_SOLVE_ERROR => Ok(Self::SolveError),
            MODEL_STATUS_POSTSOLVE_ERROR => Ok(Self::PostsolveError),
            MODEL_STATUS_MODEL_EMPTY => Ok(Self::ModelEmpty),
            MODEL_STATUS_INFEASIBLE => Ok(Self::Infeasible),
            MODEL_STATUS_UNBOUNDED => Ok(Self::Unbounded),
            MODEL_STATUS_UNBOUNDED_OR_INFEASIBLE => {
                Ok(Self::UnboundedOrInfeasible)
            }
            MODEL_STATUS_OPTIMAL => Ok(Self::Optimal),
            MODEL_STATUS_OBJECTIVE_BOUND => Ok(Self::ObjectiveBound),
            MODEL_STATUS_OBJECTIVE_TARGET => Ok(Self::ObjectiveTarget),
            MODEL_STATUS_REACHED_TIME_LIMIT => Ok(Self::ReachedTimeLimit),
            MODEL_STATUS_REACHED_ITERATION_LIMIT => {
                Ok(Self::ReachedIterationLimit)
            }
            MODEL_STATUS_UNKNOWN => Ok(Self::Unknown),
            n => Err(InvalidStatus(n)),
        }
    }
}

/// The status of a highs operation
#[derive(Clone, Copy, Debug, PartialOrd, PartialEq, Ord, Eq)]
pub enum HighsStatus {
    /// Success
    OK = 0,
    /// Done, with warning
    Warning = 1,
    /// An error occurred
    Error = 2,
}

impl TryFrom<c_int> for HighsStatus {
    type Error = InvalidStatus;

    fn try_from(value: c_int) -> Result<Self, InvalidStatus> {
        match value {
            STATUS_OK => Ok(Self::OK),
            STATUS_WARNING => Ok(Self::Warning),
            STATUS_ERROR => Ok(Self::Error),
            n => Err(InvalidStatus(n)),
        }
    }
}

pub trait HighsOptionValue {
    unsafe fn apply_to_highs(
        self,
        highs: *mut c_void,
        option: *const c_char,
    ) -> c_int;
}

impl HighsOptionValue for bool {
    unsafe fn apply_to_highs(
        self,
        highs: *mut c_void,
        option: *const c_char,
    ) -> c_int {
        highs_sys::Highs_setBoolOptionValue(
            highs,
            option,
            if self { 1 } else { 0 },
        )
    }
}

impl HighsOptionValue for i32 {
    unsafe fn apply_to_highs(
        self,
        highs: *mut c_void,
        option: *const c_char,
    ) -> c_int {
        highs_sys::Highs_setIntOptionValue(highs, option, self)
    }
}

impl HighsOptionValue for f64 {
    unsafe fn apply_to_highs(
        self,
        highs: *mut c_void,
        option: *const c_char,
    ) -> c_int {
        highs_sys::Highs_setDoubleOptionValue(highs, option, self)
    }
}

fn bound_value<N: Into<f64> + Copy>(b: Bound<&N>) -> Option<f64> {
    match b {
        Bound::Included(v) | Bound::Excluded(v) => Some((*v).into()),
        Bound::Unbounded => None,
    }
}

fn c(n: usize, call: &'static str) -> Result<HighsInt, MasterError> {
    n.try_into().map_err(|_| MasterError::Highs { call })
}

fn try_handle_status(
    status: c_int,
    call: &'static str,
) -> Result<HighsStatus, MasterError> {
    match HighsStatus::try_from(status) {
        Ok(HighsStatus::OK) => Ok(HighsStatus::OK),
        Ok(HighsStatus::Warning) => {
            log::warn!("HiGHS emitted a warning: {}", call);
            Ok(HighsStatus::Warning)
        }
        _ => Err(MasterError::Highs { call }),
    }
}

macro_rules! highs_call {
    ($function_name:ident ($($param:expr),+)) => {
        try_handle_status(
            $function_name($($param),+),
            stringify!($function_name)
        )
    }
}

/// A mixed-integer linear problem, stored column-wise.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Problem {
    pub num_col: usize,
    pub num_row: usize,
    pub num_nz: usize,
    pub col_cost: Vec<f64>,
    pub col_lower: Vec<f64>,
    pub col_upper: Vec<f64>,
    pub integrality: Vec<HighsInt>,
    pub row_lower: Vec<f64>,
    pub row_upper: Vec<f64>,
    columns: Vec<(Vec<HighsInt>, Vec<f64>)>,
}

impl Problem {
    /// Create a new problem instance
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a row with the given bounds. Returns the row index.
    pub fn add_row<N: Into<f64> + Copy, B: RangeBounds<N>>(
        &mut self,
        bounds: B,
        row_factors: &[(usize, f64)],
    ) -> usize {
        let row = self.num_row as HighsInt;
        for &(col, factor) in row_factors {
            let c = &mut self.columns[col];
            c.0.push(row);
            c.1.push(factor);
            self.num_nz += 1;
        }
        let low =
            bound_value(bounds.start_bound()).unwrap_or(f64::NEG_INFINITY);
        let high = bound_value(bounds.end_bound()).unwrap_or(f64::INFINITY);
        self.row_lower.push(low);
        self.row_upper.push(high);
        self.num_row += 1;
        self.num_row - 1
    }

    /// Adds a continuous column. Returns the column index.
    pub fn add_column<N: Into<f64> + Copy, B: RangeBounds<N>>(
        &mut self,
        col_factor: f64,
        bounds: B,
    ) -> usize {
        self.push_column(col_factor, bounds, VAR_TYPE_CONTINUOUS)
    }

    /// Adds an integer column. Returns the column index.
    pub fn add_integer_column<N: Into<f64> + Copy, B: RangeBounds<N>>(
        &mut self,
        col_factor: f64,
        bounds: B,
    ) -> usize {
        self.push_column(col_factor, bounds, VAR_TYPE_INTEGER)
    }

    fn push_column<N: Into<f64> + Copy, B: RangeBounds<N>>(
        &mut self,
        col_factor: f64,
        bounds: B,
        var_type: HighsInt,
    ) -> usize {
        self.col_cost.push(col_factor);
        let low =
            bound_value(bounds.start_bound()).unwrap_or(f64::NEG_INFINITY);
        let high = bound_value(bounds.end_bound()).unwrap_or(f64::INFINITY);
        self.col_lower.push(low);
        self.col_upper.push(high);
        self.integrality.push(var_type);
        self.columns.push((vec![], vec![]));
        self.num_col += 1;
        self.num_col - 1
    }

    fn to_compressed_matrix_form(
        &self,
    ) -> Result<(Vec<HighsInt>, Vec<HighsInt>, Vec<f64>), MasterError> {
        let mut astart = Vec::with_capacity(self.num_col);
        let mut aindex = Vec::with_capacity(self.num_nz);
        let mut avalue = Vec::with_capacity(self.num_nz);
        for (row_indices, factors) in self.columns.iter() {
            astart.push(c(aindex.len(), "Highs_passMip")?);
            aindex.extend_from_slice(row_indices);
            avalue.extend_from_slice(factors);
        }
        Ok((astart, aindex, avalue))
    }
}

#[derive(Debug)]
struct HighsPtr(*mut c_void);

impl Drop for HighsPtr {
    fn drop(&mut self) {
        unsafe { Highs_destroy(self.0) }
    }
}

impl Default for HighsPtr {
    fn default() -> Self {
        Self(unsafe { Highs_create() })
    }
}

impl HighsPtr {
    fn mut_ptr(&mut self) -> *mut c_void {
        self.0
    }

    /// Prevents writing anything to the standard output when solving the model
    fn make_quiet(&mut self) -> Result<(), MasterError> {
        self.set_option("output_flag", false)?;
        self.set_option("log_to_console", false)
    }

    fn set_option<V: HighsOptionValue>(
        &mut self,
        option: &str,
        value: V,
    ) -> Result<(), MasterError> {
        let c_str = CString::new(option).map_err(|_| MasterError::Highs {
            call: "Highs_setOptionValue",
        })?;
        let status =
            unsafe { value.apply_to_highs(self.mut_ptr(), c_str.as_ptr()) };
        try_handle_status(status, "Highs_setOptionValue")?;
        Ok(())
    }

    fn num_cols(&mut self) -> usize {
        let n = unsafe { Highs_getNumCols(self.mut_ptr()) };
        n.try_into().unwrap_or(0)
    }

    fn num_rows(&mut self) -> usize {
        let n = unsafe { Highs_getNumRows(self.mut_ptr()) };
        n.try_into().unwrap_or(0)
    }
}

/// A model loaded into HiGHS, ready to be solved
#[derive(Debug)]
pub struct Model {
    highs: HighsPtr,
}

impl Model {
    /// Loads the problem as a minimization. Returns an error if HiGHS
    /// rejects it as incoherent.
    pub fn try_new(problem: &Problem) -> Result<Self, MasterError> {
        let mut highs = HighsPtr::default();
        highs.make_quiet()?;
        let (astart, aindex, avalue) = problem.to_compressed_matrix_form()?;
        let offset = 0.0;
        unsafe {
            highs_call!(Highs_passMip(
                highs.mut_ptr(),
                c(problem.num_col, "Highs_passMip")?,
                c(problem.num_row, "Highs_passMip")?,
                c(problem.num_nz, "Highs_passMip")?,
                MATRIX_FORMAT_COLUMN_WISE,
                OBJECTIVE_SENSE_MINIMIZE,
                offset,
                problem.col_cost.as_ptr(),
                problem.col_lower.as_ptr(),
                problem.col_upper.as_ptr(),
                problem.row_lower.as_ptr(),
                problem.row_upper.as_ptr(),
                astart.as_ptr(),
                aindex.as_ptr(),
                avalue.as_ptr(),
                problem.integrality.as_ptr()
            ))?;
        }
        Ok(Self { highs })
    }

    pub fn set_option<V: HighsOptionValue>(
        &mut self,
        option: &str,
        value: V,
    ) -> Result<(), MasterError> {
        self.highs.set_option(option, value)
    }

    pub fn solve(&mut self) -> Result<(), MasterError> {
        unsafe { highs_call!(Highs_run(self.highs.mut_ptr())) }?;
        Ok(())
    }

    /// The status of the solution. Should be Optimal if everything went well.
    pub fn status(&mut self) -> HighsModelStatus {
        let model_status =
            unsafe { Highs_getModelStatus(self.highs.mut_ptr()) };
        HighsModelStatus::try_from(model_status)
            .unwrap_or(HighsModelStatus::Unknown)
    }

    pub fn get_objective_value(&mut self) -> f64 {
        unsafe { Highs_getObjectiveValue(self.highs.mut_ptr()) }
    }

    /// Get the solution to the problem
    pub fn get_solution(&mut self) -> Solution {
        let cols = self.highs.num_cols();
        let rows = self.highs.num_rows();
        let mut colvalue: Vec<f64> = vec![0.; cols];
        let mut coldual: Vec<f64> = vec![0.; cols];
        let mut rowvalue: Vec<f64> = vec![0.; rows];
        let mut rowdual: Vec<f64> = vec![0.; rows];

        unsafe {
            Highs_getSolution(
                self.highs.mut_ptr(),
                colvalue.as_mut_ptr(),
                coldual.as_mut_ptr(),
                rowvalue.as_mut_ptr(),
                rowdual.as_mut_ptr(),
            );
        }

        Solution {
            colvalue,
            coldual,
            rowvalue,
            rowdual,
        }
    }
}

/// Concrete values of the solution
#[derive(Clone, Debug)]
pub struct Solution {
    pub colvalue: Vec<f64>,
    pub coldual: Vec<f64>,
    pub rowvalue: Vec<f64>,
    pub rowdual: Vec<f64>,
}
