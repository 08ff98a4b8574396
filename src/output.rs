use crate::benders::{IterationRecord, RunStatus};
use crate::cut::BendersCutPool;
use crate::error::{OutputError, PlanningError};
use crate::plan::StoragePlan;
use chrono::{DateTime, Utc};
use csv::Writer;
use serde::Serialize;
use std::fs;
use std::path::Path;

fn csv_writer(path: &Path, name: &str) -> Result<Writer<fs::File>, OutputError> {
    let filepath = path.join(name);
    Writer::from_path(&filepath).map_err(|source| OutputError::Csv {
        path: filepath,
        source,
    })
}

fn serialize_row<T: Serialize>(
    wtr: &mut Writer<fs::File>,
    path: &Path,
    name: &str,
    row: T,
) -> Result<(), OutputError> {
    wtr.serialize(row).map_err(|source| OutputError::Csv {
        path: path.join(name),
        source,
    })
}

fn flush(
    wtr: &mut Writer<fs::File>,
    path: &Path,
    name: &str,
) -> Result<(), OutputError> {
    wtr.flush().map_err(|source| OutputError::Io {
        path: path.join(name),
        source,
    })
}

#[derive(Serialize)]
struct IterationOutput {
    iteration: usize,
    installation_count: usize,
    investment_cost: f64,
    alpha: f64,
    expected_operating_cost: f64,
    fairness_price: f64,
    lower_bound: f64,
    upper_bound: f64,
    gap: f64,
    elapsed_seconds: f64,
}

fn write_iterations(
    records: &[IterationRecord],
    path: &Path,
) -> Result<(), OutputError> {
    let name = "iterations.csv";
    let mut wtr = csv_writer(path, name)?;
    for record in records.iter() {
        serialize_row(
            &mut wtr,
            path,
            name,
            IterationOutput {
                iteration: record.iteration,
                installation_count: record.plan.installation_count(),
                investment_cost: record.investment_cost,
                alpha: record.alpha,
                expected_operating_cost: record.expected_operating_cost,
                fairness_price: record.fairness_price,
                lower_bound: record.lower_bound,
                upper_bound: record.upper_bound,
                gap: record.gap,
                elapsed_seconds: record.elapsed_seconds,
            },
        )?;
    }
    flush(&mut wtr, path, name)
}

#[derive(Serialize)]
struct PlanOutput {
    iteration: usize,
    bus_id: usize,
    installed: bool,
    rating: f64,
    capacity: f64,
}

fn write_plans(records: &[IterationRecord], path: &Path) -> Result<(), OutputError> {
    let name = "plans.csv";
    let mut wtr = csv_writer(path, name)?;
    for record in records.iter() {
        for (bus_id, installed) in record.plan.installed.iter().enumerate() {
            serialize_row(
                &mut wtr,
                path,
                name,
                PlanOutput {
                    iteration: record.iteration,
                    bus_id,
                    installed: *installed,
                    rating: record.plan.ratings[bus_id],
                    capacity: record.plan.capacities[bus_id],
                },
            )?;
        }
    }
    flush(&mut wtr, path, name)
}

#[derive(Serialize)]
struct ScenarioCostOutput {
    iteration: usize,
    scenario: usize,
    cost: f64,
}

fn write_scenario_costs(
    records: &[IterationRecord],
    path: &Path,
) -> Result<(), OutputError> {
    let name = "scenario_costs.csv";
    let mut wtr = csv_writer(path, name)?;
    for record in records.iter() {
        for (scenario, cost) in record.scenario_costs.iter().enumerate() {
            serialize_row(
                &mut wtr,
                path,
                name,
                ScenarioCostOutput {
                    iteration: record.iteration,
                    scenario,
                    cost: *cost,
                },
            )?;
        }
    }
    flush(&mut wtr, path, name)
}

#[derive(Serialize)]
struct DualOutput {
    iteration: usize,
    scenario: usize,
    bus_id: usize,
    step: usize,
    active_price: f64,
    reactive_price: f64,
}

fn write_duals(records: &[IterationRecord], path: &Path) -> Result<(), OutputError> {
    let name = "duals.csv";
    let mut wtr = csv_writer(path, name)?;
    for record in records.iter() {
        for (scenario, active) in record.active_prices.iter().enumerate() {
            let reactive = &record.reactive_prices[scenario];
            let (buses, steps) = active.shape();
            for bus_id in 0..buses {
                for step in 0..steps {
                    serialize_row(
                        &mut wtr,
                        path,
                        name,
                        DualOutput {
                            iteration: record.iteration,
                            scenario,
                            bus_id,
                            step,
                            active_price: active.get(bus_id, step),
                            reactive_price: reactive.get(bus_id, step),
                        },
                    )?;
                }
            }
        }
    }
    flush(&mut wtr, path, name)
}

#[derive(Serialize)]
#[serde(rename_all = "lowercase")]
enum BendersCutCoefficientType {
    Rhs,
    Rating,
    Capacity,
}

#[derive(Serialize)]
struct BendersCutOutput {
    cut_id: usize,
    iteration: usize,
    scenario: usize,
    coefficient_entity: BendersCutCoefficientType,
    bus_id: Option<usize>,
    value: f64,
}

fn write_benders_cuts(
    cut_pool: &BendersCutPool,
    path: &Path,
) -> Result<(), OutputError> {
    let name = "cuts.csv";
    let mut wtr = csv_writer(path, name)?;
    for cut in cut_pool.pool.iter() {
        serialize_row(
            &mut wtr,
            path,
            name,
            BendersCutOutput {
                cut_id: cut.id,
                iteration: cut.iteration,
                scenario: cut.scenario,
                coefficient_entity: BendersCutCoefficientType::Rhs,
                bus_id: None,
                value: cut.rhs,
            },
        )?;
        // zero coefficients belong to buses that are not candidates
        for (bus_id, coef) in cut.rating_coefficients.iter().enumerate() {
            if *coef != 0.0 {
                serialize_row(
                    &mut wtr,
                    path,
                    name,
                    BendersCutOutput {
                        cut_id: cut.id,
                        iteration: cut.iteration,
                        scenario: cut.scenario,
                        coefficient_entity: BendersCutCoefficientType::Rating,
                        bus_id: Some(bus_id),
                        value: *coef,
                    },
                )?;
            }
        }
        for (bus_id, coef) in cut.capacity_coefficients.iter().enumerate() {
            if *coef != 0.0 {
                serialize_row(
                    &mut wtr,
                    path,
                    name,
                    BendersCutOutput {
                        cut_id: cut.id,
                        iteration: cut.iteration,
                        scenario: cut.scenario,
                        coefficient_entity: BendersCutCoefficientType::Capacity,
                        bus_id: Some(bus_id),
                        value: *coef,
                    },
                )?;
            }
        }
    }
    flush(&mut wtr, path, name)
}

#[derive(Serialize)]
struct RunSummary<'a> {
    status: Option<RunStatus>,
    error: Option<String>,
    started_at: String,
    finished_at: String,
    iterations: usize,
    cuts: usize,
    lower_bound: Option<f64>,
    upper_bound: Option<f64>,
    gap: Option<f64>,
    plan: Option<&'a StoragePlan>,
}

fn write_summary(
    records: &[IterationRecord],
    cut_pool: &BendersCutPool,
    result: &Result<RunStatus, PlanningError>,
    started_at: DateTime<Utc>,
    path: &Path,
) -> Result<(), OutputError> {
    let last = records.last();
    let summary = RunSummary {
        status: result.as_ref().ok().copied(),
        error: result.as_ref().err().map(|e| e.to_string()),
        started_at: started_at.to_rfc3339(),
        finished_at: Utc::now().to_rfc3339(),
        iterations: records.len(),
        cuts: cut_pool.len(),
        lower_bound: last.map(|r| r.lower_bound),
        upper_bound: last.map(|r| r.upper_bound),
        gap: last.map(|r| r.gap),
        plan: last.map(|r| &r.plan),
    };
    let contents = serde_json::to_string_pretty(&summary)?;
    let filepath = path.join("summary.json");
    fs::write(&filepath, contents).map_err(|source| OutputError::Io {
        path: filepath,
        source,
    })
}

/// Persists the iteration history, the cut pool and a run summary into
/// `path`, which is created if missing. A failed run still has its
/// completed iterations written.
pub fn generate_outputs(
    records: &[IterationRecord],
    cut_pool: &BendersCutPool,
    result: &Result<RunStatus, PlanningError>,
    started_at: DateTime<Utc>,
    path: &Path,
) -> Result<(), OutputError> {
    fs::create_dir_all(path).map_err(|source| OutputError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    write_iterations(records, path)?;
    write_plans(records, path)?;
    write_scenario_costs(records, path)?;
    write_duals(records, path)?;
    write_benders_cuts(cut_pool, path)?;
    write_summary(records, cut_pool, result, started_at, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subproblem::ScenarioOutcome;
    use crate::system::BusTimeMatrix;

    fn record(iteration: usize, plan: StoragePlan) -> IterationRecord {
        let mut active = BusTimeMatrix::zeros(2, 2);
        active.set(1, 1, 226.0);
        IterationRecord {
            iteration,
            plan,
            investment_cost: 0.0,
            alpha: 0.0,
            scenario_costs: vec![100.0],
            active_prices: vec![active],
            reactive_prices: vec![BusTimeMatrix::zeros(2, 2)],
            rating_sensitivities: vec![vec![0.0, -3.0]],
            capacity_sensitivities: vec![vec![0.0, 0.0]],
            expected_operating_cost: 100.0,
            fairness_price: 0.0,
            upper_bound: 100.0,
            lower_bound: 0.0,
            gap: 1.0,
            elapsed_seconds: 0.5,
        }
    }

    fn cut_pool() -> BendersCutPool {
        let mut pool = BendersCutPool::new();
        pool.add_cuts(
            0,
            &[ScenarioOutcome {
                scenario: 0,
                cost: 10.0,
                active_prices: BusTimeMatrix::zeros(2, 2),
                reactive_prices: BusTimeMatrix::zeros(2, 2),
                rating_sensitivity: vec![0.0, -1.5],
                capacity_sensitivity: vec![0.0, 0.0],
            }],
            &StoragePlan::empty(2),
        );
        pool
    }

    #[test]
    fn test_write_benders_cuts() {
        let dir = tempfile::tempdir().unwrap();
        write_benders_cuts(&cut_pool(), dir.path()).unwrap();
        let contents = fs::read_to_string(dir.path().join("cuts.csv")).unwrap();
        let expected = "cut_id,iteration,scenario,coefficient_entity,bus_id,value\n\
                        0,0,0,rhs,,10.0\n\
                        0,0,0,rating,1,-1.5\n";
        assert_eq!(contents, expected);
    }

    #[test]
    fn test_write_plans() {
        let dir = tempfile::tempdir().unwrap();
        let mut plan = StoragePlan::empty(2);
        plan.install(1, 0.5, 2.0);
        write_plans(&[record(3, plan)], dir.path()).unwrap();
        let contents = fs::read_to_string(dir.path().join("plans.csv")).unwrap();
        let expected = "iteration,bus_id,installed,rating,capacity\n\
                        3,0,false,0.0,0.0\n\
                        3,1,true,0.5,2.0\n";
        assert_eq!(contents, expected);
    }

    #[test]
    fn test_generate_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results");
        let records = vec![record(0, StoragePlan::empty(2))];
        generate_outputs(
            &records,
            &cut_pool(),
            &Ok(RunStatus::IterationLimit),
            Utc::now(),
            &path,
        )
        .unwrap();
        for name in [
            "iterations.csv",
            "plans.csv",
            "scenario_costs.csv",
            "duals.csv",
            "cuts.csv",
            "summary.json",
        ] {
            assert!(path.join(name).exists(), "{} missing", name);
        }
        let duals = fs::read_to_string(path.join("duals.csv")).unwrap();
        assert_eq!(duals.lines().count(), 1 + 4);
        assert!(duals.contains("0,0,1,1,226.0,0.0"));

        let summary: serde_json::Value = serde_json::from_str(
            &fs::read_to_string(path.join("summary.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(summary["status"], "IterationLimit");
        assert_eq!(summary["iterations"], 1);
        assert_eq!(summary["cuts"], 1);
        assert!(summary["error"].is_null());
    }

    #[test]
    fn test_summary_of_failed_run() {
        let dir = tempfile::tempdir().unwrap();
        let result = Err(PlanningError::Subproblem {
            iteration: 1,
            scenario: 0,
            source: crate::error::SolveError::NotOptimal {
                status: "PrimalInfeasible".to_string(),
            },
        });
        write_summary(
            &[record(0, StoragePlan::empty(2))],
            &cut_pool(),
            &result,
            Utc::now(),
            dir.path(),
        )
        .unwrap();
        let summary: serde_json::Value = serde_json::from_str(
            &fs::read_to_string(dir.path().join("summary.json")).unwrap(),
        )
        .unwrap();
        assert!(summary["status"].is_null());
        assert!(summary["error"].as_str().unwrap().contains("scenario 0"));
        assert_eq!(summary["iterations"], 1);
    }
}
