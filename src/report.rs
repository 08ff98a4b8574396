use crate::benders::RunStatus;
use std::path::Path;
use std::time::Duration;

pub fn show_greeting() {
    println!("\nESS PLANNER - Storage siting and sizing by Benders decomposition");
}

pub fn input_reading_line(path: &Path) {
    println!("\nReading study from: {}", path.display());
}

/// Helper function for displaying the study dimensions before the loop
pub fn planning_greeting(
    buses_count: usize,
    steps_count: usize,
    scenarios_count: usize,
    candidates_count: usize,
    num_workers: usize,
) {
    println!("\n# Planning");
    println!("- Buses: {buses_count}");
    println!("- Time steps: {steps_count}");
    println!("- Scenarios: {scenarios_count}");
    println!("- Storage candidates: {candidates_count}");
    println!("- Workers: {num_workers}\n");
}

/// Helper function for displaying the iteration table header
pub fn iteration_table_header() {
    println!(
        "{0: ^10} | {1: ^15} | {2: ^15} | {3: ^10} | {4: ^10}",
        "iteration", "lower bound ($)", "upper bound ($)", "gap (%)", "time (s)"
    )
}

/// Helper function for displaying a divider for the iteration table
pub fn iteration_table_divider() {
    println!(
        "--------------------------------------------------------------------------"
    )
}

/// Helper function for displaying a row of iteration results for
/// the iteration table
pub fn iteration_table_row(
    iteration: usize,
    lower_bound: f64,
    upper_bound: f64,
    gap: f64,
    seconds: f64,
) {
    println!(
        "{0: >10} | {1: >15.4} | {2: >15.4} | {3: >10.4} | {4: >10.2}",
        iteration,
        lower_bound,
        upper_bound,
        gap * 100.0,
        seconds
    )
}

pub fn run_status(status: RunStatus, iterations: usize) {
    match status {
        RunStatus::Converged => {
            println!("\nConverged after {iterations} iterations")
        }
        RunStatus::IterationLimit => {
            println!("\nStopped at the iteration limit ({iterations})")
        }
    }
}

pub fn output_generation_line(path: &Path) {
    println!("\nWriting outputs to: {}", path.display());
}

pub fn show_farewell(time: Duration) {
    println!(
        "\nTotal running time: {:.2} s",
        time.as_millis() as f64 / 1000.0
    )
}
