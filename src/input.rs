use crate::error::InputError;
use crate::system::{
    Bounds, Bus, BusTimeMatrix, GenerationCost, InvestmentCosts, Line,
    Network, PlanningModel, QuadraticCost, Scenario, StorageCandidate,
    StorageOptions,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

fn default_max_iterations() -> usize {
    100
}

fn default_tolerance() -> f64 {
    0.01
}

fn default_num_workers() -> usize {
    4
}

fn default_base_weight() -> f64 {
    1.0
}

fn default_mip_relative_gap() -> f64 {
    1e-6
}

fn default_efficiency() -> f64 {
    1.0
}

/// Parameters of the decomposition loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    /// Relative gap `|UB - LB| / UB` accepted as converged
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
    #[serde(default = "default_num_workers")]
    pub num_workers: usize,
    /// Multiplies every normalized scenario frequency
    #[serde(default = "default_base_weight")]
    pub base_weight: f64,
    /// Extra term added to the upper bound of every iteration
    #[serde(default)]
    pub fairness_price: f64,
    /// Lower bound of the per-scenario operating cost estimates
    #[serde(default)]
    pub operating_cost_floor: f64,
    #[serde(default = "default_mip_relative_gap")]
    pub mip_relative_gap: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            tolerance: default_tolerance(),
            num_workers: default_num_workers(),
            base_weight: default_base_weight(),
            fairness_price: 0.0,
            operating_cost_floor: 0.0,
            mip_relative_gap: default_mip_relative_gap(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), InputError> {
        if self.max_iterations == 0 {
            return Err(InputError::Invalid(
                "max_iterations must be positive".to_string(),
            ));
        }
        if !(self.tolerance >= 0.0) {
            return Err(InputError::Invalid(format!(
                "tolerance {} must be non-negative",
                self.tolerance
            )));
        }
        if !(self.base_weight > 0.0) {
            return Err(InputError::Invalid(format!(
                "base_weight {} must be positive",
                self.base_weight
            )));
        }
        Ok(())
    }
}

fn read_json<T: DeserializeOwned>(filepath: &Path) -> Result<T, InputError> {
    let contents =
        fs::read_to_string(filepath).map_err(|source| InputError::Io {
            path: filepath.to_path_buf(),
            source,
        })?;
    serde_json::from_str(&contents).map_err(|source| InputError::Json {
        path: filepath.to_path_buf(),
        source,
    })
}

pub fn read_config_input(filepath: &Path) -> Result<Config, InputError> {
    let config: Config = read_json(filepath)?;
    config.validate()?;
    Ok(config)
}

#[derive(Debug, Deserialize)]
pub struct BusInput {
    pub id: usize,
    pub reactive_demand: Vec<f64>,
    #[serde(default)]
    pub shunt_conductance: f64,
    #[serde(default)]
    pub shunt_susceptance: f64,
    pub voltage: Bounds,
    pub active_generation: Bounds,
    pub reactive_generation: Bounds,
}

#[derive(Debug, Deserialize)]
pub struct LineInput {
    pub id: usize,
    pub source_bus_id: usize,
    pub target_bus_id: usize,
    pub resistance: f64,
    pub reactance: f64,
    #[serde(default)]
    pub shunt_susceptance: f64,
    pub flow_limit: f64,
}

#[derive(Debug, Deserialize)]
pub struct GenerationCostInput {
    pub slack: QuadraticCost,
    pub renewable: QuadraticCost,
}

#[derive(Debug, Deserialize)]
pub struct NetworkInput {
    pub steps: usize,
    pub slack_bus_id: usize,
    pub buses: Vec<BusInput>,
    pub lines: Vec<LineInput>,
    pub generation_cost: GenerationCostInput,
}

pub fn read_network_input(filepath: &Path) -> Result<NetworkInput, InputError> {
    read_json(filepath)
}

#[derive(Debug, Deserialize)]
pub struct ScenarioInput {
    pub id: usize,
    pub frequency: f64,
    /// `[bus][time step]`
    pub active_demand: Vec<Vec<f64>>,
    /// `[bus][time step]`
    pub renewable: Vec<Vec<f64>>,
}

#[derive(Debug, Deserialize)]
pub struct ScenariosInput {
    pub scenarios: Vec<ScenarioInput>,
}

pub fn read_scenarios_input(
    filepath: &Path,
) -> Result<ScenariosInput, InputError> {
    read_json(filepath)
}

#[derive(Debug, Deserialize)]
pub struct StorageInput {
    pub candidates: Vec<StorageCandidate>,
    pub costs: InvestmentCosts,
    #[serde(default = "default_efficiency")]
    pub efficiency: f64,
    #[serde(default)]
    pub max_installations: Option<usize>,
    #[serde(default)]
    pub investment_budget: Option<f64>,
}

pub fn read_storage_input(filepath: &Path) -> Result<StorageInput, InputError> {
    read_json(filepath)
}

fn validate_id_range(ids: &[usize], elem_name: &str) -> Result<(), InputError> {
    let num_elements = ids.len();
    for elem_id in 0..num_elements {
        if !ids.iter().any(|id| *id == elem_id) {
            return Err(InputError::Invalid(format!(
                "ID {} not found for {}",
                elem_id, elem_name
            )));
        }
    }
    Ok(())
}

fn validate_entity_count(
    count: usize,
    expected: usize,
    elem_name: &str,
) -> Result<(), InputError> {
    if count != expected {
        return Err(InputError::Invalid(format!(
            "Error matching {}: {} != {}",
            elem_name, count, expected
        )));
    }
    Ok(())
}

impl NetworkInput {
    pub fn build_network(&self) -> Result<Network, InputError> {
        let buses_ids: Vec<usize> = self.buses.iter().map(|b| b.id).collect();
        let lines_ids: Vec<usize> = self.lines.iter().map(|l| l.id).collect();
        validate_id_range(&buses_ids, "buses")?;
        validate_id_range(&lines_ids, "lines")?;

        let mut buses = Vec::<Bus>::with_capacity(buses_ids.len());
        for id in 0..buses_ids.len() {
            if let Some(bus) = self.buses.iter().find(|b| b.id == id) {
                validate_entity_count(
                    bus.reactive_demand.len(),
                    self.steps,
                    &format!("reactive demand steps of bus {}", id),
                )?;
                buses.push(Bus::new(
                    id,
                    bus.reactive_demand.clone(),
                    bus.shunt_conductance,
                    bus.shunt_susceptance,
                    bus.voltage,
                    bus.active_generation,
                    bus.reactive_generation,
                ));
            }
        }

        let mut lines = Vec::<Line>::with_capacity(lines_ids.len());
        for id in 0..lines_ids.len() {
            if let Some(line) = self.lines.iter().find(|l| l.id == id) {
                if line.source_bus_id >= buses.len()
                    || line.target_bus_id >= buses.len()
                {
                    return Err(InputError::Invalid(format!(
                        "line {} connects unknown buses",
                        id
                    )));
                }
                lines.push(Line::new(
                    id,
                    line.source_bus_id,
                    line.target_bus_id,
                    line.resistance,
                    line.reactance,
                    line.shunt_susceptance,
                    line.flow_limit,
                ));
            }
        }

        if self.slack_bus_id >= buses.len() {
            return Err(InputError::Invalid(format!(
                "slack bus {} is not a bus of the network",
                self.slack_bus_id
            )));
        }

        Ok(Network::new(buses, lines, self.slack_bus_id, self.steps))
    }

    pub fn build_generation_cost(&self) -> GenerationCost {
        GenerationCost::from_slack_and_renewable(
            self.buses.len(),
            self.steps,
            self.slack_bus_id,
            &self.generation_cost.slack,
            &self.generation_cost.renewable,
        )
    }
}

impl ScenariosInput {
    pub fn build_scenarios(
        &self,
        network: &Network,
    ) -> Result<Vec<Scenario>, InputError> {
        let ids: Vec<usize> = self.scenarios.iter().map(|s| s.id).collect();
        validate_id_range(&ids, "scenarios")?;

        let mut scenarios = Vec::<Scenario>::with_capacity(ids.len());
        for id in 0..ids.len() {
            if let Some(s) = self.scenarios.iter().find(|s| s.id == id) {
                validate_entity_count(
                    s.active_demand.len(),
                    network.bus_count(),
                    &format!("active demand buses of scenario {}", id),
                )?;
                validate_entity_count(
                    s.renewable.len(),
                    network.bus_count(),
                    &format!("renewable buses of scenario {}", id),
                )?;
                scenarios.push(Scenario::new(
                    id,
                    s.frequency,
                    BusTimeMatrix::from_rows(&s.active_demand)?,
                    BusTimeMatrix::from_rows(&s.renewable)?,
                ));
            }
        }
        Ok(scenarios)
    }
}

impl StorageInput {
    pub fn build_storage_options(&self) -> StorageOptions {
        StorageOptions {
            candidates: self.candidates.clone(),
            costs: self.costs,
            efficiency: self.efficiency,
            max_installations: self.max_installations,
            investment_budget: self.investment_budget,
        }
    }
}

/// A prepared study, read from a directory holding `config.json`,
/// `network.json`, `scenarios.json` and `storage.json`.
#[derive(Debug)]
pub struct Input {
    pub config: Config,
    pub network: NetworkInput,
    pub scenarios: ScenariosInput,
    pub storage: StorageInput,
}

impl Input {
    pub fn build(path: &Path) -> Result<Self, InputError> {
        let config = read_config_input(&path.join("config.json"))?;
        let network = read_network_input(&path.join("network.json"))?;
        let scenarios = read_scenarios_input(&path.join("scenarios.json"))?;
        let storage = read_storage_input(&path.join("storage.json"))?;
        Ok(Self {
            config,
            network,
            scenarios,
            storage,
        })
    }

    pub fn build_planning_model(&self) -> Result<PlanningModel, InputError> {
        let network = self.network.build_network()?;
        let scenarios = self.scenarios.build_scenarios(&network)?;
        let generation_cost = self.network.build_generation_cost();
        let storage = self.storage.build_storage_options();
        PlanningModel::new(network, scenarios, generation_cost, storage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_read_config() {
        let config = read_config_input(Path::new("example/config.json")).unwrap();
        assert_eq!(config.max_iterations, 30);
        assert_eq!(config.tolerance, 0.01);
        assert_eq!(config.num_workers, 2);
        assert_eq!(config.fairness_price, 0.0);
    }

    #[test]
    fn test_config_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.max_iterations, 100);
        assert_eq!(config.mip_relative_gap, 1e-6);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{\"max_iterations\": 0}}").unwrap();
        let result = read_config_input(file.path());
        assert!(matches!(result, Err(InputError::Invalid(_))));
    }

    #[test]
    fn test_missing_file_is_an_io_error() {
        let result = read_config_input(Path::new("example/missing.json"));
        assert!(matches!(result, Err(InputError::Io { .. })));
    }

    #[test]
    fn test_malformed_file_is_a_json_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{\"max_iterations\": ").unwrap();
        let result = read_config_input(file.path());
        assert!(matches!(result, Err(InputError::Json { .. })));
    }

    #[test]
    fn test_read_network() {
        let network = read_network_input(Path::new("example/network.json"))
            .unwrap()
            .build_network()
            .unwrap();
        assert_eq!(network.bus_count(), 3);
        assert_eq!(network.lines.len(), 2);
        assert_eq!(network.step_count(), 24);
        assert_eq!(network.buses[2].target_line_ids, vec![1]);
    }

    #[test]
    fn test_missing_bus_id_is_rejected() {
        let mut input =
            read_network_input(Path::new("example/network.json")).unwrap();
        input.buses[1].id = 7;
        assert!(matches!(
            input.build_network(),
            Err(InputError::Invalid(_))
        ));
    }

    #[test]
    fn test_scenario_with_wrong_bus_count_is_rejected() {
        let network = read_network_input(Path::new("example/network.json"))
            .unwrap()
            .build_network()
            .unwrap();
        let mut scenarios =
            read_scenarios_input(Path::new("example/scenarios.json")).unwrap();
        scenarios.scenarios[0].renewable.pop();
        assert!(matches!(
            scenarios.build_scenarios(&network),
            Err(InputError::Invalid(_))
        ));
    }

    #[test]
    fn test_example_matches_default_model() {
        let input = Input::build(Path::new("example")).unwrap();
        let model = input.build_planning_model().unwrap();
        let default = PlanningModel::default();
        assert_eq!(model.scenario_count(), default.scenario_count());
        assert_eq!(model.storage.max_installations, Some(1));
        assert_eq!(model.storage.candidates[0].bus_id, 2);
        for (a, b) in model.scenarios.iter().zip(default.scenarios.iter()) {
            assert!((a.frequency - b.frequency).abs() < 1e-12);
            for (x, y) in a
                .active_demand
                .values()
                .iter()
                .zip(b.active_demand.values().iter())
            {
                assert!((x - y).abs() < 1e-12);
            }
            for (x, y) in
                a.renewable.values().iter().zip(b.renewable.values().iter())
            {
                assert!((x - y).abs() < 1e-12);
            }
        }
        assert_eq!(model.generation_cost.at(0, 5).linear, 226.0);
    }
}
