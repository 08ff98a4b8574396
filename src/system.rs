use crate::error::InputError;
use serde::{Deserialize, Serialize};

/// A dense (bus, time step) table, stored row-major by bus.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BusTimeMatrix {
    buses: usize,
    steps: usize,
    values: Vec<f64>,
}

impl BusTimeMatrix {
    pub fn zeros(buses: usize, steps: usize) -> Self {
        Self {
            buses,
            steps,
            values: vec![0.0; buses * steps],
        }
    }

    pub fn filled(buses: usize, steps: usize, value: f64) -> Self {
        Self {
            buses,
            steps,
            values: vec![value; buses * steps],
        }
    }

    /// Builds the table from one row per bus. Every row must have the
    /// same number of time steps.
    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self, InputError> {
        let buses = rows.len();
        let steps = rows.first().map(|r| r.len()).unwrap_or(0);
        let mut values = Vec::<f64>::with_capacity(buses * steps);
        for (bus, row) in rows.iter().enumerate() {
            if row.len() != steps {
                return Err(InputError::Invalid(format!(
                    "row of bus {} has {} time steps, expected {}",
                    bus,
                    row.len(),
                    steps
                )));
            }
            values.extend_from_slice(row);
        }
        Ok(Self {
            buses,
            steps,
            values,
        })
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.buses, self.steps)
    }

    pub fn get(&self, bus: usize, step: usize) -> f64 {
        self.values[bus * self.steps + step]
    }

    pub fn set(&mut self, bus: usize, step: usize, value: f64) {
        self.values[bus * self.steps + step] = value;
    }

    pub fn row(&self, bus: usize) -> &[f64] {
        &self.values[bus * self.steps..(bus + 1) * self.steps]
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn negated(&self) -> Self {
        Self {
            buses: self.buses,
            steps: self.steps,
            values: self.values.iter().map(|v| -v).collect(),
        }
    }
}

/// Closed interval used for every physical and sizing limit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min: f64,
    pub max: f64,
}

impl Bounds {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn fixed(value: f64) -> Self {
        Self {
            min: value,
            max: value,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.min.is_finite() && self.max.is_finite() && self.min <= self.max
    }
}

#[derive(Debug, Clone)]
pub struct Bus {
    pub id: usize,
    pub reactive_demand: Vec<f64>, // indexed by time step
    pub shunt_conductance: f64,
    pub shunt_susceptance: f64,
    pub voltage: Bounds, // magnitude, p.u.
    pub active_generation: Bounds,
    pub reactive_generation: Bounds,
    pub source_line_ids: Vec<usize>,
    pub target_line_ids: Vec<usize>,
}

impl Bus {
    pub fn new(
        id: usize,
        reactive_demand: Vec<f64>,
        shunt_conductance: f64,
        shunt_susceptance: f64,
        voltage: Bounds,
        active_generation: Bounds,
        reactive_generation: Bounds,
    ) -> Self {
        Self {
            id,
            reactive_demand,
            shunt_conductance,
            shunt_susceptance,
            voltage,
            active_generation,
            reactive_generation,
            source_line_ids: vec![],
            target_line_ids: vec![],
        }
    }

    pub fn add_source_line(&mut self, line_id: usize) {
        self.source_line_ids.push(line_id);
    }

    pub fn add_target_line(&mut self, line_id: usize) {
        self.target_line_ids.push(line_id);
    }

    /// Bounds on the squared voltage magnitude, which is the variable the
    /// relaxation works with.
    pub fn squared_voltage(&self) -> Bounds {
        Bounds::new(
            self.voltage.min * self.voltage.min,
            self.voltage.max * self.voltage.max,
        )
    }
}

#[derive(Debug, Clone)]
pub struct Line {
    pub id: usize,
    pub source_bus_id: usize,
    pub target_bus_id: usize,
    pub resistance: f64,
    pub reactance: f64,
    pub shunt_susceptance: f64,
    pub flow_limit: f64,
}

impl Line {
    pub fn new(
        id: usize,
        source_bus_id: usize,
        target_bus_id: usize,
        resistance: f64,
        reactance: f64,
        shunt_susceptance: f64,
        flow_limit: f64,
    ) -> Self {
        Self {
            id,
            source_bus_id,
            target_bus_id,
            resistance,
            reactance,
            shunt_susceptance,
            flow_limit,
        }
    }

    /// Real part of the series admittance 1 / (r + jx)
    pub fn series_conductance(&self) -> f64 {
        let z2 = self.resistance.powi(2) + self.reactance.powi(2);
        self.resistance / z2
    }

    /// Imaginary part of the series admittance 1 / (r + jx)
    pub fn series_susceptance(&self) -> f64 {
        let z2 = self.resistance.powi(2) + self.reactance.powi(2);
        -self.reactance / z2
    }
}

#[allow(dead_code)]
#[derive(Debug, Clone)]
pub struct NetworkMetadata {
    pub buses_count: usize,
    pub lines_count: usize,
    pub steps_count: usize,
}

/// The distribution network over a fixed horizon of time steps.
#[derive(Debug, Clone)]
pub struct Network {
    pub buses: Vec<Bus>,
    pub lines: Vec<Line>,
    pub slack_bus_id: usize,
    pub meta: NetworkMetadata,
}

impl Network {
    pub fn new(
        mut buses: Vec<Bus>,
        lines: Vec<Line>,
        slack_bus_id: usize,
        steps_count: usize,
    ) -> Self {
        for l in lines.iter() {
            buses[l.source_bus_id].add_source_line(l.id);
            buses[l.target_bus_id].add_target_line(l.id);
        }

        let buses_count = buses.len();
        let lines_count = lines.len();

        Self {
            buses,
            lines,
            slack_bus_id,
            meta: NetworkMetadata {
                buses_count,
                lines_count,
                steps_count,
            },
        }
    }

    pub fn bus_count(&self) -> usize {
        self.meta.buses_count
    }

    pub fn step_count(&self) -> usize {
        self.meta.steps_count
    }
}

/// Coefficients of `a·P² + b·P + c`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuadraticCost {
    #[serde(default)]
    pub quadratic: f64,
    #[serde(default)]
    pub linear: f64,
    #[serde(default)]
    pub constant: f64,
}

impl QuadraticCost {
    pub fn new(quadratic: f64, linear: f64, constant: f64) -> Self {
        Self {
            quadratic,
            linear,
            constant,
        }
    }

    pub fn eval(&self, power: f64) -> f64 {
        self.quadratic * power * power + self.linear * power + self.constant
    }
}

/// Generation cost coefficients per (bus, time step).
#[derive(Debug, Clone)]
pub struct GenerationCost {
    pub quadratic: BusTimeMatrix,
    pub linear: BusTimeMatrix,
    pub constant: BusTimeMatrix,
}

impl GenerationCost {
    /// The substation coefficients apply at the slack bus only, the
    /// renewable coefficients at every bus. Both sets are summed where
    /// they overlap.
    pub fn from_slack_and_renewable(
        buses_count: usize,
        steps_count: usize,
        slack_bus_id: usize,
        slack: &QuadraticCost,
        renewable: &QuadraticCost,
    ) -> Self {
        let mut quadratic =
            BusTimeMatrix::filled(buses_count, steps_count, renewable.quadratic);
        let mut linear =
            BusTimeMatrix::filled(buses_count, steps_count, renewable.linear);
        let mut constant =
            BusTimeMatrix::filled(buses_count, steps_count, renewable.constant);
        for t in 0..steps_count {
            quadratic.set(
                slack_bus_id,
                t,
                renewable.quadratic + slack.quadratic,
            );
            linear.set(slack_bus_id, t, renewable.linear + slack.linear);
            constant.set(slack_bus_id, t, renewable.constant + slack.constant);
        }
        Self {
            quadratic,
            linear,
            constant,
        }
    }

    pub fn at(&self, bus: usize, step: usize) -> QuadraticCost {
        QuadraticCost::new(
            self.quadratic.get(bus, step),
            self.linear.get(bus, step),
            self.constant.get(bus, step),
        )
    }
}

/// One realization of demand and renewable production over the horizon.
#[derive(Debug, Clone)]
pub struct Scenario {
    pub id: usize,
    pub frequency: f64,
    pub active_demand: BusTimeMatrix,
    pub renewable: BusTimeMatrix,
}

impl Scenario {
    pub fn new(
        id: usize,
        frequency: f64,
        active_demand: BusTimeMatrix,
        renewable: BusTimeMatrix,
    ) -> Self {
        Self {
            id,
            frequency,
            active_demand,
            renewable,
        }
    }

    /// Active generation bounds at a bus, with the renewable ceiling of
    /// this scenario added to the conventional upper bound.
    pub fn active_generation(&self, bus: &Bus, step: usize) -> Bounds {
        Bounds::new(
            bus.active_generation.min,
            bus.active_generation.max + self.renewable.get(bus.id, step),
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageCandidate {
    pub bus_id: usize,
    pub rating: Bounds,
    pub capacity: Bounds,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct InvestmentCosts {
    pub fixed_cost: f64,
    pub power_rating_cost: f64,
    pub energy_capacity_cost: f64,
}

impl InvestmentCosts {
    pub fn eval(&self, installed: bool, rating: f64, capacity: f64) -> f64 {
        let fixed = if installed { self.fixed_cost } else { 0.0 };
        fixed
            + self.power_rating_cost * rating
            + self.energy_capacity_cost * capacity
    }
}

/// Everything the investment side needs to know about storage.
#[derive(Debug, Clone)]
pub struct StorageOptions {
    pub candidates: Vec<StorageCandidate>,
    pub costs: InvestmentCosts,
    pub efficiency: f64,
    pub max_installations: Option<usize>,
    pub investment_budget: Option<f64>,
}

impl StorageOptions {
    pub fn candidate_at(&self, bus_id: usize) -> Option<&StorageCandidate> {
        self.candidates.iter().find(|c| c.bus_id == bus_id)
    }
}

/// The prepared, immutable input of the decomposition.
#[derive(Debug, Clone)]
pub struct PlanningModel {
    pub network: Network,
    pub scenarios: Vec<Scenario>,
    pub generation_cost: GenerationCost,
    pub storage: StorageOptions,
}

impl PlanningModel {
    /// Validates shapes and normalizes the scenario frequencies so that
    /// they sum to one.
    pub fn new(
        network: Network,
        mut scenarios: Vec<Scenario>,
        generation_cost: GenerationCost,
        storage: StorageOptions,
    ) -> Result<Self, InputError> {
        let shape = (network.bus_count(), network.step_count());
        if scenarios.is_empty() {
            return Err(InputError::Invalid(
                "at least one scenario is required".to_string(),
            ));
        }
        if network.slack_bus_id >= shape.0 {
            return Err(InputError::Invalid(format!(
                "slack bus {} is not a bus of the network",
                network.slack_bus_id
            )));
        }
        for bus in network.buses.iter() {
            if bus.reactive_demand.len() != shape.1 {
                return Err(InputError::Invalid(format!(
                    "bus {} has {} reactive demand steps, expected {}",
                    bus.id,
                    bus.reactive_demand.len(),
                    shape.1
                )));
            }
            for (name, bounds) in [
                ("voltage", &bus.voltage),
                ("active generation", &bus.active_generation),
                ("reactive generation", &bus.reactive_generation),
            ] {
                if !bounds.is_valid() {
                    return Err(InputError::Invalid(format!(
                        "bus {} has invalid {} bounds",
                        bus.id, name
                    )));
                }
            }
        }
        for line in network.lines.iter() {
            if line.source_bus_id >= shape.0 || line.target_bus_id >= shape.0
            {
                return Err(InputError::Invalid(format!(
                    "line {} connects unknown buses",
                    line.id
                )));
            }
            if line.resistance.powi(2) + line.reactance.powi(2) <= 0.0 {
                return Err(InputError::Invalid(format!(
                    "line {} has zero series impedance",
                    line.id
                )));
            }
        }
        for (name, table) in [
            ("quadratic cost", &generation_cost.quadratic),
            ("linear cost", &generation_cost.linear),
            ("constant cost", &generation_cost.constant),
        ] {
            if table.shape() != shape {
                return Err(InputError::Invalid(format!(
                    "{} table has shape {:?}, expected {:?}",
                    name,
                    table.shape(),
                    shape
                )));
            }
        }

        for (index, scenario) in scenarios.iter().enumerate() {
            if scenario.id != index {
                return Err(InputError::Invalid(format!(
                    "scenario ids must be 0..{}, found {} at position {}",
                    scenarios.len(),
                    scenario.id,
                    index
                )));
            }
            if scenario.active_demand.shape() != shape
                || scenario.renewable.shape() != shape
            {
                return Err(InputError::Invalid(format!(
                    "scenario {} tensors do not match the (bus, time) shape {:?}",
                    scenario.id, shape
                )));
            }
            if !(scenario.frequency >= 0.0) {
                return Err(InputError::Invalid(format!(
                    "scenario {} has a negative frequency",
                    scenario.id
                )));
            }
        }
        let total: f64 = scenarios.iter().map(|s| s.frequency).sum();
        if total <= 0.0 {
            return Err(InputError::Invalid(
                "scenario frequencies sum to zero".to_string(),
            ));
        }
        for scenario in scenarios.iter_mut() {
            scenario.frequency /= total;
        }

        for candidate in storage.candidates.iter() {
            if candidate.bus_id >= shape.0 {
                return Err(InputError::Invalid(format!(
                    "storage candidate at unknown bus {}",
                    candidate.bus_id
                )));
            }
            if !candidate.rating.is_valid()
                || !candidate.capacity.is_valid()
                || candidate.rating.min < 0.0
                || candidate.capacity.min < 0.0
            {
                return Err(InputError::Invalid(format!(
                    "storage candidate at bus {} has invalid sizing bounds",
                    candidate.bus_id
                )));
            }
        }
        let mut candidate_buses: Vec<usize> =
            storage.candidates.iter().map(|c| c.bus_id).collect();
        candidate_buses.sort_unstable();
        candidate_buses.dedup();
        if candidate_buses.len() != storage.candidates.len() {
            return Err(InputError::Invalid(
                "a bus is listed more than once as storage candidate"
                    .to_string(),
            ));
        }
        if !(storage.efficiency > 0.0 && storage.efficiency <= 1.0) {
            return Err(InputError::Invalid(format!(
                "storage efficiency {} must lie in (0, 1]",
                storage.efficiency
            )));
        }

        Ok(Self {
            network,
            scenarios,
            generation_cost,
            storage,
        })
    }

    pub fn scenario_count(&self) -> usize {
        self.scenarios.len()
    }

    /// Probability weight of each scenario: `base_weight × frequency`.
    pub fn scenario_weights(&self, base_weight: f64) -> Vec<f64> {
        self.scenarios
            .iter()
            .map(|s| base_weight * s.frequency)
            .collect()
    }
}

const DEFAULT_STEPS: usize = 24;

/// Hourly load shape of a residential feeder, in p.u. of the peak.
const LOAD_SHAPE: [f64; DEFAULT_STEPS] = [
    0.55, 0.50, 0.48, 0.47, 0.48, 0.55, 0.70, 0.85, 0.80, 0.72, 0.68, 0.66,
    0.65, 0.64, 0.66, 0.70, 0.80, 0.95, 1.00, 0.98, 0.90, 0.80, 0.70, 0.60,
];

/// Hourly photovoltaic production shape, in p.u. of the installed peak.
const SOLAR_SHAPE: [f64; DEFAULT_STEPS] = [
    0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.05, 0.15, 0.35, 0.55, 0.75, 0.90, 1.00,
    0.95, 0.80, 0.60, 0.40, 0.20, 0.05, 0.0, 0.0, 0.0, 0.0, 0.0,
];

fn profile(shape: &[f64], scale: f64) -> Vec<f64> {
    shape.iter().map(|v| v * scale).collect()
}

impl Default for PlanningModel {
    /// Three-bus radial feeder: substation (slack) at bus 0, a load at
    /// bus 1 and a load with rooftop photovoltaics at bus 2, which is the
    /// only storage candidate. Two scenarios, sunny and cloudy.
    fn default() -> Self {
        let steps = DEFAULT_STEPS;
        let substation = Bus::new(
            0,
            vec![0.0; steps],
            0.0,
            0.0,
            Bounds::fixed(1.0),
            Bounds::new(0.0, 5.0),
            Bounds::new(-5.0, 5.0),
        );
        let load = Bus::new(
            1,
            profile(&LOAD_SHAPE, 0.05),
            0.0,
            0.0,
            Bounds::new(0.9, 1.1),
            Bounds::fixed(0.0),
            Bounds::fixed(0.0),
        );
        let prosumer = Bus::new(
            2,
            profile(&LOAD_SHAPE, 0.04),
            0.0,
            0.0,
            Bounds::new(0.9, 1.1),
            Bounds::fixed(0.0),
            Bounds::fixed(0.0),
        );
        let lines = vec![
            Line::new(0, 0, 1, 0.01, 0.02, 0.0, 3.0),
            Line::new(1, 1, 2, 0.01, 0.02, 0.0, 3.0),
        ];
        let network =
            Network::new(vec![substation, load, prosumer], lines, 0, steps);

        let zeros = vec![0.0; steps];
        let sunny = Scenario::new(
            0,
            0.6,
            BusTimeMatrix::from_rows(&[
                zeros.clone(),
                profile(&LOAD_SHAPE, 0.40),
                profile(&LOAD_SHAPE, 0.30),
            ])
            .expect("rows have equal length"),
            BusTimeMatrix::from_rows(&[
                zeros.clone(),
                zeros.clone(),
                profile(&SOLAR_SHAPE, 0.90),
            ])
            .expect("rows have equal length"),
        );
        let cloudy = Scenario::new(
            1,
            0.4,
            BusTimeMatrix::from_rows(&[
                zeros.clone(),
                profile(&LOAD_SHAPE, 0.44),
                profile(&LOAD_SHAPE, 0.33),
            ])
            .expect("rows have equal length"),
            BusTimeMatrix::from_rows(&[
                zeros.clone(),
                zeros.clone(),
                profile(&SOLAR_SHAPE, 0.40),
            ])
            .expect("rows have equal length"),
        );

        let generation_cost = GenerationCost::from_slack_and_renewable(
            3,
            steps,
            0,
            &QuadraticCost::new(0.0, 200.0, 0.0),
            &QuadraticCost::new(0.0, 26.0, 0.0),
        );

        let storage = StorageOptions {
            candidates: vec![StorageCandidate {
                bus_id: 2,
                rating: Bounds::new(0.05, 1.0),
                capacity: Bounds::new(0.1, 4.0),
            }],
            costs: InvestmentCosts {
                fixed_cost: 50.0,
                power_rating_cost: 20.0,
                energy_capacity_cost: 60.0,
            },
            efficiency: 1.0,
            max_installations: Some(1),
            investment_budget: None,
        };

        Self::new(network, vec![sunny, cloudy], generation_cost, storage)
            .expect("default planning model is consistent")
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn test_create_default_model() {
        let model = PlanningModel::default();
        assert_eq!(model.network.bus_count(), 3);
        assert_eq!(model.network.lines.len(), 2);
        assert_eq!(model.network.step_count(), 24);
        assert_eq!(model.scenario_count(), 2);
        assert_eq!(model.storage.candidates.len(), 1);
        assert_eq!(model.network.buses[1].source_line_ids, vec![1]);
        assert_eq!(model.network.buses[1].target_line_ids, vec![0]);
    }

    #[test]
    fn test_frequencies_are_normalized() {
        let mut model = PlanningModel::default();
        model.scenarios[0].frequency = 3.0;
        model.scenarios[1].frequency = 1.0;
        let model = PlanningModel::new(
            model.network,
            model.scenarios,
            model.generation_cost,
            model.storage,
        )
        .unwrap();
        assert_eq!(model.scenarios[0].frequency, 0.75);
        assert_eq!(model.scenarios[1].frequency, 0.25);
        let weights = model.scenario_weights(10.0);
        assert_eq!(weights, vec![7.5, 2.5]);
    }

    #[test]
    fn test_scenario_shape_mismatch_is_rejected() {
        let model = PlanningModel::default();
        let mut scenarios = model.scenarios.clone();
        scenarios[1].renewable = BusTimeMatrix::zeros(3, 12);
        let result = PlanningModel::new(
            model.network,
            scenarios,
            model.generation_cost,
            model.storage,
        );
        assert!(matches!(result, Err(InputError::Invalid(_))));
    }

    #[test]
    fn test_from_rows_rejects_ragged_rows() {
        let rows = vec![vec![1.0, 2.0], vec![3.0]];
        assert!(BusTimeMatrix::from_rows(&rows).is_err());
    }

    #[test]
    fn test_bus_time_matrix_access() {
        let mut m = BusTimeMatrix::zeros(2, 3);
        m.set(1, 2, 4.5);
        assert_eq!(m.get(1, 2), 4.5);
        assert_eq!(m.row(1), &[0.0, 0.0, 4.5]);
        assert_eq!(m.negated().get(1, 2), -4.5);
    }

    #[test]
    fn test_generation_cost_sums_slack_and_renewable() {
        let cost = GenerationCost::from_slack_and_renewable(
            3,
            2,
            0,
            &QuadraticCost::new(0.0, 200.0, 0.0),
            &QuadraticCost::new(0.0, 26.0, 0.0),
        );
        assert_eq!(cost.at(0, 1).linear, 226.0);
        assert_eq!(cost.at(2, 0).linear, 26.0);
    }

    #[test]
    fn test_renewable_ceiling_is_added_to_generation_bound() {
        let model = PlanningModel::default();
        let bus = &model.network.buses[2];
        let bounds = model.scenarios[0].active_generation(bus, 12);
        assert_eq!(bounds.min, 0.0);
        assert!((bounds.max - 0.9).abs() < 1e-12);
    }

    #[test]
    fn test_line_series_admittance() {
        let line = Line::new(0, 0, 1, 3.0, 4.0, 0.0, 1.0);
        assert!((line.series_conductance() - 0.12).abs() < 1e-12);
        assert!((line.series_susceptance() + 0.16).abs() < 1e-12);
    }
}
