use crate::system::{InvestmentCosts, Network};
use serde::Serialize;

/// Investment decision produced by the master problem, indexed by bus.
/// Buses that are not selected carry zero rating and capacity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoragePlan {
    pub installed: Vec<bool>,
    pub ratings: Vec<f64>,
    pub capacities: Vec<f64>,
}

impl StoragePlan {
    pub fn empty(buses_count: usize) -> Self {
        Self {
            installed: vec![false; buses_count],
            ratings: vec![0.0; buses_count],
            capacities: vec![0.0; buses_count],
        }
    }

    pub fn install(&mut self, bus_id: usize, rating: f64, capacity: f64) {
        self.installed[bus_id] = true;
        self.ratings[bus_id] = rating;
        self.capacities[bus_id] = capacity;
    }

    pub fn installed_bus_ids(&self) -> Vec<usize> {
        self.installed
            .iter()
            .enumerate()
            .filter(|(_, installed)| **installed)
            .map(|(id, _)| id)
            .collect()
    }

    pub fn installation_count(&self) -> usize {
        self.installed.iter().filter(|i| **i).count()
    }

    pub fn investment_cost(&self, costs: &InvestmentCosts) -> f64 {
        self.installed
            .iter()
            .enumerate()
            .map(|(id, installed)| {
                costs.eval(*installed, self.ratings[id], self.capacities[id])
            })
            .sum()
    }

    /// Translates the plan into the limits seen by the operating
    /// subproblems. Only selected buses receive non-zero limits.
    pub fn operating_bounds(&self, network: &Network) -> OperatingBounds {
        let buses_count = network.bus_count();
        let mut bounds = OperatingBounds::zeros(buses_count);
        for bus_id in self.installed_bus_ids() {
            bounds.charge_max[bus_id] = self.ratings[bus_id];
            bounds.discharge_max[bus_id] = self.ratings[bus_id];
            bounds.soc_max[bus_id] = self.capacities[bus_id];
        }
        bounds
    }
}

/// Per-bus storage limits, constant over the horizon. The lower limits of
/// charge, discharge and state of charge are zero and the initial state of
/// charge is empty.
#[derive(Debug, Clone, PartialEq)]
pub struct OperatingBounds {
    pub charge_max: Vec<f64>,
    pub discharge_max: Vec<f64>,
    pub soc_max: Vec<f64>,
    pub initial_soc: Vec<f64>,
}

impl OperatingBounds {
    pub fn zeros(buses_count: usize) -> Self {
        Self {
            charge_max: vec![0.0; buses_count],
            discharge_max: vec![0.0; buses_count],
            soc_max: vec![0.0; buses_count],
            initial_soc: vec![0.0; buses_count],
        }
    }
}
