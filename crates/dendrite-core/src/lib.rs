//! # Dendrite Core
//!
//! Shared types and utilities for multi-compartment spiking simulation.
//!
//! ## Contents
//!
//! | Item | Purpose |
//! |------|---------|
//! | [`DendriteError`] | Error taxonomy shared by every crate in the workspace |
//! | [`EngineConfig`] | Immutable simulation-wide configuration (substeps, method, synapse mode) |
//! | [`TimeSeries`] | Recorded trace of one scalar (e.g. a compartment voltage) |
//! | [`BackendKind`] | Which execution backend advances the network |
//!
//! ## Design Philosophy
//!
//! 1. Configuration is validated once and never mutated afterwards
//! 2. Both backends must produce the same numbers from the same configuration
//! 3. Numeric failure is reported, never silently corrected

use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Duration of one macro-timestep in milliseconds.
pub const MACRO_STEP_MS: f64 = 1.0;

/// Macro-timesteps per simulated second.
pub const STEPS_PER_SECOND: u64 = 1000;

/// Common errors
#[derive(Debug, Error)]
pub enum DendriteError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Compartment coupling cycle through compartment {compartment}")]
    CouplingCycle { compartment: usize },

    #[error("Unknown group: {0}")]
    UnknownGroup(String),

    #[error(
        "Numeric divergence in neuron {neuron} ({group}) at timestep {timestep}, \
         microstep {microstep}: v={v}, u={u}"
    )]
    NumericDivergence {
        neuron: usize,
        group: String,
        timestep: u64,
        microstep: u32,
        v: f64,
        u: f64,
    },

    #[error("Simulation halted after numeric divergence at timestep {timestep}")]
    Halted { timestep: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DendriteError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, DendriteError>;

/// Time point (ms)
pub type Time = f64;

/// Voltage (mV)
pub type Voltage = f64;

/// Current (pA)
pub type Current = f64;

/// Conductance (nS)
pub type Conductance = f64;

/// Macro-timestep counter
pub type Timestep = u64;

/// Per-neuron state column
pub type StateVector = Array1<f64>;

/// Time series data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeSeries {
    /// Time points
    pub time: Vec<Time>,
    /// Values at each time point
    pub values: Vec<f64>,
    /// Variable name
    pub name: String,
    /// Units
    pub units: Option<String>,
}

impl TimeSeries {
    pub fn new(name: &str) -> Self {
        Self {
            time: Vec::new(),
            values: Vec::new(),
            name: name.to_string(),
            units: None,
        }
    }

    pub fn with_units(name: &str, units: &str) -> Self {
        Self {
            units: Some(units.to_string()),
            ..Self::new(name)
        }
    }

    pub fn push(&mut self, t: Time, v: f64) {
        self.time.push(t);
        self.values.push(v);
    }

    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    pub fn last(&self) -> Option<(Time, f64)> {
        self.time.last().copied().zip(self.values.last().copied())
    }

    /// Largest absolute pointwise difference against another series of equal length.
    pub fn max_abs_difference(&self, other: &TimeSeries) -> Option<f64> {
        if self.len() != other.len() {
            return None;
        }
        Some(
            self.values
                .iter()
                .zip(&other.values)
                .map(|(a, b)| (a - b).abs())
                .fold(0.0, f64::max),
        )
    }
}

/// Execution backend selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Single-threaded reference backend
    Sequential,
    /// Data-parallel backend (rayon)
    Parallel,
}

impl BackendKind {
    pub const ALL: [BackendKind; 2] = [BackendKind::Sequential, BackendKind::Parallel];
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Sequential => write!(f, "sequential"),
            BackendKind::Parallel => write!(f, "parallel"),
        }
    }
}

/// Integration methods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrationMethod {
    /// Forward Euler, one derivative evaluation per micro-step
    Euler,
    /// Classic 4th-order Runge-Kutta, four staged evaluations per micro-step
    RungeKutta4,
}

impl IntegrationMethod {
    /// Number of derivative evaluations per micro-step
    pub fn stages(&self) -> usize {
        match self {
            IntegrationMethod::Euler => 1,
            IntegrationMethod::RungeKutta4 => 4,
        }
    }
}

/// Conductance-based synapse parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CobaParams {
    pub tau_ampa: f64,  // AMPA decay (ms)
    pub tau_nmda: f64,  // NMDA decay (ms)
    pub tau_gabaa: f64, // GABAa decay (ms)
    pub tau_gabab: f64, // GABAb decay (ms)
    pub e_ampa: Voltage,
    pub e_nmda: Voltage,
    pub e_gabaa: Voltage,
    pub e_gabab: Voltage,
}

impl Default for CobaParams {
    fn default() -> Self {
        Self {
            tau_ampa: 5.0,
            tau_nmda: 150.0,
            tau_gabaa: 6.0,
            tau_gabab: 150.0,
            e_ampa: 0.0,
            e_nmda: 0.0,
            e_gabaa: -70.0,
            e_gabab: -90.0,
        }
    }
}

impl CobaParams {
    pub fn validate(&self) -> Result<()> {
        let taus = [
            ("tau_ampa", self.tau_ampa),
            ("tau_nmda", self.tau_nmda),
            ("tau_gabaa", self.tau_gabaa),
            ("tau_gabab", self.tau_gabab),
        ];
        for (name, tau) in taus {
            if !(tau.is_finite() && tau > 0.0) {
                return Err(DendriteError::config(format!(
                    "{} must be positive and finite, got {}",
                    name, tau
                )));
            }
        }
        let reversals = [self.e_ampa, self.e_nmda, self.e_gabaa, self.e_gabab];
        if reversals.iter().any(|e| !e.is_finite()) {
            return Err(DendriteError::config("reversal potentials must be finite"));
        }
        Ok(())
    }
}

/// Synapse model: current-based or conductance-based
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConductanceMode {
    /// Synaptic weight is injected directly as current
    Cuba,
    /// Synaptic weight increments a decaying conductance
    Coba(CobaParams),
}

impl ConductanceMode {
    pub fn coba() -> Self {
        Self::Coba(CobaParams::default())
    }

    pub fn is_coba(&self) -> bool {
        matches!(self, ConductanceMode::Coba(_))
    }
}

/// How long a CUBA input stays applied once delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CubaDelivery {
    /// Held for every micro-step of the arrival macro-step
    WholeTimestep,
    /// Applied during the first micro-step only
    SingleMicrostep,
}

/// Voltage sampling granularity for observers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoltageSampling {
    Off,
    PerTimestep,
    PerMicrostep,
}

/// Simulation-wide configuration, fixed at engine construction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Micro-steps per macro-timestep
    pub substeps: u32,
    /// Integration scheme
    pub method: IntegrationMethod,
    /// CUBA or COBA synapses
    pub conductance: ConductanceMode,
    /// CUBA hold policy
    pub cuba_delivery: CubaDelivery,
    /// Longest synaptic delay (macro-steps)
    pub max_delay: u16,
    /// Seed for connectivity and input generation
    pub seed: u64,
    /// Voltage reporting granularity
    pub voltage_sampling: VoltageSampling,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            substeps: 10,
            method: IntegrationMethod::RungeKutta4,
            conductance: ConductanceMode::Cuba,
            cuba_delivery: CubaDelivery::WholeTimestep,
            max_delay: 20,
            seed: 42,
            voltage_sampling: VoltageSampling::Off,
        }
    }
}

impl EngineConfig {
    pub fn with_substeps(mut self, substeps: u32) -> Self {
        self.substeps = substeps;
        self
    }

    pub fn with_method(mut self, method: IntegrationMethod) -> Self {
        self.method = method;
        self
    }

    pub fn with_conductance(mut self, conductance: ConductanceMode) -> Self {
        self.conductance = conductance;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_voltage_sampling(mut self, sampling: VoltageSampling) -> Self {
        self.voltage_sampling = sampling;
        self
    }

    /// Micro-step length (ms)
    pub fn microstep_ms(&self) -> Time {
        MACRO_STEP_MS / self.substeps as f64
    }

    pub fn validate(&self) -> Result<()> {
        if self.substeps == 0 {
            return Err(DendriteError::config("substeps must be at least 1"));
        }
        if self.max_delay == 0 {
            return Err(DendriteError::config("max_delay must be at least 1"));
        }
        if let ConductanceMode::Coba(params) = &self.conductance {
            params.validate()?;
        }
        Ok(())
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.method, IntegrationMethod::RungeKutta4);
        assert!((config.microstep_ms() - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_zero_substeps_rejected() {
        let config = EngineConfig::default().with_substeps(0);
        assert!(matches!(
            config.validate(),
            Err(DendriteError::Configuration(_))
        ));
    }

    #[test]
    fn test_bad_coba_tau_rejected() {
        let params = CobaParams {
            tau_nmda: 0.0,
            ..CobaParams::default()
        };
        let config = EngineConfig::default().with_conductance(ConductanceMode::Coba(params));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_json_partial() {
        let config = EngineConfig::from_json(r#"{ "substeps": 20, "conductance": "cuba" }"#).unwrap();
        assert_eq!(config.substeps, 20);
        assert_eq!(config.max_delay, 20);

        let coba = EngineConfig::from_json(
            r#"{ "conductance": { "coba": {
                "tau_ampa": 5.0, "tau_nmda": 150.0, "tau_gabaa": 6.0, "tau_gabab": 150.0,
                "e_ampa": 0.0, "e_nmda": 0.0, "e_gabaa": -70.0, "e_gabab": -90.0 } } }"#,
        )
        .unwrap();
        assert!(coba.conductance.is_coba());
    }

    #[test]
    fn test_time_series() {
        let mut ts = TimeSeries::with_units("voltage", "mV");
        ts.push(0.0, -65.0);
        ts.push(0.1, -64.0);
        assert_eq!(ts.len(), 2);
        assert_eq!(ts.last(), Some((0.1, -64.0)));

        let mut other = TimeSeries::new("voltage");
        other.push(0.0, -65.5);
        other.push(0.1, -64.0);
        assert_eq!(ts.max_abs_difference(&other), Some(0.5));
    }
}
