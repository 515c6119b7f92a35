//! Cross-backend equivalence harness.
//!
//! Builds the same network once per backend, runs both for the same duration
//! and compares per-group mean firing rates (and voltage traces when the
//! configuration samples them). Each backend runs to completion on its own.

use dendrite_core::{BackendKind, DendriteError, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::monitor::{SpikeMonitor, VoltageRecorder};
use crate::network::GroupId;
use crate::simulation::Simulation;

/// Relative tolerance on per-group firing rates
pub const RATE_TOLERANCE: f64 = 1e-5;

/// Rates equal exactly or within [`RATE_TOLERANCE`] of the larger one
pub fn rates_match(a: f64, b: f64) -> bool {
    a == b || (a - b).abs() <= RATE_TOLERANCE * a.abs().max(b.abs())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupRate {
    pub group: GroupId,
    pub name: String,
    pub spikes: u64,
    /// Hz
    pub rate: f64,
}

/// Result of one backend run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendRun {
    pub backend: BackendKind,
    pub steps: u64,
    pub groups: Vec<GroupRate>,
}

impl BackendRun {
    pub fn rate(&self, group: GroupId) -> Option<f64> {
        self.groups.iter().find(|g| g.group == group).map(|g| g.rate)
    }

    pub fn rate_by_name(&self, name: &str) -> Option<f64> {
        self.groups.iter().find(|g| g.name == name).map(|g| g.rate)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquivalenceReport {
    pub sequential: BackendRun,
    pub parallel: BackendRun,
    /// Largest voltage difference across all sampled neurons, if sampled
    pub max_voltage_deviation: Option<f64>,
}

impl EquivalenceReport {
    /// `(name, sequential rate, parallel rate)` per group
    pub fn rate_pairs(&self) -> impl Iterator<Item = (&str, f64, f64)> {
        self.sequential
            .groups
            .iter()
            .zip(&self.parallel.groups)
            .map(|(s, p)| (s.name.as_str(), s.rate, p.rate))
    }

    pub fn is_equivalent(&self) -> bool {
        self.sequential.groups.len() == self.parallel.groups.len()
            && self.rate_pairs().all(|(_, s, p)| rates_match(s, p))
    }
}

/// Run `build(kind)` for both backends over `seconds * 1000 + millis` steps.
pub fn compare_backends<F>(build: F, seconds: u32, millis: u32) -> Result<EquivalenceReport>
where
    F: Fn(BackendKind) -> Result<Simulation>,
{
    let (sequential, seq_voltages) = run_backend(&build, BackendKind::Sequential, seconds, millis)?;
    let (parallel, par_voltages) = run_backend(&build, BackendKind::Parallel, seconds, millis)?;

    let max_voltage_deviation = if seq_voltages.is_empty() {
        None
    } else {
        seq_voltages.max_deviation(&par_voltages)
    };

    let report = EquivalenceReport {
        sequential,
        parallel,
        max_voltage_deviation,
    };
    if report.is_equivalent() {
        debug!(?max_voltage_deviation, "backends agree");
    } else {
        for (name, s, p) in report.rate_pairs().filter(|(_, s, p)| !rates_match(*s, *p)) {
            warn!(group = name, sequential = s, parallel = p, "backend rate mismatch");
        }
    }
    Ok(report)
}

fn run_backend<F>(build: &F, kind: BackendKind, seconds: u32, millis: u32) -> Result<(BackendRun, VoltageRecorder)>
where
    F: Fn(BackendKind) -> Result<Simulation>,
{
    let mut sim = build(kind)?;
    if sim.backend_kind() != kind {
        return Err(DendriteError::config(format!(
            "builder returned a {} simulation when {} was requested",
            sim.backend_kind(),
            kind
        )));
    }

    let mut observer = (SpikeMonitor::new(sim.network()), VoltageRecorder::new());
    let summary = sim.run_network_with(seconds, millis, &mut observer)?;
    let (monitor, voltages) = observer;

    let groups = sim
        .network()
        .groups()
        .iter()
        .map(|g| GroupRate {
            group: g.id,
            name: g.name.clone(),
            spikes: monitor.spike_count(g.id),
            rate: monitor.pop_mean_firing_rate(g.id),
        })
        .collect();

    Ok((
        BackendRun {
            backend: kind,
            steps: summary.steps,
            groups,
        },
        voltages,
    ))
}
