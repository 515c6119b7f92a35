//! Observers for spikes and voltage samples.

use dendrite_core::{Time, TimeSeries, Timestep, Voltage, STEPS_PER_SECOND};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::network::{CompiledNetwork, GroupId};
use crate::spike::SpikeEvent;

/// One voltage reading of one neuron
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VoltageSample {
    pub neuron: usize,
    pub group: GroupId,
    pub index: usize,
    pub time: Time,
    pub v: Voltage,
    pub u: f64,
}

/// Synchronous receiver of simulation output
pub trait SimulationObserver {
    fn on_spike(&mut self, _event: &SpikeEvent) {}

    fn on_voltage(&mut self, _sample: &VoltageSample) {}

    /// Called once each macro-step has been committed
    fn on_timestep_end(&mut self, _timestep: Timestep) {}
}

/// Observer that ignores everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NullObserver;

impl SimulationObserver for NullObserver {}

impl<T: SimulationObserver + ?Sized> SimulationObserver for &mut T {
    fn on_spike(&mut self, event: &SpikeEvent) {
        (**self).on_spike(event);
    }

    fn on_voltage(&mut self, sample: &VoltageSample) {
        (**self).on_voltage(sample);
    }

    fn on_timestep_end(&mut self, timestep: Timestep) {
        (**self).on_timestep_end(timestep);
    }
}

impl<A: SimulationObserver, B: SimulationObserver> SimulationObserver for (A, B) {
    fn on_spike(&mut self, event: &SpikeEvent) {
        self.0.on_spike(event);
        self.1.on_spike(event);
    }

    fn on_voltage(&mut self, sample: &VoltageSample) {
        self.0.on_voltage(sample);
        self.1.on_voltage(sample);
    }

    fn on_timestep_end(&mut self, timestep: Timestep) {
        self.0.on_timestep_end(timestep);
        self.1.on_timestep_end(timestep);
    }
}

// ============================================================================
// SPIKES
// ============================================================================

/// Per-group spike record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupSpikes {
    pub name: String,
    pub size: usize,
    /// `(index, time_ms)` in emission order
    pub spikes: Vec<(usize, Time)>,
    pub counts: Vec<u64>,
}

/// Records spikes of every group and the recorded duration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpikeMonitor {
    groups: Vec<GroupSpikes>,
    steps: u64,
}

impl SpikeMonitor {
    pub fn new(network: &CompiledNetwork) -> Self {
        Self {
            groups: network
                .groups()
                .iter()
                .map(|g| GroupSpikes {
                    name: g.name.clone(),
                    size: g.size,
                    spikes: Vec::new(),
                    counts: vec![0; g.size],
                })
                .collect(),
            steps: 0,
        }
    }

    pub fn group(&self, id: GroupId) -> Option<&GroupSpikes> {
        self.groups.get(id.0)
    }

    pub fn groups(&self) -> &[GroupSpikes] {
        &self.groups
    }

    /// Recorded duration (ms)
    pub fn duration_ms(&self) -> Time {
        self.steps as f64 * 1000.0 / STEPS_PER_SECOND as f64
    }

    pub fn spike_count(&self, id: GroupId) -> u64 {
        self.group(id).map(|g| g.counts.iter().sum()).unwrap_or(0)
    }

    /// Mean firing rate over the group's neurons (Hz)
    pub fn pop_mean_firing_rate(&self, id: GroupId) -> f64 {
        let duration_s = self.duration_ms() / 1000.0;
        match self.group(id) {
            Some(g) if duration_s > 0.0 => self.spike_count(id) as f64 / g.size as f64 / duration_s,
            _ => 0.0,
        }
    }

    /// Firing rate of every neuron in the group (Hz)
    pub fn neuron_firing_rates(&self, id: GroupId) -> Vec<f64> {
        let duration_s = self.duration_ms() / 1000.0;
        match self.group(id) {
            Some(g) if duration_s > 0.0 => g.counts.iter().map(|&c| c as f64 / duration_s).collect(),
            Some(g) => vec![0.0; g.size],
            None => Vec::new(),
        }
    }

    pub fn clear(&mut self) {
        for g in &mut self.groups {
            g.spikes.clear();
            g.counts.iter_mut().for_each(|c| *c = 0);
        }
        self.steps = 0;
    }
}

impl SimulationObserver for SpikeMonitor {
    fn on_spike(&mut self, event: &SpikeEvent) {
        if let Some(g) = self.groups.get_mut(event.group.0) {
            g.spikes.push((event.index, event.time));
            if let Some(c) = g.counts.get_mut(event.index) {
                *c += 1;
            }
        }
    }

    fn on_timestep_end(&mut self, _timestep: Timestep) {
        self.steps += 1;
    }
}

// ============================================================================
// VOLTAGE
// ============================================================================

/// Voltage trace per neuron, keyed by global index
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VoltageRecorder {
    traces: BTreeMap<usize, TimeSeries>,
    /// Restrict recording to these neurons; empty records everything
    filter: Vec<usize>,
}

impl VoltageRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record only the neurons of one group
    pub fn for_group(network: &CompiledNetwork, id: GroupId) -> Self {
        let filter = network
            .group(id)
            .map(|g| g.range().collect())
            .unwrap_or_default();
        Self {
            traces: BTreeMap::new(),
            filter,
        }
    }

    pub fn trace(&self, neuron: usize) -> Option<&TimeSeries> {
        self.traces.get(&neuron)
    }

    pub fn traces(&self) -> impl Iterator<Item = (usize, &TimeSeries)> {
        self.traces.iter().map(|(i, ts)| (*i, ts))
    }

    pub fn is_empty(&self) -> bool {
        self.traces.is_empty()
    }

    /// Largest pointwise difference against another recording of the same
    /// neurons, `None` if the recordings do not line up.
    pub fn max_deviation(&self, other: &VoltageRecorder) -> Option<f64> {
        if self.traces.len() != other.traces.len() {
            return None;
        }
        let mut worst: f64 = 0.0;
        for (neuron, trace) in &self.traces {
            let d = trace.max_abs_difference(other.traces.get(neuron)?)?;
            worst = worst.max(d);
        }
        Some(worst)
    }
}

impl SimulationObserver for VoltageRecorder {
    fn on_voltage(&mut self, sample: &VoltageSample) {
        if !self.filter.is_empty() && self.filter.binary_search(&sample.neuron).is_err() {
            return;
        }
        self.traces
            .entry(sample.neuron)
            .or_insert_with(|| TimeSeries::with_units(&format!("v[{}]", sample.neuron), "mV"))
            .push(sample.time, sample.v);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::NetworkBuilder;
    use crate::neuron::NeuronType;
    use dendrite_core::EngineConfig;

    fn network() -> CompiledNetwork {
        let mut b = NetworkBuilder::new(EngineConfig::default()).unwrap();
        b.create_group("a", 2, NeuronType::Excitatory).unwrap();
        b.create_group("b", 4, NeuronType::Excitatory).unwrap();
        b.build().unwrap()
    }

    fn spike(group: usize, index: usize, time: Time) -> SpikeEvent {
        SpikeEvent {
            neuron: index,
            group: GroupId(group),
            index,
            timestep: time as u64,
            microstep: Some(0),
            time,
        }
    }

    #[test]
    fn test_pop_mean_firing_rate() {
        let mut monitor = SpikeMonitor::new(&network());
        for t in 0..500 {
            monitor.on_timestep_end(t);
        }
        monitor.on_spike(&spike(0, 0, 1.0));
        monitor.on_spike(&spike(0, 0, 2.0));
        monitor.on_spike(&spike(0, 1, 3.0));
        // 3 spikes / 2 neurons / 0.5 s
        assert_eq!(monitor.pop_mean_firing_rate(GroupId(0)), 3.0);
        assert_eq!(monitor.neuron_firing_rates(GroupId(0)), vec![4.0, 2.0]);
        assert_eq!(monitor.pop_mean_firing_rate(GroupId(1)), 0.0);
        assert_eq!(monitor.spike_count(GroupId(0)), 3);

        monitor.clear();
        assert_eq!(monitor.spike_count(GroupId(0)), 0);
        assert_eq!(monitor.pop_mean_firing_rate(GroupId(0)), 0.0);
    }

    #[test]
    fn test_voltage_recorder_filter_and_deviation() {
        let net = network();
        let mut all = VoltageRecorder::new();
        let mut only_b = VoltageRecorder::for_group(&net, GroupId(1));
        for neuron in 0..6 {
            let sample = VoltageSample {
                neuron,
                group: net.group_of(neuron).id,
                index: neuron,
                time: 1.0,
                v: -60.0 + neuron as f64,
                u: 0.0,
            };
            all.on_voltage(&sample);
            only_b.on_voltage(&sample);
        }
        assert_eq!(all.traces().count(), 6);
        assert_eq!(only_b.traces().count(), 4);
        assert!(only_b.trace(0).is_none());
        assert_eq!(all.max_deviation(&all.clone()), Some(0.0));
        assert_eq!(all.max_deviation(&only_b), None);
    }
}
