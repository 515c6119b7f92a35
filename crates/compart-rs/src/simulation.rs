//! Simulation driver.
//!
//! Each macro-step `T`:
//!
//! 1. deliver synapse activations due at `T`
//! 2. collect generator spikes for `T`
//! 3. integrate `S` micro-steps (coupling, synaptic, external current)
//! 4. report spikes and voltages, schedule outgoing synapses for `T + delay`

use dendrite_core::{
    BackendKind, DendriteError, Result, StateVector, Time, Timestep, VoltageSampling,
    MACRO_STEP_MS, STEPS_PER_SECOND,
};
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::backend::{create_backend, ExecutionBackend};
use crate::input::InputSource;
use crate::integrator::{Integrator, NeuronState};
use crate::monitor::{NullObserver, SimulationObserver, VoltageSample};
use crate::network::{CompiledNetwork, GroupId, GroupInfo};
use crate::spike::{SpikeDetector, SpikeEvent};
use crate::synapse::{DelayQueue, SynapticAccumulator};

/// Outcome of one `run_network` call
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub backend: BackendKind,
    pub first_timestep: Timestep,
    pub steps: u64,
    pub spikes: u64,
}

pub struct Simulation {
    network: CompiledNetwork,
    backend: Box<dyn ExecutionBackend>,
    integrator: Integrator,
    state: NeuronState,
    synaptic: SynapticAccumulator,
    queue: DelayQueue,
    detector: SpikeDetector,
    external: StateVector,
    inputs: Vec<Option<Box<dyn InputSource>>>,
    timestep: Timestep,
    spike_counts: Vec<u64>,
    last_spike: Vec<Option<Time>>,
    halted_at: Option<Timestep>,
    step_spikes: Vec<SpikeEvent>,
    generated: Vec<usize>,
}

impl Simulation {
    pub fn new(network: CompiledNetwork, backend: BackendKind) -> Self {
        Self::with_backend(network, create_backend(backend))
    }

    pub fn with_backend(network: CompiledNetwork, backend: Box<dyn ExecutionBackend>) -> Self {
        let n = network.neuron_count();
        let config = network.config().clone();
        debug!(
            backend = %backend.kind(),
            threads = backend.threads(),
            neurons = n,
            "simulation created"
        );
        Self {
            integrator: Integrator::new(&config, n),
            state: NeuronState::resting(&network),
            synaptic: SynapticAccumulator::new(&config, n),
            queue: DelayQueue::new(config.max_delay),
            detector: SpikeDetector::new(),
            external: Array1::zeros(n),
            inputs: network.groups().iter().map(|_| None).collect(),
            timestep: 0,
            spike_counts: vec![0; n],
            last_spike: vec![None; n],
            halted_at: None,
            step_spikes: Vec::new(),
            generated: Vec::new(),
            network,
            backend,
        }
    }

    // ========================================================================
    // INPUTS
    // ========================================================================

    fn integrated_group(&self, id: GroupId) -> Result<&GroupInfo> {
        let group = self.network.group(id)?;
        if group.is_generator() {
            return Err(DendriteError::config(format!(
                "'{}' is a spike generator group",
                group.name
            )));
        }
        Ok(group)
    }

    /// Same constant current (pA) into every neuron of `group`
    pub fn set_external_current(&mut self, group: GroupId, current: f64) -> Result<()> {
        let size = self.integrated_group(group)?.size;
        self.set_external_current_per_neuron(group, &vec![current; size])
    }

    pub fn set_external_current_per_neuron(&mut self, group: GroupId, currents: &[f64]) -> Result<()> {
        let range = self.integrated_group(group)?.range();
        if currents.len() != range.len() {
            return Err(DendriteError::config(format!(
                "expected {} currents, got {}",
                range.len(),
                currents.len()
            )));
        }
        if currents.iter().any(|c| !c.is_finite()) {
            return Err(DendriteError::config("external current must be finite"));
        }
        for (i, &c) in range.zip(currents) {
            self.external[i] = c;
        }
        Ok(())
    }

    /// Attach the spike source of a generator group
    pub fn set_input(&mut self, group: GroupId, source: Box<dyn InputSource>) -> Result<()> {
        let info = self.network.group(group)?;
        if !info.is_generator() {
            return Err(DendriteError::config(format!(
                "'{}' is not a spike generator group",
                info.name
            )));
        }
        if let Some(size) = source.size() {
            if size != info.size {
                return Err(DendriteError::config(format!(
                    "input drives {} neurons but '{}' has {}",
                    size, info.name, info.size
                )));
            }
        }
        self.inputs[group.0] = Some(source);
        Ok(())
    }

    // ========================================================================
    // RUN
    // ========================================================================

    /// Advance `seconds * 1000 + millis` macro-steps.
    pub fn run_network(&mut self, seconds: u32, millis: u32) -> Result<RunSummary> {
        self.run_network_with(seconds, millis, &mut NullObserver)
    }

    pub fn run_network_with(
        &mut self,
        seconds: u32,
        millis: u32,
        observer: &mut dyn SimulationObserver,
    ) -> Result<RunSummary> {
        if let Some(timestep) = self.halted_at {
            return Err(DendriteError::Halted { timestep });
        }
        let steps = seconds as u64 * STEPS_PER_SECOND + millis as u64;
        if steps == 0 {
            return Err(DendriteError::config("run duration must be at least one macro-step"));
        }

        let first_timestep = self.timestep;
        let mut spikes = 0;
        for _ in 0..steps {
            spikes += self.step(observer)?;
        }

        debug!(
            backend = %self.backend.kind(),
            first_timestep,
            steps,
            spikes,
            "run complete"
        );
        Ok(RunSummary {
            backend: self.backend.kind(),
            first_timestep,
            steps,
            spikes,
        })
    }

    fn step(&mut self, observer: &mut dyn SimulationObserver) -> Result<u64> {
        let t = self.timestep;
        let step_start = t as f64 * MACRO_STEP_MS;

        self.synaptic.begin_timestep();
        for &index in self.queue.due() {
            self.synaptic.receive(self.network.synapses().get(index));
        }

        self.step_spikes.clear();
        for (group, source) in self.network.groups().iter().zip(self.inputs.iter_mut()) {
            let Some(source) = source else { continue };
            self.generated.clear();
            source.spikes(t, group.size, &mut self.generated);
            self.step_spikes.extend(self.generated.iter().map(|&index| SpikeEvent {
                neuron: group.start + index,
                group: group.id,
                index,
                timestep: t,
                microstep: None,
                time: step_start,
            }));
        }

        let h = self.integrator.microstep_ms();
        let sampling = self.network.config().voltage_sampling;
        let network = &self.network;
        let step_spikes = &mut self.step_spikes;
        let mut on_microstep = |microstep: u32, fired: &[usize], state: &NeuronState| {
            let time = step_start + (microstep + 1) as f64 * h;
            step_spikes.extend(fired.iter().map(|&neuron| {
                let group = network.group_of(neuron);
                SpikeEvent {
                    neuron,
                    group: group.id,
                    index: neuron - group.start,
                    timestep: t,
                    microstep: Some(microstep),
                    time,
                }
            }));
            if sampling == VoltageSampling::PerMicrostep {
                emit_voltages(network, state, time, &mut *observer);
            }
        };

        let advanced = self.integrator.advance_timestep(
            self.backend.as_ref(),
            network,
            &mut self.synaptic,
            &self.external,
            &mut self.state,
            &mut self.detector,
            t,
            &mut on_microstep,
        );
        if let Err(err) = advanced {
            error!(timestep = t, backend = %self.backend.kind(), %err, "simulation halted");
            // micro-steps committed before the divergence still happened
            self.record_spikes(observer);
            self.halted_at = Some(t);
            return Err(err);
        }

        if sampling == VoltageSampling::PerTimestep {
            emit_voltages(&self.network, &self.state, step_start + MACRO_STEP_MS, observer);
        }

        self.record_spikes(observer);
        for event in &self.step_spikes {
            for index in self.network.synapses().outgoing(event.neuron) {
                let delay = self.network.synapses().get(index).delay;
                self.queue.schedule(delay, index)?;
            }
        }

        self.queue.advance();
        self.timestep += 1;
        observer.on_timestep_end(t);
        Ok(self.step_spikes.len() as u64)
    }

    fn record_spikes(&mut self, observer: &mut dyn SimulationObserver) {
        for event in &self.step_spikes {
            self.spike_counts[event.neuron] += 1;
            self.last_spike[event.neuron] = Some(event.time);
            observer.on_spike(event);
        }
    }

    // ========================================================================
    // ACCESSORS
    // ========================================================================

    pub fn network(&self) -> &CompiledNetwork {
        &self.network
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    /// Last committed state; after a divergence, the last valid one.
    ///
    /// Spikes from the micro-steps committed before a divergence are counted
    /// and reported to the observer; nothing from that timestep is scheduled.
    pub fn state(&self) -> &NeuronState {
        &self.state
    }

    /// Macro-steps completed so far
    pub fn timestep(&self) -> Timestep {
        self.timestep
    }

    pub fn is_halted(&self) -> bool {
        self.halted_at.is_some()
    }

    pub fn spike_counts(&self) -> &[u64] {
        &self.spike_counts
    }

    pub fn last_spike_time(&self, neuron: usize) -> Option<Time> {
        self.last_spike.get(neuron).copied().flatten()
    }

    pub fn group_spike_count(&self, group: GroupId) -> Result<u64> {
        let range = self.network.group(group)?.range();
        Ok(self.spike_counts[range].iter().sum())
    }

    /// Mean rate (Hz) of `group` since the start of the simulation
    pub fn group_firing_rate(&self, group: GroupId) -> Result<f64> {
        let size = self.network.group(group)?.size;
        let count = self.group_spike_count(group)?;
        if self.timestep == 0 {
            return Ok(0.0);
        }
        let seconds = self.timestep as f64 / STEPS_PER_SECOND as f64;
        Ok(count as f64 / size as f64 / seconds)
    }

    pub fn voltages(&self, group: GroupId) -> Result<Vec<f64>> {
        let range = self.network.group(group)?.range();
        Ok(range.map(|i| self.state.v[i]).collect())
    }

    pub fn pending_synaptic_events(&self) -> usize {
        self.queue.pending()
    }
}

fn emit_voltages(
    network: &CompiledNetwork,
    state: &NeuronState,
    time: Time,
    observer: &mut dyn SimulationObserver,
) {
    for group in network.groups().iter().filter(|g| !g.is_generator()) {
        for neuron in group.range() {
            observer.on_voltage(&VoltageSample {
                neuron,
                group: group.id,
                index: neuron - group.start,
                time,
                v: state.v[neuron],
                u: state.u[neuron],
            });
        }
    }
}
