//! Synaptic connections, delay queue and current accumulation.

use dendrite_core::{
    ConductanceMode, CubaDelivery, Current, DendriteError, EngineConfig, Result, StateVector,
    Voltage,
};
use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::conductance::ReceptorState;
use crate::neuron::NeuronType;

// ============================================================================
// CONNECTIONS
// ============================================================================

/// One resolved synapse between two global neuron indices
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Synapse {
    pub pre: usize,
    pub post: usize,
    pub weight: f64,
    /// Axonal delay (macro-steps)
    pub delay: u16,
    /// Receptor family, taken from the source group
    pub source: NeuronType,
    /// AMPA / GABAa scale (COBA)
    pub fast: f64,
    /// NMDA / GABAb scale (COBA)
    pub slow: f64,
}

/// Synapses grouped by presynaptic neuron
#[derive(Debug, Clone, Default)]
pub struct SynapseTable {
    synapses: Vec<Synapse>,
    offsets: Vec<usize>,
}

impl SynapseTable {
    /// Builds the table for `neurons` neurons. Order within one source is preserved.
    pub fn new(neurons: usize, mut synapses: Vec<Synapse>) -> Result<Self> {
        if let Some(bad) = synapses.iter().find(|s| s.pre >= neurons || s.post >= neurons) {
            return Err(DendriteError::config(format!(
                "synapse {} -> {} references a neuron outside 0..{}",
                bad.pre, bad.post, neurons
            )));
        }
        synapses.sort_by_key(|s| s.pre);

        let mut offsets = vec![0; neurons + 1];
        for s in &synapses {
            offsets[s.pre + 1] += 1;
        }
        for i in 0..neurons {
            offsets[i + 1] += offsets[i];
        }
        Ok(Self { synapses, offsets })
    }

    pub fn len(&self) -> usize {
        self.synapses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.synapses.is_empty()
    }

    pub fn get(&self, index: usize) -> &Synapse {
        &self.synapses[index]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Synapse> {
        self.synapses.iter()
    }

    /// Table indices of the synapses leaving `pre`
    pub fn outgoing(&self, pre: usize) -> std::ops::Range<usize> {
        match (self.offsets.get(pre), self.offsets.get(pre + 1)) {
            (Some(&start), Some(&end)) => start..end,
            _ => 0..0,
        }
    }

    pub fn max_delay(&self) -> u16 {
        self.synapses.iter().map(|s| s.delay).max().unwrap_or(0)
    }
}

// ============================================================================
// DELAY QUEUE
// ============================================================================

/// Ring buffer of pending synapse activations keyed by arrival macro-step.
///
/// Slot `head` holds arrivals for the current step. A spike scheduled with
/// delay `D` lands in slot `head + D` and is delivered `D` steps later.
#[derive(Debug, Clone)]
pub struct DelayQueue {
    slots: Vec<Vec<usize>>,
    head: usize,
}

impl DelayQueue {
    pub fn new(max_delay: u16) -> Self {
        Self {
            slots: vec![Vec::new(); max_delay as usize + 1],
            head: 0,
        }
    }

    pub fn max_delay(&self) -> u16 {
        (self.slots.len() - 1) as u16
    }

    pub fn schedule(&mut self, delay: u16, synapse: usize) -> Result<()> {
        if delay == 0 || delay > self.max_delay() {
            return Err(DendriteError::config(format!(
                "delay {} outside 1..={}",
                delay,
                self.max_delay()
            )));
        }
        let slot = (self.head + delay as usize) % self.slots.len();
        self.slots[slot].push(synapse);
        Ok(())
    }

    /// Synapse indices arriving this step
    pub fn due(&self) -> &[usize] {
        &self.slots[self.head]
    }

    /// Clears the current slot (keeping its allocation) and moves to the next step.
    pub fn advance(&mut self) {
        self.slots[self.head].clear();
        self.head = (self.head + 1) % self.slots.len();
    }

    pub fn pending(&self) -> usize {
        self.slots.iter().map(Vec::len).sum()
    }
}

// ============================================================================
// ACCUMULATOR
// ============================================================================

#[derive(Debug, Clone)]
enum SynapticInput {
    Cuba {
        current: StateVector,
        delivery: CubaDelivery,
    },
    Coba(ReceptorState),
}

/// Per-neuron synaptic drive under the configured conductance mode
#[derive(Debug, Clone)]
pub struct SynapticAccumulator {
    input: SynapticInput,
}

impl SynapticAccumulator {
    pub fn new(config: &EngineConfig, n: usize) -> Self {
        let input = match config.conductance {
            ConductanceMode::Cuba => SynapticInput::Cuba {
                current: Array1::zeros(n),
                delivery: config.cuba_delivery,
            },
            ConductanceMode::Coba(params) => {
                SynapticInput::Coba(ReceptorState::new(params, n, config.microstep_ms()))
            }
        };
        Self { input }
    }

    pub fn is_coba(&self) -> bool {
        matches!(self.input, SynapticInput::Coba(_))
    }

    /// Drops last step's CUBA input. Conductances persist and decay instead.
    pub fn begin_timestep(&mut self) {
        if let SynapticInput::Cuba { current, .. } = &mut self.input {
            current.fill(0.0);
        }
    }

    /// Apply one arriving synapse activation. Arrivals sum linearly.
    pub fn receive(&mut self, synapse: &Synapse) {
        match &mut self.input {
            SynapticInput::Cuba { current, .. } => {
                let w = synapse.weight.abs();
                current[synapse.post] += match synapse.source {
                    NeuronType::Excitatory => w,
                    NeuronType::Inhibitory => -w,
                };
            }
            SynapticInput::Coba(receptors) => receptors.open(
                synapse.post,
                synapse.source,
                synapse.weight,
                synapse.fast,
                synapse.slow,
            ),
        }
    }

    /// Synaptic current into `neuron` at voltage `v` during `microstep`.
    #[inline]
    pub fn current(&self, neuron: usize, v: Voltage, microstep: u32) -> Current {
        match &self.input {
            SynapticInput::Cuba { current, delivery } => match delivery {
                CubaDelivery::WholeTimestep => current[neuron],
                CubaDelivery::SingleMicrostep if microstep == 0 => current[neuron],
                CubaDelivery::SingleMicrostep => 0.0,
            },
            SynapticInput::Coba(receptors) => receptors.current(neuron, v),
        }
    }

    /// End-of-micro-step bookkeeping
    pub fn end_microstep(&mut self) {
        if let SynapticInput::Coba(receptors) = &mut self.input {
            receptors.decay();
        }
    }

    pub fn receptors(&self) -> Option<&ReceptorState> {
        match &self.input {
            SynapticInput::Coba(receptors) => Some(receptors),
            SynapticInput::Cuba { .. } => None,
        }
    }
}
