//! Receptor conductances for COBA synapses.
//!
//! Four receptor channels per neuron. Excitatory spikes open AMPA (fast) and
//! NMDA (slow); inhibitory spikes open GABAa (fast) and GABAb (slow). Every
//! channel decays as `g <- g * exp(-h / tau)` after each micro-step.

use dendrite_core::{CobaParams, Conductance, Current, StateVector, Voltage};
use ndarray::Array1;

use crate::neuron::NeuronType;

/// NMDA magnesium block, `((v+80)/60)^2 / (1 + ((v+80)/60)^2)`
#[inline]
pub fn mg_block(v: Voltage) -> f64 {
    let x = ((v + 80.0) / 60.0).powi(2);
    x / (1.0 + x)
}

/// Per-micro-step decay multipliers, fixed for the lifetime of a simulation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecayFactors {
    pub ampa: f64,
    pub nmda: f64,
    pub gabaa: f64,
    pub gabab: f64,
}

impl DecayFactors {
    pub fn new(params: &CobaParams, h: f64) -> Self {
        Self {
            ampa: (-h / params.tau_ampa).exp(),
            nmda: (-h / params.tau_nmda).exp(),
            gabaa: (-h / params.tau_gabaa).exp(),
            gabab: (-h / params.tau_gabab).exp(),
        }
    }
}

/// Conductance columns for the whole population
#[derive(Debug, Clone)]
pub struct ReceptorState {
    pub params: CobaParams,
    pub g_ampa: StateVector,
    pub g_nmda: StateVector,
    pub g_gabaa: StateVector,
    pub g_gabab: StateVector,
    decay: DecayFactors,
}

impl ReceptorState {
    pub fn new(params: CobaParams, n: usize, h: f64) -> Self {
        Self {
            params,
            g_ampa: Array1::zeros(n),
            g_nmda: Array1::zeros(n),
            g_gabaa: Array1::zeros(n),
            g_gabab: Array1::zeros(n),
            decay: DecayFactors::new(&params, h),
        }
    }

    /// Open the fast and slow channels of the receptor family driven by `source`.
    pub fn open(&mut self, post: usize, source: NeuronType, weight: f64, fast: f64, slow: f64) {
        let w = weight.abs();
        match source {
            NeuronType::Excitatory => {
                self.g_ampa[post] += w * fast;
                self.g_nmda[post] += w * slow;
            }
            NeuronType::Inhibitory => {
                self.g_gabaa[post] += w * fast;
                self.g_gabab[post] += w * slow;
            }
        }
    }

    /// Synaptic current into `neuron` at membrane voltage `v`.
    #[inline]
    pub fn current(&self, neuron: usize, v: Voltage) -> Current {
        let p = &self.params;
        -(self.g_ampa[neuron] * (v - p.e_ampa)
            + self.g_nmda[neuron] * mg_block(v) * (v - p.e_nmda)
            + self.g_gabaa[neuron] * (v - p.e_gabaa)
            + self.g_gabab[neuron] * (v - p.e_gabab))
    }

    pub fn decay(&mut self) {
        let d = self.decay;
        self.g_ampa *= d.ampa;
        self.g_nmda *= d.nmda;
        self.g_gabaa *= d.gabaa;
        self.g_gabab *= d.gabab;
    }

    pub fn total(&self, neuron: usize) -> Conductance {
        self.g_ampa[neuron] + self.g_nmda[neuron] + self.g_gabaa[neuron] + self.g_gabab[neuron]
    }
}
