//! Sub-stepped integration of the whole population.
//!
//! One macro-timestep is `S` micro-steps of `h = 1 ms / S`. Each micro-step:
//!
//! 1. input current per neuron from the start-of-micro-step voltages
//!    (coupling, synaptic and external current summed)
//! 2. candidate state `(v', u')` from the Euler or RK4 combination
//! 3. divergence scan and threshold detection on the candidate
//! 4. commit with resets, refractory bookkeeping, conductance decay
//!
//! The input current is held fixed across the RK4 stages. Neighbours and
//! conductances see each other only through committed micro-steps.

use dendrite_core::{EngineConfig, IntegrationMethod, Result, StateVector, Time, Timestep};
use ndarray::Array1;

use crate::backend::ExecutionBackend;
use crate::network::CompiledNetwork;
use crate::spike::SpikeDetector;
use crate::synapse::SynapticAccumulator;

/// Continuous state of every neuron plus refractory counters
#[derive(Debug, Clone, PartialEq)]
pub struct NeuronState {
    pub v: StateVector,
    pub u: StateVector,
    /// Remaining frozen micro-steps
    pub refractory: Vec<u32>,
}

impl NeuronState {
    /// Every integrated neuron at `(vr, 0)`; generators at zero
    pub fn resting(network: &CompiledNetwork) -> Self {
        let n = network.neuron_count();
        let v = Array1::from_shape_fn(n, |i| {
            if network.is_dynamic(i) {
                network.params(i).resting_state().0
            } else {
                0.0
            }
        });
        Self {
            v,
            u: Array1::zeros(n),
            refractory: vec![0; n],
        }
    }

    pub fn len(&self) -> usize {
        self.v.len()
    }

    pub fn is_empty(&self) -> bool {
        self.v.is_empty()
    }
}

#[derive(Debug, Clone)]
struct Columns {
    v: StateVector,
    u: StateVector,
}

impl Columns {
    fn zeros(n: usize) -> Self {
        Self {
            v: Array1::zeros(n),
            u: Array1::zeros(n),
        }
    }
}

#[derive(Debug, Clone)]
struct Scratch {
    k1: Columns,
    k2: Columns,
    k3: Columns,
    k4: Columns,
    probe: Columns,
    next: Columns,
    /// `v`: external plus coupling current, `u`: synaptic current
    drive: Columns,
}

/// Read-only inputs of one derivative evaluation
struct DerivativeInputs<'a> {
    network: &'a CompiledNetwork,
    drive: &'a Columns,
    refractory: &'a [u32],
}

impl DerivativeInputs<'_> {
    #[inline]
    fn eval(&self, v: &StateVector, u: &StateVector, i: usize) -> (f64, f64) {
        if !self.network.is_dynamic(i) || self.refractory[i] > 0 {
            return (0.0, 0.0);
        }
        let input = self.drive.v[i] + self.drive.u[i];
        self.network.params(i).derivatives(v[i], u[i], input)
    }
}

/// Advances a population by whole macro-timesteps
#[derive(Debug, Clone)]
pub struct Integrator {
    method: IntegrationMethod,
    substeps: u32,
    h: Time,
    scratch: Scratch,
}

impl Integrator {
    pub fn new(config: &EngineConfig, neurons: usize) -> Self {
        Self {
            method: config.method,
            substeps: config.substeps,
            h: config.microstep_ms(),
            scratch: Scratch {
                k1: Columns::zeros(neurons),
                k2: Columns::zeros(neurons),
                k3: Columns::zeros(neurons),
                k4: Columns::zeros(neurons),
                probe: Columns::zeros(neurons),
                next: Columns::zeros(neurons),
                drive: Columns::zeros(neurons),
            },
        }
    }

    pub fn method(&self) -> IntegrationMethod {
        self.method
    }

    pub fn substeps(&self) -> u32 {
        self.substeps
    }

    /// Micro-step length (ms)
    pub fn microstep_ms(&self) -> Time {
        self.h
    }

    /// Advance one macro-timestep.
    ///
    /// `on_microstep(microstep, fired, state)` runs after each committed
    /// micro-step. On divergence the error is returned and `state` holds the
    /// last committed micro-step.
    #[allow(clippy::too_many_arguments)]
    pub fn advance_timestep(
        &mut self,
        backend: &dyn ExecutionBackend,
        network: &CompiledNetwork,
        synaptic: &mut SynapticAccumulator,
        external: &StateVector,
        state: &mut NeuronState,
        detector: &mut SpikeDetector,
        timestep: Timestep,
        on_microstep: &mut dyn FnMut(u32, &[usize], &NeuronState),
    ) -> Result<()> {
        for microstep in 0..self.substeps {
            self.candidate(backend, network, synaptic, external, state, microstep);
            let next = &self.scratch.next;
            detector.scan(network, &next.v, &next.u, timestep, microstep)?;

            backend.map_pairs(&mut state.v, &mut state.u, &|i| {
                let (v, u) = (next.v[i], next.u[i]);
                if network.is_dynamic(i) && network.params(i).crossed(v) {
                    network.params(i).reset(u)
                } else {
                    (v, u)
                }
            });

            for counter in state.refractory.iter_mut() {
                *counter = counter.saturating_sub(1);
            }
            for &i in detector.fired() {
                state.refractory[i] = network.refractory_steps(i);
            }
            synaptic.end_microstep();

            on_microstep(microstep, detector.fired(), state);
        }
        Ok(())
    }

    /// Fill `scratch.next` with the integrated but uncommitted state.
    fn candidate(
        &mut self,
        backend: &dyn ExecutionBackend,
        network: &CompiledNetwork,
        synaptic: &SynapticAccumulator,
        external: &StateVector,
        state: &NeuronState,
        microstep: u32,
    ) {
        let h = self.h;
        let (v0, u0) = (&state.v, &state.u);
        let Scratch {
            k1,
            k2,
            k3,
            k4,
            probe,
            next,
            drive,
        } = &mut self.scratch;

        let coupling = network.coupling();
        backend.map_pairs(&mut drive.v, &mut drive.u, &|i| {
            if !network.is_dynamic(i) {
                return (0.0, 0.0);
            }
            (
                external[i] + coupling.current_into(i, v0),
                synaptic.current(i, v0[i], microstep),
            )
        });
        let f = DerivativeInputs {
            network,
            drive: &*drive,
            refractory: &state.refractory,
        };

        backend.map_pairs(&mut k1.v, &mut k1.u, &|i| f.eval(v0, u0, i));

        match self.method {
            IntegrationMethod::Euler => {
                backend.map_pairs(&mut next.v, &mut next.u, &|i| {
                    (v0[i] + h * k1.v[i], u0[i] + h * k1.u[i])
                });
            }
            IntegrationMethod::RungeKutta4 => {
                let half = 0.5 * h;

                backend.map_pairs(&mut probe.v, &mut probe.u, &|i| {
                    (v0[i] + half * k1.v[i], u0[i] + half * k1.u[i])
                });
                backend.map_pairs(&mut k2.v, &mut k2.u, &|i| f.eval(&probe.v, &probe.u, i));

                backend.map_pairs(&mut probe.v, &mut probe.u, &|i| {
                    (v0[i] + half * k2.v[i], u0[i] + half * k2.u[i])
                });
                backend.map_pairs(&mut k3.v, &mut k3.u, &|i| f.eval(&probe.v, &probe.u, i));

                backend.map_pairs(&mut probe.v, &mut probe.u, &|i| {
                    (v0[i] + h * k3.v[i], u0[i] + h * k3.u[i])
                });
                backend.map_pairs(&mut k4.v, &mut k4.u, &|i| f.eval(&probe.v, &probe.u, i));

                let sixth = h / 6.0;
                backend.map_pairs(&mut next.v, &mut next.u, &|i| {
                    (
                        v0[i] + sixth * (k1.v[i] + 2.0 * k2.v[i] + 2.0 * k3.v[i] + k4.v[i]),
                        u0[i] + sixth * (k1.u[i] + 2.0 * k2.u[i] + 2.0 * k3.u[i] + k4.u[i]),
                    )
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ParallelBackend, SequentialBackend};
    use crate::network::NetworkBuilder;
    use crate::neuron::{IzhikevichParams, NeuronType};

    fn single_neuron(config: EngineConfig) -> CompiledNetwork {
        let mut builder = NetworkBuilder::new(config).unwrap();
        builder.create_group("n", 1, NeuronType::Excitatory).unwrap();
        builder.build().unwrap()
    }

    fn advance(
        integrator: &mut Integrator,
        backend: &dyn ExecutionBackend,
        network: &CompiledNetwork,
        external: f64,
        state: &mut NeuronState,
        steps: u64,
    ) -> Result<Vec<(Timestep, u32)>> {
        let external = Array1::from_elem(network.neuron_count(), external);
        advance_with(integrator, backend, network, &external, state, steps)
    }

    fn advance_with(
        integrator: &mut Integrator,
        backend: &dyn ExecutionBackend,
        network: &CompiledNetwork,
        external: &StateVector,
        state: &mut NeuronState,
        steps: u64,
    ) -> Result<Vec<(Timestep, u32)>> {
        let mut synaptic = SynapticAccumulator::new(network.config(), network.neuron_count());
        let mut detector = SpikeDetector::new();
        let mut spikes = Vec::new();
        for t in 0..steps {
            integrator.advance_timestep(
                backend,
                network,
                &mut synaptic,
                external,
                state,
                &mut detector,
                t,
                &mut |micro, fired, _| {
                    spikes.extend(fired.iter().map(|_| (t, micro)));
                },
            )?;
        }
        Ok(spikes)
    }

    #[test]
    fn test_rest_stays_at_rest() {
        let network = single_neuron(EngineConfig::default());
        let mut integrator = Integrator::new(network.config(), 1);
        let mut state = NeuronState::resting(&network);
        let spikes = advance(&mut integrator, &SequentialBackend, &network, 0.0, &mut state, 100).unwrap();
        assert!(spikes.is_empty());
        assert_eq!(state.v[0], IzhikevichParams::regular_spiking().v_rest);
        assert_eq!(state.u[0], 0.0);
    }

    #[test]
    fn test_euler_single_microstep() {
        let config = EngineConfig::default()
            .with_method(IntegrationMethod::Euler)
            .with_substeps(1);
        let network = single_neuron(config);
        let mut integrator = Integrator::new(network.config(), 1);
        let mut state = NeuronState::resting(&network);
        advance(&mut integrator, &SequentialBackend, &network, 100.0, &mut state, 1).unwrap();
        // dv = 100 pA / 100 pF over 1 ms
        assert!((state.v[0] - (-59.0)).abs() < 1e-12);
    }

    #[test]
    fn test_rk4_matches_euler_for_small_steps() {
        let run = |method, substeps| {
            let config = EngineConfig::default().with_method(method).with_substeps(substeps);
            let network = single_neuron(config);
            let mut integrator = Integrator::new(network.config(), 1);
            let mut state = NeuronState::resting(&network);
            advance(&mut integrator, &SequentialBackend, &network, 30.0, &mut state, 20).unwrap();
            state.v[0]
        };
        let rk4 = run(IntegrationMethod::RungeKutta4, 10);
        let euler = run(IntegrationMethod::Euler, 1000);
        assert!((rk4 - euler).abs() < 0.05, "rk4 {} euler {}", rk4, euler);
    }

    fn coupled_pair(substeps: u32) -> CompiledNetwork {
        let config = EngineConfig::default()
            .with_method(IntegrationMethod::RungeKutta4)
            .with_substeps(substeps);
        let mut builder = NetworkBuilder::new(config).unwrap();
        let parent = builder.create_group("parent", 1, NeuronType::Excitatory).unwrap();
        let child = builder.create_group("child", 1, NeuronType::Excitatory).unwrap();
        builder.set_compartment_parameters(parent, 10.0, 10.0).unwrap();
        builder.set_compartment_parameters(child, 10.0, 10.0).unwrap();
        builder.comp_connect(child, parent).unwrap();
        builder.build().unwrap()
    }

    #[test]
    fn test_neighbor_sees_start_of_microstep_voltage() {
        let network = coupled_pair(1);
        let mut integrator = Integrator::new(network.config(), 2);
        let mut state = NeuronState::resting(&network);
        let external = Array1::from_vec(vec![1000.0, 0.0]);
        advance_with(&mut integrator, &SequentialBackend, &network, &external, &mut state, 1).unwrap();
        // both at rest when the micro-step began, so no coupling current yet
        assert_ne!(state.v[0], IzhikevichParams::regular_spiking().v_rest);
        assert_eq!(state.v[1], IzhikevichParams::regular_spiking().v_rest);
        assert_eq!(state.u[1], 0.0);
    }

    #[test]
    fn test_coupling_reaches_neighbor_on_next_microstep() {
        let network = coupled_pair(2);
        let mut integrator = Integrator::new(network.config(), 2);
        let mut state = NeuronState::resting(&network);
        let external = Array1::from_vec(vec![100.0, 0.0]);
        advance_with(&mut integrator, &SequentialBackend, &network, &external, &mut state, 1).unwrap();
        assert!(state.v[1] > IzhikevichParams::regular_spiking().v_rest);
    }

    #[test]
    fn test_driven_neuron_spikes_and_resets() {
        let network = single_neuron(EngineConfig::default());
        let mut integrator = Integrator::new(network.config(), 1);
        let mut state = NeuronState::resting(&network);
        let spikes = advance(&mut integrator, &SequentialBackend, &network, 400.0, &mut state, 200).unwrap();
        assert!(!spikes.is_empty());
        assert!(state.v[0] < IzhikevichParams::regular_spiking().v_peak);
    }

    #[test]
    fn test_backends_agree_exactly() {
        let network = single_neuron(EngineConfig::default());
        let mut seq_state = NeuronState::resting(&network);
        let mut par_state = NeuronState::resting(&network);
        let mut seq = Integrator::new(network.config(), 1);
        let mut par = Integrator::new(network.config(), 1);
        let parallel = ParallelBackend::with_threads(2).unwrap();
        let a = advance(&mut seq, &SequentialBackend, &network, 400.0, &mut seq_state, 300).unwrap();
        let b = advance(&mut par, &parallel, &network, 400.0, &mut par_state, 300).unwrap();
        assert_eq!(a, b);
        assert_eq!(seq_state, par_state);
    }

    #[test]
    fn test_divergence_keeps_last_state() {
        let network = single_neuron(EngineConfig::default());
        let mut integrator = Integrator::new(network.config(), 1);
        let mut state = NeuronState::resting(&network);
        let result = advance(&mut integrator, &SequentialBackend, &network, f64::MAX, &mut state, 1);
        assert!(result.is_err());
        assert!(state.v[0].is_finite());
        assert!(state.u[0].is_finite());
    }
}
