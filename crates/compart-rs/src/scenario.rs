//! Four-compartment pyramidal cell.
//!
//! Soma `s` and dendrites `d1`, `d2`, `d3`, each a group of `N` neurons,
//! coupled `d2 -> d1 -> s -> d3`. A silent generator group feeds the soma
//! through zero-weight one-to-one synapses and a constant current of 600 pA
//! drives the soma only.

use dendrite_core::{BackendKind, EngineConfig, Result};

use crate::blueprint::{
    CompartmentLink, ConnectionBlueprint, ExternalCurrent, GroupBlueprint, InputBlueprint,
    InputSpec, NetworkBlueprint,
};
use crate::network::{CompartmentParams, Connectivity, SynapseSpec};
use crate::neuron::{IzhikevichParams, NeuronType};
use crate::simulation::Simulation;

pub const SOMA: &str = "soma";
pub const DEND1: &str = "dend1";
pub const DEND2: &str = "dend2";
pub const DEND3: &str = "dend3";
pub const INPUT: &str = "input";

/// Compartment groups in creation order
pub const COMPARTMENTS: [&str; 4] = [SOMA, DEND1, DEND2, DEND3];

pub fn soma_params() -> IzhikevichParams {
    IzhikevichParams::new(
        550.0, 2.3330991, -59.101414, -50.428886, 0.0021014998, -0.41361538, 24.98698, -53.223213, 109.0,
    )
}

pub fn dend1_params() -> IzhikevichParams {
    IzhikevichParams::new(
        367.0, 1.1705916, -59.101414, -44.298294, 0.2477681, 3.3198094, 20.274296, -46.076824, 24.0,
    )
}

pub fn dend2_params() -> IzhikevichParams {
    IzhikevichParams::new(
        425.0, 2.2577047, -59.101414, -25.137894, 0.32122386, 0.14995363, 13.203414, -38.54892, 69.0,
    )
}

pub fn dend3_params() -> IzhikevichParams {
    IzhikevichParams::new(
        225.0, 1.109572, -59.101414, -36.55802, 0.29814243, -4.385603, 21.473854, -40.343994, 21.0,
    )
}

/// `(coupling_up, coupling_down)` per compartment
fn coupling(name: &str) -> CompartmentParams {
    let (coupling_up, coupling_down) = match name {
        SOMA => (116.861, 4.60),
        DEND1 => (28.396, 5.526),
        DEND2 => (50.474, 0.0),
        _ => (0.0, 49.14),
    };
    CompartmentParams {
        coupling_up,
        coupling_down,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PyramidalScenario {
    pub config: EngineConfig,
    pub neurons_per_group: usize,
    /// pA into the soma
    pub soma_current: f64,
    /// Generator to soma weight
    pub input_weight: f64,
    /// Poisson rate of the generator group (Hz)
    pub input_rate_hz: f64,
    /// With `false` every coupling conductance is zero
    pub coupled: bool,
}

impl Default for PyramidalScenario {
    fn default() -> Self {
        Self {
            config: EngineConfig::default(),
            neurons_per_group: 5,
            soma_current: 600.0,
            input_weight: 0.0,
            input_rate_hz: 0.0,
            coupled: true,
        }
    }
}

impl PyramidalScenario {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn with_coupling(mut self, coupled: bool) -> Self {
        self.coupled = coupled;
        self
    }

    pub fn with_soma_current(mut self, current: f64) -> Self {
        self.soma_current = current;
        self
    }

    pub fn blueprint(&self) -> NetworkBlueprint {
        let n = self.neurons_per_group;
        let compartment = |name: &str, params: IzhikevichParams| GroupBlueprint {
            name: name.to_string(),
            size: n,
            neuron_type: NeuronType::Excitatory,
            generator: false,
            params: Some(params),
            compartment: Some(if self.coupled {
                coupling(name)
            } else {
                CompartmentParams::default()
            }),
            refractory_ms: 0.0,
        };
        let link = |lower: &str, upper: &str| CompartmentLink {
            lower: lower.to_string(),
            upper: upper.to_string(),
        };

        NetworkBlueprint {
            config: self.config.clone(),
            groups: vec![
                compartment(SOMA, soma_params()),
                compartment(DEND1, dend1_params()),
                compartment(DEND2, dend2_params()),
                compartment(DEND3, dend3_params()),
                GroupBlueprint {
                    name: INPUT.to_string(),
                    size: n,
                    neuron_type: NeuronType::Excitatory,
                    generator: true,
                    params: None,
                    compartment: None,
                    refractory_ms: 0.0,
                },
            ],
            compartments: vec![link(DEND2, DEND1), link(DEND1, SOMA), link(SOMA, DEND3)],
            connections: vec![ConnectionBlueprint {
                pre: INPUT.to_string(),
                post: SOMA.to_string(),
                rule: Connectivity::OneToOne,
                synapse: SynapseSpec::new(self.input_weight, 1),
            }],
            external_currents: vec![ExternalCurrent {
                group: SOMA.to_string(),
                current: self.soma_current,
            }],
            inputs: vec![InputBlueprint {
                group: INPUT.to_string(),
                source: InputSpec::Poisson {
                    rate_hz: self.input_rate_hz,
                    seed: None,
                },
            }],
        }
    }

    pub fn build(&self, backend: BackendKind) -> Result<Simulation> {
        self.blueprint().build(backend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::compare_backends;
    use crate::monitor::{SpikeMonitor, VoltageRecorder};
    use crate::network::NetworkBuilder;
    use dendrite_core::{ConductanceMode, VoltageSampling};

    fn scenario(substeps: u32, coba: bool) -> PyramidalScenario {
        let mut config = EngineConfig::default().with_substeps(substeps);
        if coba {
            config = config.with_conductance(ConductanceMode::coba());
        }
        PyramidalScenario::new(config)
    }

    /// Per-group rates after one simulated second
    fn rates(scenario: &PyramidalScenario, backend: BackendKind) -> Vec<f64> {
        let mut sim = scenario.build(backend).unwrap();
        let mut monitor = SpikeMonitor::new(sim.network());
        sim.run_network_with(1, 0, &mut monitor).unwrap();
        COMPARTMENTS
            .iter()
            .map(|name| monitor.pop_mean_firing_rate(sim.network().group_id(name).unwrap()))
            .collect()
    }

    #[test]
    fn test_topology() {
        let sim = PyramidalScenario::default().build(BackendKind::Sequential).unwrap();
        let net = sim.network();
        assert_eq!(net.neuron_count(), 25);
        // soma neuron 0: parent d3 (index 15), child d1 (index 5)
        assert_eq!(net.coupling().parent(0), Some(15));
        assert_eq!(net.coupling().neighbors(0), &[(15, 49.14), (5, 28.396)]);
        // d1 neuron 5: parent soma, child d2
        assert_eq!(net.coupling().neighbors(5), &[(0, 4.60), (10, 50.474)]);
        assert_eq!(net.coupling().roots().filter(|&r| r < 20).count(), 5);
    }

    #[test]
    fn test_soma_fires() {
        let rates = rates(&PyramidalScenario::default(), BackendKind::Sequential);
        assert!(rates[0] > 0.0, "soma rate {}", rates[0]);
    }

    #[test]
    fn test_backends_agree_cuba() {
        for substeps in [10, 20, 30, 40] {
            let s = scenario(substeps, false);
            let report = compare_backends(|kind| s.build(kind), 1, 0).unwrap();
            assert!(report.is_equivalent(), "substeps {}: {:?}", substeps, report);
            assert_eq!(report.sequential.groups, report.parallel.groups);
        }
    }

    #[test]
    fn test_backends_agree_coba() {
        for substeps in [10, 20, 30, 40] {
            let s = scenario(substeps, true);
            let report = compare_backends(|kind| s.build(kind), 1, 0).unwrap();
            assert!(report.is_equivalent(), "substeps {}: {:?}", substeps, report);
        }
    }

    #[test]
    fn test_backends_agree_on_voltages() {
        let mut s = scenario(10, false);
        s.config = s.config.with_voltage_sampling(VoltageSampling::PerMicrostep);
        let report = compare_backends(|kind| s.build(kind), 0, 200).unwrap();
        assert_eq!(report.max_voltage_deviation, Some(0.0));
    }

    #[test]
    fn test_deterministic_on_same_backend() {
        let s = PyramidalScenario::default();
        let run = || {
            let mut sim = s.build(BackendKind::Sequential).unwrap();
            let mut monitor = SpikeMonitor::new(sim.network());
            sim.run_network_with(1, 0, &mut monitor).unwrap();
            monitor.groups().to_vec()
        };
        let first = run();
        let second = run();
        for (a, b) in first.iter().zip(&second) {
            assert_eq!(a.spikes, b.spikes, "group {}", a.name);
        }
    }

    #[test]
    fn test_zero_coupling_matches_isolated_soma() {
        let config = EngineConfig::default().with_voltage_sampling(VoltageSampling::PerTimestep);

        let uncoupled = PyramidalScenario::new(config.clone()).with_coupling(false);
        let mut sim = uncoupled.build(BackendKind::Sequential).unwrap();
        let soma = sim.network().group_id(SOMA).unwrap();
        let mut traces = VoltageRecorder::for_group(sim.network(), soma);
        sim.run_network_with(1, 0, &mut traces).unwrap();

        let mut b = NetworkBuilder::new(config).unwrap();
        let alone = b.create_group(SOMA, 5, NeuronType::Excitatory).unwrap();
        b.set_neuron_parameters(alone, soma_params()).unwrap();
        let mut reference = Simulation::new(b.build().unwrap(), BackendKind::Sequential);
        reference.set_external_current(alone, 600.0).unwrap();
        let mut reference_traces = VoltageRecorder::new();
        reference.run_network_with(1, 0, &mut reference_traces).unwrap();

        assert_eq!(traces.max_deviation(&reference_traces), Some(0.0));
        assert_eq!(
            sim.group_spike_count(soma).unwrap(),
            reference.group_spike_count(alone).unwrap()
        );
        assert!(reference.group_spike_count(alone).unwrap() > 0);
    }

    #[test]
    fn test_cuba_and_coba_agree_without_synaptic_drive() {
        for substeps in [10, 40] {
            let cuba = rates(&scenario(substeps, false), BackendKind::Sequential);
            let coba = rates(&scenario(substeps, true), BackendKind::Sequential);
            assert_eq!(cuba, coba, "substeps {}", substeps);
        }
    }

    #[test]
    fn test_substep_refinement_converges() {
        let soma: Vec<f64> = [10, 20, 30, 40]
            .iter()
            .map(|&s| rates(&scenario(s, false), BackendKind::Sequential)[0])
            .collect();
        let max = soma.iter().cloned().fold(f64::MIN, f64::max);
        let min = soma.iter().cloned().fold(f64::MAX, f64::min);
        assert!(min > 0.0, "{:?}", soma);
        assert!(max - min <= 0.25 * max + 2.0, "{:?}", soma);
    }

    #[test]
    fn test_zero_input_baseline_is_silent() {
        for coupled in [false, true] {
            let s = PyramidalScenario::default()
                .with_soma_current(0.0)
                .with_coupling(coupled);
            let rates = rates(&s, BackendKind::Sequential);
            assert!(rates.iter().all(|&r| r == 0.0), "coupled {}: {:?}", coupled, rates);
        }
    }

    #[test]
    fn test_blueprint_serializes() {
        let blueprint = PyramidalScenario::default().blueprint();
        let text = blueprint.to_json().unwrap();
        assert!(text.contains("\"dend3\""));
        assert_eq!(NetworkBlueprint::from_json(&text).unwrap().groups.len(), 5);
    }
}
