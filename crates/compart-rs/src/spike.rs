//! Threshold detection and spike events.

use dendrite_core::{DendriteError, Result, StateVector, Time, Timestep};
use serde::{Deserialize, Serialize};

use crate::network::{CompiledNetwork, GroupId};

/// A spike emitted by one neuron
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpikeEvent {
    /// Global neuron index
    pub neuron: usize,
    pub group: GroupId,
    /// Index within the group
    pub index: usize,
    pub timestep: Timestep,
    /// Micro-step of the crossing, `None` for generator spikes
    pub microstep: Option<u32>,
    /// Simulated time (ms)
    pub time: Time,
}

/// Scans a candidate micro-step state for divergence and threshold crossings.
///
/// Nothing is committed here. On divergence the caller keeps its previous
/// state untouched.
#[derive(Debug, Clone, Default)]
pub struct SpikeDetector {
    fired: Vec<usize>,
}

impl SpikeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Neurons that crossed in the last scan, in index order
    pub fn fired(&self) -> &[usize] {
        &self.fired
    }

    pub fn scan(
        &mut self,
        network: &CompiledNetwork,
        next_v: &StateVector,
        next_u: &StateVector,
        timestep: Timestep,
        microstep: u32,
    ) -> Result<()> {
        self.fired.clear();

        for (i, (&v, &u)) in next_v.iter().zip(next_u.iter()).enumerate() {
            if !network.is_dynamic(i) {
                continue;
            }
            if !(v.is_finite() && u.is_finite()) {
                let group = network.group_of(i);
                return Err(DendriteError::NumericDivergence {
                    neuron: i,
                    group: group.name.clone(),
                    timestep,
                    microstep,
                    v,
                    u,
                });
            }
            if network.params(i).crossed(v) {
                self.fired.push(i);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::NetworkBuilder;
    use crate::neuron::NeuronType;
    use dendrite_core::EngineConfig;
    use ndarray::{array, Array1};

    fn network() -> CompiledNetwork {
        let mut builder = NetworkBuilder::new(EngineConfig::default()).unwrap();
        builder.create_group("exc", 3, NeuronType::Excitatory).unwrap();
        builder
            .create_spike_generator_group("gen", 1, NeuronType::Excitatory)
            .unwrap();
        builder.build().unwrap()
    }

    #[test]
    fn test_detects_crossings_in_order() {
        let net = network();
        let mut detector = SpikeDetector::new();
        // regular spiking peak is 35 mV; the generator is never reported
        detector
            .scan(&net, &array![40.0, -60.0, 35.0, 99.0], &Array1::zeros(4), 0, 0)
            .unwrap();
        assert_eq!(detector.fired(), &[0, 2]);
    }

    #[test]
    fn test_divergence_reported() {
        let net = network();
        let mut detector = SpikeDetector::new();
        let err = detector
            .scan(&net, &array![-60.0, f64::NAN, -60.0, 0.0], &Array1::zeros(4), 7, 3)
            .unwrap_err();
        match err {
            DendriteError::NumericDivergence {
                neuron,
                group,
                timestep,
                microstep,
                ..
            } => {
                assert_eq!(neuron, 1);
                assert_eq!(group, "exc");
                assert_eq!(timestep, 7);
                assert_eq!(microstep, 3);
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn test_infinite_recovery_is_divergence() {
        let net = network();
        let mut detector = SpikeDetector::new();
        let v = Array1::from_elem(4, -60.0);
        let u = array![0.0, 0.0, f64::INFINITY, 0.0];
        let result = detector.scan(&net, &v, &u, 0, 0);
        assert!(result.is_err());
    }
}
