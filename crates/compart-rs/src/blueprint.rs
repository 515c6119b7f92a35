//! JSON network descriptions.
//!
//! ```json
//! {
//!   "config": { "substeps": 10 },
//!   "groups": [
//!     { "name": "soma", "size": 5, "compartment": { "coupling_up": 116.861, "coupling_down": 4.6 } },
//!     { "name": "gin", "size": 5, "generator": true }
//!   ],
//!   "connections": [
//!     { "pre": "gin", "post": "soma", "rule": "one_to_one", "weight": 0.0, "delay": 1 }
//!   ],
//!   "external_currents": [ { "group": "soma", "current": 600.0 } ],
//!   "inputs": [ { "group": "gin", "poisson": { "rate_hz": 0.0 } } ]
//! }
//! ```

use dendrite_core::{BackendKind, EngineConfig, Result, Timestep};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::input::{InputSource, PoissonSource, ScheduledSpikes};
use crate::network::{CompartmentParams, CompiledNetwork, Connectivity, NetworkBuilder, SynapseSpec};
use crate::neuron::{IzhikevichParams, NeuronType};
use crate::simulation::Simulation;

fn excitatory() -> NeuronType {
    NeuronType::Excitatory
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupBlueprint {
    pub name: String,
    pub size: usize,
    #[serde(default = "excitatory")]
    pub neuron_type: NeuronType,
    /// Spike generator instead of an integrated group
    #[serde(default)]
    pub generator: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<IzhikevichParams>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compartment: Option<CompartmentParams>,
    #[serde(default)]
    pub refractory_ms: f64,
}

/// `lower` becomes the child of `upper`, neuron by neuron
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompartmentLink {
    pub lower: String,
    pub upper: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionBlueprint {
    pub pre: String,
    pub post: String,
    pub rule: Connectivity,
    #[serde(flatten)]
    pub synapse: SynapseSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalCurrent {
    pub group: String,
    /// pA, one value for the whole group
    pub current: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputSpec {
    Poisson {
        rate_hz: f64,
        /// Defaults to the engine seed offset by the group position
        #[serde(default)]
        seed: Option<u64>,
    },
    /// `(index, timestep)` pairs
    Scheduled { spikes: Vec<(usize, Timestep)> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputBlueprint {
    pub group: String,
    #[serde(flatten)]
    pub source: InputSpec,
}

/// Complete serializable description of a runnable network
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkBlueprint {
    #[serde(default)]
    pub config: EngineConfig,
    pub groups: Vec<GroupBlueprint>,
    #[serde(default)]
    pub compartments: Vec<CompartmentLink>,
    #[serde(default)]
    pub connections: Vec<ConnectionBlueprint>,
    #[serde(default)]
    pub external_currents: Vec<ExternalCurrent>,
    #[serde(default)]
    pub inputs: Vec<InputBlueprint>,
}

impl NetworkBlueprint {
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Validate and freeze the topology.
    pub fn compile(&self) -> Result<CompiledNetwork> {
        let mut builder = NetworkBuilder::new(self.config.clone())?;

        for group in &self.groups {
            let id = if group.generator {
                builder.create_spike_generator_group(&group.name, group.size, group.neuron_type)?
            } else {
                builder.create_group(&group.name, group.size, group.neuron_type)?
            };
            if let Some(params) = group.params {
                builder.set_neuron_parameters(id, params)?;
            }
            if let Some(c) = group.compartment {
                builder.set_compartment_parameters(id, c.coupling_up, c.coupling_down)?;
            }
            if group.refractory_ms != 0.0 {
                builder.set_refractory(id, group.refractory_ms)?;
            }
        }

        for link in &self.compartments {
            let lower = builder.group_id(&link.lower)?;
            let upper = builder.group_id(&link.upper)?;
            builder.comp_connect(lower, upper)?;
        }

        for conn in &self.connections {
            let pre = builder.group_id(&conn.pre)?;
            let post = builder.group_id(&conn.post)?;
            builder.connect(pre, post, conn.rule, conn.synapse)?;
        }

        builder.build()
    }

    /// Compile, then apply external currents and inputs on a fresh simulation.
    pub fn build(&self, backend: BackendKind) -> Result<Simulation> {
        let network = self.compile()?;
        let seed = network.config().seed;
        let mut sim = Simulation::new(network, backend);

        for current in &self.external_currents {
            let id = sim.network().group_id(&current.group)?;
            sim.set_external_current(id, current.current)?;
        }

        for input in &self.inputs {
            let id = sim.network().group_id(&input.group)?;
            let size = sim.network().group(id)?.size;
            let source: Box<dyn InputSource> = match &input.source {
                InputSpec::Poisson { rate_hz, seed: own } => Box::new(PoissonSource::uniform(
                    size,
                    *rate_hz,
                    own.unwrap_or_else(|| seed.wrapping_add(id.0 as u64)),
                )?),
                InputSpec::Scheduled { spikes } => Box::new(ScheduledSpikes::new(spikes.iter().copied())),
            };
            sim.set_input(id, source)?;
        }

        Ok(sim)
    }
}
