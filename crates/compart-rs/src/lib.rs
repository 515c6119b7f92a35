//! # Dendrite Compart: Multi-Compartment Izhikevich Engine
//!
//! Networks of Izhikevich 9-parameter neurons whose compartments are coupled
//! resistively into trees (soma plus dendrites), driven by external currents,
//! spike generators and delayed synapses.
//!
//! This crate provides:
//! - Network construction with groups, compartment coupling and synapses
//! - Euler and coupled-system RK4 integration with configurable sub-stepping
//! - Current-based and conductance-based (AMPA/NMDA/GABAa/GABAb) synapses
//! - Interchangeable sequential and parallel execution backends
//! - Spike monitors, voltage recorders and a cross-backend equivalence harness
//!
//! ```no_run
//! use dendrite_compart::{PyramidalScenario, compare_backends};
//!
//! let scenario = PyramidalScenario::default();
//! let report = compare_backends(|kind| scenario.build(kind), 1, 0)?;
//! assert!(report.is_equivalent());
//! # Ok::<(), dendrite_core::DendriteError>(())
//! ```

pub mod backend;
pub mod blueprint;
pub mod conductance;
pub mod coupling;
pub mod harness;
pub mod input;
pub mod integrator;
pub mod monitor;
pub mod network;
pub mod neuron;
pub mod scenario;
pub mod simulation;
pub mod spike;
pub mod synapse;

pub use backend::{create_backend, ExecutionBackend, ParallelBackend, SequentialBackend};
pub use blueprint::NetworkBlueprint;
pub use coupling::{CouplingEdge, CouplingGraph};
pub use harness::{compare_backends, rates_match, EquivalenceReport, RATE_TOLERANCE};
pub use input::{InputSource, PoissonSource, ScheduledSpikes};
pub use monitor::{NullObserver, SimulationObserver, SpikeMonitor, VoltageRecorder, VoltageSample};
pub use network::{CompiledNetwork, Connectivity, GroupId, NetworkBuilder, SynapseSpec};
pub use neuron::{IzhikevichParams, NeuronType};
pub use scenario::PyramidalScenario;
pub use simulation::{RunSummary, Simulation};
pub use spike::SpikeEvent;
