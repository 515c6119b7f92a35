//! Network construction and the immutable snapshot the engine runs on.
//!
//! Groups are laid out contiguously in one global neuron index space in
//! creation order. [`NetworkBuilder::build`] resolves connectivity rules into
//! synapses and compartment links into coupling edges, validates both, and
//! freezes the result into a [`CompiledNetwork`].

use dendrite_core::{Conductance, DendriteError, EngineConfig, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::ops::Range;
use tracing::debug;

use crate::coupling::{CouplingEdge, CouplingGraph};
use crate::neuron::{IzhikevichParams, NeuronType};
use crate::synapse::{Synapse, SynapseTable};

// ============================================================================
// GROUPS
// ============================================================================

/// Handle returned when a group is created
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupId(pub usize);

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How a group's neurons produce spikes
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupKind {
    /// Integrated Izhikevich compartments
    Izhikevich(IzhikevichParams),
    /// Not integrated; spikes come from an input source
    SpikeGenerator,
}

/// Coupling conductances contributed by a compartmental group
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CompartmentParams {
    /// Drives the parent of each neuron in this group
    pub coupling_up: Conductance,
    /// Drives the children of each neuron in this group
    pub coupling_down: Conductance,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupInfo {
    pub id: GroupId,
    pub name: String,
    /// First global neuron index
    pub start: usize,
    pub size: usize,
    pub neuron_type: NeuronType,
    pub kind: GroupKind,
    pub compartment: Option<CompartmentParams>,
    pub refractory_ms: f64,
}

impl GroupInfo {
    pub fn range(&self) -> Range<usize> {
        self.start..self.start + self.size
    }

    pub fn is_generator(&self) -> bool {
        matches!(self.kind, GroupKind::SpikeGenerator)
    }

    pub fn params(&self) -> Option<&IzhikevichParams> {
        match &self.kind {
            GroupKind::Izhikevich(p) => Some(p),
            GroupKind::SpikeGenerator => None,
        }
    }
}

// ============================================================================
// CONNECTIVITY
// ============================================================================

/// Rule mapping presynaptic to postsynaptic indices
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Connectivity {
    /// `i -> i`, groups of equal size
    OneToOne,
    /// Every pair
    Full,
    /// Every pair except `i -> i`
    FullNoDirect,
    /// Each pair independently with `probability` (seeded)
    Random { probability: f64 },
}

fn unit_scale() -> f64 {
    1.0
}

/// Weight, delay and receptor scales shared by every synapse of a connection
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SynapseSpec {
    /// Magnitude; the sign comes from the source group's type
    pub weight: f64,
    /// Macro-steps, `1..=max_delay`
    pub delay: u16,
    #[serde(default = "unit_scale")]
    pub fast: f64,
    #[serde(default = "unit_scale")]
    pub slow: f64,
}

impl SynapseSpec {
    pub fn new(weight: f64, delay: u16) -> Self {
        Self {
            weight,
            delay,
            fast: 1.0,
            slow: 1.0,
        }
    }

    pub fn with_receptor_scales(mut self, fast: f64, slow: f64) -> Self {
        self.fast = fast;
        self.slow = slow;
        self
    }
}

// ============================================================================
// BUILDER
// ============================================================================

/// Mutable network description, consumed by [`build`](NetworkBuilder::build)
#[derive(Debug, Clone)]
pub struct NetworkBuilder {
    config: EngineConfig,
    groups: Vec<GroupInfo>,
    names: HashMap<String, GroupId>,
    comp_links: Vec<(GroupId, GroupId)>,
    synapses: Vec<Synapse>,
    connections: usize,
}

impl NetworkBuilder {
    /// Validates `config`; it is fixed for everything built from here on.
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            groups: Vec::new(),
            names: HashMap::new(),
            comp_links: Vec::new(),
            synapses: Vec::new(),
            connections: 0,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Izhikevich group with regular-spiking parameters until
    /// [`set_neuron_parameters`](Self::set_neuron_parameters) is called.
    pub fn create_group(&mut self, name: &str, size: usize, neuron_type: NeuronType) -> Result<GroupId> {
        self.add_group(
            name,
            size,
            neuron_type,
            GroupKind::Izhikevich(IzhikevichParams::default()),
        )
    }

    pub fn create_spike_generator_group(
        &mut self,
        name: &str,
        size: usize,
        neuron_type: NeuronType,
    ) -> Result<GroupId> {
        self.add_group(name, size, neuron_type, GroupKind::SpikeGenerator)
    }

    fn add_group(&mut self, name: &str, size: usize, neuron_type: NeuronType, kind: GroupKind) -> Result<GroupId> {
        if name.is_empty() {
            return Err(DendriteError::config("group name must not be empty"));
        }
        if size == 0 {
            return Err(DendriteError::config(format!("group '{}' must contain at least one neuron", name)));
        }
        let id = GroupId(self.groups.len());
        let start = self.groups.last().map(|g| g.start + g.size).unwrap_or(0);
        self.groups.push(GroupInfo {
            id,
            name: name.to_string(),
            start,
            size,
            neuron_type,
            kind,
            compartment: None,
            refractory_ms: 0.0,
        });
        self.names.entry(name.to_string()).or_insert(id);
        Ok(id)
    }

    /// First group created under `name`; names need not be unique
    pub fn group_id(&self, name: &str) -> Result<GroupId> {
        self.names
            .get(name)
            .copied()
            .ok_or_else(|| DendriteError::UnknownGroup(name.to_string()))
    }

    pub fn group(&self, id: GroupId) -> Result<&GroupInfo> {
        self.groups
            .get(id.0)
            .ok_or_else(|| DendriteError::UnknownGroup(id.to_string()))
    }

    fn integrated_group_mut(&mut self, id: GroupId) -> Result<&mut GroupInfo> {
        let group = self
            .groups
            .get_mut(id.0)
            .ok_or_else(|| DendriteError::UnknownGroup(id.to_string()))?;
        if group.is_generator() {
            return Err(DendriteError::config(format!(
                "'{}' is a spike generator group",
                group.name
            )));
        }
        Ok(group)
    }

    pub fn set_neuron_parameters(&mut self, id: GroupId, params: IzhikevichParams) -> Result<()> {
        params.validate()?;
        self.integrated_group_mut(id)?.kind = GroupKind::Izhikevich(params);
        Ok(())
    }

    /// Marks a group compartmental with the given coupling conductances.
    pub fn set_compartment_parameters(
        &mut self,
        id: GroupId,
        coupling_up: Conductance,
        coupling_down: Conductance,
    ) -> Result<()> {
        for (name, g) in [("coupling_up", coupling_up), ("coupling_down", coupling_down)] {
            if !(g.is_finite() && g >= 0.0) {
                return Err(DendriteError::config(format!(
                    "{} must be finite and non-negative, got {}",
                    name, g
                )));
            }
        }
        self.integrated_group_mut(id)?.compartment = Some(CompartmentParams {
            coupling_up,
            coupling_down,
        });
        Ok(())
    }

    /// Refractory period in ms, rounded to whole micro-steps
    pub fn set_refractory(&mut self, id: GroupId, ms: f64) -> Result<()> {
        if !(ms.is_finite() && ms >= 0.0) {
            return Err(DendriteError::config(format!(
                "refractory period must be finite and non-negative, got {}",
                ms
            )));
        }
        self.integrated_group_mut(id)?.refractory_ms = ms;
        Ok(())
    }

    /// Couples neuron `i` of `lower` (child) to neuron `i` of `upper` (parent).
    pub fn comp_connect(&mut self, lower: GroupId, upper: GroupId) -> Result<()> {
        if lower == upper {
            return Err(DendriteError::config("a group cannot be coupled to itself"));
        }
        let lower_size = self.integrated_group_mut(lower)?.size;
        let upper_size = self.integrated_group_mut(upper)?.size;
        if lower_size != upper_size {
            return Err(DendriteError::config(format!(
                "coupled groups must have equal size ({} vs {})",
                lower_size, upper_size
            )));
        }
        self.comp_links.push((lower, upper));
        Ok(())
    }

    /// Adds synapses from `pre` to `post`. Returns how many were created.
    pub fn connect(&mut self, pre: GroupId, post: GroupId, rule: Connectivity, spec: SynapseSpec) -> Result<usize> {
        let source = self.group(pre)?.clone();
        let target = self.integrated_group_mut(post)?.clone();

        if !(spec.weight.is_finite() && spec.weight >= 0.0) {
            return Err(DendriteError::config(format!(
                "weight must be finite and non-negative, got {}",
                spec.weight
            )));
        }
        if spec.delay == 0 || spec.delay > self.config.max_delay {
            return Err(DendriteError::config(format!(
                "delay {} outside 1..={}",
                spec.delay, self.config.max_delay
            )));
        }
        if !(spec.fast.is_finite() && spec.fast >= 0.0 && spec.slow.is_finite() && spec.slow >= 0.0) {
            return Err(DendriteError::config("receptor scales must be finite and non-negative"));
        }

        let pairs: Vec<(usize, usize)> = match rule {
            Connectivity::OneToOne => {
                if source.size != target.size {
                    return Err(DendriteError::config(format!(
                        "one-to-one needs equal sizes ({} vs {})",
                        source.size, target.size
                    )));
                }
                (0..source.size).map(|i| (i, i)).collect()
            }
            Connectivity::Full => all_pairs(source.size, target.size).collect(),
            Connectivity::FullNoDirect => all_pairs(source.size, target.size)
                .filter(|(i, j)| i != j)
                .collect(),
            Connectivity::Random { probability } => {
                if !(0.0..=1.0).contains(&probability) {
                    return Err(DendriteError::config(format!(
                        "connection probability must lie in [0, 1], got {}",
                        probability
                    )));
                }
                let mut rng = StdRng::seed_from_u64(self.config.seed.wrapping_add(self.connections as u64));
                all_pairs(source.size, target.size)
                    .filter(|_| rng.gen::<f64>() < probability)
                    .collect()
            }
        };

        let created = pairs.len();
        self.synapses.extend(pairs.into_iter().map(|(i, j)| Synapse {
            pre: source.start + i,
            post: target.start + j,
            weight: spec.weight,
            delay: spec.delay,
            source: source.neuron_type,
            fast: spec.fast,
            slow: spec.slow,
        }));
        self.connections += 1;
        debug!(
            pre = %source.name,
            post = %target.name,
            ?rule,
            synapses = created,
            "connected groups"
        );
        Ok(created)
    }

    /// Freezes the description into an engine snapshot.
    pub fn build(self) -> Result<CompiledNetwork> {
        let neurons: usize = self.groups.iter().map(|g| g.size).sum();
        let h = self.config.microstep_ms();

        let mut params = Vec::with_capacity(neurons);
        let mut dynamic = Vec::with_capacity(neurons);
        let mut refractory_steps = Vec::with_capacity(neurons);
        let mut group_of = Vec::with_capacity(neurons);
        for group in &self.groups {
            let steps = (group.refractory_ms / h).round() as u32;
            for _ in 0..group.size {
                params.push(group.params().copied().unwrap_or_default());
                dynamic.push(!group.is_generator());
                refractory_steps.push(steps);
                group_of.push(group.id.0);
            }
        }

        let mut edges = Vec::new();
        for &(lower, upper) in &self.comp_links {
            let lower = &self.groups[lower.0];
            let upper = &self.groups[upper.0];
            let child_side = lower.compartment.unwrap_or_default();
            let parent_side = upper.compartment.unwrap_or_default();
            for i in 0..lower.size {
                edges.push(CouplingEdge::new(
                    lower.start + i,
                    upper.start + i,
                    parent_side.coupling_down,
                    child_side.coupling_up,
                ));
            }
        }
        let coupling = CouplingGraph::new(neurons, edges)?;
        let synapses = SynapseTable::new(neurons, self.synapses)?;

        debug!(
            groups = self.groups.len(),
            neurons,
            coupling_edges = coupling.edges().len(),
            synapses = synapses.len(),
            substeps = self.config.substeps,
            method = ?self.config.method,
            coba = self.config.conductance.is_coba(),
            "network compiled"
        );

        Ok(CompiledNetwork {
            config: self.config,
            groups: self.groups,
            names: self.names,
            params,
            dynamic,
            refractory_steps,
            group_of,
            coupling,
            synapses,
        })
    }
}

fn all_pairs(pre: usize, post: usize) -> impl Iterator<Item = (usize, usize)> {
    (0..pre).flat_map(move |i| (0..post).map(move |j| (i, j)))
}

// ============================================================================
// SNAPSHOT
// ============================================================================

/// Immutable post-setup network: groups, per-neuron parameters, coupling
/// forest, synapses and configuration.
#[derive(Debug, Clone)]
pub struct CompiledNetwork {
    config: EngineConfig,
    groups: Vec<GroupInfo>,
    names: HashMap<String, GroupId>,
    params: Vec<IzhikevichParams>,
    dynamic: Vec<bool>,
    refractory_steps: Vec<u32>,
    group_of: Vec<usize>,
    coupling: CouplingGraph,
    synapses: SynapseTable,
}

impl CompiledNetwork {
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn neuron_count(&self) -> usize {
        self.params.len()
    }

    pub fn groups(&self) -> &[GroupInfo] {
        &self.groups
    }

    pub fn group(&self, id: GroupId) -> Result<&GroupInfo> {
        self.groups
            .get(id.0)
            .ok_or_else(|| DendriteError::UnknownGroup(id.to_string()))
    }

    /// First group created under `name`; names need not be unique
    pub fn group_id(&self, name: &str) -> Result<GroupId> {
        self.names
            .get(name)
            .copied()
            .ok_or_else(|| DendriteError::UnknownGroup(name.to_string()))
    }

    /// Group owning global neuron `neuron`
    pub fn group_of(&self, neuron: usize) -> &GroupInfo {
        &self.groups[self.group_of[neuron]]
    }

    #[inline]
    pub fn is_dynamic(&self, neuron: usize) -> bool {
        self.dynamic[neuron]
    }

    #[inline]
    pub fn params(&self, neuron: usize) -> &IzhikevichParams {
        &self.params[neuron]
    }

    pub fn refractory_steps(&self, neuron: usize) -> u32 {
        self.refractory_steps[neuron]
    }

    pub fn coupling(&self) -> &CouplingGraph {
        &self.coupling
    }

    pub fn synapses(&self) -> &SynapseTable {
        &self.synapses
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder() -> NetworkBuilder {
        NetworkBuilder::new(EngineConfig::default()).unwrap()
    }

    #[test]
    fn test_groups_are_contiguous() {
        let mut b = builder();
        let a = b.create_group("a", 3, NeuronType::Excitatory).unwrap();
        let g = b.create_spike_generator_group("g", 2, NeuronType::Inhibitory).unwrap();
        let net = b.build().unwrap();
        assert_eq!(net.neuron_count(), 5);
        assert_eq!(net.group(a).unwrap().range(), 0..3);
        assert_eq!(net.group(g).unwrap().range(), 3..5);
        assert_eq!(net.group_of(4).name, "g");
        assert!(net.is_dynamic(2));
        assert!(!net.is_dynamic(3));
        assert_eq!(net.group_id("g").unwrap(), g);
        assert!(matches!(net.group_id("x"), Err(DendriteError::UnknownGroup(_))));
    }

    #[test]
    fn test_invalid_groups_rejected() {
        let mut b = builder();
        b.create_group("a", 1, NeuronType::Excitatory).unwrap();
        assert!(b.create_group("b", 0, NeuronType::Excitatory).is_err());
        assert!(b.create_group("", 1, NeuronType::Excitatory).is_err());
    }

    #[test]
    fn test_shared_group_names_resolve_to_first() {
        let mut b = builder();
        let ids: Vec<GroupId> = (0..4)
            .map(|_| b.create_group("excit", 2, NeuronType::Excitatory).unwrap())
            .collect();
        assert_eq!(ids, vec![GroupId(0), GroupId(1), GroupId(2), GroupId(3)]);
        assert_eq!(b.group_id("excit").unwrap(), GroupId(0));
        let net = b.build().unwrap();
        assert_eq!(net.neuron_count(), 8);
        assert_eq!(net.group(GroupId(3)).unwrap().range(), 6..8);
        assert_eq!(net.group_of(7).name, "excit");
        assert_eq!(net.group_id("excit").unwrap(), GroupId(0));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = EngineConfig::default().with_substeps(0);
        assert!(NetworkBuilder::new(config).is_err());
    }

    #[test]
    fn test_generator_cannot_be_parameterized() {
        let mut b = builder();
        let g = b.create_spike_generator_group("g", 1, NeuronType::Excitatory).unwrap();
        assert!(b.set_neuron_parameters(g, IzhikevichParams::fast_spiking()).is_err());
        assert!(b.set_compartment_parameters(g, 1.0, 1.0).is_err());
        assert!(b.set_refractory(g, 1.0).is_err());
    }

    #[test]
    fn test_comp_connect_edges_use_group_conductances() {
        let mut b = builder();
        let soma = b.create_group("soma", 2, NeuronType::Excitatory).unwrap();
        let dend = b.create_group("dend", 2, NeuronType::Excitatory).unwrap();
        b.set_compartment_parameters(soma, 3.0, 4.0).unwrap();
        b.set_compartment_parameters(dend, 1.0, 2.0).unwrap();
        b.comp_connect(dend, soma).unwrap();
        let net = b.build().unwrap();

        let edges = net.coupling().edges();
        assert_eq!(edges.len(), 2);
        assert_eq!(edges[1], CouplingEdge::new(3, 1, 4.0, 1.0));
        assert_eq!(net.coupling().parent(2), Some(0));
    }

    #[test]
    fn test_comp_connect_rejections() {
        let mut b = builder();
        let a = b.create_group("a", 2, NeuronType::Excitatory).unwrap();
        let c = b.create_group("c", 3, NeuronType::Excitatory).unwrap();
        let g = b.create_spike_generator_group("g", 2, NeuronType::Excitatory).unwrap();
        assert!(b.comp_connect(a, a).is_err());
        assert!(b.comp_connect(a, c).is_err());
        assert!(b.comp_connect(a, g).is_err());
        assert!(b.set_compartment_parameters(a, -1.0, 0.0).is_err());
    }

    #[test]
    fn test_comp_cycle_rejected_at_build() {
        let mut b = builder();
        let x = b.create_group("x", 1, NeuronType::Excitatory).unwrap();
        let y = b.create_group("y", 1, NeuronType::Excitatory).unwrap();
        let z = b.create_group("z", 1, NeuronType::Excitatory).unwrap();
        b.comp_connect(x, y).unwrap();
        b.comp_connect(y, z).unwrap();
        b.comp_connect(z, x).unwrap();
        assert!(matches!(b.build(), Err(DendriteError::CouplingCycle { .. })));
    }

    #[test]
    fn test_second_parent_rejected_at_build() {
        let mut b = builder();
        let x = b.create_group("x", 1, NeuronType::Excitatory).unwrap();
        let y = b.create_group("y", 1, NeuronType::Excitatory).unwrap();
        let z = b.create_group("z", 1, NeuronType::Excitatory).unwrap();
        b.comp_connect(x, y).unwrap();
        b.comp_connect(x, z).unwrap();
        assert!(matches!(b.build(), Err(DendriteError::Configuration(_))));
    }

    #[test]
    fn test_connectivity_rules() {
        let mut b = builder();
        let pre = b.create_group("pre", 3, NeuronType::Inhibitory).unwrap();
        let post = b.create_group("post", 3, NeuronType::Excitatory).unwrap();
        let spec = SynapseSpec::new(1.0, 1);
        assert_eq!(b.connect(pre, post, Connectivity::OneToOne, spec).unwrap(), 3);
        assert_eq!(b.connect(pre, post, Connectivity::Full, spec).unwrap(), 9);
        assert_eq!(b.connect(pre, post, Connectivity::FullNoDirect, spec).unwrap(), 6);
        assert_eq!(b.connect(pre, post, Connectivity::Random { probability: 0.0 }, spec).unwrap(), 0);
        assert_eq!(b.connect(pre, post, Connectivity::Random { probability: 1.0 }, spec).unwrap(), 9);
        let net = b.build().unwrap();
        assert_eq!(net.synapses().len(), 27);
        assert!(net.synapses().iter().all(|s| s.source == NeuronType::Inhibitory));
        assert!(net.synapses().iter().all(|s| s.post >= 3));
    }

    #[test]
    fn test_random_connectivity_is_seeded() {
        let build = || {
            let mut b = builder();
            let pre = b.create_group("pre", 20, NeuronType::Excitatory).unwrap();
            let post = b.create_group("post", 20, NeuronType::Excitatory).unwrap();
            b.connect(pre, post, Connectivity::Random { probability: 0.3 }, SynapseSpec::new(1.0, 2))
                .unwrap();
            let net = b.build().unwrap();
            net.synapses().iter().map(|s| (s.pre, s.post)).collect::<Vec<_>>()
        };
        let first = build();
        assert!(!first.is_empty() && first.len() < 400);
        assert_eq!(first, build());
    }

    #[test]
    fn test_connect_rejections() {
        let mut b = builder();
        let pre = b.create_group("pre", 2, NeuronType::Excitatory).unwrap();
        let post = b.create_group("post", 3, NeuronType::Excitatory).unwrap();
        let g = b.create_spike_generator_group("g", 3, NeuronType::Excitatory).unwrap();
        let ok = SynapseSpec::new(1.0, 1);
        assert!(b.connect(pre, post, Connectivity::OneToOne, ok).is_err());
        assert!(b.connect(pre, g, Connectivity::Full, ok).is_err());
        assert!(b.connect(pre, post, Connectivity::Full, SynapseSpec::new(1.0, 0)).is_err());
        assert!(b.connect(pre, post, Connectivity::Full, SynapseSpec::new(1.0, 21)).is_err());
        assert!(b.connect(pre, post, Connectivity::Full, SynapseSpec::new(-1.0, 1)).is_err());
        assert!(b
            .connect(pre, post, Connectivity::Random { probability: 1.5 }, ok)
            .is_err());
        assert!(b.connect(GroupId(9), post, Connectivity::Full, ok).is_err());
    }

    #[test]
    fn test_refractory_rounds_to_microsteps() {
        let mut b = builder();
        let a = b.create_group("a", 1, NeuronType::Excitatory).unwrap();
        b.set_refractory(a, 2.0).unwrap();
        let net = b.build().unwrap();
        assert_eq!(net.refractory_steps(0), 20);
    }
}
