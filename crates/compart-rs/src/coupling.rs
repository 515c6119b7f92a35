//! Compartment coupling graph.
//!
//! Compartments are global neuron indices. Each edge joins a child to its
//! parent; current flows both ways with separate conductances:
//!
//! ```text
//! I_child  += g_up   * (v_parent - v_child)
//! I_parent += g_down * (v_child  - v_parent)
//! ```
//!
//! The graph must be a forest. Currents are always evaluated against one
//! frozen voltage snapshot so the result does not depend on update order.

use dendrite_core::{Conductance, Current, DendriteError, Result, StateVector};
use serde::{Deserialize, Serialize};

/// Neighbour limit per compartment (one parent plus children).
pub const MAX_COMPARTMENT_NEIGHBORS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CouplingEdge {
    pub child: usize,
    pub parent: usize,
    /// Conductance for current flowing into the child
    pub g_up: Conductance,
    /// Conductance for current flowing into the parent
    pub g_down: Conductance,
}

impl CouplingEdge {
    pub fn new(child: usize, parent: usize, g_up: Conductance, g_down: Conductance) -> Self {
        Self {
            child,
            parent,
            g_up,
            g_down,
        }
    }
}

/// Arena-indexed coupling forest with a flattened neighbour table
#[derive(Debug, Clone, Default)]
pub struct CouplingGraph {
    compartments: usize,
    edges: Vec<CouplingEdge>,
    parent: Vec<Option<usize>>,
    offsets: Vec<usize>,
    neighbors: Vec<(usize, Conductance)>,
}

impl CouplingGraph {
    /// Graph with no coupling at all
    pub fn uncoupled(compartments: usize) -> Self {
        Self {
            compartments,
            edges: Vec::new(),
            parent: vec![None; compartments],
            offsets: vec![0; compartments + 1],
            neighbors: Vec::new(),
        }
    }

    pub fn new(compartments: usize, edges: Vec<CouplingEdge>) -> Result<Self> {
        let mut parent = vec![None; compartments];
        let mut up: Vec<Conductance> = vec![0.0; compartments];
        let mut lists: Vec<Vec<(usize, Conductance)>> = vec![Vec::new(); compartments];

        for edge in &edges {
            if edge.child >= compartments || edge.parent >= compartments {
                return Err(DendriteError::config(format!(
                    "coupling edge {} -> {} references a compartment outside 0..{}",
                    edge.child, edge.parent, compartments
                )));
            }
            if edge.child == edge.parent {
                return Err(DendriteError::config(format!(
                    "compartment {} cannot be coupled to itself",
                    edge.child
                )));
            }
            for (name, g) in [("g_up", edge.g_up), ("g_down", edge.g_down)] {
                if !(g.is_finite() && g >= 0.0) {
                    return Err(DendriteError::config(format!(
                        "{} of edge {} -> {} must be finite and non-negative, got {}",
                        name, edge.child, edge.parent, g
                    )));
                }
            }
            if let Some(existing) = parent[edge.child] {
                return Err(DendriteError::config(format!(
                    "compartment {} already has parent {}, cannot also couple to {}",
                    edge.child, existing, edge.parent
                )));
            }
            parent[edge.child] = Some(edge.parent);
            up[edge.child] = edge.g_up;
        }

        if let Some(compartment) = find_cycle(&parent) {
            return Err(DendriteError::CouplingCycle { compartment });
        }

        // Parent link first, then children in declaration order.
        for (child, p) in parent.iter().enumerate() {
            if let Some(p) = *p {
                lists[child].push((p, up[child]));
            }
        }
        for edge in &edges {
            lists[edge.parent].push((edge.child, edge.g_down));
        }

        let mut offsets = Vec::with_capacity(compartments + 1);
        let mut neighbors = Vec::with_capacity(edges.len() * 2);
        offsets.push(0);
        for (index, list) in lists.into_iter().enumerate() {
            if list.len() > MAX_COMPARTMENT_NEIGHBORS {
                return Err(DendriteError::config(format!(
                    "compartment {} has {} coupled neighbours, at most {} allowed",
                    index,
                    list.len(),
                    MAX_COMPARTMENT_NEIGHBORS
                )));
            }
            neighbors.extend(list);
            offsets.push(neighbors.len());
        }

        Ok(Self {
            compartments,
            edges,
            parent,
            offsets,
            neighbors,
        })
    }

    pub fn compartments(&self) -> usize {
        self.compartments
    }

    pub fn edges(&self) -> &[CouplingEdge] {
        &self.edges
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    pub fn parent(&self, compartment: usize) -> Option<usize> {
        self.parent.get(compartment).copied().flatten()
    }

    /// `(neighbour, conductance)` pairs for one compartment
    pub fn neighbors(&self, compartment: usize) -> &[(usize, Conductance)] {
        &self.neighbors[self.offsets[compartment]..self.offsets[compartment + 1]]
    }

    /// Compartments without a parent
    pub fn roots(&self) -> impl Iterator<Item = usize> + '_ {
        self.parent
            .iter()
            .enumerate()
            .filter(|(_, p)| p.is_none())
            .map(|(i, _)| i)
    }

    /// Total coupling current into `compartment` for the voltage snapshot `v`.
    #[inline]
    pub fn current_into(&self, compartment: usize, v: &StateVector) -> Current {
        let v_self = v[compartment];
        self.neighbors(compartment)
            .iter()
            .fold(0.0, |acc, &(other, g)| acc + g * (v[other] - v_self))
    }
}

/// Returns a compartment lying on a cycle of parent links, if any.
fn find_cycle(parent: &[Option<usize>]) -> Option<usize> {
    const UNSEEN: u8 = 0;
    const ON_PATH: u8 = 1;
    const DONE: u8 = 2;

    let mut mark = vec![UNSEEN; parent.len()];
    let mut path = Vec::new();

    for start in 0..parent.len() {
        let mut node = Some(start);
        while let Some(n) = node {
            match mark[n] {
                DONE => break,
                ON_PATH => return Some(n),
                _ => {
                    mark[n] = ON_PATH;
                    path.push(n);
                    node = parent[n];
                }
            }
        }
        for n in path.drain(..) {
            mark[n] = DONE;
        }
    }
    None
}
