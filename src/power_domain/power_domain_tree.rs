// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Structures for describing the power domain tree and checking states against it.

use crate::{
    config::{MAX_LEVELS, MAX_POWER_DOMAINS, PowerDomainConfig},
    error::PowerError,
    power_state::{CompositeState, PowerState, StateMask},
};
use arrayvec::ArrayVec;
use core::{
    fmt::{self, Debug, Formatter},
    ops::Range,
};
use log::error;

/// Identifies a node of the power domain tree by its index in the configuration table.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct NodeId(pub usize);

/// Where a node is in a state transition.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TransitionPhase {
    /// No transition in flight.
    Idle,
    /// Checking with the driver whether the transition may happen.
    RequestingHardware,
    /// Waiting for PRE transition subscribers to respond.
    AwaitingPreTransitionResponses,
    /// Asking the driver to change the hardware state.
    Committing,
    /// Waiting for the driver to report the new state, which is then broadcast to POST transition
    /// subscribers.
    AwaitingPostTransitionBroadcast,
}

/// A node of the power domain tree.
#[derive(Debug)]
pub struct PowerDomainNode {
    config: PowerDomainConfig,
    /// Parent node, or None for the root.
    parent: Option<NodeId>,
    /// Indices of the child nodes.
    children: Range<usize>,
    /// The last state reported by the driver.
    current_state: PowerState,
    /// The state the node should move to once its parent and children allow it.
    requested_state: PowerState,
    phase: TransitionPhase,
}

impl PowerDomainNode {
    fn new(config: PowerDomainConfig, parent: Option<NodeId>) -> Self {
        Self {
            config,
            parent,
            children: 0..0,
            current_state: PowerState::Off,
            requested_state: PowerState::Off,
            phase: TransitionPhase::Idle,
        }
    }

    /// Assigns child node index incrementally.
    fn assign_child(&mut self, index: usize) {
        if self.children.is_empty() {
            self.children = index..index + 1;
        } else {
            debug_assert_eq!(self.children.end, index);
            self.children.end += 1;
        }
    }

    /// Returns the static configuration of the node.
    pub fn config(&self) -> &PowerDomainConfig {
        &self.config
    }

    /// Returns the name of the node.
    pub fn name(&self) -> &'static str {
        self.config.name
    }

    /// Returns the level of the node in the tree, with cores at level 0.
    pub fn level(&self) -> usize {
        self.config.tree_position.level()
    }

    /// Returns the parent of the node.
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Returns the last state the driver reported.
    pub fn current_state(&self) -> PowerState {
        self.current_state
    }

    /// Returns the state the node has been asked to move to.
    pub fn requested_state(&self) -> PowerState {
        self.requested_state
    }

    /// Returns where the node is in a transition.
    pub fn phase(&self) -> TransitionPhase {
        self.phase
    }

    /// Returns whether a transition is in flight for the node.
    pub fn is_busy(&self) -> bool {
        self.phase != TransitionPhase::Idle
    }

    pub(super) fn set_current_state(&mut self, state: PowerState) {
        self.current_state = state;
    }

    pub(super) fn set_requested_state(&mut self, state: PowerState) {
        self.requested_state = state;
    }

    pub(super) fn set_phase(&mut self, phase: TransitionPhase) {
        self.phase = phase;
    }

    /// Returns every state the node may ever be in.
    pub fn valid_states(&self) -> StateMask {
        StateMask::union_of(self.config.allowed_state_mask_table)
    }

    /// Returns whether the node may be in `state` while its parent is in `parent_state`.
    ///
    /// A node without a parent may be in any valid state.
    pub fn allows(&self, parent_state: Option<PowerState>, state: PowerState) -> bool {
        match parent_state {
            Some(parent_state) => self
                .config
                .allowed_state_mask_table
                .get(parent_state.index())
                .is_some_and(|mask| mask.allows(state)),
            None => self.valid_states().allows(state),
        }
    }
}

/// The power domain tree, stored in configuration order.
///
/// The configuration is sorted by tree position, so every node comes after its children and the
/// root is last.
pub struct PowerDomainTree {
    nodes: ArrayVec<PowerDomainNode, MAX_POWER_DOMAINS>,
}

impl PowerDomainTree {
    /// Builds the tree from a configuration table sorted by tree position.
    pub fn new(configs: &[PowerDomainConfig]) -> Result<Self, PowerError> {
        if configs.is_empty() || configs.len() > MAX_POWER_DOMAINS {
            error!("Invalid power domain count {}", configs.len());
            return Err(PowerError::InvalidParam);
        }

        let mut nodes = ArrayVec::new();
        for (index, config) in configs.iter().enumerate() {
            if index > 0 && configs[index - 1].tree_position >= config.tree_position {
                error!("{}: power domains are not sorted by tree position", config.name);
                return Err(PowerError::InvalidParam);
            }
            if config.allowed_state_mask_table.is_empty() {
                error!("{}: empty allowed state table", config.name);
                return Err(PowerError::InvalidParam);
            }

            let parent = config.tree_position.parent().and_then(|position| {
                configs
                    .binary_search_by_key(&position, |config| config.tree_position)
                    .ok()
                    .map(NodeId)
            });
            if parent.is_none() && index != configs.len() - 1 {
                error!("{}: parent not found", config.name);
                return Err(PowerError::InvalidParam);
            }
            nodes.push(PowerDomainNode::new(*config, parent));
        }

        for index in 0..nodes.len() {
            if let Some(NodeId(parent)) = nodes[index].parent {
                nodes[parent].assign_child(index);
            }
        }

        Ok(Self { nodes })
    }

    /// Returns the number of nodes in the tree.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns whether the tree has no nodes. A successfully built tree is never empty.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns the ids of all nodes, children before parents.
    pub fn ids(&self) -> impl Iterator<Item = NodeId> + use<> {
        (0..self.nodes.len()).map(NodeId)
    }

    /// Returns the root of the tree.
    pub fn root(&self) -> NodeId {
        NodeId(self.nodes.len() - 1)
    }

    /// Returns the node with the given id.
    pub fn node(&self, id: NodeId) -> Result<&PowerDomainNode, PowerError> {
        self.nodes.get(id.0).ok_or(PowerError::InvalidParam)
    }

    /// Returns the node with the given id mutably.
    pub fn node_mut(&mut self, id: NodeId) -> Result<&mut PowerDomainNode, PowerError> {
        self.nodes.get_mut(id.0).ok_or(PowerError::InvalidParam)
    }

    /// Returns the children of a node.
    pub fn children(&self, id: NodeId) -> impl Iterator<Item = NodeId> + use<> {
        let children = self
            .nodes
            .get(id.0)
            .map_or(0..0, |node| node.children.clone());
        children.map(NodeId)
    }

    /// Returns a node and its ancestors, lowest level first, up to and including `max_level`.
    pub fn chain(&self, id: NodeId, max_level: usize) -> ArrayVec<NodeId, MAX_LEVELS> {
        let mut chain = ArrayVec::new();
        let mut next = Some(id);
        while let Some(id) = next {
            let Ok(node) = self.node(id) else {
                break;
            };
            if node.level() > max_level || chain.is_full() {
                break;
            }
            chain.push(id);
            next = node.parent;
        }
        chain
    }

    /// Returns whether `state` is allowed for a node given its parent's current state.
    pub fn is_allowed_by_parent(&self, id: NodeId, state: PowerState) -> bool {
        let Ok(node) = self.node(id) else {
            return false;
        };
        let parent_state = node.parent.map(|parent| self.nodes[parent.0].current_state);
        node.allows(parent_state, state)
    }

    /// Returns whether every child of a node may stay in its current state if the node moves to
    /// `state`.
    pub fn is_allowed_by_children(&self, id: NodeId, state: PowerState) -> bool {
        self.children(id).all(|child| {
            let child = &self.nodes[child.0];
            child.allows(Some(state), child.current_state)
        })
    }

    /// Returns whether a node may move to `state` given the current states of its parent and
    /// children.
    pub fn is_allowed(&self, id: NodeId, state: PowerState) -> bool {
        self.is_allowed_by_parent(id, state) && self.is_allowed_by_children(id, state)
    }

    /// Returns whether `state` for a node agrees with the targets of any transitions in flight
    /// for its parent and children.
    pub fn is_allowed_by_transitions(&self, id: NodeId, state: PowerState) -> bool {
        let Ok(node) = self.node(id) else {
            return false;
        };
        if let Some(parent) = node.parent {
            let parent = &self.nodes[parent.0];
            if parent.is_busy() && !node.allows(Some(parent.requested_state), state) {
                return false;
            }
        }
        self.children(id).all(|child| {
            let child = &self.nodes[child.0];
            !child.is_busy() || child.allows(Some(state), child.requested_state)
        })
    }

    /// Checks that a composite state is consistent for `leaf` and its ancestors.
    ///
    /// Every level up to the highest level of the composite must exist above `leaf`, each state
    /// must be valid for its node, and each state must allow the state of the level below. The
    /// highest requested state must also be allowed by the current state of the node above it.
    pub fn validate_composite(
        &self,
        leaf: NodeId,
        composite: &CompositeState,
    ) -> Result<(), PowerError> {
        let highest_level = composite.highest_level();
        let chain = self.chain(leaf, highest_level);
        let top = *chain.last().ok_or(PowerError::InvalidParam)?;
        if self.node(top)?.level() != highest_level {
            return Err(PowerError::InvalidParam);
        }

        let mut child: Option<(&PowerDomainNode, PowerState)> = None;
        for id in &chain {
            let node = &self.nodes[id.0];
            let state = composite
                .state(node.level())
                .ok_or(PowerError::InvalidParam)?;
            if !node.valid_states().allows(state) {
                return Err(PowerError::InvalidParam);
            }
            if let Some((child, child_state)) = child
                && !child.allows(Some(state), child_state)
            {
                return Err(PowerError::InvalidParam);
            }
            child = Some((node, state));
        }

        let (top, top_state) = child.ok_or(PowerError::InvalidParam)?;
        if let Some(parent) = top.parent
            && !top.allows(Some(self.nodes[parent.0].current_state), top_state)
        {
            return Err(PowerError::InvalidParam);
        }
        Ok(())
    }

    /// Returns the current states of a node and all its ancestors.
    pub fn composite_state(&self, id: NodeId) -> Result<CompositeState, PowerError> {
        let mut states = [PowerState::Off; MAX_LEVELS];
        let mut highest_level = self.node(id)?.level();
        for id in self.chain(id, MAX_LEVELS - 1) {
            let node = &self.nodes[id.0];
            highest_level = node.level();
            states[highest_level] = node.current_state;
        }
        CompositeState::new(highest_level, states)
    }
}

impl Debug for PowerDomainTree {
    /// Outputs the tree in Graphviz DOT format.
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        writeln!(f, "digraph {{")?;
        for (index, node) in self.nodes.iter().enumerate() {
            writeln!(
                f,
                "N{index} [label=\"{} {:?}\\n{} ({:?})\"]",
                node.name(),
                node.config.tree_position,
                node.current_state,
                node.phase
            )?;
            if let Some(NodeId(parent)) = node.parent {
                writeln!(f, "N{parent} -> N{index}")?;
            }
        }
        writeln!(f, "}}")
    }
}

/// Tree manipulation for tests in other modules.
#[cfg(test)]
pub mod test_helpers {
    use super::*;

    /// Sets the current and requested state of a node, without checking it against the tree.
    pub fn force_state(tree: &mut PowerDomainTree, id: NodeId, state: PowerState) {
        let node = tree.node_mut(id).unwrap();
        node.set_current_state(state);
        node.set_requested_state(state);
    }
}
