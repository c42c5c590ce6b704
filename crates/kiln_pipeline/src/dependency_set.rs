//! The dependency DAG container.

use std::collections::HashMap;

use kiln_common::{Guid, InternalError, KilnResult};

use crate::dependency::{DependencyFlags, DependencyNode};

/// Ordered collection of dependency nodes plus an identifier index.
///
/// Nodes are only ever appended, so indices stay valid for the lifetime of
/// the set and can be stored in other nodes' child lists. Each output
/// identifier maps to at most one node.
#[derive(Debug, Default, Clone)]
pub struct DependencySet {
    nodes: Vec<DependencyNode>,
    index: HashMap<Guid, usize>,
}

impl DependencySet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node, or merges its flags into the existing node with the same
    /// output identifier. Returns the node's index.
    pub fn add(&mut self, node: DependencyNode) -> usize {
        if let Some(&idx) = self.index.get(&node.output_guid) {
            self.nodes[idx].flags |= node.flags;
            return idx;
        }
        let idx = self.nodes.len();
        self.index.insert(node.output_guid, idx);
        self.nodes.push(node);
        idx
    }

    /// Returns the index of the node with the given output identifier.
    pub fn find(&self, guid: Guid) -> Option<usize> {
        self.index.get(&guid).copied()
    }

    /// Returns the node at `idx`.
    pub fn get(&self, idx: usize) -> Option<&DependencyNode> {
        self.nodes.get(idx)
    }

    /// Returns the node at `idx` mutably.
    pub fn get_mut(&mut self, idx: usize) -> Option<&mut DependencyNode> {
        self.nodes.get_mut(idx)
    }

    /// Returns the node with the given output identifier.
    pub fn by_guid(&self, guid: Guid) -> Option<&DependencyNode> {
        self.find(guid).map(|idx| &self.nodes[idx])
    }

    /// Returns the number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns `true` if the set has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Iterates over the nodes in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &DependencyNode> {
        self.nodes.iter()
    }

    /// Merges flags into an existing node.
    pub fn add_flags(&mut self, idx: usize, flags: DependencyFlags) -> KilnResult<()> {
        if idx >= self.nodes.len() {
            return Err(self.out_of_range(idx));
        }
        self.nodes[idx].flags |= flags;
        Ok(())
    }

    /// Links `child` under `parent`.
    ///
    /// Returns `Ok(false)` without linking if the edge already exists, is a
    /// self-edge, or would close a cycle.
    pub fn link(&mut self, parent: usize, child: usize) -> KilnResult<bool> {
        if parent >= self.nodes.len() {
            return Err(self.out_of_range(parent));
        }
        if child >= self.nodes.len() {
            return Err(self.out_of_range(child));
        }
        if parent == child || self.nodes[parent].children.contains(&child) {
            return Ok(false);
        }
        if self.reaches(child, parent) {
            return Ok(false);
        }
        self.nodes[parent].children.push(child);
        Ok(true)
    }

    /// Returns `true` if `to` is reachable from `from` through child edges.
    pub fn reaches(&self, from: usize, to: usize) -> bool {
        let mut seen = vec![false; self.nodes.len()];
        let mut stack = vec![from];
        while let Some(idx) = stack.pop() {
            if idx == to {
                return true;
            }
            if std::mem::replace(&mut seen[idx], true) {
                continue;
            }
            stack.extend(self.nodes[idx].children.iter().copied());
        }
        false
    }

    /// Returns the indices of all nodes reachable from `roots`, roots included.
    pub fn descendants(&self, roots: impl IntoIterator<Item = usize>) -> Vec<bool> {
        let mut seen = vec![false; self.nodes.len()];
        let mut stack: Vec<usize> = roots.into_iter().collect();
        while let Some(idx) = stack.pop() {
            if std::mem::replace(&mut seen[idx], true) {
                continue;
            }
            stack.extend(self.nodes[idx].children.iter().copied());
        }
        seen
    }

    /// Groups node indices into levels so that every child sits in a lower
    /// level than all of its parents. Level 0 holds the leaves.
    pub fn levels(&self) -> KilnResult<Vec<Vec<usize>>> {
        const UNSET: usize = usize::MAX;
        let mut depth = vec![UNSET; self.nodes.len()];
        let mut on_stack = vec![false; self.nodes.len()];

        for root in 0..self.nodes.len() {
            if depth[root] != UNSET {
                continue;
            }
            // Iterative post-order: (node, next child position).
            let mut stack = vec![(root, 0usize)];
            on_stack[root] = true;
            while let Some(top) = stack.len().checked_sub(1) {
                let (idx, pos) = stack[top];
                let children = &self.nodes[idx].children;
                if pos < children.len() {
                    let child = children[pos];
                    stack[top].1 += 1;
                    if child >= self.nodes.len() {
                        return Err(self.out_of_range(child));
                    }
                    if on_stack[child] {
                        return Err(InternalError::Cycle { node: child });
                    }
                    if depth[child] == UNSET {
                        on_stack[child] = true;
                        stack.push((child, 0));
                    }
                    continue;
                }
                depth[idx] = children
                    .iter()
                    .map(|&c| depth[c] + 1)
                    .max()
                    .unwrap_or(0);
                on_stack[idx] = false;
                stack.pop();
            }
        }

        let count = depth.iter().copied().max().map_or(0, |d| d + 1);
        let mut levels = vec![Vec::new(); count];
        for (idx, d) in depth.into_iter().enumerate() {
            levels[d].push(idx);
        }
        Ok(levels)
    }

    fn out_of_range(&self, index: usize) -> InternalError {
        InternalError::NodeOutOfRange {
            index,
            len: self.nodes.len(),
        }
    }
}
