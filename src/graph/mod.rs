//! graph
//!
//! In-memory snapshot of the tracked branch graph.
//!
//! # Architecture
//!
//! The graph is a forest rooted at trunk: nodes live in an arena, a
//! name-to-slot index resolves lookups, and a reverse adjacency map (built
//! once at load) serves child queries. Back-references are name lookups,
//! not ownership edges.
//!
//! # Ordering contract
//!
//! Every traversal is deterministic: children are visited in lexicographic
//! order on tie, parents before children for [`BranchGraph::upstack`],
//! nearest-first for [`BranchGraph::downstack`] (reverse it for bottom-up
//! execution).

use std::collections::HashMap;

use thiserror::Error;

use crate::core::types::{BranchName, Oid};
use crate::state::{ChangeBinding, Store};

/// Errors from graph construction and queries.
#[derive(Debug, Error)]
pub enum GraphError {
    /// The base relation loops; the store is corrupt. Fatal.
    #[error("cycle detected through branch '{0}'")]
    Cycle(BranchName),

    /// A base names neither trunk nor a tracked branch. Fatal.
    #[error("branch '{branch}' has dangling base '{base}'")]
    DanglingBase { branch: BranchName, base: BranchName },

    /// The requested branch is not in the graph.
    #[error("branch not tracked: {0}")]
    UnknownBranch(BranchName),
}

/// A tracked branch with its recorded relationships.
#[derive(Debug, Clone)]
pub struct BranchNode {
    /// Branch name.
    pub name: BranchName,
    /// Parent branch (trunk or another tracked branch).
    pub base: BranchName,
    /// Commit the base pointed at when this branch was last rebased.
    pub base_hash: Oid,
    /// Branch name used when pushing, if it differs from the local name.
    pub upstream_branch: Option<BranchName>,
    /// Forge change bound to the branch.
    pub change: Option<ChangeBinding>,
}

/// Source of branch nodes for graph construction.
///
/// The store implements this; tests hand the graph a synthetic list.
pub trait BranchLoader {
    /// The trunk branch name.
    fn trunk(&self) -> BranchName;

    /// All tracked branch nodes.
    fn load_branches(&self) -> Vec<BranchNode>;
}

impl BranchLoader for Store<'_> {
    fn trunk(&self) -> BranchName {
        Store::trunk(self).clone()
    }

    fn load_branches(&self) -> Vec<BranchNode> {
        self.list_branches()
            .map(|(name, record)| BranchNode {
                name: name.clone(),
                base: record.base.clone(),
                base_hash: record.base_hash.clone(),
                upstream_branch: record.upstream_branch.clone(),
                change: record.change.clone(),
            })
            .collect()
    }
}

/// The branch graph: a transient projection of the store plus trunk.
#[derive(Debug)]
pub struct BranchGraph {
    trunk: BranchName,
    nodes: Vec<BranchNode>,
    index: HashMap<BranchName, usize>,
    children: HashMap<BranchName, Vec<BranchName>>,
}

impl BranchGraph {
    /// Build the graph from a loader, verifying structural invariants.
    ///
    /// # Errors
    ///
    /// - [`GraphError::Cycle`] when the base relation loops
    /// - [`GraphError::DanglingBase`] when a base is neither trunk nor
    ///   tracked
    pub fn load(loader: &impl BranchLoader) -> Result<Self, GraphError> {
        let trunk = loader.trunk();
        let nodes = loader.load_branches();

        let mut index = HashMap::with_capacity(nodes.len());
        for (i, node) in nodes.iter().enumerate() {
            index.insert(node.name.clone(), i);
        }

        let mut children: HashMap<BranchName, Vec<BranchName>> = HashMap::new();
        for node in &nodes {
            if node.base != trunk && !index.contains_key(&node.base) {
                return Err(GraphError::DanglingBase {
                    branch: node.name.clone(),
                    base: node.base.clone(),
                });
            }
            children
                .entry(node.base.clone())
                .or_default()
                .push(node.name.clone());
        }
        for siblings in children.values_mut() {
            siblings.sort();
        }

        let graph = Self {
            trunk,
            nodes,
            index,
            children,
        };
        graph.check_acyclic()?;
        Ok(graph)
    }

    fn check_acyclic(&self) -> Result<(), GraphError> {
        // A well-formed base chain reaches trunk within |nodes| steps;
        // anything longer must revisit a branch.
        for start in self.nodes.iter() {
            let mut current = Some(start);
            let mut steps = 0usize;
            while let Some(node) = current {
                steps += 1;
                if steps > self.nodes.len() {
                    return Err(GraphError::Cycle(start.name.clone()));
                }
                current = self.node(&node.base);
            }
        }
        Ok(())
    }

    fn node(&self, name: &BranchName) -> Option<&BranchNode> {
        self.index.get(name).map(|&i| &self.nodes[i])
    }

    /// The trunk branch name.
    pub fn trunk(&self) -> &BranchName {
        &self.trunk
    }

    /// Look up a tracked branch.
    pub fn lookup(&self, name: &BranchName) -> Result<&BranchNode, GraphError> {
        self.node(name)
            .ok_or_else(|| GraphError::UnknownBranch(name.clone()))
    }

    /// Whether the branch is tracked.
    pub fn contains(&self, name: &BranchName) -> bool {
        self.index.contains_key(name)
    }

    /// All tracked branches, lexicographic.
    pub fn branches(&self) -> Vec<&BranchName> {
        let mut names: Vec<_> = self.nodes.iter().map(|n| &n.name).collect();
        names.sort();
        names
    }

    /// Direct children of a branch (or of trunk), lexicographic.
    pub fn children(&self, name: &BranchName) -> &[BranchName] {
        self.children.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The branch itself followed by its ancestors, nearest parent first,
    /// walking `base` until trunk. Trunk is excluded.
    ///
    /// Reverse the result for bottom-up execution order.
    pub fn downstack(&self, name: &BranchName) -> Result<Vec<BranchName>, GraphError> {
        let mut result = Vec::new();
        let mut current = self.lookup(name)?;
        loop {
            result.push(current.name.clone());
            if current.base == self.trunk {
                break;
            }
            current = self.lookup(&current.base)?;
        }
        Ok(result)
    }

    /// The branch and all its descendants, parents before children,
    /// children visited in lexicographic order on tie.
    pub fn upstack(&self, name: &BranchName) -> Result<Vec<BranchName>, GraphError> {
        self.lookup(name)?;
        let mut result = Vec::new();
        // Explicit queue keeps siblings in lexicographic order while still
        // emitting every parent before its children.
        let mut queue = std::collections::VecDeque::new();
        queue.push_back(name.clone());
        while let Some(current) = queue.pop_front() {
            for child in self.children(&current) {
                queue.push_back(child.clone());
            }
            result.push(current);
        }
        Ok(result)
    }

    /// Descendants of a branch, excluding the branch itself.
    pub fn upstack_exclusive(&self, name: &BranchName) -> Result<Vec<BranchName>, GraphError> {
        let mut result = self.upstack(name)?;
        result.remove(0);
        Ok(result)
    }

    /// The full stack through a branch: its downstack bottom-up, then its
    /// descendants. Parents always precede children.
    pub fn stack(&self, name: &BranchName) -> Result<Vec<BranchName>, GraphError> {
        let mut below = self.downstack(name)?;
        below.reverse();
        below.pop(); // drop `name` itself; upstack re-adds it first
        below.extend(self.upstack(name)?);
        Ok(below)
    }

    /// The lowest non-trunk ancestor of a branch (the stack's bottom).
    pub fn bottom(&self, name: &BranchName) -> Result<BranchName, GraphError> {
        let downstack = self.downstack(name)?;
        Ok(downstack
            .last()
            .cloned()
            .expect("downstack always contains the branch itself"))
    }
}
