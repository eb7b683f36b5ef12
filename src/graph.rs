//! Dependency graphs and the traversal shared by every walker.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::convert::Infallible;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Result, UnresolvedDependency};
use crate::platform::BinaryFormat;

/// Traversal state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Unvisited,
    Visiting,
    Resolved,
}

/// Nodes and `A requires B` edges discovered from a root file.
///
/// Nodes are normalized absolute paths; inserting one twice is a no-op.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyGraph {
    nodes: BTreeSet<PathBuf>,
    edges: BTreeMap<PathBuf, BTreeSet<PathBuf>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: &Path) -> bool {
        self.nodes.insert(node.to_path_buf())
    }

    pub fn add_edge(&mut self, from: &Path, to: &Path) {
        self.add_node(from);
        self.add_node(to);
        self.edges
            .entry(from.to_path_buf())
            .or_default()
            .insert(to.to_path_buf());
    }

    pub fn contains(&self, node: &Path) -> bool {
        self.nodes.contains(node)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Path> {
        self.nodes.iter().map(PathBuf::as_path)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.values().map(BTreeSet::len).sum()
    }

    /// Direct dependencies recorded for `node`.
    pub fn dependencies_of(&self, node: &Path) -> impl Iterator<Item = &Path> {
        self.edges
            .get(node)
            .into_iter()
            .flat_map(|deps| deps.iter().map(PathBuf::as_path))
    }

    /// The subgraph reachable from `root` through nodes accepted by `keep`.
    ///
    /// `root` is always part of the result, even if it has no recorded edges.
    pub fn reachable_from<F>(&self, root: &Path, keep: F) -> DependencyGraph
    where
        F: Fn(&Path) -> bool,
    {
        let expand = |node: &Path| -> Result<Vec<PathBuf>, Infallible> {
            Ok(self
                .dependencies_of(node)
                .filter(|dep| keep(dep))
                .map(Path::to_path_buf)
                .collect())
        };
        match traverse(root, expand) {
            Ok(graph) => graph,
            Err(never) => match never {},
        }
    }
}

/// Walk from `root`, calling `expand` exactly once per reachable node.
///
/// Runs the `Unvisited -> Visiting -> Resolved` state machine over an
/// explicit FIFO work queue, so cycles and deep chains terminate without
/// recursion. `expand` returns the direct dependencies of a node; an error
/// aborts the whole walk.
pub fn traverse<E, F>(root: &Path, mut expand: F) -> Result<DependencyGraph, E>
where
    F: FnMut(&Path) -> Result<Vec<PathBuf>, E>,
{
    let mut graph = DependencyGraph::new();
    let mut states: BTreeMap<PathBuf, NodeState> = BTreeMap::new();
    let mut queue = VecDeque::new();

    graph.add_node(root);
    states.insert(root.to_path_buf(), NodeState::Unvisited);
    queue.push_back(root.to_path_buf());

    while let Some(node) = queue.pop_front() {
        states.insert(node.clone(), NodeState::Visiting);
        debug!(node = %node.display(), "visiting");

        for dep in expand(&node)? {
            graph.add_edge(&node, &dep);
            if !states.contains_key(&dep) {
                states.insert(dep.clone(), NodeState::Unvisited);
                queue.push_back(dep);
            }
        }

        states.insert(node, NodeState::Resolved);
    }

    debug_assert!(states.values().all(|s| *s == NodeState::Resolved));
    Ok(graph)
}

/// Output of one resolution pass.
#[derive(Debug, Clone)]
pub struct ResolutionResult {
    pub format: BinaryFormat,
    pub root: PathBuf,
    pub graph: DependencyGraph,
    /// Declared dependencies that were skipped under [`UnresolvedPolicy::Warn`](crate::UnresolvedPolicy::Warn).
    pub unresolved: Vec<UnresolvedDependency>,
}

impl ResolutionResult {
    /// Every file of the closure, root included, in path order.
    pub fn files(&self) -> impl Iterator<Item = &Path> {
        self.graph.nodes()
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.graph.contains(path)
    }
}
