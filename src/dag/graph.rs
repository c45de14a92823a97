// src/dag/graph.rs

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::fmt;
use std::sync::Arc;

use petgraph::algo::has_path_connecting;
use petgraph::graph::{DiGraph, NodeIndex};
use tracing::{debug, warn};

use crate::errors::GraphError;
use crate::exec::TaskAction;
use crate::fingerprint::PropertySpec;
use crate::types::{EdgeKind, TaskId};

/// A unit of work in the build graph.
#[derive(Clone)]
pub struct TaskNode {
    pub id: TaskId,
    pub inputs: Vec<PropertySpec>,
    pub outputs: Vec<PropertySpec>,
    pub action: Arc<dyn TaskAction>,
    /// Whether results may be stored in and restored from the build cache.
    pub cacheable: bool,
    /// `false` means the node must run alone.
    pub parallel: bool,
}

impl TaskNode {
    pub fn new(id: impl Into<TaskId>, action: Arc<dyn TaskAction>) -> Self {
        Self {
            id: id.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            action,
            cacheable: false,
            parallel: true,
        }
    }

    pub fn input(mut self, spec: PropertySpec) -> Self {
        self.inputs.push(spec);
        self
    }

    pub fn output(mut self, spec: PropertySpec) -> Self {
        self.outputs.push(spec);
        self
    }

    pub fn cacheable(mut self, cacheable: bool) -> Self {
        self.cacheable = cacheable;
        self
    }

    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }
}

impl fmt::Debug for TaskNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskNode")
            .field("id", &self.id)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .field("action", &self.action.identity())
            .field("cacheable", &self.cacheable)
            .field("parallel", &self.parallel)
            .finish()
    }
}

/// An edge as declared by the graph producer: `from <kind> to`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclaredEdge {
    pub from: TaskId,
    pub kind: EdgeKind,
    pub to: TaskId,
}

/// Mutable graph under construction.
#[derive(Debug, Default)]
pub struct TaskGraph {
    nodes: Vec<TaskNode>,
    index: HashMap<TaskId, usize>,
    edges: Vec<DeclaredEdge>,
    entries: Vec<TaskId>,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_task(&mut self, node: TaskNode) -> Result<(), GraphError> {
        if self.index.contains_key(&node.id) {
            return Err(GraphError::DuplicateTask(node.id));
        }
        self.index.insert(node.id.clone(), self.nodes.len());
        self.nodes.push(node);
        Ok(())
    }

    /// Declare `from <kind> to`. Endpoints are checked by [`finalize`](Self::finalize).
    pub fn add_edge(&mut self, from: impl Into<TaskId>, kind: EdgeKind, to: impl Into<TaskId>) {
        self.edges.push(DeclaredEdge {
            from: from.into(),
            kind,
            to: to.into(),
        });
    }

    /// `task` needs `dependency`; the dependency runs first.
    pub fn depends_on(&mut self, task: impl Into<TaskId>, dependency: impl Into<TaskId>) {
        self.add_edge(task, EdgeKind::HardDependency, dependency);
    }

    /// If both run, `other` runs first, and a failure of `other` cancels `task`.
    pub fn must_run_after(&mut self, task: impl Into<TaskId>, other: impl Into<TaskId>) {
        self.add_edge(task, EdgeKind::MustRunAfter, other);
    }

    /// Advisory ordering; dropped if it would close a cycle.
    pub fn should_run_after(&mut self, task: impl Into<TaskId>, other: impl Into<TaskId>) {
        self.add_edge(task, EdgeKind::ShouldRunAfter, other);
    }

    /// `finalizer` runs after `task` whenever `task` runs, even if it fails.
    pub fn finalized_by(&mut self, task: impl Into<TaskId>, finalizer: impl Into<TaskId>) {
        self.add_edge(task, EdgeKind::FinalizedBy, finalizer);
    }

    /// Select an entry task. Without entries every node is part of the run.
    pub fn request(&mut self, task: impl Into<TaskId>) {
        self.entries.push(task.into());
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: &TaskId) -> bool {
        self.index.contains_key(id)
    }

    /// Validate the graph and freeze it for execution.
    pub fn finalize(self) -> Result<FinalizedGraph, GraphError> {
        let TaskGraph {
            nodes,
            index,
            edges,
            entries,
        } = self;

        let lookup = |from: &TaskId, id: &TaskId| {
            index.get(id).copied().ok_or_else(|| GraphError::UnknownTask {
                from: from.clone(),
                to: id.clone(),
            })
        };

        // Ordering edges as (predecessor, successor, kind).
        let mut strict = Vec::new();
        let mut advisory = Vec::new();
        for edge in &edges {
            let from = lookup(&edge.from, &edge.from)?;
            let to = lookup(&edge.from, &edge.to)?;
            match edge.kind {
                EdgeKind::HardDependency | EdgeKind::MustRunAfter => strict.push((to, from, edge.kind)),
                EdgeKind::FinalizedBy => strict.push((from, to, edge.kind)),
                EdgeKind::ShouldRunAfter => advisory.push((to, from)),
            }
        }

        let mut preds: Vec<Vec<(usize, EdgeKind)>> = vec![Vec::new(); nodes.len()];
        let mut succs: Vec<Vec<(usize, EdgeKind)>> = vec![Vec::new(); nodes.len()];
        for &(pred, succ, kind) in &strict {
            preds[succ].push((pred, kind));
            succs[pred].push((succ, kind));
        }

        if let Some(cycle) = find_cycle(&preds) {
            let path = cycle.into_iter().map(|i| nodes[i].id.clone()).collect();
            return Err(GraphError::Cycle { path });
        }

        let mut graph: DiGraph<usize, EdgeKind> = DiGraph::with_capacity(nodes.len(), strict.len());
        for i in 0..nodes.len() {
            graph.add_node(i);
        }
        for &(pred, succ, kind) in &strict {
            graph.add_edge(NodeIndex::new(pred), NodeIndex::new(succ), kind);
        }

        let mut dropped = Vec::new();
        for (pred, succ) in advisory {
            if has_path_connecting(&graph, NodeIndex::new(succ), NodeIndex::new(pred), None) {
                warn!(
                    task = %nodes[succ].id,
                    after = %nodes[pred].id,
                    "dropping should-run-after edge that would introduce a cycle"
                );
                dropped.push((nodes[succ].id.clone(), nodes[pred].id.clone()));
                continue;
            }
            graph.add_edge(NodeIndex::new(pred), NodeIndex::new(succ), EdgeKind::ShouldRunAfter);
            preds[succ].push((pred, EdgeKind::ShouldRunAfter));
            succs[pred].push((succ, EdgeKind::ShouldRunAfter));
        }

        let required = required_set(&nodes, &index, &entries, &preds, &succs)?;
        let topo = topological_order(&preds, &succs);

        debug!(
            tasks = nodes.len(),
            edges = graph.edge_count(),
            required = required.iter().filter(|r| **r).count(),
            dropped = dropped.len(),
            "task graph finalized"
        );

        Ok(FinalizedGraph {
            nodes,
            index,
            preds,
            succs,
            required,
            topo,
            dropped,
        })
    }
}

/// Three-colour DFS over the strict edges, following each node's
/// predecessors in declaration order. Returns the first cycle found as a
/// closed path, e.g. `[a, b, c, a]`.
fn find_cycle(preds: &[Vec<(usize, EdgeKind)>]) -> Option<Vec<usize>> {
    #[derive(Clone, Copy, PartialEq, Eq)]
    enum Colour {
        Unvisited,
        InProgress,
        Done,
    }

    let mut colour = vec![Colour::Unvisited; preds.len()];
    for start in 0..preds.len() {
        if colour[start] != Colour::Unvisited {
            continue;
        }
        // (node, next predecessor to look at)
        let mut stack = vec![(start, 0usize)];
        colour[start] = Colour::InProgress;

        while let Some(top) = stack.last_mut() {
            let (node, next) = *top;
            top.1 += 1;
            if let Some(&(pred, _)) = preds[node].get(next) {
                match colour[pred] {
                    Colour::Unvisited => {
                        colour[pred] = Colour::InProgress;
                        stack.push((pred, 0));
                    }
                    Colour::InProgress => {
                        let pos = stack.iter().position(|(n, _)| *n == pred).unwrap_or(0);
                        let mut cycle: Vec<usize> = stack[pos..].iter().map(|(n, _)| *n).collect();
                        cycle.push(pred);
                        return Some(cycle);
                    }
                    Colour::Done => {}
                }
            } else {
                colour[node] = Colour::Done;
                stack.pop();
            }
        }
    }
    None
}

/// Closure of the entry tasks over hard dependencies and finalizers.
fn required_set(
    nodes: &[TaskNode],
    index: &HashMap<TaskId, usize>,
    entries: &[TaskId],
    preds: &[Vec<(usize, EdgeKind)>],
    succs: &[Vec<(usize, EdgeKind)>],
) -> Result<Vec<bool>, GraphError> {
    if entries.is_empty() {
        return Ok(vec![true; nodes.len()]);
    }

    let mut required = vec![false; nodes.len()];
    let mut stack = Vec::new();
    for entry in entries {
        let i = index
            .get(entry)
            .copied()
            .ok_or_else(|| GraphError::UnknownEntry(entry.clone()))?;
        stack.push(i);
    }

    while let Some(i) = stack.pop() {
        if required[i] {
            continue;
        }
        required[i] = true;
        stack.extend(
            preds[i]
                .iter()
                .filter(|(_, kind)| *kind == EdgeKind::HardDependency)
                .map(|(p, _)| *p),
        );
        stack.extend(
            succs[i]
                .iter()
                .filter(|(_, kind)| *kind == EdgeKind::FinalizedBy)
                .map(|(s, _)| *s),
        );
    }
    Ok(required)
}

/// Kahn's algorithm, always emitting the earliest-declared ready node.
fn topological_order(preds: &[Vec<(usize, EdgeKind)>], succs: &[Vec<(usize, EdgeKind)>]) -> Vec<usize> {
    let mut in_degree: Vec<usize> = preds.iter().map(Vec::len).collect();
    let mut heap: BinaryHeap<Reverse<usize>> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, d)| **d == 0)
        .map(|(i, _)| Reverse(i))
        .collect();

    let mut order = Vec::with_capacity(preds.len());
    while let Some(Reverse(i)) = heap.pop() {
        order.push(i);
        for &(succ, _) in &succs[i] {
            in_degree[succ] -= 1;
            if in_degree[succ] == 0 {
                heap.push(Reverse(succ));
            }
        }
    }
    order
}

/// Immutable, validated task graph.
///
/// Node indices are declaration positions; predecessor and successor lists
/// keep declaration order.
#[derive(Debug)]
pub struct FinalizedGraph {
    nodes: Vec<TaskNode>,
    index: HashMap<TaskId, usize>,
    preds: Vec<Vec<(usize, EdgeKind)>>,
    succs: Vec<Vec<(usize, EdgeKind)>>,
    required: Vec<bool>,
    topo: Vec<usize>,
    dropped: Vec<(TaskId, TaskId)>,
}

impl FinalizedGraph {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, index: usize) -> &TaskNode {
        &self.nodes[index]
    }

    pub fn nodes(&self) -> &[TaskNode] {
        &self.nodes
    }

    pub fn index_of(&self, id: &TaskId) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// Ordering predecessors: nodes that must be terminal before `index` runs.
    pub fn predecessors(&self, index: usize) -> &[(usize, EdgeKind)] {
        &self.preds[index]
    }

    pub fn successors(&self, index: usize) -> &[(usize, EdgeKind)] {
        &self.succs[index]
    }

    /// Whether the node takes part in the run (see [`TaskGraph::request`]).
    pub fn is_required(&self, index: usize) -> bool {
        self.required[index]
    }

    /// Whether `index` finalizes some other node.
    pub fn is_finalizer(&self, index: usize) -> bool {
        self.preds[index]
            .iter()
            .any(|(_, kind)| *kind == EdgeKind::FinalizedBy)
    }

    /// Topological order restricted to the nodes of the run.
    pub fn planned_order(&self) -> Vec<&TaskId> {
        self.topo
            .iter()
            .filter(|i| self.is_required(**i))
            .map(|i| &self.nodes[*i].id)
            .collect()
    }

    /// Should-run-after edges dropped during finalization, as `(task, after)`.
    pub fn dropped_edges(&self) -> &[(TaskId, TaskId)] {
        &self.dropped
    }
}
