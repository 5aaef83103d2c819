//! Demand-driven graph evaluation with memoization and reset propagation
//!
//! Each node is either Uncomputed or Computed, and Computed is exactly
//! "holds a cache entry". `final_compute` pulls a node's producers on demand
//! and computes each node at most once per generation; a reset clears the
//! affected entries and eagerly recomputes downstream in topological order,
//! so re-converging diamond paths see fresh producers exactly once.

use crate::cache::StageHandleCache;
use crate::engine::{StageHandle, UsdEngine};
use crate::graph::NodeGraph;
use crate::hooks::HostHooks;
use crate::kinds::{self, EvalContext};
use crate::node::NodeId;
use crate::port::PortId;
use log::{debug, warn};
use std::cell::Cell;
use std::collections::HashSet;
use std::rc::Rc;

/// Evaluation state of a node within the current generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// No cache entry; the next demand computes the node
    Uncomputed,
    /// Cache entry present; demands return it without recomputing
    Computed,
}

/// Restores the reset-in-progress flag on every exit path, including panics
struct ResetGuard {
    flag: Rc<Cell<bool>>,
    prev: bool,
}

impl ResetGuard {
    fn acquire(flag: &Rc<Cell<bool>>) -> Self {
        let prev = flag.replace(true);
        Self {
            flag: Rc::clone(flag),
            prev,
        }
    }
}

impl Drop for ResetGuard {
    fn drop(&mut self) {
        self.flag.set(self.prev);
    }
}

/// Memoizing evaluator over a node graph
#[derive(Default)]
pub struct Evaluator {
    cache: StageHandleCache,
    /// Nodes currently being computed, to cut off re-entrant pulls when the
    /// host managed to wire a true cycle
    computing: HashSet<NodeId>,
    resetting: Rc<Cell<bool>>,
}

impl Evaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a reset pass is currently running. Hosts suppress their
    /// generic "graph changed" notification while this is true.
    pub fn is_resetting(&self) -> bool {
        self.resetting.get()
    }

    /// Evaluation state of a node in the current generation
    pub fn node_state(&self, node_id: NodeId) -> NodeState {
        if self.cache.contains(node_id) {
            NodeState::Computed
        } else {
            NodeState::Uncomputed
        }
    }

    pub fn cache(&self) -> &StageHandleCache {
        &self.cache
    }

    /// Returns the node's stage, computing it if this generation hasn't yet.
    ///
    /// A cache hit returns the stored handle without re-entering compute.
    /// Engine failures are caught here, logged, and degraded to absent so one
    /// bad node cannot abort evaluation of sibling subgraphs.
    pub fn final_compute(
        &mut self,
        node_id: NodeId,
        graph: &NodeGraph,
        engine: &dyn UsdEngine,
        ctx: &EvalContext,
        hooks: &mut dyn HostHooks,
    ) -> Option<StageHandle> {
        if let Some(handle) = self.cache.get(node_id) {
            return Some(handle);
        }
        let node = graph.node(node_id)?;
        if node.kind().is_transparent() {
            let producer = graph.resolve_producer(node_id, 0)?;
            return self.final_compute(producer, graph, engine, ctx, hooks);
        }
        if !self.computing.insert(node_id) {
            warn!(
                "evaluation re-entered node {}; graph has a cycle, treating branch as absent",
                node_id
            );
            return None;
        }

        let mut inputs = Vec::with_capacity(node.inputs.len());
        for port in 0..node.inputs.len() {
            inputs.push(self.input_handle(node_id, port, graph, engine, ctx, hooks));
        }
        let result = match kinds::compute(node, &inputs, engine, ctx) {
            Ok(result) => result,
            Err(err) => {
                warn!(
                    "compute failed for node {} ({}): {}",
                    node_id,
                    node.kind().engine_id(),
                    err
                );
                None
            }
        };
        self.computing.remove(&node_id);

        debug!(
            "computed node {} ({}) -> {:?}",
            node_id,
            node.kind().engine_id(),
            result
        );
        self.cache.set(node_id, result, engine);
        hooks.node_computed(node_id, node.kind(), result);
        result
    }

    /// Resolves the handle feeding an input port.
    ///
    /// Returns absent for an unlinked port, a dangling link, or a chain of
    /// transparent nodes with nothing at the far end; otherwise triggers the
    /// producer's `final_compute` and returns its result.
    pub fn input_handle(
        &mut self,
        node_id: NodeId,
        port: PortId,
        graph: &NodeGraph,
        engine: &dyn UsdEngine,
        ctx: &EvalContext,
        hooks: &mut dyn HostHooks,
    ) -> Option<StageHandle> {
        let producer = graph.resolve_producer(node_id, port)?;
        self.final_compute(producer, graph, engine, ctx, hooks)
    }

    /// Drops a node's cache entry, releasing the handle if unshared
    pub fn free_node(&mut self, node_id: NodeId, engine: &dyn UsdEngine) {
        self.cache.free(node_id, engine);
    }

    /// Releases every cached stage. Document teardown entry point.
    pub fn free_all(&mut self, engine: &dyn UsdEngine) {
        self.cache.free_all(engine);
    }

    /// Invalidates and eagerly recomputes a node and everything downstream.
    ///
    /// A soft reset (`hard == false`) only touches nodes whose kind opts into
    /// recomputation on sweeps, plus consumers of any node that resolved to a
    /// different stage earlier in the same pass; a hard reset touches every
    /// node reached. Transparent nodes are traversed but never reset
    /// themselves. Errors if the downstream walk runs into a true cycle.
    pub fn reset_node(
        &mut self,
        start: NodeId,
        hard: bool,
        graph: &NodeGraph,
        engine: &dyn UsdEngine,
        ctx: &EvalContext,
        hooks: &mut dyn HostHooks,
    ) -> Result<(), String> {
        let order = Self::downstream_order(graph, start)?;
        let _guard = ResetGuard::acquire(&self.resetting);
        let mut dirty = HashSet::new();
        for node_id in order {
            self.reset_one(node_id, hard, &mut dirty, graph, engine, ctx, hooks);
        }
        Ok(())
    }

    /// Resets every node in the graph, sources before consumers.
    ///
    /// Used on full document reset and on structural edits. Surfaces a cycle
    /// in the host-constructed graph as a hard error.
    pub fn reset_all(
        &mut self,
        hard: bool,
        graph: &NodeGraph,
        engine: &dyn UsdEngine,
        ctx: &EvalContext,
        hooks: &mut dyn HostHooks,
    ) -> Result<(), String> {
        let order = graph.topo_order()?;
        debug!("reset_all hard={} over {} nodes", hard, order.len());
        let _guard = ResetGuard::acquire(&self.resetting);
        let mut dirty = HashSet::new();
        for node_id in order {
            self.reset_one(node_id, hard, &mut dirty, graph, engine, ctx, hooks);
        }
        Ok(())
    }

    fn reset_one(
        &mut self,
        node_id: NodeId,
        hard: bool,
        dirty: &mut HashSet<NodeId>,
        graph: &NodeGraph,
        engine: &dyn UsdEngine,
        ctx: &EvalContext,
        hooks: &mut dyn HostHooks,
    ) {
        let Some(node) = graph.node(node_id) else {
            return;
        };
        if node.kind().is_transparent() {
            return;
        }
        if !hard && !node.kind().use_hard_reset() && !dirty.contains(&node_id) {
            return;
        }
        let prior = self.cache.peek(node_id);
        self.cache.free(node_id, engine);
        let fresh = self.final_compute(node_id, graph, engine, ctx, hooks);
        // A producer that resolved to a different stage invalidates its
        // consumers for the rest of this pass, soft-exempt or not
        if fresh != prior {
            Self::mark_consumers_dirty(graph, node_id, dirty);
        }
    }

    fn mark_consumers_dirty(graph: &NodeGraph, node_id: NodeId, dirty: &mut HashSet<NodeId>) {
        for consumer in graph.consumers_of(node_id) {
            let transparent = graph
                .node(consumer)
                .is_some_and(|n| n.kind().is_transparent());
            if transparent {
                // Reroutes and frames forward the change to their consumers;
                // the insert doubles as the loop cutoff
                if dirty.insert(consumer) {
                    Self::mark_consumers_dirty(graph, consumer, dirty);
                }
            } else {
                dirty.insert(consumer);
            }
        }
    }

    /// Topological order of the non-transparent nodes reachable from
    /// `start` through outgoing links, `start` included.
    ///
    /// A node reachable along two paths appears once; a back-edge in the
    /// in-progress path is a cycle and errors out.
    fn downstream_order(graph: &NodeGraph, start: NodeId) -> Result<Vec<NodeId>, String> {
        let mut visited = HashSet::new();
        let mut on_path = HashSet::new();
        let mut postorder = Vec::new();
        Self::visit_downstream(graph, start, &mut visited, &mut on_path, &mut postorder)?;
        postorder.reverse();
        Ok(postorder)
    }

    fn visit_downstream(
        graph: &NodeGraph,
        node_id: NodeId,
        visited: &mut HashSet<NodeId>,
        on_path: &mut HashSet<NodeId>,
        postorder: &mut Vec<NodeId>,
    ) -> Result<(), String> {
        if on_path.contains(&node_id) {
            return Err(format!("cycle detected through node {} during reset", node_id));
        }
        if !visited.insert(node_id) {
            return Ok(());
        }
        on_path.insert(node_id);
        let mut consumers = graph.consumers_of(node_id);
        consumers.sort_unstable();
        for consumer in consumers {
            Self::visit_downstream(graph, consumer, visited, on_path, postorder)?;
        }
        on_path.remove(&node_id);
        if graph.node(node_id).is_some_and(|n| !n.kind().is_transparent()) {
            postorder.push(node_id);
        }
        Ok(())
    }
}
