//! Graph container: the host-facing surface of the evaluation core
//!
//! Owns the node collection, the evaluator and the engine boundary, and
//! translates host edit events into resets. The host calls `update()` on any
//! tree-level edit notification, the event methods for scene changes, and
//! reads the resolved stage off the Output node.

use crate::engine::{StageHandle, UsdEngine};
use crate::evaluator::Evaluator;
use crate::graph::{Connection, NodeGraph};
use crate::hooks::{HostHooks, NoopHooks};
use crate::inspect::{PrimTreeItem, PrimTreeState};
use crate::kinds::EvalContext;
use crate::node::{Node, NodeId, NodeKind, NodeParams};
use crate::port::PortId;
use log::{error, info};
use std::cell::Cell;
use std::rc::Rc;

/// Restores the update-suppression flag on every exit path
struct SuppressGuard {
    flag: Rc<Cell<bool>>,
    prev: bool,
}

impl Drop for SuppressGuard {
    fn drop(&mut self) {
        self.flag.set(self.prev);
    }
}

/// Owns a node graph together with everything needed to evaluate it
pub struct GraphContainer {
    graph: NodeGraph,
    evaluator: Evaluator,
    engine: Box<dyn UsdEngine>,
    hooks: Box<dyn HostHooks>,
    ctx: EvalContext,
    prim_tree: PrimTreeState,
    suppress_updates: Rc<Cell<bool>>,
}

impl GraphContainer {
    pub fn new(engine: Box<dyn UsdEngine>) -> Self {
        Self::with_hooks(engine, Box::new(NoopHooks))
    }

    pub fn with_hooks(engine: Box<dyn UsdEngine>, hooks: Box<dyn HostHooks>) -> Self {
        Self {
            graph: NodeGraph::new(),
            evaluator: Evaluator::new(),
            engine,
            hooks,
            ctx: EvalContext::default(),
            prim_tree: PrimTreeState::new(),
            suppress_updates: Rc::new(Cell::new(false)),
        }
    }

    pub fn graph(&self) -> &NodeGraph {
        &self.graph
    }

    pub fn evaluator(&self) -> &Evaluator {
        &self.evaluator
    }

    pub fn context(&self) -> &EvalContext {
        &self.ctx
    }

    /// Replaces the ambient host snapshot. Callers follow up with the
    /// matching event method so affected nodes recompute.
    pub fn set_context(&mut self, ctx: EvalContext) {
        self.ctx = ctx;
    }

    /// Adds a node, rejecting a second Output node: only one node may drive
    /// downstream host state, so the ambiguity is refused at add time.
    pub fn add_node(&mut self, node: Node) -> Result<NodeId, String> {
        if node.kind() == NodeKind::Output && self.output_node().is_some() {
            return Err("graph already has an Output node".to_string());
        }
        Ok(self.graph.add_node(node))
    }

    /// Removes a node, frees its cached stage and listing state, and
    /// hard-resets its former consumers so they drop the lost input.
    pub fn remove_node(&mut self, node_id: NodeId) -> Option<Node> {
        let consumers = self.graph.consumers_of(node_id);
        self.free_node(node_id);
        let removed = self.graph.remove_node(node_id)?;
        for consumer in consumers {
            if let Err(err) = self.reset_node(consumer, true) {
                error!("reset after removing node {} failed: {}", node_id, err);
            }
        }
        Some(removed)
    }

    /// Links a producer's output to a consumer's input port and hard-resets
    /// the consumer's subtree.
    ///
    /// An edge that would close a cycle is rolled back, restoring whatever
    /// link occupied the port before, so the graph stays evaluable.
    pub fn connect(&mut self, from: NodeId, to: NodeId, to_port: PortId) -> Result<(), String> {
        let prior = self.graph.connection_to(to, to_port).cloned();
        self.graph
            .add_connection(Connection::new(from, to, to_port))?;
        if let Err(err) = self.reset_node(to, true) {
            self.graph.remove_connection(to, to_port);
            if let Some(prior) = prior {
                let _ = self.graph.add_connection(prior);
            }
            return Err(err);
        }
        Ok(())
    }

    /// Unlinks an input port; a no-op when nothing was connected
    pub fn disconnect(&mut self, to: NodeId, to_port: PortId) -> Result<(), String> {
        if self.graph.remove_connection(to, to_port).is_some() {
            self.reset_node(to, true)?;
        }
        Ok(())
    }

    /// Host notification that something in the tree may have changed.
    ///
    /// Suppressed while the container performs a multi-step edit of its own
    /// and while a reset pass is already running; otherwise a soft sweep
    /// over the whole container.
    pub fn update(&mut self) -> Result<(), String> {
        if self.suppress_updates.get() || self.evaluator.is_resetting() {
            return Ok(());
        }
        self.reset_all(false)
    }

    /// Full hard rebuild of every cached stage
    pub fn reset(&mut self) -> Result<(), String> {
        self.reset_all(true)
    }

    fn reset_all(&mut self, hard: bool) -> Result<(), String> {
        self.evaluator.reset_all(
            hard,
            &self.graph,
            self.engine.as_ref(),
            &self.ctx,
            self.hooks.as_mut(),
        )
    }

    /// The designated Output node, if the graph has one
    pub fn output_node(&self) -> Option<NodeId> {
        self.graph
            .nodes
            .values()
            .filter(|n| n.kind() == NodeKind::Output)
            .map(|n| n.id)
            .min()
    }

    /// The graph's resolved stage: the Output node's cached result
    pub fn resolved_stage(&self) -> Option<StageHandle> {
        self.evaluator.cache().peek(self.output_node()?)
    }

    /// Cached stage of any node, without computing
    pub fn cached_stage(&self, node_id: NodeId) -> Option<StageHandle> {
        self.evaluator.cache().peek(node_id)
    }

    /// Demands a node's stage, computing whatever the generation is missing
    pub fn final_compute(&mut self, node_id: NodeId) -> Option<StageHandle> {
        self.evaluator.final_compute(
            node_id,
            &self.graph,
            self.engine.as_ref(),
            &self.ctx,
            self.hooks.as_mut(),
        )
    }

    /// Invalidates a node and its downstream subtree; soft resets honor the
    /// per-kind opt-out.
    pub fn reset_node(&mut self, node_id: NodeId, hard: bool) -> Result<(), String> {
        self.evaluator.reset_node(
            node_id,
            hard,
            &self.graph,
            self.engine.as_ref(),
            &self.ctx,
            self.hooks.as_mut(),
        )
    }

    /// Drops a node's cache entry and node-local side-table state
    pub fn free_node(&mut self, node_id: NodeId) {
        self.evaluator.free_node(node_id, self.engine.as_ref());
        self.prim_tree.forget(node_id);
    }

    /// Releases every cached stage and side table. Document teardown.
    pub fn free_all(&mut self) {
        self.evaluator.free_all(self.engine.as_ref());
        self.prim_tree.clear();
    }

    /// Runs a multi-step edit with host update notifications suppressed.
    ///
    /// The flag is restored on every exit path, so a panicking closure
    /// cannot leave the container deaf to future updates.
    pub fn no_update_call<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        let _guard = SuppressGuard {
            prev: self.suppress_updates.replace(true),
            flag: Rc::clone(&self.suppress_updates),
        };
        f(self)
    }

    /// Replaces the graph with the default starter document: one source node
    /// wired straight into an Output node, then a hard reset.
    pub fn add_basic_nodes(&mut self, source_kind: NodeKind) -> Result<(NodeId, NodeId), String> {
        if source_kind.default_input_count() != 0 {
            return Err(format!(
                "{} is not a source kind",
                source_kind.engine_id()
            ));
        }
        let (source, output) = self.no_update_call(|container| {
            container.free_all();
            container.graph = NodeGraph::new();
            let source = container.graph.add_node(Node::new(source_kind, "Source"));
            let output = container.graph.add_node(Node::new(NodeKind::Output, "Output"));
            container
                .graph
                .add_connection(Connection::new(source, output, 0))?;
            Ok::<_, String>((source, output))
        })?;
        info!("built starter graph: {} -> Output", source_kind.engine_id());
        self.reset()?;
        Ok((source, output))
    }

    /// Replaces a node's parameters and hard-resets its subtree.
    ///
    /// The new parameters must be of the node's own kind; a Merge keeps at
    /// least as many ports as its highest linked input needs.
    pub fn set_params(&mut self, node_id: NodeId, params: NodeParams) -> Result<(), String> {
        let min_ports = self.min_merge_ports(node_id);
        let node = self
            .graph
            .node_mut(node_id)
            .ok_or_else(|| format!("node {} does not exist", node_id))?;
        if params.kind() != node.kind() {
            return Err(format!(
                "cannot change node {} from {} to {}",
                node_id,
                node.kind().engine_id(),
                params.kind().engine_id()
            ));
        }
        if let NodeParams::Merge { inputs_number } = params {
            node.set_merge_inputs(inputs_number, min_ports);
        } else {
            node.params = params;
        }
        self.node_parameter_changed(node_id)
    }

    /// Adjusts the visible input count of a Merge node
    pub fn set_merge_inputs(&mut self, node_id: NodeId, count: usize) -> Result<(), String> {
        self.set_params(node_id, NodeParams::Merge {
            inputs_number: count,
        })
    }

    /// Host signal that a node's parameters were edited in place.
    ///
    /// A parameter edit makes the node's output known-invalid, so this is
    /// always a hard reset regardless of the kind's soft-sweep opt-out.
    pub fn node_parameter_changed(&mut self, node_id: NodeId) -> Result<(), String> {
        self.reset_node(node_id, true)
    }

    /// Host depsgraph change: everything derived from live scene data is
    /// rebuilt along with its downstream subtrees.
    pub fn depsgraph_update(&mut self) -> Result<(), String> {
        for node_id in self.scene_derived_nodes() {
            self.reset_node(node_id, true)?;
        }
        Ok(())
    }

    /// Host frame change: scene snapshots are time-dependent
    pub fn frame_change(&mut self, frame: f64) -> Result<(), String> {
        self.ctx.frame = frame;
        for node_id in self.scene_derived_nodes() {
            self.reset_node(node_id, true)?;
        }
        Ok(())
    }

    /// Host material edit: affects the scene snapshot contents
    pub fn material_update(&mut self, _material: &str) -> Result<(), String> {
        for node_id in self.nodes_of_kind(NodeKind::SceneSource) {
            self.reset_node(node_id, true)?;
        }
        Ok(())
    }

    /// Debug/print operator: usda text of a node's stage
    pub fn export_node_to_string(
        &mut self,
        node_id: NodeId,
        flatten: bool,
    ) -> Result<Option<String>, String> {
        match self.final_compute(node_id) {
            Some(handle) => self
                .engine
                .stage_export_to_str(handle, flatten)
                .map(Some),
            None => Ok(None),
        }
    }

    /// UI tree listing of a node's stage; empty when the node resolves to
    /// nothing
    pub fn prim_tree_items(&mut self, node_id: NodeId) -> Result<Vec<PrimTreeItem>, String> {
        match self.final_compute(node_id) {
            Some(handle) => self.prim_tree.items(node_id, handle, self.engine.as_ref()),
            None => Ok(Vec::new()),
        }
    }

    /// Expands or collapses a prim path in a node's tree listing
    pub fn toggle_prim(&mut self, node_id: NodeId, path: &str) {
        self.prim_tree.toggle(node_id, path);
    }

    fn nodes_of_kind(&self, kind: NodeKind) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self
            .graph
            .nodes
            .values()
            .filter(|n| n.kind() == kind)
            .map(|n| n.id)
            .collect();
        ids.sort_unstable();
        ids
    }

    fn scene_derived_nodes(&self) -> Vec<NodeId> {
        let mut ids = self.nodes_of_kind(NodeKind::SceneSource);
        ids.extend(self.nodes_of_kind(NodeKind::TransformByProxy));
        ids.sort_unstable();
        ids
    }

    fn min_merge_ports(&self, node_id: NodeId) -> usize {
        self.graph
            .connections
            .iter()
            .filter(|c| c.to_node == node_id)
            .map(|c| c.to_port + 1)
            .max()
            .unwrap_or(0)
    }
}

impl Drop for GraphContainer {
    fn drop(&mut self) {
        self.free_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::mock::MockEngine;
    use crate::engine::{EngineArg, PrimInfo};
    use crate::node::PrimType;

    fn container() -> (GraphContainer, MockEngine) {
        let engine = MockEngine::new();
        (GraphContainer::new(Box::new(engine.clone())), engine)
    }

    #[test]
    fn test_add_basic_nodes_builds_starter_graph() {
        let (mut container, _engine) = container();
        let (source, output) = container.add_basic_nodes(NodeKind::SceneSource).unwrap();
        assert_eq!(container.graph().nodes.len(), 2);
        assert_eq!(container.output_node(), Some(output));
        // The hard reset already computed both nodes
        assert!(container.cached_stage(source).is_some());
        assert_eq!(container.resolved_stage(), container.cached_stage(source));
    }

    #[test]
    fn test_add_basic_nodes_rejects_non_source() {
        let (mut container, _engine) = container();
        assert!(container.add_basic_nodes(NodeKind::Filter).is_err());
    }

    #[test]
    fn test_second_output_rejected() {
        let (mut container, _engine) = container();
        container
            .add_node(Node::new(NodeKind::Output, "out"))
            .unwrap();
        let err = container
            .add_node(Node::new(NodeKind::Output, "another"))
            .unwrap_err();
        assert!(err.contains("Output"));
    }

    #[test]
    fn test_update_suppressed_inside_no_update_call() {
        let (mut container, engine) = container();
        container.add_basic_nodes(NodeKind::SceneSource).unwrap();
        let computes_before = engine.total_compute_count();

        container.no_update_call(|c| {
            c.update().unwrap();
            c.update().unwrap();
        });
        assert_eq!(engine.total_compute_count(), computes_before);

        // Outside the scope the sweep runs again (scene source recomputes)
        container.update().unwrap();
        assert!(engine.total_compute_count() > computes_before);
    }

    #[test]
    fn test_suppress_flag_restored_after_panic() {
        let (mut container, _engine) = container();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            container.no_update_call(|_| panic!("host edit failed"));
        }));
        assert!(result.is_err());
        assert!(!container.suppress_updates.get());
    }

    #[test]
    fn test_parameter_change_is_hard_reset() {
        let (mut container, engine) = container();
        let (source, _output) = container.add_basic_nodes(NodeKind::SceneSource).unwrap();
        let filter = container
            .add_node(Node::new(NodeKind::Filter, "filter"))
            .unwrap();
        container.connect(source, filter, 0).unwrap();
        let before = engine.compute_count("Filter");

        container
            .set_params(
                filter,
                NodeParams::Filter {
                    pattern: "/World/**".to_string(),
                },
            )
            .unwrap();
        assert_eq!(engine.compute_count("Filter"), before + 1);
        let args = engine.last_args("Filter").unwrap();
        assert_eq!(args[1], EngineArg::Str("/World/**".to_string()));
    }

    #[test]
    fn test_set_params_rejects_kind_change() {
        let (mut container, _engine) = container();
        let filter = container
            .add_node(Node::new(NodeKind::Filter, "filter"))
            .unwrap();
        assert!(container.set_params(filter, NodeParams::Output).is_err());
    }

    #[test]
    fn test_set_merge_inputs_keeps_linked_ports() {
        let (mut container, _engine) = container();
        let a = container
            .add_node(Node::new(NodeKind::SceneSource, "a"))
            .unwrap();
        let merge = container
            .add_node(Node::new(NodeKind::Merge, "merge"))
            .unwrap();
        container.set_merge_inputs(merge, 4).unwrap();
        container.connect(a, merge, 3).unwrap();

        // Port 3 is linked, so the count cannot drop below four
        container.set_merge_inputs(merge, 2).unwrap();
        assert_eq!(container.graph().node(merge).unwrap().inputs.len(), 4);
    }

    #[test]
    fn test_remove_node_frees_cache_and_resets_consumers() {
        let (mut container, engine) = container();
        let (source, output) = container.add_basic_nodes(NodeKind::SceneSource).unwrap();
        let handle = container.cached_stage(source).unwrap();

        container.remove_node(source);
        assert_eq!(container.cached_stage(source), None);
        assert!(engine.free_count(handle) >= 1);
        // The output recomputed to an absent input
        assert_eq!(container.cached_stage(output), None);
    }

    #[test]
    fn test_depsgraph_update_rebuilds_scene_nodes_only() {
        let (mut container, engine) = container();
        container.add_basic_nodes(NodeKind::SceneSource).unwrap();
        let scene_before = engine.compute_count("Source-SceneData");

        container.depsgraph_update().unwrap();
        assert_eq!(
            engine.compute_count("Source-SceneData"),
            scene_before + 1
        );
    }

    #[test]
    fn test_frame_change_updates_context() {
        let (mut container, engine) = container();
        container.add_basic_nodes(NodeKind::SceneSource).unwrap();
        container.frame_change(42.0).unwrap();
        assert_eq!(container.context().frame, 42.0);
        let args = engine.last_args("Source-SceneData").unwrap();
        assert_eq!(args[2], EngineArg::Float(42.0));
    }

    #[test]
    fn test_export_absent_node_is_none() {
        let (mut container, _engine) = container();
        let file = container
            .add_node(Node::new(NodeKind::FileSource, "file"))
            .unwrap();
        assert_eq!(container.export_node_to_string(file, true).unwrap(), None);
    }

    #[test]
    fn test_update_after_scene_change_refreshes_downstream() {
        let (mut container, engine) = container();
        let scene = container
            .add_node(Node::new(NodeKind::SceneSource, "scene"))
            .unwrap();
        let root = container
            .add_node(Node::with_params(
                NodeParams::Root {
                    name: String::new(),
                    prim_type: PrimType::Xform,
                },
                "root",
            ))
            .unwrap();
        let output = container
            .add_node(Node::new(NodeKind::Output, "out"))
            .unwrap();
        container.connect(scene, root, 0).unwrap();
        container.connect(root, output, 0).unwrap();
        let stale = container.resolved_stage().unwrap();

        container.set_context(EvalContext {
            scene_name: "SceneV2".to_string(),
            ..EvalContext::default()
        });
        container.update().unwrap();

        // The new snapshot flows through the pass-through root to the output
        let fresh = container.cached_stage(scene).unwrap();
        assert_ne!(fresh, stale);
        assert_eq!(container.cached_stage(root), Some(fresh));
        assert_eq!(container.resolved_stage(), Some(fresh));
        assert_eq!(engine.free_count(stale), 1);
    }

    #[test]
    fn test_connect_cycle_rolls_back_edge() {
        let (mut container, _engine) = container();
        let a = container
            .add_node(Node::new(NodeKind::Filter, "a"))
            .unwrap();
        let b = container
            .add_node(Node::new(NodeKind::Filter, "b"))
            .unwrap();
        container.connect(a, b, 0).unwrap();

        let err = container.connect(b, a, 0).unwrap_err();
        assert!(err.contains("cycle"));
        // The offending edge is gone and the container stays evaluable
        assert!(container.graph().connection_to(a, 0).is_none());
        container.update().unwrap();
        container.reset().unwrap();
    }

    #[test]
    fn test_connect_cycle_restores_replaced_link() {
        let (mut container, _engine) = container();
        let source = container
            .add_node(Node::new(NodeKind::SceneSource, "scene"))
            .unwrap();
        let a = container
            .add_node(Node::new(NodeKind::Filter, "a"))
            .unwrap();
        let b = container
            .add_node(Node::new(NodeKind::Filter, "b"))
            .unwrap();
        container.connect(a, b, 0).unwrap();
        container.connect(source, a, 0).unwrap();

        // Linking b into a's occupied port would close a cycle; the prior
        // link from the source must survive the rollback
        assert!(container.connect(b, a, 0).is_err());
        let feeding = container.graph().connection_to(a, 0).unwrap();
        assert_eq!(feeding.from_node, source);
        container.reset().unwrap();
    }

    #[test]
    fn test_prim_tree_listing_through_container() {
        let (mut container, engine) = container();
        engine.set_prim(
            "/",
            PrimInfo {
                name: "/".to_string(),
                prim_type: String::new(),
                children: vec!["World".to_string()],
                visible: true,
                path: "/".to_string(),
            },
        );
        let (scene, _output) = container.add_basic_nodes(NodeKind::SceneSource).unwrap();

        let items = container.prim_tree_items(scene).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].info.path, "/");

        container.toggle_prim(scene, "/");
        let items = container.prim_tree_items(scene).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].info.path, "/World");
        assert_eq!(items[1].depth, 1);

        // A node that resolves to nothing lists nothing
        let file = container
            .add_node(Node::new(NodeKind::FileSource, "file"))
            .unwrap();
        assert!(container.prim_tree_items(file).unwrap().is_empty());
    }

    #[test]
    fn test_free_all_on_drop_releases_handles() {
        let engine = MockEngine::new();
        let mut container = GraphContainer::new(Box::new(engine.clone()));
        container.add_basic_nodes(NodeKind::SceneSource).unwrap();
        let handle = container.resolved_stage().unwrap();
        drop(container);
        assert_eq!(engine.free_count(handle), 1);
    }
}
