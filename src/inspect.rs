//! Stage inspection helpers outside the evaluation path
//!
//! Backs the host's "print stage" operator and the expandable prim tree
//! list. Expansion state is a side table keyed by node identity and must be
//! dropped together with the node's cache entry.

use crate::engine::{PrimInfo, StageHandle, UsdEngine};
use crate::node::NodeId;
use std::collections::{HashMap, HashSet};

/// One row of the flattened prim tree listing
#[derive(Debug, Clone, PartialEq)]
pub struct PrimTreeItem {
    pub info: PrimInfo,
    pub depth: usize,
    pub expanded: bool,
}

/// Per-node prim tree expansion state
#[derive(Debug, Default)]
pub struct PrimTreeState {
    expanded: HashMap<NodeId, HashSet<String>>,
}

impl PrimTreeState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Expands or collapses a prim path in a node's listing
    pub fn toggle(&mut self, node_id: NodeId, path: &str) {
        let paths = self.expanded.entry(node_id).or_default();
        if !paths.remove(path) {
            paths.insert(path.to_string());
        }
    }

    pub fn is_expanded(&self, node_id: NodeId, path: &str) -> bool {
        self.expanded
            .get(&node_id)
            .is_some_and(|paths| paths.contains(path))
    }

    /// Drops the listing state for a removed node
    pub fn forget(&mut self, node_id: NodeId) {
        self.expanded.remove(&node_id);
    }

    pub fn clear(&mut self) {
        self.expanded.clear();
    }

    /// Flattened listing of a node's stage, following expanded paths only.
    ///
    /// Children of collapsed prims are not queried; a deep stage costs only
    /// as much as the user has opened.
    pub fn items(
        &self,
        node_id: NodeId,
        handle: StageHandle,
        engine: &dyn UsdEngine,
    ) -> Result<Vec<PrimTreeItem>, String> {
        let mut items = Vec::new();
        self.collect(node_id, handle, engine, "/", 0, &mut items)?;
        Ok(items)
    }

    fn collect(
        &self,
        node_id: NodeId,
        handle: StageHandle,
        engine: &dyn UsdEngine,
        path: &str,
        depth: usize,
        items: &mut Vec<PrimTreeItem>,
    ) -> Result<(), String> {
        let info = engine.stage_prim_get_info(handle, path)?;
        let expanded = self.is_expanded(node_id, path);
        let children = info.children.clone();
        items.push(PrimTreeItem {
            info,
            depth,
            expanded,
        });
        if expanded {
            for child in children {
                let child_path = if path == "/" {
                    format!("/{}", child)
                } else {
                    format!("{}/{}", path, child)
                };
                self.collect(node_id, handle, engine, &child_path, depth + 1, items)?;
            }
        }
        Ok(())
    }
}
