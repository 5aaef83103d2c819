//! Host notification hooks for the evaluation lifecycle
//!
//! The host wires dependent systems (viewport sync, final-render sync) to
//! the Output node's notifications through this trait.

use crate::engine::StageHandle;
use crate::node::{NodeId, NodeKind};

/// Callbacks the evaluator fires as nodes compute
pub trait HostHooks {
    /// Called once after a node's compute completes and is cached, never on
    /// a cache hit. `stage` is the computed result; `None` means the node's
    /// branch produced nothing, and hosts should clear dependent state.
    fn node_computed(&mut self, node_id: NodeId, kind: NodeKind, stage: Option<StageHandle>) {
        let _ = (node_id, kind, stage);
    }
}

/// Default implementation for hosts that don't need notifications
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHooks;

impl HostHooks for NoopHooks {}
